//! Conversion of symbol streams into procedures, variables, scopes and inline sites.
//!
//! A symbol stream is a flat sequence of records in which procedures, blocks and inline sites
//! open scopes that are closed by `S_END` or `S_INLINESITE_END`. [`convert_symbols`] runs a
//! state machine over such a sequence with an explicit stack of open scopes. Locals declared by
//! `S_LOCAL` receive their locations from the `S_DEFRANGE_*` records that directly follow them.

use std::collections::HashMap;
use std::ops::Range;

use smallvec::SmallVec;
use symbolic_common::{container_name, Arch};

use crate::chunk::ChunkList;
use crate::cv;
use crate::error::CodeViewError;
use crate::inline::inline_site_ranges;
use crate::location::{split_range, Location, Register};
use crate::model::{
    Container, InlineSite, InlineSiteId, LineTableId, Local, LocalKind, LocationCase, Procedure,
    ProcedureId, Scope, ScopeId, TypeId, Variable, VoffRange,
};
use crate::reader::RecordReader;
use crate::records::{
    AddressRange, BlockSymbol, DataSymbol, DefRange, FrameProcedureSymbol, InlineSiteSymbol,
    LocalSymbol, ProcedureSymbol, RegisterRelativeSymbol, SymbolData, ThreadStorageSymbol,
};
use crate::source::{SectionTable, SymbolRecord, SymbolStream, TypeStream};
use crate::types::{TypeGraph, TypeNameIndex};

/// Selects which kinds of symbols are emitted.
///
/// Scopes are tracked regardless, so disabling a kind never changes how others nest.
#[derive(Clone, Copy, Debug)]
pub struct SymbolOptions {
    pub procedures: bool,
    pub global_variables: bool,
    pub thread_variables: bool,
    pub scopes: bool,
    /// Locals are attached to scopes and require `scopes`.
    pub locals: bool,
    pub inline_sites: bool,
}

impl Default for SymbolOptions {
    fn default() -> Self {
        Self {
            procedures: true,
            global_variables: true,
            thread_variables: true,
            scopes: true,
            locals: true,
            inline_sites: true,
        }
    }
}

/// Linker names of public symbols, keyed by virtual offset.
#[derive(Clone, Debug, Default)]
pub struct LinkNames {
    names: HashMap<u64, String>,
}

impl LinkNames {
    /// Collects the `S_PUB32` records of the global symbol stream.
    ///
    /// If several public symbols share an address, the first one wins.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn build(globals: &SymbolStream, sections: &SectionTable) -> Self {
        let mut names = HashMap::new();

        for record in globals.records() {
            if record.kind != cv::S_PUB32 {
                continue;
            }

            match record.parse() {
                Ok(Some(SymbolData::Public(public))) => {
                    if let Some(voff) = public.offset.voff(sections) {
                        names.entry(voff).or_insert(public.name);
                    }
                }
                Ok(_) => (),
                Err(error) => {
                    tracing::debug!(offset = record.offset, %error, "invalid public symbol");
                }
            }
        }

        Self { names }
    }

    pub fn get(&self, voff: u64) -> Option<&str> {
        self.names.get(&voff).map(String::as_str)
    }
}

/// Read-only state shared by all symbol tasks.
#[derive(Clone, Copy, Debug)]
pub struct SymbolContext<'a> {
    pub arch: Arch,
    pub graph: &'a TypeGraph,
    pub names: &'a TypeNameIndex,
    pub ipi: &'a TypeStream,
    pub sections: &'a SectionTable,
    pub link_names: &'a LinkNames,
    pub options: SymbolOptions,
}

/// The symbols produced from one range of a symbol stream.
///
/// Ids refer to positions within this output until it is appended to another one.
#[derive(Debug, Default)]
pub struct SymbolOutput {
    pub procedures: ChunkList<Procedure>,
    pub global_variables: ChunkList<Variable>,
    pub thread_variables: ChunkList<Variable>,
    pub scopes: ChunkList<Scope>,
    pub inline_sites: ChunkList<InlineSite>,
}

impl SymbolOutput {
    /// Shifts all ids by the given bases.
    fn rebase(&mut self, procedures: u32, scopes: u32, inline_sites: u32) {
        fn rebase_container(container: &mut Container, procedures: u32) {
            if let Container::Procedure(id) = container {
                id.rebase(procedures);
            }
        }

        for procedure in self.procedures.iter_mut() {
            rebase_container(&mut procedure.container, procedures);
            if let Some(scope) = &mut procedure.root_scope {
                scope.rebase(scopes);
            }
        }

        for variable in self
            .global_variables
            .iter_mut()
            .chain(self.thread_variables.iter_mut())
        {
            rebase_container(&mut variable.container, procedures);
        }

        for scope in self.scopes.iter_mut() {
            if let Some(parent) = &mut scope.parent {
                parent.rebase(scopes);
            }
            if let Some(procedure) = &mut scope.procedure {
                procedure.rebase(procedures);
            }
            if let Some(inline_site) = &mut scope.inline_site {
                inline_site.rebase(inline_sites);
            }
            for child in &mut scope.children {
                child.rebase(scopes);
            }
        }
    }

    /// Moves the symbols of `other` behind the symbols of `self`, fixing up its ids.
    pub fn append(&mut self, mut other: SymbolOutput) {
        other.rebase(
            self.procedures.len() as u32,
            self.scopes.len() as u32,
            self.inline_sites.len() as u32,
        );

        self.procedures.append(&mut other.procedures);
        self.global_variables.append(&mut other.global_variables);
        self.thread_variables.append(&mut other.thread_variables);
        self.scopes.append(&mut other.scopes);
        self.inline_sites.append(&mut other.inline_sites);
    }
}

/// Splits a symbol stream into ranges of roughly `per_task` records.
///
/// Ranges end only where no scope is open, so every procedure lies within a single range.
pub fn partition_symbols(records: &[SymbolRecord], per_task: usize) -> Vec<Range<usize>> {
    let per_task = per_task.max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;

    for (index, record) in records.iter().enumerate() {
        if cv::opens_scope(record.kind) {
            depth += 1;
        } else if cv::closes_scope(record.kind) {
            depth = depth.saturating_sub(1);
        }

        let end = index + 1;
        if depth == 0 && end - start >= per_task {
            ranges.push(start..end);
            start = end;
        }
    }

    if start < records.len() {
        ranges.push(start..records.len());
    }

    ranges
}

/// Converts a contiguous range of symbol records.
///
/// `inline_tables` holds the line table of each inline site of the range in stream order.
#[tracing::instrument(level = "trace", skip_all, fields(records = records.len()))]
pub fn convert_symbols(
    cx: &SymbolContext<'_>,
    records: &[SymbolRecord],
    inline_tables: &[Option<LineTableId>],
) -> SymbolOutput {
    let mut converter = SymbolConverter {
        cx,
        inline_tables,
        output: SymbolOutput::default(),
        frame_procs: frame_procedures(records),
        stack: Vec::new(),
        procedure_count: 0,
        procedure_voff: 0,
        inline_cursor: 0,
        defrange_target: None,
    };

    for record in records {
        converter.process(record);
    }

    if !converter.stack.is_empty() {
        tracing::debug!(open = converter.stack.len(), "unclosed scopes at end of symbols");
    }

    converter.output
}

/// Collects the `S_FRAMEPROC` of every procedure, indexed by procedure ordinal.
fn frame_procedures(records: &[SymbolRecord]) -> Vec<Option<FrameProcedureSymbol>> {
    let mut frame_procs = Vec::new();

    for record in records {
        match record.kind {
            cv::S_LPROC32 | cv::S_GPROC32 => frame_procs.push(None),
            cv::S_FRAMEPROC => {
                if let Ok(Some(SymbolData::FrameProcedure(frame_proc))) = record.parse() {
                    if let Some(slot) = frame_procs.last_mut() {
                        *slot = Some(frame_proc);
                    }
                }
            }
            _ => (),
        }
    }

    frame_procs
}

/// An open scope.
#[derive(Clone, Copy, Debug, Default)]
struct Frame {
    scope: Option<ScopeId>,
    procedure: Option<ProcedureId>,
}

/// The local that subsequent `S_DEFRANGE_*` records describe.
#[derive(Clone, Copy, Debug)]
struct DefRangeTarget {
    scope: ScopeId,
    local: usize,
    is_param: bool,
}

struct SymbolConverter<'a> {
    cx: &'a SymbolContext<'a>,
    inline_tables: &'a [Option<LineTableId>],
    output: SymbolOutput,
    frame_procs: Vec<Option<FrameProcedureSymbol>>,
    stack: Vec<Frame>,
    procedure_count: usize,
    procedure_voff: u64,
    inline_cursor: usize,
    defrange_target: Option<DefRangeTarget>,
}

impl SymbolConverter<'_> {
    fn process(&mut self, record: &SymbolRecord) {
        let symbol = match record.parse() {
            Ok(Some(symbol)) => symbol,
            Ok(None) => return,
            Err(error) => {
                tracing::debug!(offset = record.offset, kind = record.kind, %error, "skipping malformed symbol");
                self.recover(record.kind);
                return;
            }
        };

        match symbol {
            SymbolData::ScopeEnd | SymbolData::InlineSiteEnd => self.close_scope(record.offset),
            SymbolData::Procedure(procedure) => self.open_procedure(procedure),
            SymbolData::Block(block) => self.open_block(block),
            SymbolData::InlineSite(site) => self.open_inline_site(site),
            SymbolData::Data(data) => self.push_data(data),
            SymbolData::ThreadStorage(thread) => self.push_thread_storage(thread),
            SymbolData::RegisterRelative(regrel) => self.push_register_relative(regrel),
            SymbolData::Local(local) => self.push_local(local),
            SymbolData::DefRange(defrange) => self.push_defrange(defrange),
            SymbolData::FileStatic { .. } => self.defrange_target = None,
            _ => (),
        }
    }

    /// Keeps the scope stack balanced when a scope-opening record cannot be decoded.
    fn recover(&mut self, kind: u16) {
        if !cv::opens_scope(kind) {
            return;
        }

        match kind {
            cv::S_LPROC32 | cv::S_GPROC32 => self.procedure_count += 1,
            cv::S_INLINESITE | cv::S_INLINESITE2 => self.inline_cursor += 1,
            _ => (),
        }

        let procedure = self.top().procedure;
        self.stack.push(Frame {
            scope: None,
            procedure,
        });
    }

    fn top(&self) -> Frame {
        self.stack.last().copied().unwrap_or_default()
    }

    fn type_id(&self, itype: u32) -> Option<TypeId> {
        self.cx.graph.lookup(itype)
    }

    /// The `S_FRAMEPROC` of the most recent procedure.
    fn frame_proc(&self) -> Option<FrameProcedureSymbol> {
        let index = self.procedure_count.checked_sub(1)?;
        self.frame_procs.get(index).copied().flatten()
    }

    /// Resolves what a named symbol is nested in.
    ///
    /// A class named by the qualified name wins over the enclosing procedure.
    fn container(&self, name: &str) -> Container {
        let container_type = container_name(name)
            .and_then(|container| self.cx.names.itype_for_name(container))
            .and_then(|itype| self.type_id(itype));

        match (container_type, self.top().procedure) {
            (Some(type_id), _) => Container::Type(type_id),
            (None, Some(procedure)) => Container::Procedure(procedure),
            (None, None) => Container::None,
        }
    }

    fn push_scope(&mut self, mut scope: Scope) -> ScopeId {
        let id = ScopeId::from_index(self.output.scopes.len());

        if let Some(parent) = self.top().scope {
            scope.parent = Some(parent);
            if let Some(parent) = self.output.scopes.get_mut(parent.index()) {
                parent.children.push(id);
            }
        }

        self.output.scopes.push(scope);
        id
    }

    fn close_scope(&mut self, offset: u32) {
        if self.stack.pop().is_none() {
            tracing::debug!(offset, "scope end without open scope");
        }
        self.defrange_target = None;
    }

    fn open_procedure(&mut self, procedure: ProcedureSymbol) {
        self.procedure_count += 1;

        let range = procedure.range(self.cx.sections);
        if let Some(range) = range {
            self.procedure_voff = range.min;
        }

        let container = self.container(&procedure.name);

        // The root scope of a procedure never has a parent, even if it is nested.
        let scope = self.cx.options.scopes.then(|| {
            let id = ScopeId::from_index(self.output.scopes.len());
            self.output.scopes.push(Scope {
                ranges: range.into_iter().collect(),
                ..Scope::default()
            });
            id
        });

        let procedure_id = self.cx.options.procedures.then(|| {
            let link_name = range
                .filter(|range| range.min != 0)
                .and_then(|range| self.cx.link_names.get(range.min))
                .map(str::to_owned);
            let type_id = self.type_id(procedure.type_index);

            let index = self.output.procedures.push(Procedure {
                type_id,
                name: procedure.name,
                link_name,
                is_extern: procedure.global,
                container,
                root_scope: scope,
            });
            ProcedureId::from_index(index)
        });

        if let Some(scope) = scope.and_then(|id| self.output.scopes.get_mut(id.index())) {
            scope.procedure = procedure_id;
        }

        self.stack.push(Frame {
            scope,
            procedure: procedure_id,
        });
    }

    fn open_block(&mut self, block: BlockSymbol) {
        let top = self.top();
        if self.stack.is_empty() {
            tracing::debug!(name = %block.name, "block outside of a procedure");
        }

        let scope = self.cx.options.scopes.then(|| {
            let ranges = block
                .offset
                .voff(self.cx.sections)
                .map(|start| VoffRange::new(start, start + u64::from(block.len)))
                .into_iter()
                .collect();

            self.push_scope(Scope {
                procedure: top.procedure,
                ranges,
                ..Scope::default()
            })
        });

        self.stack.push(Frame {
            scope,
            procedure: top.procedure,
        });
    }

    fn open_inline_site(&mut self, site: InlineSiteSymbol) {
        let top = self.top();
        if self.stack.is_empty() {
            tracing::debug!(inlinee = site.inlinee, "inline site outside of a procedure");
        }

        let line_table = self.inline_tables.get(self.inline_cursor).copied().flatten();
        self.inline_cursor += 1;

        let inline_site = self.cx.options.inline_sites.then(|| {
            let inline_site = match self.inlinee(site.inlinee) {
                Ok(inline_site) => inline_site,
                Err(error) => {
                    tracing::debug!(inlinee = site.inlinee, %error, "invalid inlinee");
                    InlineSite::default()
                }
            };

            let index = self.output.inline_sites.push(InlineSite {
                line_table,
                ..inline_site
            });
            InlineSiteId::from_index(index)
        });

        let scope = self.cx.options.scopes.then(|| {
            self.push_scope(Scope {
                procedure: top.procedure,
                inline_site,
                ranges: inline_site_ranges(&site.annotations, self.procedure_voff),
                ..Scope::default()
            })
        });

        self.stack.push(Frame {
            scope,
            procedure: top.procedure,
        });
    }

    /// Looks up the name, type and owner of an inlined function in the id stream.
    fn inlinee(&self, inlinee: u32) -> Result<InlineSite, CodeViewError> {
        let Some(leaf) = self.cx.ipi.leaf(inlinee) else {
            return Ok(InlineSite::default());
        };

        let mut reader = RecordReader::new(&leaf.data);
        let (owner, itype) = match leaf.kind {
            cv::LF_MFUNC_ID => (reader.u32()?, reader.u32()?),
            cv::LF_FUNC_ID => {
                // the parent scope is an id, not a type
                let _scope = reader.u32()?;
                (0, reader.u32()?)
            }
            _ => return Ok(InlineSite::default()),
        };

        Ok(InlineSite {
            name: reader.name(),
            type_id: self.type_id(itype),
            owner: (owner != 0).then(|| self.type_id(owner)).flatten(),
            line_table: None,
        })
    }

    fn push_data(&mut self, data: DataSymbol) {
        if !self.cx.options.global_variables {
            return;
        }

        let base = self.cx.sections.base(data.offset.section).unwrap_or(0);
        let variable = Variable {
            type_id: self.type_id(data.type_index),
            offset: base + u64::from(data.offset.offset),
            is_extern: data.global,
            container: self.container(&data.name),
            name: data.name,
        };
        self.output.global_variables.push(variable);
    }

    fn push_thread_storage(&mut self, thread: ThreadStorageSymbol) {
        if !self.cx.options.thread_variables {
            return;
        }

        let variable = Variable {
            type_id: self.type_id(thread.type_index),
            offset: u64::from(thread.offset),
            is_extern: thread.global,
            container: self.container(&thread.name),
            name: thread.name,
        };
        self.output.thread_variables.push(variable);
    }

    /// Adds a local to the innermost open scope and returns its position.
    fn add_local(&mut self, local: Local) -> Option<(ScopeId, usize)> {
        if !self.cx.options.locals {
            return None;
        }

        let scope_id = self.top().scope?;
        let scope = self.output.scopes.get_mut(scope_id.index())?;
        scope.locals.push(local);
        Some((scope_id, scope.locals.len() - 1))
    }

    fn push_register_relative(&mut self, regrel: RegisterRelativeSymbol) {
        let arch = self.cx.arch;
        let is_stack_pointer = match arch {
            Arch::X86 => regrel.register == cv::CV_REG_ESP,
            Arch::Amd64 => regrel.register == cv::CV_AMD64_RSP,
            _ => false,
        };

        // Parameters live above the frame of the procedure.
        let frame_size = self.frame_proc().map_or(u32::MAX, |frame| frame.frame_size);
        let kind = if is_stack_pointer && regrel.offset > frame_size {
            LocalKind::Parameter
        } else {
            LocalKind::Variable
        };

        let type_id = self.type_id(regrel.type_index);
        let mut locations = Vec::new();

        if let Some(node) = type_id.and_then(|id| self.cx.graph.get(id)) {
            let address_size = arch.address_size().unwrap_or(8);
            let size = node.byte_size;
            // Large or oddly sized arguments are passed by reference.
            let extra_indirection = kind == LocalKind::Parameter
                && (size > address_size || !(size == 0 || size.is_power_of_two()));

            match Register::from_cv(arch, regrel.register) {
                Some(register) => locations.push(LocationCase {
                    range: VoffRange::new(0, u64::MAX),
                    location: Location::reg_offset(
                        register,
                        i64::from(regrel.offset as i32),
                        extra_indirection,
                    ),
                }),
                None => tracing::debug!(register = regrel.register, "unknown register"),
            }
        }

        self.add_local(Local {
            kind,
            name: regrel.name,
            type_id,
            locations,
        });
    }

    fn push_local(&mut self, local: LocalSymbol) {
        if self.top().scope.is_none() {
            return;
        }

        if local.is_global_modification() {
            self.defrange_target = None;
            return;
        }

        let kind = match local.is_param() {
            true => LocalKind::Parameter,
            false => LocalKind::Variable,
        };

        let position = self.add_local(Local {
            kind,
            type_id: self.type_id(local.type_index),
            name: local.name,
            locations: Vec::new(),
        });

        self.defrange_target = position.map(|(scope, local)| DefRangeTarget {
            scope,
            local,
            is_param: kind == LocalKind::Parameter,
        });
    }

    /// The ranges of a defrange record with its gaps removed.
    fn live_ranges(&self, range: &AddressRange) -> SmallVec<[VoffRange; 2]> {
        match range.range(self.cx.sections) {
            Some(voffs) => split_range(voffs, &range.gaps),
            None => SmallVec::new(),
        }
    }

    /// The register locals or parameters of the current procedure are addressed from.
    fn frame_register(&self, is_param: bool) -> Option<Register> {
        let frame_proc = self.frame_proc()?;
        Register::from_frame_pointer(self.cx.arch, frame_proc.base_pointer(is_param))
    }

    fn push_defrange(&mut self, defrange: DefRange) {
        let Some(target) = self.defrange_target else {
            return;
        };

        let arch = self.cx.arch;
        let (location, ranges) = match defrange {
            DefRange::Register { register, range } => {
                let Some(register) = Register::from_cv(arch, register) else {
                    return;
                };
                (Location::ValReg(register), self.live_ranges(&range))
            }
            DefRange::SubfieldRegister {
                register,
                field_offset,
                range,
            } => {
                if field_offset != 0 {
                    return;
                }
                let Some(register) = Register::from_cv(arch, register) else {
                    return;
                };
                (Location::ValReg(register), self.live_ranges(&range))
            }
            DefRange::FramePointerRelative { offset, range } => {
                let Some(register) = self.frame_register(target.is_param) else {
                    return;
                };
                let location = Location::reg_offset(register, i64::from(offset), false);
                (location, self.live_ranges(&range))
            }
            DefRange::FramePointerRelativeFullScope { offset } => {
                let Some(register) = self.frame_register(target.is_param) else {
                    return;
                };
                let location = Location::reg_offset(register, i64::from(offset), false);
                (location, SmallVec::from_elem(VoffRange::new(0, u64::MAX), 1))
            }
            DefRange::RegisterRelative {
                register,
                offset,
                range,
            } => {
                let Some(register) = Register::from_cv(arch, register) else {
                    return;
                };
                let location = Location::reg_offset(register, i64::from(offset), false);
                (location, self.live_ranges(&range))
            }
        };

        let Some(local) = self
            .output
            .scopes
            .get_mut(target.scope.index())
            .and_then(|scope| scope.locals.get_mut(target.local))
        else {
            return;
        };

        for range in ranges {
            local.locations.push(LocationCase {
                range,
                location: location.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use similar_asserts::assert_eq;

    use crate::source::{LeafRecord, Section};
    use crate::testutils::{leaf, symbol, symbols, udt_leaf, Bytes};

    struct Fixture {
        graph: TypeGraph,
        names: TypeNameIndex,
        ipi: TypeStream,
        sections: SectionTable,
        link_names: LinkNames,
    }

    impl Fixture {
        fn new(tpi: Vec<LeafRecord>) -> Self {
            let tpi = TypeStream::new(cv::FIRST_COMPLEX_ITYPE, tpi);
            let names = TypeNameIndex::build(&tpi);
            let graph = TypeGraph::build(&tpi, &names, Arch::Amd64);

            let ipi = TypeStream::new(
                cv::FIRST_COMPLEX_ITYPE,
                vec![
                    leaf(cv::LF_FUNC_ID, Bytes::new().u32(0).u32(0x74).name("inlined")),
                    leaf(
                        cv::LF_MFUNC_ID,
                        Bytes::new().u32(0x1000).u32(0x74).name("method"),
                    ),
                ],
            );

            Self {
                graph,
                names,
                ipi,
                sections: SectionTable::new(vec![Section {
                    voff: 0x1000,
                    size: 0x1000,
                }]),
                link_names: LinkNames::default(),
            }
        }

        fn cx(&self) -> SymbolContext<'_> {
            SymbolContext {
                arch: Arch::Amd64,
                graph: &self.graph,
                names: &self.names,
                ipi: &self.ipi,
                sections: &self.sections,
                link_names: &self.link_names,
                options: SymbolOptions::default(),
            }
        }
    }

    fn proc32(kind: u16, name: &str, offset: u32, len: u32) -> SymbolRecord {
        let body = Bytes::new()
            .u32(0)
            .u32(0)
            .u32(0)
            .u32(len)
            .u32(0)
            .u32(0)
            .u32(0)
            .u32(offset)
            .u16(1)
            .u8(0)
            .name(name);
        symbol(kind, body)
    }

    fn block32(offset: u32, len: u32) -> SymbolRecord {
        let body = Bytes::new()
            .u32(0)
            .u32(0)
            .u32(len)
            .u32(offset)
            .u16(1)
            .name("");
        symbol(cv::S_BLOCK32, body)
    }

    fn end() -> SymbolRecord {
        symbol(cv::S_END, Bytes::new())
    }

    fn local(name: &str, flags: u16) -> SymbolRecord {
        symbol(cv::S_LOCAL, Bytes::new().u32(0x74).u16(flags).name(name))
    }

    fn frameproc(frame_size: u32, flags: u32) -> SymbolRecord {
        let body = Bytes::new()
            .u32(frame_size)
            .u32(0)
            .u32(0)
            .u32(0)
            .u32(0)
            .u16(0)
            .u32(flags);
        symbol(cv::S_FRAMEPROC, body)
    }

    fn regrel32(offset: u32, itype: u32, name: &str) -> SymbolRecord {
        let body = Bytes::new()
            .u32(offset)
            .u32(itype)
            .u16(cv::CV_AMD64_RSP)
            .name(name);
        symbol(cv::S_REGREL32, body)
    }

    fn data32(kind: u16, name: &str, offset: u32) -> SymbolRecord {
        symbol(kind, Bytes::new().u32(0x74).u32(offset).u16(1).name(name))
    }

    #[test]
    fn test_procedure_with_block_and_defrange() {
        let fixture = Fixture::new(vec![]);
        let records = symbols(vec![
            proc32(cv::S_GPROC32, "main", 0, 0x50),
            block32(0x10, 0x10),
            local("x", 0),
            symbol(
                cv::S_DEFRANGE_REGISTER,
                Bytes::new()
                    .u16(328)
                    .u16(0)
                    .u32(0x10)
                    .u16(1)
                    .u16(0x10)
                    .u16(0x4)
                    .u16(0x4),
            ),
            end(),
            end(),
        ]);

        let output = convert_symbols(&fixture.cx(), &records, &[]);
        assert_eq!(output.procedures.len(), 1);
        assert_eq!(output.scopes.len(), 2);

        let procedure = output.procedures.get(0).unwrap();
        assert_eq!(procedure.name, "main");
        assert!(procedure.is_extern);
        assert_eq!(procedure.root_scope, Some(ScopeId(0)));

        let root = output.scopes.get(0).unwrap();
        assert_eq!(root.parent, None);
        assert_eq!(root.children, vec![ScopeId(1)]);
        assert_eq!(root.ranges.as_slice(), &[VoffRange::new(0x1000, 0x1050)]);

        let block = output.scopes.get(1).unwrap();
        assert_eq!(block.parent, Some(ScopeId(0)));
        assert_eq!(block.procedure, Some(ProcedureId(0)));

        let local = &block.locals[0];
        assert_eq!(local.name, "x");
        assert_eq!(local.kind, LocalKind::Variable);
        assert_eq!(local.type_id, fixture.graph.lookup(0x74));

        insta::assert_debug_snapshot!(local.locations, @r###"
        [
            LocationCase {
                range: 0x1010..0x1014,
                location: ValReg(
                    rax,
                ),
            },
            LocationCase {
                range: 0x1018..0x1020,
                location: ValReg(
                    rax,
                ),
            },
        ]
        "###);
    }

    #[test]
    fn test_regrel_parameters() {
        let fixture = Fixture::new(vec![udt_leaf(cv::LF_STRUCTURE, 0, 0, 24, "Big", None)]);
        let records = symbols(vec![
            proc32(cv::S_LPROC32, "f", 0, 0x50),
            frameproc(0x28, 0),
            regrel32(0x20, 0x74, "local"),
            regrel32(0x30, 0x74, "small"),
            regrel32(0x38, 0x1000, "big"),
            end(),
        ]);

        let output = convert_symbols(&fixture.cx(), &records, &[]);
        let locals = &output.scopes.get(0).unwrap().locals;
        let kinds: Vec<_> = locals.iter().map(|l| (l.name.as_str(), l.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("local", LocalKind::Variable),
                ("small", LocalKind::Parameter),
                ("big", LocalKind::Parameter),
            ]
        );

        let rsp = Register::from_cv(Arch::Amd64, cv::CV_AMD64_RSP).unwrap();
        assert_eq!(
            locals[1].locations[0].location,
            Location::AddrRegPlusU16 {
                reg: rsp,
                offset: 0x30
            }
        );
        assert_eq!(
            locals[2].locations[0].location,
            Location::AddrAddrRegPlusU16 {
                reg: rsp,
                offset: 0x38
            }
        );
        assert_eq!(locals[2].locations[0].range, VoffRange::new(0, u64::MAX));
    }

    #[test]
    fn test_framepointer_defrange_uses_param_base() {
        let fixture = Fixture::new(vec![]);
        let flags = (cv::FRAME_REG_STACK_PTR << 14) | (cv::FRAME_REG_FRAME_PTR << 16);
        let records = symbols(vec![
            proc32(cv::S_GPROC32, "f", 0, 0x50),
            frameproc(0x28, flags),
            local("param", cv::LOCAL_PARAM),
            symbol(
                cv::S_DEFRANGE_FRAMEPOINTER_REL_FULL_SCOPE,
                Bytes::new().i32(0x10),
            ),
            local("var", 0),
            symbol(
                cv::S_DEFRANGE_FRAMEPOINTER_REL_FULL_SCOPE,
                Bytes::new().i32(0x8),
            ),
            end(),
        ]);

        let output = convert_symbols(&fixture.cx(), &records, &[]);
        let locals = &output.scopes.get(0).unwrap().locals;
        let registers: Vec<_> = locals
            .iter()
            .map(|local| match &local.locations[0].location {
                Location::AddrRegPlusU16 { reg, .. } => reg.name(),
                other => panic!("unexpected location {other:?}"),
            })
            .collect();
        assert_eq!(registers, vec!["rbp", "rsp"]);
    }

    #[test]
    fn test_defrange_target_cleared() {
        let fixture = Fixture::new(vec![]);
        let defrange = || {
            symbol(
                cv::S_DEFRANGE_REGISTER_REL,
                Bytes::new()
                    .u16(cv::CV_AMD64_RSP)
                    .u16(0)
                    .i32(8)
                    .u32(0)
                    .u16(1)
                    .u16(0x10),
            )
        };
        let records = symbols(vec![
            proc32(cv::S_GPROC32, "f", 0, 0x50),
            local("a", 0),
            symbol(
                cv::S_FILESTATIC,
                Bytes::new().u32(0x74).u32(0).u16(0).name("s"),
            ),
            defrange(),
            local("b", cv::LOCAL_STATIC),
            defrange(),
            local("c", 0),
            defrange(),
            end(),
            defrange(),
        ]);

        let output = convert_symbols(&fixture.cx(), &records, &[]);
        let locals = &output.scopes.get(0).unwrap().locals;
        let counts: Vec<_> = locals
            .iter()
            .map(|l| (l.name.as_str(), l.locations.len()))
            .collect();
        assert_eq!(counts, vec![("a", 0), ("c", 1)]);
    }

    #[test]
    fn test_containers_and_link_names() {
        let mut fixture = Fixture::new(vec![udt_leaf(cv::LF_CLASS, 0, 0, 8, "ns::Foo", None)]);
        let publics = SymbolStream::new(symbols(vec![symbol(
            cv::S_PUB32,
            Bytes::new().u32(0).u32(0x100).u16(1).name("?bar@Foo@ns@@QEAAXXZ"),
        )]));
        fixture.link_names = LinkNames::build(&publics, &fixture.sections);

        let records = symbols(vec![
            data32(cv::S_GDATA32, "global", 0x800),
            proc32(cv::S_GPROC32, "ns::Foo::bar", 0x100, 0x20),
            data32(cv::S_LDATA32, "counter", 0x808),
            symbol(
                cv::S_LTHREAD32,
                Bytes::new().u32(0x74).u32(0x10).u16(2).name("ns::Foo::tls"),
            ),
            end(),
        ]);

        let output = convert_symbols(&fixture.cx(), &records, &[]);
        let class = fixture.graph.lookup(0x1000).unwrap();

        let procedure = output.procedures.get(0).unwrap();
        assert_eq!(procedure.container, Container::Type(class));
        assert_eq!(
            procedure.link_name.as_deref(),
            Some("?bar@Foo@ns@@QEAAXXZ")
        );

        let globals: Vec<_> = output
            .global_variables
            .iter()
            .map(|v| (v.name.as_str(), v.offset, v.is_extern, v.container))
            .collect();
        assert_eq!(
            globals,
            vec![
                ("global", 0x1800, true, Container::None),
                ("counter", 0x1808, false, Container::Procedure(ProcedureId(0))),
            ]
        );

        let tls = output.thread_variables.get(0).unwrap();
        assert_eq!(tls.offset, 0x10);
        assert_eq!(tls.container, Container::Type(class));
    }

    #[test]
    fn test_inline_sites() {
        let fixture = Fixture::new(vec![udt_leaf(cv::LF_CLASS, 0, 0, 8, "Foo", None)]);
        let site = |inlinee: u32| {
            symbol(
                cv::S_INLINESITE,
                Bytes::new()
                    .u32(0)
                    .u32(0)
                    .u32(inlinee)
                    .bytes(&[0x0b, 0x20, 0x04, 0x10]),
            )
        };
        let records = symbols(vec![
            proc32(cv::S_GPROC32, "f", 0x100, 0x50),
            site(0x1000),
            site(0x1001),
            symbol(cv::S_INLINESITE_END, Bytes::new()),
            symbol(cv::S_INLINESITE_END, Bytes::new()),
            end(),
        ]);

        let tables = [Some(LineTableId(3)), None];
        let output = convert_symbols(&fixture.cx(), &records, &tables);

        let int = fixture.graph.lookup(0x74);
        let inline_sites: Vec<_> = output.inline_sites.iter().cloned().collect();
        assert_eq!(
            inline_sites,
            vec![
                InlineSite {
                    name: "inlined".into(),
                    type_id: int,
                    owner: None,
                    line_table: Some(LineTableId(3)),
                },
                InlineSite {
                    name: "method".into(),
                    type_id: int,
                    owner: fixture.graph.lookup(0x1000),
                    line_table: None,
                },
            ]
        );

        let outer = output.scopes.get(1).unwrap();
        assert_eq!(outer.parent, Some(ScopeId(0)));
        assert_eq!(outer.inline_site, Some(InlineSiteId(0)));
        assert_eq!(outer.ranges.as_slice(), &[VoffRange::new(0x1100, 0x1110)]);
        assert_eq!(outer.children, vec![ScopeId(2)]);
    }

    #[test]
    fn test_unbalanced_scopes() {
        let fixture = Fixture::new(vec![]);
        let records = symbols(vec![
            end(),
            local("orphan", 0),
            regrel32(0x8, 0x74, "orphan2"),
            block32(0, 4),
            end(),
            end(),
            proc32(cv::S_GPROC32, "f", 0, 0x50),
            block32(0, 4),
        ]);

        let output = convert_symbols(&fixture.cx(), &records, &[]);
        assert_eq!(output.scopes.len(), 3);
        assert!(output.scopes.iter().all(|scope| scope.locals.is_empty()));
        assert_eq!(output.scopes.get(0).unwrap().parent, None);
        assert_eq!(output.scopes.get(2).unwrap().parent, Some(ScopeId(1)));
    }

    #[test]
    fn test_malformed_block_keeps_balance() {
        let fixture = Fixture::new(vec![]);
        let records = symbols(vec![
            proc32(cv::S_GPROC32, "f", 0, 0x50),
            symbol(cv::S_BLOCK32, Bytes::new().u32(0)),
            end(),
            local("x", 0),
            end(),
        ]);

        let output = convert_symbols(&fixture.cx(), &records, &[]);
        assert_eq!(output.scopes.len(), 1);
        assert_eq!(output.scopes.get(0).unwrap().locals.len(), 1);
    }

    #[test]
    fn test_disabled_kinds() {
        let fixture = Fixture::new(vec![]);
        let mut cx = fixture.cx();
        cx.options.procedures = false;
        cx.options.locals = false;
        cx.options.global_variables = false;

        let records = symbols(vec![
            proc32(cv::S_GPROC32, "f", 0, 0x50),
            regrel32(0x8, 0x74, "x"),
            data32(cv::S_LDATA32, "g", 0),
            end(),
        ]);

        let output = convert_symbols(&cx, &records, &[]);
        assert!(output.procedures.is_empty());
        assert!(output.global_variables.is_empty());
        assert_eq!(output.scopes.len(), 1);
        assert_eq!(output.scopes.get(0).unwrap().procedure, None);
        assert!(output.scopes.get(0).unwrap().locals.is_empty());
    }

    #[test]
    fn test_append_rebases_ids() {
        let fixture = Fixture::new(vec![]);
        let records = symbols(vec![
            proc32(cv::S_GPROC32, "f", 0, 0x50),
            block32(0, 4),
            data32(cv::S_LDATA32, "g", 0),
            end(),
            end(),
        ]);

        let mut all = convert_symbols(&fixture.cx(), &records, &[]);
        all.append(convert_symbols(&fixture.cx(), &records, &[]));

        assert_eq!(all.procedures.len(), 2);
        let second = all.procedures.get(1).unwrap();
        assert_eq!(second.root_scope, Some(ScopeId(2)));

        let block = all.scopes.get(3).unwrap();
        assert_eq!(block.parent, Some(ScopeId(2)));
        assert_eq!(block.procedure, Some(ProcedureId(1)));
        assert_eq!(all.scopes.get(2).unwrap().children, vec![ScopeId(3)]);
        assert_eq!(
            all.global_variables.get(1).unwrap().container,
            Container::Procedure(ProcedureId(1))
        );
    }

    #[test]
    fn test_partition_at_depth_zero() {
        let records = symbols(vec![
            proc32(cv::S_GPROC32, "a", 0, 1),
            block32(0, 1),
            end(),
            end(),
            data32(cv::S_GDATA32, "g", 0),
            data32(cv::S_GDATA32, "h", 0),
            proc32(cv::S_GPROC32, "b", 0, 1),
            end(),
        ]);

        assert_eq!(partition_symbols(&records, 2), vec![0..4, 4..6, 6..8]);
        assert_eq!(partition_symbols(&records, 100), vec![0..8]);
        assert_eq!(partition_symbols(&[], 4), Vec::<Range<usize>>::new());
    }

    fn arb_record() -> impl Strategy<Value = SymbolRecord> {
        prop_oneof![
            Just(proc32(cv::S_GPROC32, "p", 0, 0x10)),
            Just(block32(0, 4)),
            Just(end()),
            Just(symbol(cv::S_INLINESITE_END, Bytes::new())),
            Just(local("l", 0)),
            Just(regrel32(0x8, 0x74, "r")),
            Just(symbol(
                cv::S_INLINESITE,
                Bytes::new().u32(0).u32(0).u32(0x1000).bytes(&[0x0b, 0x20])
            )),
        ]
    }

    proptest! {
        #[test]
        fn proptest_scope_balance(records in prop::collection::vec(arb_record(), 0..64)) {
            let fixture = Fixture::new(vec![]);
            let records = symbols(records);
            let opened = records.iter().filter(|r| cv::opens_scope(r.kind)).count();

            let output = convert_symbols(&fixture.cx(), &records, &[]);
            prop_assert_eq!(output.scopes.len(), opened);

            for (index, scope) in output.scopes.iter().enumerate() {
                if let Some(parent) = scope.parent {
                    prop_assert!(parent.index() < index);
                    let parent = output.scopes.get(parent.index()).unwrap();
                    prop_assert!(parent.children.contains(&ScopeId(index as u32)));
                }
            }
        }
    }
}
