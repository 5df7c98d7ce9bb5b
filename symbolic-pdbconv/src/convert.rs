//! The conversion pipeline from [`PdbInput`] to [`DebugModel`].

use std::sync::Arc;

use symbolic_common::Arch;

use crate::chunk::ChunkList;
use crate::error::ConvertError;
use crate::model::{DebugModel, LineTableId, Udt, UdtId};
use crate::source::{PdbInput, SymbolRecord};
use crate::symbols::{
    convert_symbols, partition_symbols, LinkNames, SymbolContext, SymbolOptions, SymbolOutput,
};
use crate::tasks::{Task, TaskPool};
use crate::types::{TypeGraph, TypeNameIndex};
use crate::udt::expand_udts;
use crate::units::{build_units, detect_arch, inline_line_tables, InlineLineTables};

/// Selects the parts of the debug information to convert and controls parallelism.
#[derive(Clone, Debug)]
pub struct ConvertOptions {
    /// Build the type graph. Without types, all type references are empty.
    pub types: bool,
    /// Expand the members of user-defined types. Requires `types`.
    pub udts: bool,
    pub procedures: bool,
    pub global_variables: bool,
    pub thread_variables: bool,
    pub scopes: bool,
    /// Emit locals and parameters. Requires `scopes`.
    pub locals: bool,
    /// Build line tables of units and inline sites.
    pub line_info: bool,
    pub inline_sites: bool,
    /// The number of worker threads.
    ///
    /// `None` uses one thread per core, `Some(0)` runs everything on the calling thread.
    pub threads: Option<usize>,
    /// The number of global symbol records converted by one task.
    pub symbols_per_task: usize,
    /// The number of type indices scanned for user-defined types by one task.
    pub udt_itypes_per_task: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            types: true,
            udts: true,
            procedures: true,
            global_variables: true,
            thread_variables: true,
            scopes: true,
            locals: true,
            line_info: true,
            inline_sites: true,
            threads: None,
            symbols_per_task: 16384,
            udt_itypes_per_task: 4096,
        }
    }
}

impl ConvertOptions {
    fn symbol_options(&self) -> SymbolOptions {
        SymbolOptions {
            procedures: self.procedures,
            global_variables: self.global_variables,
            thread_variables: self.thread_variables,
            scopes: self.scopes,
            locals: self.scopes && self.locals,
            inline_sites: self.inline_sites,
        }
    }
}

/// Immutable state shared by all symbol tasks.
struct SymbolShared {
    arch: Arch,
    input: Arc<PdbInput>,
    graph: Arc<TypeGraph>,
    names: Arc<TypeNameIndex>,
    link_names: LinkNames,
    options: SymbolOptions,
}

impl SymbolShared {
    fn convert(
        &self,
        records: &[SymbolRecord],
        inline_tables: &[Option<LineTableId>],
    ) -> SymbolOutput {
        let cx = SymbolContext {
            arch: self.arch,
            graph: &self.graph,
            names: &self.names,
            ipi: &self.input.ipi,
            sections: &self.input.sections,
            link_names: &self.link_names,
            options: self.options,
        };
        convert_symbols(&cx, records, inline_tables)
    }
}

/// Converts the debug information of a PDB into a [`DebugModel`].
///
/// Malformed records are skipped and logged, they never fail the conversion. The passes run
/// as independent tasks on a worker pool. Their outputs are concatenated in launch order, so
/// the model is the same for any number of threads.
#[tracing::instrument(level = "debug", skip_all)]
pub fn convert(
    input: impl Into<Arc<PdbInput>>,
    options: &ConvertOptions,
) -> Result<DebugModel, ConvertError> {
    let input = input.into();
    let pool = TaskPool::new(options.threads)?;
    tracing::debug!(threads = pool.threads(), "converting debug information");

    let arch = detect_arch(&input.units);

    let (names, graph) = tracing::trace_span!("types").in_scope(|| {
        if options.types {
            let names = TypeNameIndex::build(&input.tpi);
            let graph = TypeGraph::build(&input.tpi, &names, arch);
            (Arc::new(names), Arc::new(graph))
        } else {
            Default::default()
        }
    });

    // The type graph is complete here, so UDT tasks may start right away.
    let udt_tasks = if options.types && options.udts {
        launch_udt_tasks(&pool, &input, &graph, options.udt_itypes_per_task)
    } else {
        Vec::new()
    };

    let mut tables = tracing::trace_span!("units")
        .in_scope(|| build_units(&input, arch, options.line_info));

    let inline_tables = if options.line_info && options.inline_sites {
        let tasks: Vec<Task<InlineLineTables>> = (0..input.units.len())
            .map(|index| {
                let input = input.clone();
                pool.launch(move || {
                    let unit = &input.units[index];
                    inline_line_tables(unit, &input.sections, &input.strings)
                })
            })
            .collect();

        tracing::trace_span!("merge inline line tables").in_scope(|| {
            tasks
                .into_iter()
                .map(|task| tables.merge_inline_tables(task.join()))
                .collect()
        })
    } else {
        vec![Vec::new(); input.units.len()]
    };

    let link_names = tracing::trace_span!("link names")
        .in_scope(|| LinkNames::build(&input.globals, &input.sections));

    let shared = Arc::new(SymbolShared {
        arch,
        input: input.clone(),
        graph: graph.clone(),
        names,
        link_names,
        options: options.symbol_options(),
    });

    let mut symbol_tasks = Vec::new();
    for (index, slots) in inline_tables.into_iter().enumerate() {
        let shared = shared.clone();
        symbol_tasks.push(pool.launch(move || {
            let records = shared.input.units[index].symbols.records();
            shared.convert(records, &slots)
        }));
    }

    for range in partition_symbols(input.globals.records(), options.symbols_per_task) {
        let shared = shared.clone();
        symbol_tasks.push(pool.launch(move || {
            let records = &shared.input.globals.records()[range];
            shared.convert(records, &[])
        }));
    }

    let mut udts = ChunkList::new();
    let mut symbols = SymbolOutput::default();
    tracing::trace_span!("join").in_scope(|| {
        for task in udt_tasks {
            udts.append(&mut task.join());
        }
        for task in symbol_tasks {
            symbols.append(task.join());
        }
    });

    let udt_for_type = udt_index(&graph, &udts);
    let model = DebugModel {
        arch,
        types: graph,
        udts,
        udt_for_type,
        units: tables.units,
        source_files: tables.source_files.into_vec(),
        line_tables: tables.line_tables,
        procedures: symbols.procedures,
        global_variables: symbols.global_variables,
        thread_variables: symbols.thread_variables,
        scopes: symbols.scopes,
        inline_sites: symbols.inline_sites,
    };

    tracing::debug!(
        types = model.types.len(),
        udts = model.udts.len(),
        units = model.units.len(),
        procedures = model.procedures.len(),
        scopes = model.scopes.len(),
        "converted debug information"
    );

    Ok(model)
}

/// Launches one UDT expansion task per partition of the type index space.
fn launch_udt_tasks(
    pool: &TaskPool,
    input: &Arc<PdbInput>,
    graph: &Arc<TypeGraph>,
    per_task: usize,
) -> Vec<Task<ChunkList<Udt>>> {
    let first = input.tpi.itype_first();
    let opl = input.tpi.itype_opl();
    let per_task = per_task.max(1) as u32;

    let mut tasks = Vec::new();
    let mut start = first;
    while start < opl {
        let end = start.saturating_add(per_task).min(opl);
        let input = input.clone();
        let graph = graph.clone();
        tasks.push(pool.launch(move || expand_udts(&input.tpi, &graph, start..end)));
        start = end;
    }

    tasks
}

/// Maps every type node to the UDT describing it.
fn udt_index(graph: &TypeGraph, udts: &ChunkList<Udt>) -> Vec<Option<UdtId>> {
    let mut index = vec![None; graph.len()];
    for (id, udt) in udts.iter().enumerate() {
        if let Some(slot) = index.get_mut(udt.self_type.index()) {
            *slot = Some(UdtId::from_index(id));
        }
    }
    index
}
