//! The canonical debug information model produced by the converter.
//!
//! All cross references are indices into the lists of [`DebugModel`]. Lists are [`ChunkList`]s,
//! so the output of each conversion task is spliced into the model without copying.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use symbolic_common::{Arch, Language};

use crate::chunk::ChunkList;
use crate::location::Location;
use crate::types::TypeGraph;

macro_rules! define_id {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(pub u32);

        impl $name {
            /// The index of the referenced element in its list.
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            pub(crate) fn rebase(&mut self, base: u32) {
                self.0 += base;
            }
        }
    };
}

define_id!(
    /// Index of a node in the [`TypeGraph`].
    TypeId
);
define_id!(
    /// Index into [`DebugModel::udts`].
    UdtId
);
define_id!(
    /// Index into [`DebugModel::units`].
    UnitId
);
define_id!(
    /// Index into [`DebugModel::source_files`].
    SourceFileId
);
define_id!(
    /// Index into [`DebugModel::line_tables`].
    LineTableId
);
define_id!(
    /// Index into [`DebugModel::procedures`].
    ProcedureId
);
define_id!(
    /// Index into [`DebugModel::scopes`].
    ScopeId
);
define_id!(
    /// Index into [`DebugModel::inline_sites`].
    InlineSiteId
);

/// A half-open range of virtual offsets.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VoffRange {
    pub min: u64,
    pub max: u64,
}

impl VoffRange {
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min >= self.max
    }

    pub fn contains(&self, voff: u64) -> bool {
        self.min <= voff && voff < self.max
    }
}

impl fmt::Debug for VoffRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..{:#x}", self.min, self.max)
    }
}

/// Members and enumerators of a struct, class, union or enum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Udt {
    /// The type node this UDT describes.
    pub self_type: TypeId,
    pub members: Vec<Member>,
    pub enumerators: Vec<Enumerator>,
}

/// The kind of a [`Member`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemberKind {
    DataField,
    StaticData,
    Method,
    StaticMethod,
    VirtualMethod,
    NestedType,
    Base,
    VirtualBase,
}

/// A member of a user-defined type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub kind: MemberKind,
    pub name: String,
    pub type_id: Option<TypeId>,
    /// Byte offset of data fields and bases, v-table offset of introducing virtual methods.
    pub offset: u64,
}

/// A named value of an enum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Enumerator {
    pub name: String,
    pub value: u64,
}

/// A compilation unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Unit {
    /// File name of the object file.
    pub unit_name: String,
    pub compiler_name: String,
    /// Full path of the object file, empty for linker-generated and import units.
    pub object_file: String,
    /// The library the unit was linked from.
    pub archive_file: String,
    pub language: Language,
    pub arch: Arch,
    pub line_table: Option<LineTableId>,
    /// Ranges of the image this unit contributed.
    pub voff_ranges: Vec<VoffRange>,
}

/// A run of lines within a single source file.
///
/// `voffs` holds one start offset per line plus the end of the last line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineSequence {
    pub file: Option<SourceFileId>,
    pub voffs: Vec<u64>,
    pub lines: Vec<u32>,
}

/// The line table of a unit or an inline site.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineTable {
    pub sequences: Vec<LineSequence>,
}

/// Reference to a sequence in a line table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SequenceRef {
    pub line_table: LineTableId,
    pub sequence: u32,
}

/// A source file, deduplicated by normalized path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    /// Every line sequence of any unit or inline site that refers to this file.
    pub sequences: Vec<SequenceRef>,
}

/// What a symbol is nested in.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Container {
    #[default]
    None,
    /// A class, struct or namespace-like type found by the qualified name.
    Type(TypeId),
    /// The procedure whose scope was open when the symbol was declared.
    Procedure(ProcedureId),
}

/// A function with code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Procedure {
    pub name: String,
    /// The mangled name of the public symbol at the procedure's first address.
    pub link_name: Option<String>,
    pub type_id: Option<TypeId>,
    pub is_extern: bool,
    pub container: Container,
    pub root_scope: Option<ScopeId>,
}

/// A global or thread-local variable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub type_id: Option<TypeId>,
    /// The virtual offset of globals, or the offset into the TLS block of thread variables.
    pub offset: u64,
    pub is_extern: bool,
    pub container: Container,
}

/// A lexical scope of a procedure or inline site.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub procedure: Option<ProcedureId>,
    pub inline_site: Option<InlineSiteId>,
    pub ranges: SmallVec<[VoffRange; 1]>,
    pub children: Vec<ScopeId>,
    pub locals: Vec<Local>,
}

/// Whether a local is a parameter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LocalKind {
    #[default]
    Variable,
    Parameter,
}

/// A variable or parameter of a scope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Local {
    pub kind: LocalKind,
    pub name: String,
    pub type_id: Option<TypeId>,
    /// Non-overlapping ranges over which the value lives at a location.
    pub locations: Vec<LocationCase>,
}

/// A location of a [`Local`] over a range of code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocationCase {
    pub range: VoffRange,
    pub location: Location,
}

/// An inlined call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineSite {
    pub name: String,
    pub type_id: Option<TypeId>,
    /// The class of an inlined method.
    pub owner: Option<TypeId>,
    pub line_table: Option<LineTableId>,
}

/// The complete converted debug information.
#[derive(Debug, Default)]
pub struct DebugModel {
    pub arch: Arch,
    pub types: Arc<TypeGraph>,
    pub udts: ChunkList<Udt>,
    /// The UDT describing each type node, indexed by [`TypeId`].
    pub udt_for_type: Vec<Option<UdtId>>,
    pub units: ChunkList<Unit>,
    pub source_files: Vec<SourceFile>,
    pub line_tables: ChunkList<LineTable>,
    pub procedures: ChunkList<Procedure>,
    pub global_variables: ChunkList<Variable>,
    pub thread_variables: ChunkList<Variable>,
    pub scopes: ChunkList<Scope>,
    pub inline_sites: ChunkList<InlineSite>,
}

impl DebugModel {
    /// Returns the members of the user-defined type described by a type node.
    pub fn udt_for(&self, type_id: TypeId) -> Option<&Udt> {
        let udt_id = self.udt_for_type.get(type_id.index()).copied().flatten()?;
        self.udts.get(udt_id.index())
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.index())
    }

    pub fn line_table(&self, id: LineTableId) -> Option<&LineTable> {
        self.line_tables.get(id.index())
    }

    pub fn source_file(&self, id: SourceFileId) -> Option<&SourceFile> {
        self.source_files.get(id.index())
    }
}
