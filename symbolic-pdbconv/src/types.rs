//! Conversion of the TPI stream into a graph of canonical type nodes.
//!
//! The graph is an arena of [`TypeNode`]s plus a dense table mapping every type index to its node.
//! It is built in three phases so that records may freely refer to records later in the stream:
//!
//!  1. Allocate a node (or an alias to another type index) for every record.
//!  2. Resolve type index references into node references.
//!  3. Derive sizes that depend on other nodes, such as the size of modifiers and array counts.

use std::collections::HashMap;
use std::fmt;

use symbolic_common::Arch;

use crate::cv;
use crate::error::{CodeViewError, CodeViewErrorKind};
use crate::model::TypeId;
use crate::reader::RecordReader;
use crate::source::{LeafRecord, TypeStream};

/// Upper bound for chains of aliases, such as empty modifiers of forward references.
const MAX_ALIAS_DEPTH: usize = 64;

/// The kind of a [`TypeNode`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TypeKind {
    Void,
    Handle,
    Char8,
    Char16,
    Char32,
    UChar8,
    UChar16,
    UChar32,
    S8,
    S16,
    S32,
    S64,
    S128,
    U8,
    U16,
    U32,
    U64,
    U128,
    F16,
    F32,
    F32PP,
    F48,
    F64,
    F80,
    F128,
    ComplexF32,
    ComplexF64,
    ComplexF80,
    ComplexF128,
    Modifier,
    Ptr,
    LRef,
    RRef,
    Function,
    Method,
    Bitfield,
    Array,
    Struct,
    Class,
    Union,
    Enum,
    IncompleteStruct,
    IncompleteClass,
    IncompleteUnion,
    IncompleteEnum,
}

impl TypeKind {
    /// Returns `true` for structs, classes, unions and enums with a definition.
    pub fn is_complete_udt(self) -> bool {
        matches!(self, Self::Struct | Self::Class | Self::Union | Self::Enum)
    }

    /// Returns `true` for the basic types of the language.
    pub fn is_basic(self) -> bool {
        (self as u8) <= (Self::ComplexF128 as u8)
    }
}

/// Qualifiers of a [`TypeKind::Modifier`] node.
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct TypeModifiers(u8);

impl TypeModifiers {
    pub const CONST: Self = Self(1 << 0);
    pub const VOLATILE: Self = Self(1 << 1);
    pub const RESTRICT: Self = Self(1 << 2);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl fmt::Debug for TypeModifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::CONST, "CONST"),
            (Self::VOLATILE, "VOLATILE"),
            (Self::RESTRICT, "RESTRICT"),
        ];

        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        if first {
            f.write_str("(empty)")?;
        }
        Ok(())
    }
}

/// A canonical type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypeNode {
    pub kind: TypeKind,
    pub name: String,
    /// The decorated name of a scoped user-defined type.
    pub link_name: Option<String>,
    pub byte_size: u64,
    /// Pointee, element, return, modified or underlying type.
    pub direct: Option<TypeId>,
    /// Parameters of functions and methods. Methods start with the type of `this`.
    pub params: Vec<Option<TypeId>>,
    /// Element count of arrays, bit width of bitfields.
    pub count: u64,
    /// Bit offset of bitfields.
    pub offset: u32,
    pub modifiers: TypeModifiers,
    /// Set for pointers to members, which are otherwise represented as plain pointers.
    pub member_pointer: bool,
}

impl TypeNode {
    fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            name: String::new(),
            link_name: None,
            byte_size: 0,
            direct: None,
            params: Vec::new(),
            count: 0,
            offset: 0,
            modifiers: TypeModifiers::empty(),
            member_pointer: false,
        }
    }
}

struct BasicType {
    code: u8,
    name: &'static str,
    kind: TypeKind,
    /// The size in bytes, `None` for the address size.
    size: Option<u64>,
}

macro_rules! basic {
    ($code:ident, $name:literal, $kind:ident, $size:literal) => {
        BasicType {
            code: cv::$code,
            name: $name,
            kind: TypeKind::$kind,
            size: Some($size),
        }
    };
}

static BASIC_TYPES: &[BasicType] = &[
    basic!(T_VOID, "void", Void, 0),
    basic!(T_HRESULT, "HRESULT", Handle, 4),
    basic!(T_CHAR, "signed char", Char8, 1),
    basic!(T_SHORT, "short", S16, 2),
    basic!(T_LONG, "long", S32, 4),
    basic!(T_QUAD, "__int64", S64, 8),
    basic!(T_OCT, "__int128", S128, 16),
    basic!(T_UCHAR, "unsigned char", UChar8, 1),
    basic!(T_USHORT, "unsigned short", U16, 2),
    basic!(T_ULONG, "unsigned long", U32, 4),
    basic!(T_UQUAD, "unsigned __int64", U64, 8),
    basic!(T_UOCT, "unsigned __int128", U128, 16),
    basic!(T_BOOL08, "bool", S8, 1),
    basic!(T_BOOL16, "__bool16", S16, 2),
    basic!(T_BOOL32, "__bool32", S32, 4),
    basic!(T_BOOL64, "__bool64", S64, 8),
    basic!(T_REAL32, "float", F32, 4),
    basic!(T_REAL64, "double", F64, 8),
    basic!(T_REAL80, "long double", F80, 10),
    basic!(T_REAL128, "__float128", F128, 16),
    basic!(T_REAL48, "__float48", F48, 6),
    basic!(T_REAL32PP, "__float32pp", F32PP, 4),
    basic!(T_REAL16, "__half", F16, 2),
    basic!(T_CPLX32, "_Complex float", ComplexF32, 8),
    basic!(T_CPLX64, "_Complex double", ComplexF64, 16),
    basic!(T_CPLX80, "_Complex long double", ComplexF80, 20),
    basic!(T_CPLX128, "_Complex __float128", ComplexF128, 32),
    basic!(T_INT1, "__int8", S8, 1),
    basic!(T_UINT1, "unsigned __int8", U8, 1),
    basic!(T_RCHAR, "char", Char8, 1),
    basic!(T_WCHAR, "wchar_t", UChar16, 2),
    basic!(T_INT2, "__int16", S16, 2),
    basic!(T_UINT2, "unsigned __int16", U16, 2),
    basic!(T_INT4, "int", S32, 4),
    basic!(T_UINT4, "unsigned int", U32, 4),
    basic!(T_INT8, "__int64", S64, 8),
    basic!(T_UINT8, "unsigned __int64", U64, 8),
    basic!(T_INT16, "__int128", S128, 16),
    basic!(T_UINT16, "unsigned __int128", U128, 16),
    basic!(T_CHAR16, "char16_t", Char16, 2),
    basic!(T_CHAR32, "char32_t", Char32, 4),
    basic!(T_CHAR8, "char8_t", Char8, 1),
    BasicType {
        code: cv::T_PTR,
        name: "__ptr",
        kind: TypeKind::Handle,
        size: None,
    },
];

/// Pointer variants created for every basic type, with their size.
const BASIC_POINTER_MODES: &[(u8, u64)] = &[
    (cv::BASIC_PTR_NEAR, 2),
    (cv::BASIC_PTR_32, 4),
    (cv::BASIC_PTR_64, 8),
];

/// The fixed header of a struct, class, union or enum record.
#[derive(Clone, Debug, Default)]
pub(crate) struct UdtHeader {
    pub kind: u16,
    pub props: u16,
    pub field_list: u32,
    /// The underlying type of enums.
    pub base: u32,
    pub size: u64,
    pub name: String,
    pub unique_name: Option<String>,
}

impl UdtHeader {
    pub fn is_forward_ref(&self) -> bool {
        self.props & cv::PROP_FWDREF != 0
    }

    /// Returns the unique name if this record must be looked up by it.
    pub fn lookup_unique_name(&self) -> Option<&str> {
        let scoped = cv::PROP_SCOPED | cv::PROP_HAS_UNIQUE_NAME;
        if self.props & scoped == scoped {
            self.unique_name.as_deref()
        } else {
            None
        }
    }
}

/// Returns `true` for leaf kinds that define user-defined types.
pub(crate) fn is_udt_leaf(kind: u16) -> bool {
    matches!(
        kind,
        cv::LF_CLASS
            | cv::LF_STRUCTURE
            | cv::LF_CLASS2
            | cv::LF_STRUCTURE2
            | cv::LF_UNION
            | cv::LF_ENUM
    )
}

/// Parses the header of a struct, class, union or enum record.
pub(crate) fn parse_udt_header(leaf: &LeafRecord) -> Result<UdtHeader, CodeViewError> {
    if leaf.truncated {
        return Err(CodeViewErrorKind::Truncated.into());
    }

    let mut reader = RecordReader::new(&leaf.data);
    let mut header = UdtHeader {
        kind: leaf.kind,
        ..UdtHeader::default()
    };

    match leaf.kind {
        cv::LF_CLASS | cv::LF_STRUCTURE => {
            reader.u16()?; // member count
            header.props = reader.u16()?;
            header.field_list = reader.u32()?;
            reader.u32()?; // derived
            reader.u32()?; // vshape
            header.size = reader.numeric()?.as_u64().unwrap_or(0);
        }
        cv::LF_CLASS2 | cv::LF_STRUCTURE2 => {
            header.props = reader.u16()?;
            reader.u16()?;
            header.field_list = reader.u32()?;
            reader.u32()?; // derived
            reader.u32()?; // vshape
            reader.u16()?;
            header.size = reader.numeric()?.as_u64().unwrap_or(0);
        }
        cv::LF_UNION => {
            reader.u16()?; // member count
            header.props = reader.u16()?;
            header.field_list = reader.u32()?;
            header.size = reader.numeric()?.as_u64().unwrap_or(0);
        }
        cv::LF_ENUM => {
            reader.u16()?; // member count
            header.props = reader.u16()?;
            header.base = reader.u32()?;
            header.field_list = reader.u32()?;
        }
        _ => return Err(CodeViewErrorKind::UnexpectedKind.into()),
    }

    header.name = reader.name();
    if !reader.is_eof() {
        header.unique_name = Some(reader.name());
    }

    Ok(header)
}

/// Lookup of complete user-defined types by name.
///
/// This backs both the resolution of forward references and the lookup of container types by
/// the qualified names of symbols. The first complete definition of a name wins.
#[derive(Clone, Debug, Default)]
pub struct TypeNameIndex {
    by_name: HashMap<String, u32>,
    by_unique_name: HashMap<String, u32>,
}

impl TypeNameIndex {
    /// Indexes all complete user-defined types of a type stream.
    pub fn build(tpi: &TypeStream) -> Self {
        let mut index = Self::default();

        for (itype, leaf) in tpi.iter() {
            if !is_udt_leaf(leaf.kind) {
                continue;
            }

            let Ok(header) = parse_udt_header(leaf) else {
                continue;
            };
            if header.is_forward_ref() {
                continue;
            }

            if let Some(unique_name) = header.unique_name {
                index.by_unique_name.entry(unique_name).or_insert(itype);
            }
            index.by_name.entry(header.name).or_insert(itype);
        }

        index
    }

    /// Returns the type index of the first complete type with this name.
    pub fn itype_for_name(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Returns the type index of the complete type with this unique name.
    pub fn itype_for_unique_name(&self, unique_name: &str) -> Option<u32> {
        self.by_unique_name.get(unique_name).copied()
    }

    /// Returns the complete definition a forward reference refers to.
    fn resolve_forward_ref(&self, header: &UdtHeader) -> Option<u32> {
        match header.lookup_unique_name() {
            Some(unique_name) => self.itype_for_unique_name(unique_name),
            None => self.itype_for_name(&header.name),
        }
    }
}

/// A reference that still has to be resolved into a node.
#[derive(Clone, Copy, Debug)]
enum Ref {
    Itype(u32),
    Node(TypeId),
}

/// References of a node collected in the first phase.
struct Pending {
    node: TypeId,
    direct: Option<Ref>,
    params: Vec<u32>,
}

/// What a type index maps to after the first phase.
#[derive(Clone, Copy, Debug)]
enum Slot {
    Empty,
    Alias(u32),
    Node(TypeId),
}

/// The graph of all canonical types, indexed by type index.
#[derive(Clone, Debug, Default)]
pub struct TypeGraph {
    nodes: Vec<TypeNode>,
    by_itype: Vec<Option<TypeId>>,
}

impl TypeGraph {
    /// Builds nodes for all basic types and all records of the type stream.
    ///
    /// The architecture provides the size of functions and pointers. Records that cannot be
    /// decoded leave their type index unresolved.
    #[tracing::instrument(level = "trace", skip_all, fields(records = tpi.records().len()))]
    pub fn build(tpi: &TypeStream, names: &TypeNameIndex, arch: Arch) -> Self {
        let mut builder = GraphBuilder::new(tpi, names, arch);

        tracing::trace_span!("allocate nodes").in_scope(|| {
            builder.push_basic_types();
            builder.push_leaf_types();
        });

        tracing::trace_span!("resolve references").in_scope(|| builder.resolve());
        tracing::trace_span!("derive sizes").in_scope(|| builder.derive_sizes());

        builder.graph
    }

    /// Returns the node for a type index, or `None` if the type index is unknown.
    ///
    /// This is total over all type indices.
    pub fn lookup(&self, itype: u32) -> Option<TypeId> {
        self.by_itype.get(itype as usize).copied().flatten()
    }

    /// Returns the node with the given id.
    pub fn get(&self, id: TypeId) -> Option<&TypeNode> {
        self.nodes.get(id.index())
    }

    /// Returns the node for a type index.
    pub fn node_for_itype(&self, itype: u32) -> Option<&TypeNode> {
        self.get(self.lookup(itype)?)
    }

    /// All nodes of the graph.
    pub fn nodes(&self) -> &[TypeNode] {
        &self.nodes
    }

    /// The number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// One past the highest type index covered by the lookup table.
    pub fn itype_opl(&self) -> u32 {
        self.by_itype.len() as u32
    }
}

struct GraphBuilder<'a> {
    tpi: &'a TypeStream,
    names: &'a TypeNameIndex,
    address_size: u64,
    graph: TypeGraph,
    slots: Vec<Slot>,
    pending: Vec<Pending>,
}

impl<'a> GraphBuilder<'a> {
    fn new(tpi: &'a TypeStream, names: &'a TypeNameIndex, arch: Arch) -> Self {
        let itype_opl = tpi.itype_opl().max(cv::FIRST_COMPLEX_ITYPE) as usize;
        Self {
            tpi,
            names,
            address_size: arch.address_size().unwrap_or(8),
            graph: TypeGraph::default(),
            slots: vec![Slot::Empty; itype_opl],
            pending: Vec::new(),
        }
    }

    fn push_node(&mut self, node: TypeNode) -> TypeId {
        let id = TypeId::from_index(self.graph.nodes.len());
        self.graph.nodes.push(node);
        id
    }

    fn push_pending(&mut self, node: TypeNode, direct: Option<Ref>, params: Vec<u32>) -> TypeId {
        let id = self.push_node(node);
        if direct.is_some() || !params.is_empty() {
            self.pending.push(Pending {
                node: id,
                direct,
                params,
            });
        }
        id
    }

    fn push_basic_types(&mut self) {
        for basic in BASIC_TYPES {
            let mut node = TypeNode::new(basic.kind);
            node.name = basic.name.to_owned();
            node.byte_size = basic.size.unwrap_or(self.address_size);

            let id = self.push_node(node);
            self.slots[usize::from(basic.code)] = Slot::Node(id);

            for &(mode, size) in BASIC_POINTER_MODES {
                let mut pointer = TypeNode::new(TypeKind::Ptr);
                pointer.byte_size = size;
                pointer.direct = Some(id);

                let pointer_id = self.push_node(pointer);
                let itype = usize::from(basic.code) | usize::from(mode) << 8;
                self.slots[itype] = Slot::Node(pointer_id);
            }
        }
    }

    fn push_leaf_types(&mut self) {
        for (itype, leaf) in self.tpi.iter() {
            if cv::is_basic_itype(itype) {
                continue;
            }

            let slot = match self.push_leaf(itype, leaf) {
                Ok(slot) => slot,
                Err(error) => {
                    tracing::debug!(itype, kind = leaf.kind, %error, "skipping type record");
                    Slot::Empty
                }
            };

            if let Some(entry) = self.slots.get_mut(itype as usize) {
                *entry = slot;
            }
        }
    }

    /// Reads the type indices of an argument list record.
    fn arglist(&self, itype: u32) -> Vec<u32> {
        let read = || -> Result<Vec<u32>, CodeViewError> {
            let leaf = self
                .tpi
                .leaf(itype)
                .ok_or(CodeViewErrorKind::UnknownItype)?;
            if leaf.kind != cv::LF_ARGLIST {
                return Err(CodeViewErrorKind::UnexpectedKind.into());
            }
            if leaf.truncated {
                return Err(CodeViewErrorKind::Truncated.into());
            }

            let mut reader = RecordReader::new(&leaf.data);
            let count = reader.u32()?;
            (0..count).map(|_| reader.u32()).collect()
        };

        read().unwrap_or_else(|error| {
            tracing::debug!(itype, %error, "invalid argument list");
            Vec::new()
        })
    }

    fn push_leaf(&mut self, itype: u32, leaf: &LeafRecord) -> Result<Slot, CodeViewError> {
        if leaf.truncated {
            return Err(CodeViewErrorKind::Truncated.into());
        }

        let mut reader = RecordReader::new(&leaf.data);
        let id = match leaf.kind {
            cv::LF_MODIFIER => {
                let direct = reader.u32()?;
                let flags = reader.u16()?;

                let mut modifiers = TypeModifiers::empty();
                if flags & cv::MOD_CONST != 0 {
                    modifiers.insert(TypeModifiers::CONST);
                }
                if flags & cv::MOD_VOLATILE != 0 {
                    modifiers.insert(TypeModifiers::VOLATILE);
                }

                if modifiers.is_empty() {
                    return Ok(Slot::Alias(direct));
                }

                let mut node = TypeNode::new(TypeKind::Modifier);
                node.modifiers = modifiers;
                self.push_pending(node, Some(Ref::Itype(direct)), Vec::new())
            }

            cv::LF_POINTER => {
                let direct = reader.u32()?;
                let attributes = reader.u32()?;
                let mode = cv::pointer_mode(attributes);

                let mut kind = TypeKind::Ptr;
                if attributes & cv::PTR_ATTR_LREF != 0 {
                    kind = TypeKind::LRef;
                } else if attributes & cv::PTR_ATTR_RREF != 0 {
                    kind = TypeKind::RRef;
                }
                match mode {
                    cv::PTR_MODE_LREF => kind = TypeKind::LRef,
                    cv::PTR_MODE_RREF => kind = TypeKind::RRef,
                    _ => (),
                }

                let mut modifiers = TypeModifiers::empty();
                if attributes & cv::PTR_ATTR_CONST != 0 {
                    modifiers.insert(TypeModifiers::CONST);
                }
                if attributes & cv::PTR_ATTR_VOLATILE != 0 {
                    modifiers.insert(TypeModifiers::VOLATILE);
                }
                if attributes & cv::PTR_ATTR_RESTRICT != 0 {
                    modifiers.insert(TypeModifiers::RESTRICT);
                }

                let mut pointer = TypeNode::new(kind);
                pointer.byte_size = self.address_size;
                pointer.member_pointer =
                    matches!(mode, cv::PTR_MODE_PMEM | cv::PTR_MODE_PMFUNC);
                let pointer_id = self.push_pending(pointer, Some(Ref::Itype(direct)), Vec::new());

                if modifiers.is_empty() {
                    pointer_id
                } else {
                    let mut node = TypeNode::new(TypeKind::Modifier);
                    node.modifiers = modifiers;
                    node.byte_size = self.address_size;
                    self.push_pending(node, Some(Ref::Node(pointer_id)), Vec::new())
                }
            }

            cv::LF_PROCEDURE => {
                let ret = reader.u32()?;
                reader.u8()?; // call kind
                reader.u8()?; // attributes
                reader.u16()?; // argument count
                let args = reader.u32()?;

                let mut node = TypeNode::new(TypeKind::Function);
                node.byte_size = self.address_size;
                let params = self.arglist(args);
                self.push_pending(node, Some(Ref::Itype(ret)), params)
            }

            cv::LF_MFUNCTION => {
                let ret = reader.u32()?;
                reader.u32()?; // class
                let this = reader.u32()?;
                reader.u8()?; // call kind
                reader.u8()?; // attributes
                reader.u16()?; // argument count
                let args = reader.u32()?;

                let kind = if this != 0 {
                    TypeKind::Method
                } else {
                    TypeKind::Function
                };

                let mut params = Vec::new();
                if this != 0 {
                    params.push(this);
                }
                params.extend(self.arglist(args));

                let mut node = TypeNode::new(kind);
                node.byte_size = self.address_size;
                self.push_pending(node, Some(Ref::Itype(ret)), params)
            }

            cv::LF_BITFIELD => {
                let direct = reader.u32()?;
                let len = reader.u8()?;
                let pos = reader.u8()?;

                let mut node = TypeNode::new(TypeKind::Bitfield);
                node.count = u64::from(len);
                node.offset = u32::from(pos);
                self.push_pending(node, Some(Ref::Itype(direct)), Vec::new())
            }

            cv::LF_ARRAY => {
                let element = reader.u32()?;
                reader.u32()?; // index type
                let size = reader.numeric()?;

                let mut node = TypeNode::new(TypeKind::Array);
                node.byte_size = size.as_u64().unwrap_or(0);
                self.push_pending(node, Some(Ref::Itype(element)), Vec::new())
            }

            kind if is_udt_leaf(kind) => {
                let header = parse_udt_header(leaf)?;

                if header.is_forward_ref() {
                    if let Some(definition) = self.names.resolve_forward_ref(&header) {
                        if definition != itype {
                            return Ok(Slot::Alias(definition));
                        }
                    }
                }

                let node_kind = match (kind, header.is_forward_ref()) {
                    (cv::LF_CLASS | cv::LF_CLASS2, false) => TypeKind::Class,
                    (cv::LF_CLASS | cv::LF_CLASS2, true) => TypeKind::IncompleteClass,
                    (cv::LF_UNION, false) => TypeKind::Union,
                    (cv::LF_UNION, true) => TypeKind::IncompleteUnion,
                    (cv::LF_ENUM, false) => TypeKind::Enum,
                    (cv::LF_ENUM, true) => TypeKind::IncompleteEnum,
                    (_, false) => TypeKind::Struct,
                    (_, true) => TypeKind::IncompleteStruct,
                };

                let mut node = TypeNode::new(node_kind);
                node.name = header.name.clone();
                if header.is_forward_ref() {
                    self.push_node(node)
                } else {
                    node.link_name = header.lookup_unique_name().map(str::to_owned);
                    if kind == cv::LF_ENUM {
                        self.push_pending(node, Some(Ref::Itype(header.base)), Vec::new())
                    } else {
                        node.byte_size = header.size;
                        self.push_node(node)
                    }
                }
            }

            _ => return Ok(Slot::Empty),
        };

        Ok(Slot::Node(id))
    }

    /// Follows aliases from a type index to its node.
    fn resolve_itype(&self, mut itype: u32) -> Option<TypeId> {
        for _ in 0..MAX_ALIAS_DEPTH {
            match *self.slots.get(itype as usize)? {
                Slot::Empty => return None,
                Slot::Node(id) => return Some(id),
                Slot::Alias(next) => itype = next,
            }
        }

        tracing::debug!(itype, "alias chain too long");
        None
    }

    fn resolve_ref(&self, reference: Ref) -> Option<TypeId> {
        match reference {
            Ref::Itype(itype) => self.resolve_itype(itype),
            Ref::Node(id) => Some(id),
        }
    }

    fn resolve(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for entry in pending {
            let direct = entry.direct.and_then(|r| self.resolve_ref(r));
            let params = entry
                .params
                .iter()
                .map(|itype| self.resolve_itype(*itype))
                .collect();

            let node = &mut self.graph.nodes[entry.node.index()];
            node.direct = direct;
            node.params = params;
        }

        self.graph.by_itype = (0..self.slots.len() as u32)
            .map(|itype| self.resolve_itype(itype))
            .collect();
    }

    fn derive_sizes(&mut self) {
        let nodes = &mut self.graph.nodes;
        let mut done = vec![false; nodes.len()];

        for start in 0..nodes.len() {
            if done[start] {
                continue;
            }

            // Walk down the chain of nodes whose size is their direct type's size.
            let mut chain = Vec::new();
            let mut current = Some(start);
            let mut size = None;
            while let Some(index) = current {
                if done[index] {
                    size = Some(nodes[index].byte_size);
                    break;
                }
                if chain.contains(&index) {
                    tracing::debug!(node = index, "cyclic type reference");
                    break;
                }

                let node = &nodes[index];
                let inherits_size = matches!(
                    node.kind,
                    TypeKind::Modifier | TypeKind::Bitfield | TypeKind::Enum
                );
                if !inherits_size {
                    done[index] = true;
                    size = Some(node.byte_size);
                    break;
                }

                chain.push(index);
                current = node.direct.map(TypeId::index);
            }

            let size = size.unwrap_or(0);
            for index in chain {
                nodes[index].byte_size = size;
                done[index] = true;
            }
        }

        for index in 0..nodes.len() {
            if nodes[index].kind != TypeKind::Array {
                continue;
            }

            let element_size = nodes[index]
                .direct
                .and_then(|id| nodes.get(id.index()))
                .map_or(0, |element| element.byte_size);

            if element_size != 0 {
                nodes[index].count = nodes[index].byte_size / element_size;
            }
        }
    }
}
