//! Delimited CodeView records and C13 views consumed by the converter.
//!
//! Locating streams in the MSF container and parsing the DBI header are the job of a PDB reader.
//! This module starts one step later: it holds type and symbol streams that are already sliced into
//! kind-tagged records, plus typed views of the C13 line information of every unit. All data is
//! owned, so the input can be shared across conversion tasks behind an [`Arc`](std::sync::Arc).

use std::collections::{BTreeMap, HashMap};

use scroll::{Pread, LE};

use crate::cv;
use crate::error::{CodeViewError, CodeViewErrorKind};

/// A single record of a type (TPI) or id (IPI) stream.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LeafRecord {
    /// The leaf kind, one of the `LF_*` constants.
    pub kind: u16,
    /// The record body following the kind.
    pub data: Vec<u8>,
    /// Set if the declared record size ran past the end of the stream.
    pub truncated: bool,
}

impl LeafRecord {
    /// Creates a complete record.
    pub fn new(kind: u16, data: Vec<u8>) -> Self {
        Self {
            kind,
            data,
            truncated: false,
        }
    }
}

/// Reads the `[size: u16][kind: u16]` header of a record at `offset`.
///
/// Returns the kind, the range of the body and whether the body was cut short.
fn record_header(bytes: &[u8], offset: usize) -> Option<(u16, usize, usize, bool)> {
    let size: u16 = bytes.pread_with(offset, LE).ok()?;
    let kind: u16 = bytes.pread_with(offset + 2, LE).ok()?;

    let start = offset + 4;
    let end = offset + 2 + usize::from(size);
    if end < start {
        // The size does not even cover the kind.
        return Some((kind, start, start, true));
    }

    if end > bytes.len() {
        Some((kind, start, bytes.len(), true))
    } else {
        Some((kind, start, end, false))
    }
}

/// An ordered stream of leaf records addressed by type index.
///
/// The first record has the type index `itype_first`, usually [`FIRST_COMPLEX_ITYPE`](cv::FIRST_COMPLEX_ITYPE).
#[derive(Clone, Debug, Default)]
pub struct TypeStream {
    itype_first: u32,
    records: Vec<LeafRecord>,
}

impl TypeStream {
    /// Creates a type stream from already delimited records.
    pub fn new(itype_first: u32, records: Vec<LeafRecord>) -> Self {
        Self {
            itype_first,
            records,
        }
    }

    /// Slices raw type records.
    ///
    /// A record whose declared size runs past the end of `bytes` is kept as truncated, and ends
    /// the stream.
    pub fn parse(itype_first: u32, bytes: &[u8]) -> Self {
        let mut records = Vec::new();
        let mut offset = 0;

        while let Some((kind, start, end, truncated)) = record_header(bytes, offset) {
            records.push(LeafRecord {
                kind,
                data: bytes[start..end].to_vec(),
                truncated,
            });

            if truncated {
                tracing::debug!(itype = itype_first as usize + records.len() - 1, "truncated type record");
                break;
            }
            offset = end;
        }

        Self::new(itype_first, records)
    }

    /// The type index of the first record.
    pub fn itype_first(&self) -> u32 {
        self.itype_first
    }

    /// One past the type index of the last record.
    pub fn itype_opl(&self) -> u32 {
        self.itype_first
            .saturating_add(u32::try_from(self.records.len()).unwrap_or(u32::MAX))
    }

    /// Returns the record for a type index, or `None` if the index is outside of this stream.
    pub fn leaf(&self, itype: u32) -> Option<&LeafRecord> {
        let index = itype.checked_sub(self.itype_first)?;
        self.records.get(index as usize)
    }

    /// All records in stream order.
    pub fn records(&self) -> &[LeafRecord] {
        &self.records
    }

    /// Iterates type indices together with their records.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &LeafRecord)> + '_ {
        (self.itype_first..).zip(self.records.iter())
    }
}

/// A record of a symbol stream.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SymbolRecord {
    /// The symbol kind, one of the `S_*` constants.
    pub kind: u16,
    /// The record body following the kind.
    pub data: Vec<u8>,
    /// Byte offset of the record within its stream.
    pub offset: u32,
}

impl SymbolRecord {
    /// Creates a record at the given stream offset.
    pub fn new(kind: u16, data: Vec<u8>, offset: u32) -> Self {
        Self { kind, data, offset }
    }
}

/// An ordered symbol stream of a unit, or the global symbol stream.
#[derive(Clone, Debug, Default)]
pub struct SymbolStream {
    records: Vec<SymbolRecord>,
}

impl SymbolStream {
    /// Creates a symbol stream from already delimited records.
    pub fn new(records: Vec<SymbolRecord>) -> Self {
        Self { records }
    }

    /// Slices raw symbol records. A truncated record ends the stream and is dropped.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut records = Vec::new();
        let mut offset = 0;

        while let Some((kind, start, end, truncated)) = record_header(bytes, offset) {
            if truncated {
                tracing::debug!(offset, kind, "truncated symbol record");
                break;
            }

            records.push(SymbolRecord {
                kind,
                data: bytes[start..end].to_vec(),
                offset: offset as u32,
            });
            offset = end;
        }

        Self { records }
    }

    /// All records in stream order.
    pub fn records(&self) -> &[SymbolRecord] {
        &self.records
    }

    /// The number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the stream holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A single entry of a line block: a code offset relative to its subsection, and a line number.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LineEntry {
    pub offset: u32,
    pub line: u32,
}

/// The lines of a single file within a `Lines` subsection.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineBlock {
    /// Offset of the file's entry in the unit's [`FileChecksums`].
    pub file_off: u32,
    pub lines: Vec<LineEntry>,
}

/// A C13 `Lines` subsection, covering one contiguous code range.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct C13Lines {
    pub section: u16,
    pub offset: u32,
    pub length: u32,
    pub blocks: Vec<LineBlock>,
}

/// The C13 `FileChksms` subsection of a unit, reduced to the file name of each entry.
#[derive(Clone, Debug, Default)]
pub struct FileChecksums {
    names: BTreeMap<u32, u32>,
}

impl FileChecksums {
    /// Registers the string table offset of the file name for the entry at `file_off`.
    pub fn insert(&mut self, file_off: u32, name_off: u32) {
        self.names.insert(file_off, name_off);
    }

    /// Returns the string table offset of the file name for the entry at `file_off`.
    pub fn name_offset(&self, file_off: u32) -> Option<u32> {
        self.names.get(&file_off).copied()
    }
}

impl FromIterator<(u32, u32)> for FileChecksums {
    fn from_iter<T: IntoIterator<Item = (u32, u32)>>(iter: T) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

/// The source location an inlinee starts at.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InlineeSource {
    pub file_off: u32,
    pub first_line: u32,
}

/// The C13 `InlineeLines` subsection of a unit.
#[derive(Clone, Debug, Default)]
pub struct InlineeLines {
    sources: HashMap<u32, InlineeSource>,
}

impl InlineeLines {
    pub fn insert(&mut self, inlinee: u32, source: InlineeSource) {
        self.sources.insert(inlinee, source);
    }

    /// Returns the source location of an inlinee, keyed by its id in the IPI stream.
    pub fn get(&self, inlinee: u32) -> Option<InlineeSource> {
        self.sources.get(&inlinee).copied()
    }
}

impl FromIterator<(u32, InlineeSource)> for InlineeLines {
    fn from_iter<T: IntoIterator<Item = (u32, InlineeSource)>>(iter: T) -> Self {
        Self {
            sources: iter.into_iter().collect(),
        }
    }
}

/// The PDB string table (`/names` stream) holding file names.
#[derive(Clone, Debug, Default)]
pub struct StringTable {
    data: Vec<u8>,
}

impl StringTable {
    /// Wraps the string buffer of the table.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns the null-terminated string at the given offset.
    pub fn get(&self, offset: u32) -> Result<&str, CodeViewError> {
        let bytes = self
            .data
            .get(offset as usize..)
            .ok_or(CodeViewErrorKind::BadString)?;
        let len = bytes
            .iter()
            .position(|b| *b == 0)
            .ok_or(CodeViewErrorKind::BadString)?;
        std::str::from_utf8(&bytes[..len])
            .map_err(|e| CodeViewError::new(CodeViewErrorKind::BadString, e))
    }
}

/// A section of the image.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Section {
    pub voff: u64,
    pub size: u64,
}

/// The section headers of the image, used to turn `(section, offset)` pairs into virtual offsets.
#[derive(Clone, Debug, Default)]
pub struct SectionTable {
    sections: Vec<Section>,
}

impl SectionTable {
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    /// Returns the virtual offset of a 1-based section index.
    pub fn base(&self, section: u16) -> Option<u64> {
        let index = usize::from(section).checked_sub(1)?;
        self.sections.get(index).map(|s| s.voff)
    }

    /// Converts a section-relative offset to a virtual offset.
    ///
    /// Section `0` and out-of-range sections have no virtual offset.
    pub fn voff(&self, section: u16, offset: u32) -> Option<u64> {
        self.base(section).map(|base| base + u64::from(offset))
    }
}

/// A compilation unit (module) of the PDB.
#[derive(Clone, Debug, Default)]
pub struct CompilationUnit {
    /// The object file this unit was compiled into.
    pub obj_name: String,
    /// The library or object the linker read the unit from.
    pub group_name: String,
    pub symbols: SymbolStream,
    pub lines: Vec<C13Lines>,
    pub checksums: FileChecksums,
    pub inlinees: InlineeLines,
}

/// A range of the image contributed by a unit, from the DBI section contribution substream.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SectionContribution {
    /// Index of the contributing unit.
    pub module: usize,
    pub voff_first: u64,
    pub voff_opl: u64,
}

/// Everything the converter consumes from a PDB.
#[derive(Clone, Debug, Default)]
pub struct PdbInput {
    /// The type stream.
    pub tpi: TypeStream,
    /// The id stream, holding function ids of inline sites.
    pub ipi: TypeStream,
    /// The global symbol stream.
    pub globals: SymbolStream,
    pub units: Vec<CompilationUnit>,
    pub contributions: Vec<SectionContribution>,
    pub sections: SectionTable,
    pub strings: StringTable,
}

impl PdbInput {
    /// Creates an input with an empty type stream starting at the first complex type index.
    pub fn new() -> Self {
        Self {
            tpi: TypeStream::new(cv::FIRST_COMPLEX_ITYPE, Vec::new()),
            ipi: TypeStream::new(cv::FIRST_COMPLEX_ITYPE, Vec::new()),
            ..Self::default()
        }
    }
}
