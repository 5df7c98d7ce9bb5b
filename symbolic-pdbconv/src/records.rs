//! Typed views of the symbol records the converter understands.

use symbolic_common::{Arch, Language};

use crate::cv;
use crate::error::CodeViewError;
use crate::location::Gap;
use crate::model::VoffRange;
use crate::reader::RecordReader;
use crate::source::{SectionTable, SymbolRecord};

/// A `(section, offset)` pair of a procedure, block or variable.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SectionOffset {
    pub section: u16,
    pub offset: u32,
}

impl SectionOffset {
    /// Converts to a virtual offset, or `None` if the section does not exist.
    pub fn voff(self, sections: &SectionTable) -> Option<u64> {
        sections.voff(self.section, self.offset)
    }
}

/// `S_LPROC32` / `S_GPROC32`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcedureSymbol {
    pub global: bool,
    pub len: u32,
    pub type_index: u32,
    pub offset: SectionOffset,
    pub name: String,
}

impl ProcedureSymbol {
    /// The code range of the procedure.
    pub fn range(&self, sections: &SectionTable) -> Option<VoffRange> {
        let start = self.offset.voff(sections)?;
        Some(VoffRange::new(start, start + u64::from(self.len)))
    }
}

/// `S_BLOCK32`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockSymbol {
    pub len: u32,
    pub offset: SectionOffset,
    pub name: String,
}

/// `S_LDATA32` / `S_GDATA32`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataSymbol {
    pub global: bool,
    pub type_index: u32,
    pub offset: SectionOffset,
    pub name: String,
}

/// `S_LTHREAD32` / `S_GTHREAD32`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadStorageSymbol {
    pub global: bool,
    pub type_index: u32,
    /// Offset into the thread-local storage block.
    pub offset: u32,
    pub name: String,
}

/// `S_PUB32`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublicSymbol {
    pub offset: SectionOffset,
    pub name: String,
}

/// `S_REGREL32`: a variable addressed relative to a register.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegisterRelativeSymbol {
    pub offset: u32,
    pub type_index: u32,
    pub register: u16,
    pub name: String,
}

/// `S_LOCAL`: a variable whose locations follow as `S_DEFRANGE_*` records.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalSymbol {
    pub type_index: u32,
    pub flags: u16,
    pub name: String,
}

impl LocalSymbol {
    pub fn is_param(&self) -> bool {
        self.flags & cv::LOCAL_PARAM != 0
    }

    /// Returns `true` if the record modifies a global or static variable instead of declaring
    /// a local.
    pub fn is_global_modification(&self) -> bool {
        self.flags & (cv::LOCAL_GLOBAL | cv::LOCAL_STATIC) != 0
    }
}

/// The live range of a `S_DEFRANGE_*` record, with the windows excluded from it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AddressRange {
    pub offset: SectionOffset,
    pub len: u16,
    pub gaps: Vec<Gap>,
}

impl AddressRange {
    fn read(reader: &mut RecordReader<'_>) -> Result<Self, CodeViewError> {
        let offset = reader.u32()?;
        let section = reader.u16()?;
        let len = reader.u16()?;

        let mut gaps = Vec::new();
        while reader.remaining().len() >= 4 {
            let offset = reader.u16()?;
            let len = reader.u16()?;
            gaps.push(Gap { offset, len });
        }

        Ok(Self {
            offset: SectionOffset { section, offset },
            len,
            gaps,
        })
    }

    /// The nominal range before gaps are removed.
    pub fn range(&self, sections: &SectionTable) -> Option<VoffRange> {
        let start = self.offset.voff(sections)?;
        Some(VoffRange::new(start, start + u64::from(self.len)))
    }
}

/// The location described by a `S_DEFRANGE_*` record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DefRange {
    /// `S_DEFRANGE_REGISTER`
    Register { register: u16, range: AddressRange },
    /// `S_DEFRANGE_FRAMEPOINTER_REL`
    FramePointerRelative { offset: i32, range: AddressRange },
    /// `S_DEFRANGE_SUBFIELD_REGISTER`
    SubfieldRegister {
        register: u16,
        field_offset: u32,
        range: AddressRange,
    },
    /// `S_DEFRANGE_FRAMEPOINTER_REL_FULL_SCOPE`
    FramePointerRelativeFullScope { offset: i32 },
    /// `S_DEFRANGE_REGISTER_REL`
    RegisterRelative {
        register: u16,
        offset: i32,
        range: AddressRange,
    },
}

/// `S_FRAMEPROC`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FrameProcedureSymbol {
    pub frame_size: u32,
    pub flags: u32,
}

impl FrameProcedureSymbol {
    /// The encoded register locals or parameters are addressed from.
    pub fn base_pointer(&self, param: bool) -> u32 {
        if param {
            cv::param_base_pointer(self.flags)
        } else {
            cv::local_base_pointer(self.flags)
        }
    }
}

/// `S_INLINESITE` / `S_INLINESITE2`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InlineSiteSymbol {
    pub inlinee: u32,
    pub invocations: Option<u32>,
    /// The binary annotations describing code ranges and lines.
    pub annotations: Vec<u8>,
}

/// `S_COMPILE2` / `S_COMPILE3`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompileFlagsSymbol {
    pub language: Language,
    pub arch: Arch,
    /// Major, minor and build number of the back end.
    pub version: (u16, u16, u16),
    pub version_string: String,
}

impl CompileFlagsSymbol {
    /// The compiler name and version, for example `"Microsoft (R) Optimizing Compiler 19.29.30151"`.
    pub fn compiler_name(&self) -> String {
        let (major, minor, build) = self.version;
        format!("{} {major}.{minor}.{build}", self.version_string)
    }
}

/// A parsed symbol record.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SymbolData {
    ScopeEnd,
    InlineSiteEnd,
    Procedure(ProcedureSymbol),
    Block(BlockSymbol),
    Data(DataSymbol),
    ThreadStorage(ThreadStorageSymbol),
    Public(PublicSymbol),
    RegisterRelative(RegisterRelativeSymbol),
    Local(LocalSymbol),
    DefRange(DefRange),
    FrameProcedure(FrameProcedureSymbol),
    FileStatic { type_index: u32, name: String },
    InlineSite(InlineSiteSymbol),
    CompileFlags(CompileFlagsSymbol),
}

impl SymbolRecord {
    /// Parses the record body.
    ///
    /// Returns `Ok(None)` for kinds the converter ignores.
    pub fn parse(&self) -> Result<Option<SymbolData>, CodeViewError> {
        let mut reader = RecordReader::new(&self.data);
        let reader = &mut reader;

        let data = match self.kind {
            cv::S_END => SymbolData::ScopeEnd,
            cv::S_INLINESITE_END => SymbolData::InlineSiteEnd,
            cv::S_LPROC32 | cv::S_GPROC32 => {
                // parent, end, next
                reader.skip(12)?;
                let len = reader.u32()?;
                // debug start, debug end
                reader.skip(8)?;
                let type_index = reader.u32()?;
                let offset = reader.u32()?;
                let section = reader.u16()?;
                let _flags = reader.u8()?;
                SymbolData::Procedure(ProcedureSymbol {
                    global: self.kind == cv::S_GPROC32,
                    len,
                    type_index,
                    offset: SectionOffset { section, offset },
                    name: reader.name(),
                })
            }
            cv::S_BLOCK32 => {
                // parent, end
                reader.skip(8)?;
                let len = reader.u32()?;
                let offset = reader.u32()?;
                let section = reader.u16()?;
                SymbolData::Block(BlockSymbol {
                    len,
                    offset: SectionOffset { section, offset },
                    name: reader.name(),
                })
            }
            cv::S_LDATA32 | cv::S_GDATA32 => {
                let type_index = reader.u32()?;
                let offset = reader.u32()?;
                let section = reader.u16()?;
                SymbolData::Data(DataSymbol {
                    global: self.kind == cv::S_GDATA32,
                    type_index,
                    offset: SectionOffset { section, offset },
                    name: reader.name(),
                })
            }
            cv::S_LTHREAD32 | cv::S_GTHREAD32 => {
                let type_index = reader.u32()?;
                let offset = reader.u32()?;
                let _section = reader.u16()?;
                SymbolData::ThreadStorage(ThreadStorageSymbol {
                    global: self.kind == cv::S_GTHREAD32,
                    type_index,
                    offset,
                    name: reader.name(),
                })
            }
            cv::S_PUB32 => {
                let _flags = reader.u32()?;
                let offset = reader.u32()?;
                let section = reader.u16()?;
                SymbolData::Public(PublicSymbol {
                    offset: SectionOffset { section, offset },
                    name: reader.name(),
                })
            }
            cv::S_REGREL32 => {
                let offset = reader.u32()?;
                let type_index = reader.u32()?;
                let register = reader.u16()?;
                SymbolData::RegisterRelative(RegisterRelativeSymbol {
                    offset,
                    type_index,
                    register,
                    name: reader.name(),
                })
            }
            cv::S_LOCAL => {
                let type_index = reader.u32()?;
                let flags = reader.u16()?;
                SymbolData::Local(LocalSymbol {
                    type_index,
                    flags,
                    name: reader.name(),
                })
            }
            cv::S_DEFRANGE_REGISTER => {
                let register = reader.u16()?;
                let _attributes = reader.u16()?;
                let range = AddressRange::read(reader)?;
                SymbolData::DefRange(DefRange::Register { register, range })
            }
            cv::S_DEFRANGE_FRAMEPOINTER_REL => {
                let offset = reader.i32()?;
                let range = AddressRange::read(reader)?;
                SymbolData::DefRange(DefRange::FramePointerRelative { offset, range })
            }
            cv::S_DEFRANGE_SUBFIELD_REGISTER => {
                let register = reader.u16()?;
                let _attributes = reader.u16()?;
                let field_offset = reader.u32()? & 0xfff;
                let range = AddressRange::read(reader)?;
                SymbolData::DefRange(DefRange::SubfieldRegister {
                    register,
                    field_offset,
                    range,
                })
            }
            cv::S_DEFRANGE_FRAMEPOINTER_REL_FULL_SCOPE => {
                let offset = reader.i32()?;
                SymbolData::DefRange(DefRange::FramePointerRelativeFullScope { offset })
            }
            cv::S_DEFRANGE_REGISTER_REL => {
                let register = reader.u16()?;
                let _flags = reader.u16()?;
                let offset = reader.i32()?;
                let range = AddressRange::read(reader)?;
                SymbolData::DefRange(DefRange::RegisterRelative {
                    register,
                    offset,
                    range,
                })
            }
            cv::S_FRAMEPROC => {
                let frame_size = reader.u32()?;
                // padding size and offset, callee-saved size, exception handler offset
                reader.skip(16)?;
                let _eh_section = reader.u16()?;
                let flags = reader.u32()?;
                SymbolData::FrameProcedure(FrameProcedureSymbol { frame_size, flags })
            }
            cv::S_FILESTATIC => {
                let type_index = reader.u32()?;
                // module filename offset, flags
                reader.skip(6)?;
                SymbolData::FileStatic {
                    type_index,
                    name: reader.name(),
                }
            }
            cv::S_INLINESITE | cv::S_INLINESITE2 => {
                // parent, end
                reader.skip(8)?;
                let inlinee = reader.u32()?;
                let invocations = match self.kind {
                    cv::S_INLINESITE2 => Some(reader.u32()?),
                    _ => None,
                };
                SymbolData::InlineSite(InlineSiteSymbol {
                    inlinee,
                    invocations,
                    annotations: reader.remaining().to_vec(),
                })
            }
            cv::S_COMPILE2 | cv::S_COMPILE3 => {
                let flags = reader.u32()?;
                let machine = reader.u16()?;
                // front end version
                let front_end_fields = if self.kind == cv::S_COMPILE3 { 4 } else { 3 };
                reader.skip(2 * front_end_fields)?;
                let major = reader.u16()?;
                let minor = reader.u16()?;
                let build = reader.u16()?;
                if self.kind == cv::S_COMPILE3 {
                    let _qfe = reader.u16()?;
                }
                SymbolData::CompileFlags(CompileFlagsSymbol {
                    language: Language::from_cv_language((flags & 0xff) as u8),
                    arch: Arch::from_cv_machine(machine),
                    version: (major, minor, build),
                    version_string: reader.name(),
                })
            }
            _ => return Ok(None),
        };

        Ok(Some(data))
    }
}
