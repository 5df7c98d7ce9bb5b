//! Compilation units, their line tables and the shared source file table.

use indexmap::{IndexMap, IndexSet};
use symbolic_common::{normalize_path, split_path, Arch, Language};

use crate::chunk::ChunkList;
use crate::cv;
use crate::inline::inline_line_sequences;
use crate::model::{
    LineSequence, LineTable, LineTableId, SequenceRef, SourceFile, SourceFileId, Unit, VoffRange,
};
use crate::records::{CompileFlagsSymbol, SymbolData};
use crate::source::{CompilationUnit, PdbInput, SectionTable, StringTable};

/// Object name of the unit the linker synthesizes for its own contributions.
const LINKER_UNIT: &str = "* Linker *";
/// Prefix of units describing import libraries.
const IMPORT_PREFIX: &str = "Import:";

/// Returns the first `S_COMPILE2` or `S_COMPILE3` record of a unit.
pub fn compile_flags(unit: &CompilationUnit) -> Option<CompileFlagsSymbol> {
    for record in unit.symbols.records() {
        if let Ok(Some(SymbolData::CompileFlags(flags))) = record.parse() {
            return Some(flags);
        }
    }

    None
}

/// Determines the architecture of the image from the first unit that declares a known one.
pub fn detect_arch(units: &[CompilationUnit]) -> Arch {
    units
        .iter()
        .filter_map(compile_flags)
        .map(|flags| flags.arch)
        .find(|arch| *arch != Arch::Unknown)
        .unwrap_or_default()
}

/// Resolves the path of a file checksum entry through the string table.
fn file_path<'a>(
    unit: &CompilationUnit,
    strings: &'a StringTable,
    file_off: u32,
) -> Option<&'a str> {
    let name_off = unit.checksums.name_offset(file_off)?;
    match strings.get(name_off) {
        Ok(path) => Some(path),
        Err(error) => {
            tracing::debug!(file_off, name_off, %error, "invalid source file name");
            None
        }
    }
}

/// The source files of the image, deduplicated by normalized path.
#[derive(Debug, Default)]
pub struct SourceFiles {
    files: IndexMap<String, SourceFile>,
}

impl SourceFiles {
    /// Returns the id of the file with the given path, adding it if it is new.
    pub fn insert(&mut self, path: &str) -> SourceFileId {
        let path = normalize_path(path);
        if let Some(index) = self.files.get_index_of(&path) {
            return SourceFileId::from_index(index);
        }

        let file = SourceFile {
            path: path.clone(),
            sequences: Vec::new(),
        };
        let (index, _) = self.files.insert_full(path, file);
        SourceFileId::from_index(index)
    }

    /// Records that a line sequence refers to a file.
    pub fn add_sequence(&mut self, file: SourceFileId, sequence: SequenceRef) {
        if let Some((_, file)) = self.files.get_index_mut(file.index()) {
            file.sequences.push(sequence);
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn into_vec(self) -> Vec<SourceFile> {
        self.files.into_values().collect()
    }
}

/// Units, line tables and source files collected by [`build_units`].
///
/// Line table ids are final, since unit line tables always come first in the model.
#[derive(Debug, Default)]
pub struct UnitTables {
    pub units: ChunkList<Unit>,
    pub line_tables: ChunkList<LineTable>,
    pub source_files: SourceFiles,
}

impl UnitTables {
    /// Pushes a line table and links each of its sequences to its source file.
    fn push_line_table(&mut self, table: LineTable) -> LineTableId {
        let id = LineTableId::from_index(self.line_tables.len());

        for (index, sequence) in table.sequences.iter().enumerate() {
            if let Some(file) = sequence.file {
                let sequence_ref = SequenceRef {
                    line_table: id,
                    sequence: index as u32,
                };
                self.source_files.add_sequence(file, sequence_ref);
            }
        }

        self.line_tables.push(table);
        id
    }

    /// Adds the inline site line tables of one unit and returns the line table of each inline
    /// site.
    pub fn merge_inline_tables(&mut self, tables: InlineLineTables) -> Vec<Option<LineTableId>> {
        let files: Vec<SourceFileId> = tables
            .files
            .iter()
            .map(|path| self.source_files.insert(path))
            .collect();

        let mut ids = Vec::with_capacity(tables.line_tables.len());
        for mut table in tables.line_tables.into_vec() {
            for sequence in &mut table.sequences {
                sequence.file = sequence.file.and_then(|local| files.get(local.index()).copied());
            }
            ids.push(self.push_line_table(table));
        }

        tables
            .slots
            .into_iter()
            .map(|slot| slot.and_then(|index| ids.get(index).copied()))
            .collect()
    }
}

/// Derives the display name, object file and archive of a unit.
fn unit_names(unit: &CompilationUnit) -> (String, String, String) {
    let unit_name = split_path(&unit.obj_name).1.to_owned();

    let object_file = if unit.obj_name == LINKER_UNIT || unit.obj_name.starts_with(IMPORT_PREFIX) {
        String::new()
    } else {
        unit.obj_name.clone()
    };

    (unit_name, object_file, unit.group_name.clone())
}

/// Builds the line table of a unit from its C13 line subsections.
fn unit_line_table(
    unit: &CompilationUnit,
    sections: &SectionTable,
    strings: &StringTable,
    source_files: &mut SourceFiles,
) -> LineTable {
    let mut table = LineTable::default();

    for lines in &unit.lines {
        let Some(base) = sections.voff(lines.section, lines.offset) else {
            tracing::debug!(section = lines.section, "line subsection in unknown section");
            continue;
        };

        for block in &lines.blocks {
            if block.lines.is_empty() {
                continue;
            }

            let file = file_path(unit, strings, block.file_off)
                .map(|path| source_files.insert(path));

            let mut voffs: Vec<u64> = block
                .lines
                .iter()
                .map(|entry| base + u64::from(entry.offset))
                .collect();
            voffs.push(base + u64::from(lines.length));

            table.sequences.push(LineSequence {
                file,
                voffs,
                lines: block.lines.iter().map(|entry| entry.line).collect(),
            });
        }
    }

    table
}

/// Builds all units with their line tables, and the source files they refer to.
///
/// `arch` is used for units that do not declare a known architecture themselves.
#[tracing::instrument(level = "trace", skip_all)]
pub fn build_units(input: &PdbInput, arch: Arch, line_info: bool) -> UnitTables {
    let mut tables = UnitTables::default();

    for unit in &input.units {
        let (unit_name, object_file, archive_file) = unit_names(unit);

        let (compiler_name, language, unit_arch) = match compile_flags(unit) {
            Some(flags) => (flags.compiler_name(), flags.language, flags.arch),
            None => (String::new(), Language::Unknown, Arch::Unknown),
        };

        let line_table = if line_info {
            let table = unit_line_table(
                unit,
                &input.sections,
                &input.strings,
                &mut tables.source_files,
            );
            (!table.sequences.is_empty()).then(|| tables.push_line_table(table))
        } else {
            None
        };

        tables.units.push(Unit {
            unit_name,
            compiler_name,
            object_file,
            archive_file,
            language,
            arch: match unit_arch {
                Arch::Unknown => arch,
                unit_arch => unit_arch,
            },
            line_table,
            voff_ranges: Vec::new(),
        });
    }

    for contribution in &input.contributions {
        match tables.units.get_mut(contribution.module) {
            Some(unit) => unit
                .voff_ranges
                .push(VoffRange::new(contribution.voff_first, contribution.voff_opl)),
            None => {
                tracing::debug!(module = contribution.module, "contribution of unknown unit");
            }
        }
    }

    tables
}

/// The inline site line tables of one unit, before merging into the model.
///
/// Source files are referenced by their index in `files`, which holds normalized paths.
#[derive(Debug, Default)]
pub struct InlineLineTables {
    pub line_tables: ChunkList<LineTable>,
    pub files: IndexSet<String>,
    /// Index into `line_tables` for each inline site in stream order.
    pub slots: Vec<Option<usize>>,
}

/// Decodes the line tables of all inline sites of a unit.
///
/// Every `S_INLINESITE` gets a slot, in stream order. Sites without lines, or whose inlinee has
/// no source location, get an empty slot.
#[tracing::instrument(level = "trace", skip_all, fields(unit = %unit.obj_name))]
pub fn inline_line_tables(
    unit: &CompilationUnit,
    sections: &SectionTable,
    strings: &StringTable,
) -> InlineLineTables {
    let mut tables = InlineLineTables::default();
    let mut procedure_voff = 0;

    for record in unit.symbols.records() {
        let site = match record.parse() {
            Ok(Some(SymbolData::Procedure(procedure))) => {
                if let Some(voff) = procedure.offset.voff(sections) {
                    procedure_voff = voff;
                }
                continue;
            }
            Ok(Some(SymbolData::InlineSite(site))) => site,
            Ok(_) => continue,
            Err(error) => {
                if matches!(record.kind, cv::S_INLINESITE | cv::S_INLINESITE2) {
                    tracing::debug!(offset = record.offset, %error, "invalid inline site");
                    tables.slots.push(None);
                }
                continue;
            }
        };

        let Some(source) = unit.inlinees.get(site.inlinee) else {
            tables.slots.push(None);
            continue;
        };

        let sequences = inline_line_sequences(
            &site.annotations,
            source.file_off,
            source.first_line,
            procedure_voff,
        );
        if sequences.is_empty() {
            tables.slots.push(None);
            continue;
        }

        let mut table = LineTable::default();
        for sequence in sequences {
            let file = file_path(unit, strings, sequence.file_off).map(|path| {
                let (index, _) = tables.files.insert_full(normalize_path(path));
                SourceFileId::from_index(index)
            });
            table.sequences.push(LineSequence {
                file,
                voffs: sequence.voffs,
                lines: sequence.lines,
            });
        }

        let index = tables.line_tables.push(table);
        tables.slots.push(Some(index));
    }

    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    use crate::source::{
        C13Lines, InlineeLines, InlineeSource, LineBlock, LineEntry, Section,
        SectionContribution, SymbolStream,
    };
    use crate::testutils::{symbol, symbols, Bytes};

    fn strings() -> StringTable {
        StringTable::new(b"\0C:\\Src\\Main.cpp\0c:/src/main.cpp\0inc\\util.h\0".to_vec())
    }

    fn sections() -> SectionTable {
        SectionTable::new(vec![Section {
            voff: 0x1000,
            size: 0x1000,
        }])
    }

    fn compile3(machine: u16) -> Bytes {
        Bytes::new()
            .u32(0x1)
            .u16(machine)
            .u16(19)
            .u16(0)
            .u16(0)
            .u16(0)
            .u16(19)
            .u16(36)
            .u16(100)
            .u16(0)
            .name("MSVC")
    }

    fn unit(obj_name: &str, line_offsets: &[u32]) -> CompilationUnit {
        let entries = line_offsets
            .iter()
            .enumerate()
            .map(|(i, offset)| LineEntry {
                offset: *offset,
                line: 10 + i as u32,
            })
            .collect();

        CompilationUnit {
            obj_name: obj_name.to_owned(),
            group_name: "app.lib".to_owned(),
            symbols: SymbolStream::new(symbols(vec![symbol(cv::S_COMPILE3, compile3(0xd0))])),
            lines: vec![C13Lines {
                section: 1,
                offset: 0x100,
                length: 0x40,
                blocks: vec![LineBlock {
                    file_off: 0,
                    lines: entries,
                }],
            }],
            checksums: [(0, 1), (0x18, 17), (0x30, 33)].into_iter().collect(),
            inlinees: InlineeLines::default(),
        }
    }

    #[test]
    fn test_unit_names() {
        let names = unit_names(&unit("C:\\build\\obj\\main.obj", &[]));
        assert_eq!(
            names,
            (
                "main.obj".to_owned(),
                "C:\\build\\obj\\main.obj".to_owned(),
                "app.lib".to_owned()
            )
        );

        let (name, object, _) = unit_names(&unit(LINKER_UNIT, &[]));
        assert_eq!(name, LINKER_UNIT);
        assert_eq!(object, "");

        let (_, object, _) = unit_names(&unit("Import:KERNEL32.dll", &[]));
        assert_eq!(object, "");
    }

    #[test]
    fn test_build_units() {
        let mut input = PdbInput::new();
        input.sections = sections();
        input.strings = strings();
        input.units = vec![unit("a.obj", &[0, 0x10]), unit("b.obj", &[0x20])];
        input.contributions = vec![
            SectionContribution {
                module: 1,
                voff_first: 0x1100,
                voff_opl: 0x1140,
            },
            SectionContribution {
                module: 7,
                voff_first: 0,
                voff_opl: 4,
            },
        ];

        let tables = build_units(&input, Arch::Amd64, true);
        assert_eq!(tables.units.len(), 2);
        assert_eq!(tables.line_tables.len(), 2);

        let a = tables.units.get(0).unwrap();
        assert_eq!(a.compiler_name, "MSVC 19.36.100");
        assert_eq!(a.language, Language::Cpp);
        assert_eq!(a.line_table, Some(LineTableId(0)));
        assert!(a.voff_ranges.is_empty());

        let b = tables.units.get(1).unwrap();
        assert_eq!(b.voff_ranges, vec![VoffRange::new(0x1100, 0x1140)]);

        let table = tables.line_tables.get(0).unwrap();
        assert_eq!(
            table.sequences,
            vec![LineSequence {
                file: Some(SourceFileId(0)),
                voffs: vec![0x1100, 0x1110, 0x1140],
                lines: vec![10, 11],
            }]
        );

        // both units refer to the same file by differently spelled paths
        let files = tables.source_files.into_vec();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "c:/src/main.cpp");
        assert_eq!(files[0].sequences.len(), 2);
    }

    #[test]
    fn test_units_without_lines() {
        let mut input = PdbInput::new();
        input.units = vec![unit("a.obj", &[0])];
        input.units[0].lines[0].section = 9;

        let tables = build_units(&input, Arch::X86, true);
        assert_eq!(tables.units.get(0).unwrap().line_table, None);
        assert!(tables.line_tables.is_empty());

        input.units[0].lines[0].section = 1;
        input.sections = sections();
        let tables = build_units(&input, Arch::X86, false);
        assert_eq!(tables.units.get(0).unwrap().line_table, None);
        assert!(tables.source_files.is_empty());
    }

    #[test]
    fn test_detect_arch() {
        let mut x86 = unit("a.obj", &[]);
        x86.symbols = SymbolStream::new(symbols(vec![symbol(cv::S_COMPILE3, compile3(0x03))]));
        let mut unknown = unit("b.obj", &[]);
        unknown.symbols = SymbolStream::default();

        assert_eq!(detect_arch(&[unknown.clone(), x86]), Arch::X86);
        assert_eq!(detect_arch(&[unknown]), Arch::Unknown);
    }

    fn proc32(offset: u32, len: u32) -> Bytes {
        Bytes::new()
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
            .name("f")
    }

    fn inline_site(inlinee: u32, annotations: &[u8]) -> Bytes {
        Bytes::new().u32(0).u32(0).u32(inlinee).bytes(annotations)
    }

    #[test]
    fn test_inline_line_tables() {
        let mut unit = unit("a.obj", &[]);
        unit.inlinees = [
            (
                0x1005,
                InlineeSource {
                    file_off: 0x18,
                    first_line: 20,
                },
            ),
            (
                0x1006,
                InlineeSource {
                    file_off: 0x30,
                    first_line: 5,
                },
            ),
        ]
        .into_iter()
        .collect();
        unit.symbols = SymbolStream::new(symbols(vec![
            symbol(cv::S_GPROC32, proc32(0, 0x50)),
            // line 21 at +0, 0x10 bytes
            symbol(cv::S_INLINESITE, inline_site(0x1005, &[0x0b, 0x20, 0x04, 0x10])),
            symbol(cv::S_INLINESITE_END, Bytes::new()),
            // no source location for this inlinee
            symbol(cv::S_INLINESITE, inline_site(0x1099, &[0x0b, 0x20])),
            symbol(cv::S_INLINESITE_END, Bytes::new()),
            symbol(cv::S_INLINESITE, inline_site(0x1006, &[0x0b, 0x44, 0x04, 0x08])),
            symbol(cv::S_INLINESITE_END, Bytes::new()),
            symbol(cv::S_END, Bytes::new()),
        ]));

        let inline = inline_line_tables(&unit, &sections(), &strings());
        assert_eq!(inline.slots, vec![Some(0), None, Some(1)]);
        assert_eq!(
            inline.files.iter().collect::<Vec<_>>(),
            vec!["c:/src/main.cpp", "inc/util.h"]
        );

        let table = inline.line_tables.get(0).unwrap();
        assert_eq!(
            table.sequences,
            vec![LineSequence {
                file: Some(SourceFileId(0)),
                voffs: vec![0x1000, 0x1010],
                lines: vec![21],
            }]
        );

        let mut tables = UnitTables::default();
        tables.source_files.insert("C:\\SRC\\main.cpp");
        let ids = tables.merge_inline_tables(inline);
        assert_eq!(ids, vec![Some(LineTableId(0)), None, Some(LineTableId(1))]);

        let files = tables.source_files.into_vec();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].path, "inc/util.h");
        assert_eq!(
            files[1].sequences,
            vec![SequenceRef {
                line_table: LineTableId(1),
                sequence: 0
            }]
        );
    }
}
