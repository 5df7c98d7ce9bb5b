use std::fmt;

use similar_asserts::assert_eq;
use symbolic_common::{Arch, Language};
use symbolic_pdbconv::{
    convert, cv, C13Lines, CompilationUnit, ConvertOptions, DebugModel, InlineeLines,
    InlineeSource, LineBlock, LineEntry, LineSequence, LineTableId, MemberKind, PdbInput, ScopeId,
    Section, SectionTable, StringTable, SymbolStream, TypeKind, TypeStream,
};
use symbolic_testutils::{record, Bytes};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Helper to create neat snapshots for scope trees.
struct ScopesDebug<'a>(&'a DebugModel);

impl ScopesDebug<'_> {
    fn write_scope(&self, f: &mut fmt::Formatter<'_>, id: ScopeId, depth: usize) -> fmt::Result {
        let model = self.0;
        let Some(scope) = model.scope(id) else {
            return writeln!(f, "{:indent$}<missing {id:?}>", "", indent = depth * 2);
        };

        let inline_site = scope
            .inline_site
            .and_then(|site| model.inline_sites.get(site.index()));
        let procedure = scope
            .procedure
            .and_then(|procedure| model.procedures.get(procedure.index()));

        let label = match (inline_site, procedure) {
            (Some(site), _) => format!("inline {}", site.name),
            (None, Some(procedure)) if scope.parent.is_none() => procedure.name.clone(),
            _ => "block".to_owned(),
        };

        writeln!(
            f,
            "{:indent$}{label} {:?}",
            "",
            scope.ranges.as_slice(),
            indent = depth * 2
        )?;

        for local in &scope.locals {
            writeln!(
                f,
                "{:indent$}{:?} {}",
                "",
                local.kind,
                local.name,
                indent = depth * 2 + 2
            )?;
            for case in &local.locations {
                writeln!(
                    f,
                    "{:indent$}{:?} {:?}",
                    "",
                    case.range,
                    case.location,
                    indent = depth * 2 + 4
                )?;
            }
        }

        for child in &scope.children {
            self.write_scope(f, *child, depth + 1)?;
        }

        Ok(())
    }
}

impl fmt::Debug for ScopesDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for procedure in self.0.procedures.iter() {
            if let Some(root) = procedure.root_scope {
                self.write_scope(f, root, 0)?;
            }
        }
        Ok(())
    }
}

fn member(itype: u32, offset: u16, name: &str) -> Bytes {
    Bytes::new()
        .u16(cv::LF_MEMBER)
        .u16(3)
        .u32(itype)
        .u16(offset)
        .name(name)
        .align(4)
}

fn structure(field_list: u32, size: u16, name: &str) -> Vec<u8> {
    let body = Bytes::new()
        .u16(2)
        .u16(0)
        .u32(field_list)
        .u32(0)
        .u32(0)
        .u16(size)
        .name(name);
    record(cv::LF_STRUCTURE, body)
}

fn type_stream(records: &[Vec<u8>]) -> TypeStream {
    TypeStream::parse(cv::FIRST_COMPLEX_ITYPE, &records.concat())
}

fn proc32(kind: u16, itype: u32, offset: u32, len: u32, name: &str) -> Vec<u8> {
    let body = Bytes::new()
        .u32(0)
        .u32(0)
        .u32(0)
        .u32(len)
        .u32(0)
        .u32(0)
        .u32(itype)
        .u32(offset)
        .u16(1)
        .u8(0)
        .name(name);
    record(kind, body)
}

fn compile3() -> Vec<u8> {
    let body = Bytes::new()
        .u32(1)
        .u16(0xd0)
        .u16(19)
        .u16(0)
        .u16(0)
        .u16(0)
        .u16(19)
        .u16(36)
        .u16(100)
        .u16(0)
        .name("MSVC");
    record(cv::S_COMPILE3, body)
}

fn end() -> Vec<u8> {
    record(cv::S_END, Bytes::new())
}

/// A unit with one procedure, a nested block with a register local, and one inline site.
fn sample_input() -> PdbInput {
    let mut input = PdbInput::new();

    input.tpi = type_stream(&[
        // 0x1000
        record(
            cv::LF_FIELDLIST,
            Bytes::new()
                .append(member(0x74, 0, "x"))
                .append(member(0x74, 4, "y")),
        ),
        // 0x1001
        structure(0x1000, 8, "Point"),
        // 0x1002
        record(cv::LF_ARGLIST, Bytes::new().u32(1).u32(0x1001)),
        // 0x1003
        record(
            cv::LF_PROCEDURE,
            Bytes::new().u32(0x74).u8(0).u8(0).u16(1).u32(0x1002),
        ),
    ]);

    input.ipi = type_stream(&[record(
        cv::LF_FUNC_ID,
        Bytes::new().u32(0).u32(0x1003).name("helper"),
    )]);

    input.sections = SectionTable::new(vec![Section {
        voff: 0x1000,
        size: 0x1000,
    }]);
    input.strings = StringTable::new(b"\0C:\\Src\\Main.cpp\0".to_vec());

    let symbols = [
        compile3(),
        proc32(cv::S_GPROC32, 0x1003, 0, 0x50, "main"),
        record(
            cv::S_BLOCK32,
            Bytes::new().u32(0).u32(0).u32(0x10).u32(0x10).u16(1).name(""),
        ),
        record(cv::S_LOCAL, Bytes::new().u32(0x1001).u16(0).name("p")),
        record(
            cv::S_DEFRANGE_REGISTER,
            Bytes::new()
                .u16(328)
                .u16(0)
                .u32(0x10)
                .u16(1)
                .u16(0x10),
        ),
        end(),
        record(
            cv::S_INLINESITE,
            Bytes::new()
                .u32(0)
                .u32(0)
                .u32(0x1000)
                .bytes(&[0x0b, 0x20, 0x04, 0x10]),
        ),
        record(cv::S_INLINESITE_END, Bytes::new()),
        end(),
    ]
    .concat();

    let mut inlinees = InlineeLines::default();
    inlinees.insert(
        0x1000,
        InlineeSource {
            file_off: 0,
            first_line: 20,
        },
    );

    input.units.push(CompilationUnit {
        obj_name: "C:\\build\\main.obj".to_owned(),
        group_name: "C:\\build\\main.obj".to_owned(),
        symbols: SymbolStream::parse(&symbols),
        lines: vec![C13Lines {
            section: 1,
            offset: 0,
            length: 0x50,
            blocks: vec![LineBlock {
                file_off: 0,
                lines: vec![
                    LineEntry {
                        offset: 0,
                        line: 10,
                    },
                    LineEntry {
                        offset: 0x10,
                        line: 11,
                    },
                ],
            }],
        }],
        checksums: [(0, 1)].into_iter().collect(),
        inlinees,
    });

    let globals = [
        record(
            cv::S_GDATA32,
            Bytes::new().u32(0x74).u32(0x800).u16(1).name("g_counter"),
        ),
        record(
            cv::S_PUB32,
            Bytes::new().u32(0).u32(0).u16(1).name("?main@@YAHUPoint@@@Z"),
        ),
    ]
    .concat();
    input.globals = SymbolStream::parse(&globals);

    input
}

fn inline_options() -> ConvertOptions {
    ConvertOptions {
        threads: Some(0),
        ..ConvertOptions::default()
    }
}

#[test]
fn test_scope_tree() {
    init_tracing();
    let model = convert(sample_input(), &inline_options()).unwrap();

    assert_eq!(model.arch, Arch::Amd64);
    insta::assert_debug_snapshot!(ScopesDebug(&model), @r###"
    main [0x1000..0x1050]
      block [0x1010..0x1020]
        Variable p
          0x1010..0x1020 ValReg(rax)
      inline helper [0x1000..0x1010]
    "###);

    let root = model.scope(ScopeId(0)).unwrap();
    assert_eq!(root.children.len(), 2);
}

#[test]
fn test_inline_site_line_table() {
    let model = convert(sample_input(), &inline_options()).unwrap();

    let site = model.inline_sites.get(0).unwrap();
    assert_eq!(site.line_table, Some(LineTableId(1)));

    let table = model.line_table(LineTableId(1)).unwrap();
    assert_eq!(table.sequences.len(), 1);
    assert_eq!(table.sequences[0].lines, vec![21]);
    assert_eq!(table.sequences[0].voffs, vec![0x1000, 0x1010]);

    // the unit and the inline site share one source file
    assert_eq!(model.source_files.len(), 1);
    let file = &model.source_files[0];
    assert_eq!(file.path, "c:/src/main.cpp");
    assert_eq!(file.sequences.len(), 2);
}

#[test]
fn test_units_and_globals() {
    let model = convert(sample_input(), &inline_options()).unwrap();

    let unit = model.units.get(0).unwrap();
    assert_eq!(unit.unit_name, "main.obj");
    assert_eq!(unit.compiler_name, "MSVC 19.36.100");
    assert_eq!(unit.language, Language::Cpp);
    assert_eq!(unit.line_table, Some(LineTableId(0)));

    let table = model.line_table(LineTableId(0)).unwrap();
    assert_eq!(
        table.sequences,
        vec![LineSequence {
            file: table.sequences[0].file,
            voffs: vec![0x1000, 0x1010, 0x1050],
            lines: vec![10, 11],
        }]
    );

    let main = model.procedures.get(0).unwrap();
    assert_eq!(main.link_name.as_deref(), Some("?main@@YAHUPoint@@@Z"));
    assert!(main.is_extern);

    let global = model.global_variables.get(0).unwrap();
    assert_eq!(global.name, "g_counter");
    assert_eq!(global.offset, 0x1800);
}

#[test]
fn test_types_and_udts() {
    let model = convert(sample_input(), &inline_options()).unwrap();

    let point = model.types.lookup(0x1001).unwrap();
    let node = model.types.get(point).unwrap();
    assert_eq!(node.kind, TypeKind::Struct);
    assert_eq!(node.name, "Point");
    assert_eq!(node.byte_size, 8);

    let udt = model.udt_for(point).unwrap();
    let members: Vec<_> = udt
        .members
        .iter()
        .map(|m| (m.kind, m.name.as_str(), m.offset))
        .collect();
    assert_eq!(
        members,
        vec![
            (MemberKind::DataField, "x", 0),
            (MemberKind::DataField, "y", 4),
        ]
    );

    let function = model.types.node_for_itype(0x1003).unwrap();
    assert_eq!(function.kind, TypeKind::Function);
    assert_eq!(function.params, vec![Some(point)]);

    let main = model.procedures.get(0).unwrap();
    assert_eq!(main.type_id, model.types.lookup(0x1003));

    let local = &model.scope(ScopeId(1)).unwrap().locals[0];
    assert_eq!(local.type_id, Some(point));
}

#[test]
fn test_thread_count_does_not_change_output() {
    let input = std::sync::Arc::new(sample_input());

    let render = |threads| {
        let options = ConvertOptions {
            threads,
            symbols_per_task: 1,
            udt_itypes_per_task: 1,
            ..ConvertOptions::default()
        };
        let model = convert(input.clone(), &options).unwrap();
        (
            format!("{:?}", ScopesDebug(&model)),
            model.udts.len(),
            model.global_variables.len(),
        )
    };

    let expected = render(Some(0));
    assert_eq!(render(Some(1)), expected);
    assert_eq!(render(Some(4)), expected);
}

#[test]
fn test_disabled_passes() {
    let options = ConvertOptions {
        types: false,
        line_info: false,
        locals: false,
        ..inline_options()
    };
    let model = convert(sample_input(), &options).unwrap();

    assert!(model.types.is_empty());
    assert!(model.udts.is_empty());
    assert!(model.line_tables.is_empty());
    assert!(model.source_files.is_empty());
    assert_eq!(model.procedures.get(0).unwrap().type_id, None);
    assert!(model.scopes.iter().all(|scope| scope.locals.is_empty()));
    assert_eq!(model.inline_sites.get(0).unwrap().line_table, None);
}

#[test]
fn test_truncated_field_list() {
    init_tracing();

    let mut bytes = [
        // 0x1000: continues in a truncated list and a valid one
        record(
            cv::LF_FIELDLIST,
            Bytes::new()
                .u16(cv::LF_INDEX)
                .u16(0)
                .u32(0x1004)
                .u16(cv::LF_INDEX)
                .u16(0)
                .u32(0x1001),
        ),
        // 0x1001
        record(cv::LF_FIELDLIST, member(0x74, 0, "a")),
        // 0x1002
        structure(0x1000, 4, "S"),
        // 0x1003
        structure(0x1004, 4, "T"),
        // 0x1004
        record(cv::LF_FIELDLIST, member(0x74, 0, "lost")),
    ]
    .concat();
    bytes.truncate(bytes.len() - 4);

    let mut input = PdbInput::new();
    input.tpi = TypeStream::parse(cv::FIRST_COMPLEX_ITYPE, &bytes);
    assert!(input.tpi.leaf(0x1004).unwrap().truncated);

    let model = convert(input, &inline_options()).unwrap();
    let names = |itype| {
        let id = model.types.lookup(itype).unwrap();
        let udt = model.udt_for(id).unwrap();
        udt.members
            .iter()
            .map(|m| m.name.clone())
            .collect::<Vec<_>>()
    };

    assert_eq!(names(0x1002), vec!["a"]);
    assert!(names(0x1003).is_empty());
}

#[test]
fn test_empty_input() {
    let model = convert(PdbInput::new(), &ConvertOptions::default()).unwrap();
    assert_eq!(model.arch, Arch::Unknown);
    assert!(model.units.is_empty());
    assert!(model.scopes.is_empty());
    assert!(!model.types.is_empty());
}

#[test]
fn test_unbalanced_scopes() {
    let symbols = [
        end(),
        record(cv::S_LOCAL, Bytes::new().u32(0x74).u16(0).name("orphan")),
        proc32(cv::S_LPROC32, 0x74, 0, 0x20, "first"),
        end(),
        end(),
        proc32(cv::S_LPROC32, 0x74, 0x20, 0x20, "second"),
        record(cv::S_LOCAL, Bytes::new().u32(0x74).u16(0).name("kept")),
    ]
    .concat();

    let mut input = PdbInput::new();
    input.sections = SectionTable::new(vec![Section {
        voff: 0x1000,
        size: 0x1000,
    }]);
    input.units.push(CompilationUnit {
        symbols: SymbolStream::parse(&symbols),
        ..CompilationUnit::default()
    });

    let model = convert(input, &inline_options()).unwrap();
    insta::assert_debug_snapshot!(ScopesDebug(&model), @r###"
    first [0x1000..0x1020]
    second [0x1020..0x1040]
      Variable kept
    "###);
}
