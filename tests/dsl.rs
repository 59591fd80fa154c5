//! Grammar language tests: syntax (parse success/failure) and semantics
//! (lowering, references, literal checks).

use protosynth::ast::{CountDecl, Reference, RelationOp, VarDeclKind};
use protosynth::{
    load, parse, parse_file, Bits, CountSpec, DataType, EngineError, Endianness, RelationKind, ResolvedGrammar, Scope,
    VariableKind,
};
use std::io::Write;

// ==================== Syntax: valid programs ====================

#[test]
fn parse_empty_source() {
    let p = parse("").expect("empty source can parse");
    assert!(p.symbols.is_empty());
}

#[test]
fn parse_minimal_symbol() {
    let p = parse("symbol M { field x: data(uint8); }").expect("parse");
    assert_eq!(p.symbols.len(), 1);
    assert_eq!(p.symbols[0].name, "M");
    assert_eq!(p.symbols[0].fields.len(), 1);
    assert_eq!(p.symbols[0].fields[0].name, "x");
}

#[test]
fn parse_with_comments() {
    let src = r#"
// line comment
symbol WithComments {
    field id: data(uint8); /* block */
    /* multi
       line */
    field body: data(raw(0..4));
}
"#;
    let p = parse(src).expect("parse");
    assert_eq!(p.symbols[0].fields.len(), 2);
}

#[test]
fn parse_all_integer_types() {
    let src = r#"
symbol Ints {
    field a: data(uint8);
    field b: data(uint16 le);
    field c: data(uint32 be);
    field d: data(uint64);
    field e: data(int8);
    field f: data(int16 [-5..5]);
    field g: data(int32 le [0..100]);
    field h: data(int64);
}
"#;
    let p = parse(src).expect("parse");
    assert_eq!(p.symbols[0].fields.len(), 8);
}

#[test]
fn parse_nested_field_groups() {
    let src = r#"
symbol Outer {
    field header {
        field version: data(0x01);
        field flags: data(bits(8));
    }
    field body: data(raw(0..16));
}
"#;
    let p = parse(src).expect("parse");
    let header = &p.symbols[0].fields[0];
    assert!(header.domain.is_none());
    assert_eq!(header.children.len(), 2);
}

#[test]
fn parse_alt_with_weights() {
    let p = parse("symbol A { field x: alt(3: data(\"a\"), 1: data(\"b\"), data(\"c\")); }").expect("parse");
    match &p.symbols[0].fields[0].domain.as_ref().expect("domain").kind {
        VarDeclKind::Alt(choices) => {
            let weights: Vec<Option<u32>> = choices.iter().map(|(w, _)| *w).collect();
            assert_eq!(weights, vec![Some(3), Some(1), None]);
        }
        other => panic!("expected alt, got {:?}", other),
    }
}

#[test]
fn parse_repeat_counts() {
    let src = r#"
symbol R {
    field a: repeat(data(0x00), 4);
    field b: repeat(data(0x00), 1..3, delimiter = ";");
    field c: repeat(data(0x00), @n);
    field n: data(uint8);
}
"#;
    let p = parse(src).expect("parse");
    let counts: Vec<CountDecl> = p.symbols[0].fields[..3]
        .iter()
        .map(|f| match &f.domain.as_ref().expect("domain").kind {
            VarDeclKind::Repeat { count, .. } => count.clone(),
            other => panic!("expected repeat, got {:?}", other),
        })
        .collect();
    assert_eq!(
        counts,
        vec![
            CountDecl::Fixed(4),
            CountDecl::Range(1, 3),
            CountDecl::Reference(Reference::Field("n".into()))
        ]
    );
}

#[test]
fn parse_relation_options() {
    let src = "symbol S { field len: size(@a, $b, uint16 le, offset = -2, unit = bits); field a: data(uint8); field x: b = data(uint8); }";
    let p = parse(src).expect("parse");
    match &p.symbols[0].fields[0].domain.as_ref().expect("domain").kind {
        VarDeclKind::Relation(r) => {
            assert_eq!(r.op, RelationOp::Size);
            assert_eq!(
                r.references,
                vec![Reference::Field("a".into()), Reference::Variable("b".into())]
            );
            assert_eq!(r.output_type, Some(DataType::uint16(Endianness::Little)));
            assert_eq!(r.offset, Some(-2));
            assert_eq!(r.unit_bits, Some(1));
        }
        other => panic!("expected relation, got {:?}", other),
    }
}

#[test]
fn parse_every_relation_operator() {
    let src = r#"
symbol Ops {
    field d: data(raw(1..2));
    field a: size(@d);
    field b: value(@d);
    field c: checksum(@d);
    field e: crc32(@d);
    field f: crc16(@d);
    field g: crc16_ccitt(@d);
}
"#;
    let p = parse(src).expect("parse");
    let ops: Vec<RelationOp> = p.symbols[0].fields[1..]
        .iter()
        .map(|f| match &f.domain.as_ref().expect("domain").kind {
            VarDeclKind::Relation(r) => r.op,
            other => panic!("expected relation, got {:?}", other),
        })
        .collect();
    assert_eq!(
        ops,
        vec![
            RelationOp::Size,
            RelationOp::Value,
            RelationOp::Checksum,
            RelationOp::Crc32,
            RelationOp::Crc16,
            RelationOp::Crc16Ccitt
        ]
    );
}

#[test]
fn parse_padding_options() {
    let src = "symbol S { field d: data(raw(1..4)); field p: padding(@d, modulo = 4, unit = bytes, fill = 0xff, once, offset = 1); }";
    let p = parse(src).expect("parse");
    match &p.symbols[0].fields[1].domain.as_ref().expect("domain").kind {
        VarDeclKind::Relation(r) => {
            assert_eq!(r.op, RelationOp::Padding);
            assert_eq!(r.modulo, Some(4));
            assert_eq!(r.unit_bits, Some(8));
            assert_eq!(r.fill, Some(0xff));
            assert!(r.once);
            assert_eq!(r.offset, Some(1));
            assert_eq!(r.output_type, None);
        }
        other => panic!("expected relation, got {:?}", other),
    }
}

#[test]
fn parse_persistent_named_variable() {
    let p = parse("symbol S { field id: persistent sid = data(raw(4..4)); }").expect("parse");
    let var = p.symbols[0].fields[0].domain.as_ref().expect("domain");
    assert!(var.persistent);
    assert_eq!(var.name.as_deref(), Some("sid"));
}

// ==================== Syntax: invalid programs ====================

#[test]
fn reject_missing_semicolon() {
    assert!(parse("symbol S { field x: data(uint8) }").is_err());
}

#[test]
fn reject_unknown_type() {
    assert!(parse("symbol S { field x: data(float32); }").is_err());
}

#[test]
fn reject_relation_without_reference() {
    assert!(parse("symbol S { field x: size(uint8); }").is_err());
}

#[test]
fn reject_bad_integer_width() {
    assert!(parse("symbol S { field x: data(uint12); }").is_err());
}

#[test]
fn parse_error_carries_position() {
    let err = parse("symbol S {\n  field x: data(;\n}").expect_err("syntax error");
    assert!(err.contains("2:"), "{}", err);
}

// ==================== Semantics: lowering ====================

#[test]
fn lowering_builds_typed_tree() {
    let grammar = load(
        r#"
symbol Packet {
    field size: size(@payload, uint16 be);
    field payload: data(raw(0..10));
}
"#,
    )
    .expect("load");
    let packet = grammar.symbol("Packet").expect("Packet");
    assert_eq!(packet.children().len(), 2);
    let payload = packet.find("payload").expect("payload");
    let size = packet.find("size").and_then(|f| f.domain()).expect("size");
    match size.kind() {
        VariableKind::Relation(r) => {
            assert_eq!(r.dependencies, vec![payload.dep()]);
            assert_eq!(r.kind, RelationKind::Size { unit_bits: 8, offset: 0 });
            assert_eq!(r.output_type, DataType::uint16(Endianness::Big));
        }
        other => panic!("expected relation, got {:?}", other),
    }
}

#[test]
fn padding_is_lowered_in_bits() {
    let grammar =
        load("symbol S { field d: data(raw(1..4)); field p: padding(@d, modulo = 4, unit = bytes, fill = 255, once, offset = 1); }")
            .expect("load");
    let s = grammar.symbol("S").expect("S");
    let pad = s.find("p").and_then(|f| f.domain()).expect("p");
    match pad.kind() {
        VariableKind::Relation(r) => assert_eq!(
            r.kind,
            RelationKind::Padding {
                modulo_bits: 32,
                offset: 8,
                once: true,
                fill: 0xff
            }
        ),
        other => panic!("expected relation, got {:?}", other),
    }

    let plain = load("symbol S { field d: data(raw(1..4)); field p: padding(@d, modulo = 12); }").expect("load");
    let pad = plain.symbol("S").and_then(|s| s.find("p")).and_then(|f| f.domain()).expect("p");
    match pad.kind() {
        VariableKind::Relation(r) => assert_eq!(
            r.kind,
            RelationKind::Padding {
                modulo_bits: 12,
                offset: 0,
                once: false,
                fill: 0
            }
        ),
        other => panic!("expected relation, got {:?}", other),
    }
}

#[test]
fn alt_weights_at_the_integer_limit() {
    let grammar =
        load(r#"symbol S { field x: alt(4294967295: data("a"), 4294967295: data("b")); }"#).expect("load");
    let s = grammar.symbol("S").expect("S");
    for _ in 0..20 {
        let out = s.specialize(None).expect("specialize");
        assert!(out == b"a" || out == b"b", "{:?}", out);
    }
}

#[test]
fn variable_reference_resolves_to_named_variable() {
    let grammar = load(
        r#"
symbol S {
    field items: repeat(data(uint8), $count);
    field n: persistent count = data(uint8 [0..4]);
}
"#,
    )
    .expect("load");
    let s = grammar.symbol("S").expect("S");
    let count = s.find_variable("count").expect("count");
    assert_eq!(count.scope(), Scope::Persistent);
    let items = s.find("items").and_then(|f| f.domain()).expect("items");
    match items.kind() {
        VariableKind::Repeat(r) => assert_eq!(r.count, CountSpec::Dependency(count.dep())),
        other => panic!("expected repeat, got {:?}", other),
    }
}

#[test]
fn literal_data_infers_its_type() {
    let grammar = load(r#"symbol S { field a: data("GET"); field b: data(0x0d0a); }"#).expect("load");
    let s = grammar.symbol("S").expect("S");
    assert_eq!(s.specialize(None).expect("specialize"), b"GET\r\n");
}

#[test]
fn integer_literal_uses_declared_endianness() {
    let grammar = load("symbol S { field v: data(uint16 le, 258); }").expect("load");
    let s = grammar.symbol("S").expect("S");
    assert_eq!(s.specialize(None).expect("specialize"), vec![2, 1]);
}

#[test]
fn alt_weights_are_lowered() {
    let grammar = load(r#"symbol S { field x: alt(0: data("a"), 5: data("b")); }"#).expect("load");
    let s = grammar.symbol("S").expect("S");
    for _ in 0..10 {
        assert_eq!(s.specialize(None).expect("specialize"), b"b");
    }
}

#[test]
fn field_without_domain_surfaces_at_specialization() {
    let grammar = load("symbol S { field a; }").expect("load");
    let s = grammar.symbol("S").expect("S");
    assert_eq!(s.specialize(None), Err(EngineError::UndefinedDomain("a".into())));
}

// ==================== Semantics: resolution errors ====================

#[test]
fn reject_duplicate_symbol() {
    let err = load("symbol A { field x: data(uint8); } symbol A { field y: data(uint8); }").expect_err("dup");
    assert!(err.contains("Duplicate symbol name"));
}

#[test]
fn reject_unknown_field_reference() {
    let err = load("symbol A { field x: size(@nope); }").expect_err("unknown");
    assert!(err.contains("@nope"));
}

#[test]
fn reject_unknown_variable_reference() {
    let err = load("symbol A { field x: repeat(data(uint8), $nope); }").expect_err("unknown");
    assert!(err.contains("$nope"));
}

#[test]
fn reject_ambiguous_field_reference() {
    let src = r#"
symbol A {
    field h { field x: data(uint8); }
    field t { field x: data(uint8); }
    field len: size(@x);
}
"#;
    let err = load(src).expect_err("ambiguous");
    assert!(err.contains("ambiguous"));
}

#[test]
fn reject_duplicate_variable_name() {
    let err = load("symbol A { field x: v = data(uint8); field y: v = data(uint8); }").expect_err("dup");
    assert!(err.contains("duplicate variable"));
}

#[test]
fn reject_literal_out_of_range() {
    assert!(load("symbol A { field x: data(uint8 [0..9], 10); }").is_err());
    assert!(load("symbol A { field x: data(uint8, 256); }").is_err());
}

#[test]
fn reject_offset_on_checksum() {
    assert!(load("symbol A { field d: data(uint8); field c: checksum(@d, offset = 1); }").is_err());
}

#[test]
fn reject_misplaced_padding_options() {
    let d = "field d: data(uint8);";
    for relation in [
        "padding(@d)",
        "padding(@d, modulo = 0)",
        "padding(@d, modulo = 4, uint8)",
        "padding(@d, modulo = 4, fill = 300)",
        "size(@d, fill = 0)",
        "value(@d, once)",
        "checksum(@d, modulo = 4)",
    ] {
        let src = format!("symbol A {{ {} field p: {}; }}", d, relation);
        assert!(load(&src).is_err(), "{}", relation);
    }
}

#[test]
fn unresolved_grammar_keeps_symbols_in_order() {
    let p = parse("symbol B { field x: data(uint8); } symbol A { field y: data(uint8); }").expect("parse");
    let grammar = ResolvedGrammar::resolve(&p).expect("resolve");
    let names: Vec<&str> = grammar.symbols().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["B", "A"]);
}

// ==================== Files ====================

#[test]
fn parse_grammar_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "symbol Ping {{ field tag: data(0x01); field id: data(uint8); }}").expect("write");
    let p = parse_file(file.path()).expect("parse file");
    let grammar = ResolvedGrammar::resolve(&p).expect("resolve");
    let ping = grammar.symbol("Ping").expect("Ping");
    let bindings = ping.parse(&Bits::from_bytes(&[0x01, 0x2a]), true).expect("parse");
    assert_eq!(bindings.len(), 1);
}

#[test]
fn missing_grammar_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = parse_file(dir.path().join("absent.grammar")).expect_err("missing");
    assert!(err.contains("absent.grammar"));
}
