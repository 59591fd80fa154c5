//! Integration tests: specialization, abstraction, relations, memory and flow
//! parsing over grammars built with the builder API and the grammar language.

use protosynth::checksum::CRC32_ISO_HDLC;
use protosynth::{
    internet_checksum, load, Abstractor, Bits, CountSpec, DataType, Dependency, EngineConfig, EngineError, Endianness, Field,
    FieldId, FlowParser, Limits, Presets, Specializer, VarId, Variable,
};

fn seeded(seed: u64) -> Specializer {
    Specializer::new(EngineConfig::default().with_seed(seed))
}

// ==================== Scenarios ====================

#[test]
fn fixed_aggregate_specializes_and_parses() {
    let he = Variable::ascii("He");
    let llo = Variable::ascii("llo");
    let (he_id, llo_id) = (he.id(), llo.id());
    let agg = Variable::agg(vec![he, llo]);
    let agg_id = agg.id();
    let root = Field::new("greeting", agg);

    assert_eq!(root.specialize(None).expect("specialize"), b"Hello");

    let bindings = root.parse(&Bits::from("Hello"), true).expect("parse");
    assert_eq!(bindings.len(), 1);
    let b = &bindings[0];
    assert_eq!(b.variable(agg_id), Some(&Bits::from("Hello")));
    assert_eq!(b.variable(he_id), Some(&Bits::from("He")));
    assert_eq!(b.variable(llo_id), Some(&Bits::from("llo")));
    assert_eq!(b.consumed_bits(), 40);
}

#[test]
fn alternative_matches_one_child() {
    let ab = Variable::ascii("ab");
    let cd = Variable::ascii("cd");
    let cd_id = cd.id();
    let alt = Variable::alt(vec![ab, cd]);
    let alt_id = alt.id();
    let root = Field::new("choice", alt);

    let bindings = root.parse(&Bits::from("cd"), true).expect("parse");
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].variable(cd_id), Some(&Bits::from("cd")));
    assert_eq!(bindings[0].variable(alt_id), Some(&Bits::from("cd")));

    assert!(root.parse(&Bits::from("xy"), true).expect("parse").is_empty());
}

#[test]
fn size_precedes_its_payload() {
    let payload = Field::new("payload", Variable::data(DataType::raw(0, 10)));
    let size = Field::new("size", Variable::size(vec![payload.dep()], DataType::uint8()));
    let root = Field::group("packet", vec![size, payload]);

    let mut specializer = seeded(1);
    let mut abstractor = Abstractor::default();
    for _ in 0..20 {
        let bytes = specializer.specialize(&root).expect("specialize").to_bytes();
        assert_eq!(bytes[0] as usize, bytes.len() - 1);
        let bindings = abstractor.parse(&root, &Bits::from(bytes.clone()), true).expect("parse");
        assert_eq!(bindings.len(), 1);
    }
}

// ==================== Round trip ====================

#[test]
fn parse_of_specialized_fixed_message_reproduces_the_binding() {
    let grammar = load(
        r#"
        symbol Frame {
            field magic: data("PK");
            field len: size(@body, uint16 le);
            field body {
                field kind: data(uint8, 3);
                field items: repeat(data(0xbeef), 2, delimiter = ",");
            }
            field sum: checksum(@magic, @len, @body);
        }
        "#,
    )
    .expect("grammar");
    let frame = grammar.symbol("Frame").expect("Frame");

    let produced = seeded(3).specialize(frame).expect("specialize");
    assert_eq!(
        produced.to_bytes()[..9],
        [b'P', b'K', 6, 0, 3, 0xbe, 0xef, b',', 0xbe]
    );

    let bindings = frame.parse(&produced.bits(), true).expect("parse");
    assert_eq!(bindings.len(), 1);
    assert!(bindings[0].same_values(produced.binding()));
}

// ==================== Relations ====================

#[test]
fn checksum_matches_rfc1071() {
    let header = Field::new("header", Variable::fixed(&[0x45u8, 0x00, 0x00, 0x1c]));
    let body = Field::new("body", Variable::data(DataType::raw(1, 9)));
    let sum = Field::new("sum", Variable::checksum(vec![header.dep(), body.dep()]));
    let root = Field::group("datagram", vec![header, sum, body]);

    let mut specializer = seeded(5);
    for _ in 0..10 {
        let bytes = specializer.specialize(&root).expect("specialize").to_bytes();
        let mut covered = bytes[..4].to_vec();
        covered.extend_from_slice(&bytes[6..]);
        let expected = internet_checksum(&covered);
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), expected);
    }
}

#[test]
fn self_inclusive_checksum_verifies_to_zero() {
    let sum_id = FieldId::fresh();
    let version = Field::new("version", Variable::fixed(&[0x45u8, 0x00]));
    let length = Field::new("length", Variable::data(DataType::uint16(Endianness::Big)));
    let tail = Field::new("tail", Variable::data(DataType::raw(4, 4)));
    let sum = Field::with_id(
        sum_id,
        "sum",
        Some(Variable::checksum(vec![version.dep(), length.dep(), Dependency::Field(sum_id), tail.dep()])),
        vec![],
    );
    let root = Field::group("header", vec![version, length, sum, tail]);

    let bytes = seeded(9).specialize(&root).expect("specialize").to_bytes();
    assert_eq!(bytes.len(), 10);
    assert_eq!(internet_checksum(&bytes), 0);
    assert_eq!(root.parse(&Bits::from(bytes), true).expect("parse").len(), 1);
}

#[test]
fn crc32_over_check_string() {
    let payload = Field::new("payload", Variable::ascii("123456789"));
    let crc = Field::new("crc", Variable::crc32(vec![payload.dep()]));
    let root = Field::group("msg", vec![payload, crc]);
    let bytes = root.specialize(None).expect("specialize");
    assert_eq!(&bytes[9..], &[0xcb, 0xf4, 0x39, 0x26]);
    assert_eq!(CRC32_ISO_HDLC.checksum(b"123456789"), 0xcbf4_3926);
}

#[test]
fn corrupted_checksum_is_not_a_match() {
    let grammar = load(
        r#"
        symbol M {
            field body: data(raw(2..6));
            field crc: crc16_ccitt(@body);
        }
        "#,
    )
    .expect("grammar");
    let m = grammar.symbol("M").expect("M");
    let mut bytes = seeded(11).specialize(m).expect("specialize").to_bytes();
    assert_eq!(m.parse(&Bits::from(bytes.clone()), true).expect("parse").len(), 1);
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    assert!(m.parse(&Bits::from(bytes), true).expect("parse").is_empty());
}

#[test]
fn value_relation_copies_its_dependency() {
    let grammar = load(
        r#"
        symbol Echo {
            field request: data(ascii(1..4));
            field reply: value(@request);
        }
        "#,
    )
    .expect("grammar");
    let echo = grammar.symbol("Echo").expect("Echo");
    let bytes = seeded(2).specialize(echo).expect("specialize").to_bytes();
    let half = bytes.len() / 2;
    assert_eq!(bytes[..half], bytes[half..]);
    assert_eq!(echo.parse(&Bits::from("abab"), true).expect("parse").len(), 1);
    assert!(echo.parse(&Bits::from("abac"), true).expect("parse").is_empty());
}

#[test]
fn value_relation_ahead_of_its_dependency() {
    let grammar = load(
        r#"
        symbol Reply {
            field reply: value(@request);
            field request: data(ascii(1..4));
        }
        "#,
    )
    .expect("grammar");
    let reply = grammar.symbol("Reply").expect("Reply");
    let bytes = seeded(5).specialize(reply).expect("specialize").to_bytes();
    let half = bytes.len() / 2;
    assert_eq!(bytes[..half], bytes[half..]);
    let bindings = reply.parse(&Bits::from("abab"), true).expect("parse");
    assert_eq!(bindings.len(), 1);
    let request = reply.find("request").expect("request");
    assert_eq!(bindings[0].field(request.id()), Some(&Bits::from("ab")));
    assert!(reply.parse(&Bits::from("abac"), true).expect("parse").is_empty());
}

#[test]
fn size_counted_in_bits() {
    let grammar = load(
        r#"
        symbol BitLen {
            field len: size(@body, unit = bits);
            field body: data(raw(1..3));
        }
        "#,
    )
    .expect("grammar");
    let m = grammar.symbol("BitLen").expect("BitLen");
    for seed in 0..8 {
        let bytes = seeded(seed).specialize(m).expect("specialize").to_bytes();
        assert_eq!(usize::from(bytes[0]), (bytes.len() - 1) * 8);
    }
    assert_eq!(m.parse(&Bits::from_bytes(&[16, 0xaa, 0xbb]), true).expect("parse").len(), 1);
    assert!(m.parse(&Bits::from_bytes(&[2, 0xaa, 0xbb]), true).expect("parse").is_empty());
}

#[test]
fn padding_aligns_to_its_modulo() {
    let grammar = load(
        r#"
        symbol Block {
            field head: data(0x01);
            field body: data(ascii(0..6));
            field pad: padding(@head, @body, modulo = 4, unit = bytes);
        }
        "#,
    )
    .expect("grammar");
    let block = grammar.symbol("Block").expect("Block");
    for seed in 0..8 {
        let message = seeded(seed).specialize(block).expect("specialize");
        let bytes = message.to_bytes();
        assert_eq!(bytes.len() % 4, 0, "{:?}", bytes);
        assert_eq!(block.parse(&message.bits(), true).expect("parse").len(), 1);
    }
    assert_eq!(block.parse(&Bits::from(&b"\x01ab\x00"[..]), true).expect("parse").len(), 1);
    assert_eq!(block.parse(&Bits::from(&b"\x01abc"[..]), true).expect("parse").len(), 1);
    assert!(block.parse(&Bits::from(&b"\x01ab"[..]), true).expect("parse").is_empty());
    assert!(block.parse(&Bits::from(&b"\x01ab\xff"[..]), true).expect("parse").is_empty());
}

#[test]
fn padding_once_stops_after_the_first_block() {
    let grammar = load(
        r#"
        symbol Short {
            field body: data(raw(0..8));
            field pad: padding(@body, modulo = 4, unit = bytes, fill = 0x2e, once);
        }
        "#,
    )
    .expect("grammar");
    let short = grammar.symbol("Short").expect("Short");
    let body = short.find("body").expect("body").dep();
    let two = Presets::new().with(body, Bits::from("ab"));
    assert_eq!(short.specialize(Some(&two)).expect("specialize"), b"ab..");
    let six = Presets::new().with(body, Bits::from("abcdef"));
    assert_eq!(short.specialize(Some(&six)).expect("specialize"), b"abcdef");
}

#[test]
fn padding_ahead_of_what_it_covers() {
    let grammar = load(
        r#"
        symbol Lead {
            field pad: padding(@body, modulo = 2, unit = bytes);
            field body: data(ascii(1..3));
        }
        "#,
    )
    .expect("grammar");
    let lead = grammar.symbol("Lead").expect("Lead");
    for seed in 0..8 {
        let bytes = seeded(seed).specialize(lead).expect("specialize").to_bytes();
        assert_eq!(bytes.len() % 2, 0, "{:?}", bytes);
    }
    let bindings = lead.parse(&Bits::from(&b"\x00abc"[..]), true).expect("parse");
    assert_eq!(bindings.len(), 1);
    let body = lead.find("body").expect("body");
    assert_eq!(bindings[0].field(body.id()), Some(&Bits::from("abc")));
}

#[test]
fn repeat_count_read_from_a_later_field() {
    let grammar = load(
        r#"
        symbol Items {
            field items: repeat(data(0x7f), $n);
            field count: n = data(uint8 [0..6]);
        }
        "#,
    )
    .expect("grammar");
    let items = grammar.symbol("Items").expect("Items");
    let bindings = items.parse(&Bits::from_bytes(&[0x7f, 0x7f, 0x7f, 3]), true).expect("parse");
    assert_eq!(bindings.len(), 1);
    assert!(items.parse(&Bits::from_bytes(&[0x7f, 0x7f, 2, 2]), true).expect("parse").is_empty());

    let bytes = seeded(4).specialize(items).expect("specialize").to_bytes();
    assert_eq!(bytes.len(), *bytes.last().expect("count") as usize + 1);
}

// ==================== Candidates ====================

#[test]
fn data_parse_returns_every_length_longest_first() {
    let root = Field::new("blob", Variable::data(DataType::raw(0, 3)));
    let bindings = root.parse(&Bits::from("abc"), false).expect("parse");
    let lengths: Vec<usize> = bindings.iter().map(|b| b.consumed_bits()).collect();
    assert_eq!(lengths, vec![24, 16, 8, 0]);
}

#[test]
fn repeat_with_delimiter_parses_each_split() {
    let item = Variable::data(DataType::ascii(1, 3).with_alphabet(b"abc"));
    let list = Variable::repeat(item, CountSpec::Range { min: 1, max: 4 }).with_delimiter(",");
    let list_id = list.id();
    let root = Field::new("list", list);
    let bindings = root.parse(&Bits::from("ab,c,a"), true).expect("parse");
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].repetitions(list_id), Some(3));
}

// ==================== Memory and presets ====================

#[test]
fn persistent_value_is_reused_by_later_specializations() {
    let token = Variable::data(DataType::raw(4, 4)).persistent();
    let token_id = token.id();
    let root = Field::new("token", token);

    let mut specializer = seeded(21);
    let first = specializer.specialize(&root).expect("first").to_bytes();
    let second = specializer.specialize(&root).expect("second").to_bytes();
    assert_eq!(first, second);
    assert_eq!(specializer.memory().value(token_id), Some(&Bits::from(first)));
}

#[test]
fn persistent_value_learned_while_parsing() {
    let session = Variable::data(DataType::raw(2, 2)).persistent();
    let session_id = session.id();
    let root = Field::new("session", session);

    let mut abstractor = Abstractor::default();
    assert_eq!(abstractor.parse(&root, &Bits::from("ab"), true).expect("parse").len(), 1);
    assert_eq!(abstractor.memory().value(session_id), Some(&Bits::from("ab")));
    assert!(abstractor.parse(&root, &Bits::from("cd"), true).expect("parse").is_empty());
    assert_eq!(abstractor.parse(&root, &Bits::from("ab"), true).expect("parse").len(), 1);
}

#[test]
fn presets_force_field_values() {
    let payload = Field::new("payload", Variable::data(DataType::raw(0, 10)));
    let size = Field::new("size", Variable::size(vec![payload.dep()], DataType::uint8()));
    let presets = Presets::new().with(payload.dep(), Bits::from("xyz"));
    let root = Field::group("packet", vec![size, payload]);
    assert_eq!(root.specialize(Some(&presets)).expect("specialize"), b"\x03xyz");
}

// ==================== Errors ====================

#[test]
fn field_without_domain_is_a_grammar_error() {
    let root = Field::group("msg", vec![Field::new("a", Variable::ascii("a")), Field::empty("b")]);
    let err = root.specialize(None).expect_err("undefined domain");
    assert_eq!(err, EngineError::UndefinedDomain("b".into()));
    assert!(err.is_grammar_error());
    assert!(root.parse(&Bits::from("a"), true).is_err());
}

#[test]
fn unsupported_integer_width_is_a_grammar_error() {
    let root = Field::new("odd", Variable::data(DataType::integer(12, false, Endianness::Big)));
    let err = seeded(0).specialize(&root).expect_err("width 12");
    assert!(matches!(err, EngineError::InvalidGrammar(_)), "{:?}", err);
    assert!(matches!(
        root.parse(&Bits::from_bytes(&[1, 2]), true),
        Err(EngineError::InvalidGrammar(_))
    ));
}

#[test]
fn leaf_without_values_is_a_grammar_error() {
    let grammar = load(
        r#"
        symbol Interval { field a: data(uint8 [300..400]); }
        symbol Charset { field b: data(ascii(1..2, "")); }
        "#,
    )
    .expect("grammar");
    for name in ["Interval", "Charset"] {
        let symbol = grammar.symbol(name).expect("symbol");
        let err = seeded(0).specialize(symbol).expect_err("empty language");
        assert!(err.is_grammar_error(), "{}: {:?}", name, err);
    }
}

#[test]
fn reference_outside_the_tree_is_unknown() {
    let stranger = Field::new("stranger", Variable::ascii("x"));
    let root = Field::new("len", Variable::size(vec![stranger.dep()], DataType::uint8()));
    assert!(matches!(root.specialize(None), Err(EngineError::UnknownDependency(_))));
}

#[test]
fn mutually_dependent_values_are_a_cycle() {
    let a_id = VarId::fresh();
    let b_id = VarId::fresh();
    let a = Variable::value(vec![Dependency::Variable(b_id)]);
    let b = Variable::value(vec![Dependency::Variable(a_id)]);
    let a = Variable::with_id(a_id, "a", a.kind().clone());
    let b = Variable::with_id(b_id, "b", b.kind().clone());
    let root = Field::group("loop", vec![Field::new("a", a), Field::new("b", b)]);
    assert!(matches!(root.specialize(None), Err(EngineError::DependencyCycle(_))));
}

#[test]
fn size_that_does_not_fit_is_unsatisfiable() {
    let payload = Field::new("payload", Variable::data(DataType::raw(300, 300)));
    let size = Field::new("size", Variable::size(vec![payload.dep()], DataType::uint8()));
    let root = Field::group("packet", vec![size, payload]);
    assert!(matches!(
        root.specialize(None),
        Err(EngineError::UnsatisfiableRelation { .. })
    ));
}

#[test]
fn candidate_cap_aborts_the_search() {
    let item = Variable::data(DataType::raw(0, 4));
    let root = Field::new("list", Variable::repeat(item, CountSpec::Range { min: 0, max: 10 }));
    let config = EngineConfig::default().with_limits(Limits {
        max_candidates: 10,
        ..Limits::default()
    });
    let err = Abstractor::new(config)
        .parse(&root, &Bits::from("abcdefgh"), true)
        .expect_err("cap");
    assert!(matches!(err, EngineError::EnumerationLimitExceeded { limit: 10, .. }));
}

#[test]
fn parse_first_reports_no_match() {
    let root = Field::new("lit", Variable::ascii("ok"));
    let err = Abstractor::default()
        .parse_first(&root, &Bits::from("ko"), true)
        .expect_err("no match");
    assert_eq!(err, EngineError::NoMatch("lit".into()));
}

// ==================== Flow ====================

const FLOW_GRAMMAR: &str = r#"
symbol Ping {
    field tag: data(0x01);
    field id: data(uint8);
}
symbol Chunk {
    field tag: data(0x02);
    field len: size(@body);
    field body: data(raw(0..8));
}
"#;

#[test]
fn flow_splits_a_stream_into_messages() {
    let grammar = load(FLOW_GRAMMAR).expect("grammar");
    let stream = Bits::from_bytes(&[0x01, 0x07, 0x02, 0x03, b'a', b'b', b'c', 0x01, 0x09]);
    let decompositions: Vec<_> = FlowParser::default()
        .parse_flow(&stream, grammar.symbols())
        .collect::<Result<_, _>>()
        .expect("flow");
    assert_eq!(decompositions.len(), 1);
    let names: Vec<&str> = decompositions[0].iter().map(|m| m.grammar.name()).collect();
    assert_eq!(names, vec!["Ping", "Chunk", "Ping"]);
    let ranges: Vec<(usize, usize)> = decompositions[0].iter().map(|m| m.bit_range).collect();
    assert_eq!(ranges, vec![(0, 16), (16, 56), (56, 72)]);
}

#[test]
fn flow_of_specialized_messages_recovers_them() {
    let grammar = load(FLOW_GRAMMAR).expect("grammar");
    let mut specializer = seeded(13);
    let mut parts = Vec::new();
    for name in ["Chunk", "Ping", "Chunk"] {
        let symbol = grammar.symbol(name).expect("symbol");
        parts.push(specializer.specialize(symbol).expect("specialize").bits());
    }
    let stream = Bits::concat(&parts);
    let first = FlowParser::default()
        .parse_flow(&stream, grammar.symbols())
        .next()
        .expect("one decomposition")
        .expect("flow");
    let names: Vec<&str> = first.iter().map(|m| m.grammar.name()).collect();
    assert_eq!(names, vec!["Chunk", "Ping", "Chunk"]);
}

#[test]
fn flow_message_cap_is_reported() {
    let grammar = load("symbol Byte { field b: data(uint8); }").expect("grammar");
    let config = EngineConfig::default().with_limits(Limits {
        max_flow_messages: 3,
        ..Limits::default()
    });
    let mut flow = FlowParser::new(config).parse_flow(&Bits::from("abcdef"), grammar.symbols());
    assert!(matches!(
        flow.next(),
        Some(Err(EngineError::EnumerationLimitExceeded { limit: 3, .. }))
    ));
    assert!(flow.next().is_none());
}

// ==================== Configuration ====================

#[test]
fn malformed_environment_override_is_rejected() {
    std::env::set_var("PROTOSYNTH_MAX_DEPTH", "deep");
    let malformed = EngineConfig::from_env();
    std::env::set_var("PROTOSYNTH_MAX_DEPTH", "12");
    let valid = EngineConfig::from_env();
    std::env::remove_var("PROTOSYNTH_MAX_DEPTH");

    let err = malformed.expect_err("malformed");
    assert!(err.contains("PROTOSYNTH_MAX_DEPTH"), "{}", err);
    assert_eq!(valid.expect("valid").limits.max_depth, 12);
}
