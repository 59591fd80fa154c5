//! Abstraction fuzz target: parse arbitrary bytes against a fixed grammar.
//! Parsing must not panic; it returns bindings or an error.
//! Build with: cargo fuzz run abstract_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const GRAMMAR: &str = r#"
symbol Frame {
    field len: size(@payload, uint8);
    field kind: alt(data(0x01), data(0x02), data(uint8 [16..32]));
    field payload: repeat(data(raw(1..2)), $n);
    field count: n = data(uint8 [0..8]);
    field sum: checksum(@len, @kind, @payload);
}
"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let Ok(grammar) = protosynth::load(GRAMMAR) else {
        return;
    };
    let Some(frame) = grammar.symbol("Frame") else {
        return;
    };
    let bits = protosynth::Bits::from(data);
    let _ = frame.parse(&bits, true);
    let parser = protosynth::FlowParser::default();
    let _ = parser.parse_flow(&bits, grammar.symbols()).take(4).count();
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run abstract_fuzz");
}
