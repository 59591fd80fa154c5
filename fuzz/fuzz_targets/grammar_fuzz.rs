//! Grammar language fuzz target: feed arbitrary text to the front-end and
//! specialize whatever resolves. Neither step may panic.
//! Build with: cargo fuzz run grammar_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let Ok(grammar) = protosynth::load(s) else {
        return;
    };
    let config = protosynth::EngineConfig::default().with_seed(0);
    for symbol in grammar.symbols() {
        let _ = protosynth::Specializer::new(config.clone()).specialize(symbol);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run grammar_fuzz");
}
