//! Generate messages from a grammar file.
//!
//! Usage:
//!   specialize [OPTIONS] GRAMMAR SYMBOL
//!
//! Options:
//!   --count N, -n N      Number of messages to produce (default 1). PERSISTENT
//!                        values carry over from one message to the next.
//!   --set FIELD=HEX      Force the value of a field (repeatable).
//!   --dump, -d           Print the field tree of each message after its hex.
//!
//! Seed and limits come from the PROTOSYNTH_* environment variables.

use anyhow::{anyhow, bail, Context};
use protosynth::dump::format_binding;
use protosynth::{parse_file, Bits, EngineConfig, Presets, ResolvedGrammar, Specializer};
use tracing_subscriber::EnvFilter;

fn take_value(args: &mut Vec<String>, flags: &[&str]) -> anyhow::Result<Option<String>> {
    match args.iter().position(|a| flags.contains(&a.as_str())) {
        Some(pos) if pos + 1 < args.len() => {
            let value = args.remove(pos + 1);
            args.remove(pos);
            Ok(Some(value))
        }
        Some(_) => bail!("{} needs a value", flags[0]),
        None => Ok(None),
    }
}

fn take_flag(args: &mut Vec<String>, flags: &[&str]) -> bool {
    match args.iter().position(|a| flags.contains(&a.as_str())) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let count: usize = match take_value(&mut args, &["--count", "-n"])? {
        Some(n) => n.parse().with_context(|| format!("invalid count '{}'", n))?,
        None => 1,
    };
    let mut sets = Vec::new();
    while let Some(set) = take_value(&mut args, &["--set"])? {
        sets.push(set);
    }
    let dump = take_flag(&mut args, &["--dump", "-d"]);
    let [grammar_path, symbol_name] = args.as_slice() else {
        bail!("usage: specialize [--count N] [--set FIELD=HEX] [--dump] GRAMMAR SYMBOL");
    };

    let protocol = parse_file(grammar_path).map_err(|e| anyhow!(e)).context("loading grammar")?;
    let grammar = ResolvedGrammar::resolve(&protocol).map_err(|e| anyhow!(e))?;
    let symbol = grammar
        .symbol(symbol_name)
        .with_context(|| format!("no symbol named '{}'", symbol_name))?;

    let mut presets = Presets::new();
    for set in &sets {
        let (name, hex) = set
            .split_once('=')
            .with_context(|| format!("--set expects FIELD=HEX, got '{}'", set))?;
        let field = symbol
            .find(name)
            .with_context(|| format!("no field named '{}' in {}", name, symbol_name))?;
        let value = Bits::from_hex(hex).with_context(|| format!("invalid hex for '{}'", name))?;
        presets.set(field.dep(), value);
    }

    let config = EngineConfig::from_env().map_err(|e| anyhow!(e))?;
    let mut specializer = Specializer::new(config);
    for _ in 0..count {
        let message = specializer.specialize_with(symbol, &presets)?;
        println!("{}", message.bits().to_hex());
        if dump {
            println!("{}", format_binding(symbol, message.binding()));
        }
    }
    Ok(())
}
