//! Decompose a hex-encoded stream into messages of a grammar file.
//!
//! Usage:
//!   abstract_flow [OPTIONS] GRAMMAR [HEX]
//!
//! The stream is read from stdin when HEX is absent. Whitespace is ignored.
//!
//! Options:
//!   --symbols A,B,...    Candidate symbols, in preference order (default: all).
//!   --max N              Print at most N decompositions (default 1).
//!
//! Limits come from the PROTOSYNTH_* environment variables.

use anyhow::{anyhow, bail, Context};
use protosynth::dump::format_flow;
use protosynth::{parse_file, Bits, EngineConfig, Field, FlowParser, ResolvedGrammar};
use std::io::Read;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn take_value(args: &mut Vec<String>, flag: &str) -> anyhow::Result<Option<String>> {
    match args.iter().position(|a| a == flag) {
        Some(pos) if pos + 1 < args.len() => {
            let value = args.remove(pos + 1);
            args.remove(pos);
            Ok(Some(value))
        }
        Some(_) => bail!("{} needs a value", flag),
        None => Ok(None),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let symbols = take_value(&mut args, "--symbols")?;
    let max: usize = match take_value(&mut args, "--max")? {
        Some(n) => n.parse().with_context(|| format!("invalid --max '{}'", n))?,
        None => 1,
    };
    let (grammar_path, hex) = match args.as_slice() {
        [path] => {
            let mut s = String::new();
            std::io::stdin().read_to_string(&mut s).context("reading stdin")?;
            (path.clone(), s)
        }
        [path, hex] => (path.clone(), hex.clone()),
        _ => bail!("usage: abstract_flow [--symbols A,B] [--max N] GRAMMAR [HEX]"),
    };

    let protocol = parse_file(&grammar_path).map_err(|e| anyhow!(e)).context("loading grammar")?;
    let grammar = ResolvedGrammar::resolve(&protocol).map_err(|e| anyhow!(e))?;
    let candidates: Vec<Field> = match symbols {
        Some(list) => list
            .split(',')
            .map(|name| {
                grammar
                    .symbol(name.trim())
                    .cloned()
                    .with_context(|| format!("no symbol named '{}'", name))
            })
            .collect::<anyhow::Result<_>>()?,
        None => grammar.symbols().to_vec(),
    };

    let digits: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    let stream = Bits::from_hex(&digits).context("stream is not valid hex")?;

    let config = EngineConfig::from_env().map_err(|e| anyhow!(e))?;
    let parser = FlowParser::new(config);
    let mut found = 0;
    for decomposition in parser.parse_flow(&stream, &candidates).take(max) {
        let messages = decomposition?;
        if found > 0 {
            println!();
        }
        println!("# decomposition {} ({} messages)", found, messages.len());
        println!("{}", format_flow(&messages));
        found += 1;
    }
    info!(decompositions = found, bytes = stream.byte_len(), "done");
    if found == 0 {
        bail!("no decomposition of the stream matches the grammar");
    }
    Ok(())
}
