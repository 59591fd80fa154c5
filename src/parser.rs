//! Parse symbol grammar source into AST using PEST.

use crate::ast::*;
use crate::codec::{DataType, Endianness};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct SymbolParser;

/// Parse grammar source into AST.
pub fn parse(source: &str) -> Result<Protocol, String> {
    let pairs = SymbolParser::parse(Rule::protocol, source).map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    build_protocol(pair)
}

/// Read and parse a grammar file.
pub fn parse_file(path: impl AsRef<std::path::Path>) -> Result<Protocol, String> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    parse(&source)
}

/// Parse and lower in one step.
pub fn load(source: &str) -> Result<ResolvedGrammar, String> {
    ResolvedGrammar::resolve(&parse(source)?)
}

fn build_protocol(pair: Pair<Rule>) -> Result<Protocol, String> {
    let mut symbols = Vec::new();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::symbol_decl {
            symbols.push(build_symbol(inner)?);
        }
    }
    Ok(Protocol { symbols })
}

fn build_symbol(pair: Pair<Rule>) -> Result<SymbolDecl, String> {
    let mut name = String::new();
    let mut fields = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::field_decl => fields.push(build_field(inner)?),
            _ => {}
        }
    }
    Ok(SymbolDecl { name, fields })
}

fn build_field(pair: Pair<Rule>) -> Result<FieldDecl, String> {
    let mut name = String::new();
    let mut domain = None;
    let mut children = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::var_decl => domain = Some(build_var(inner)?),
            Rule::field_block => {
                for child in inner.into_inner() {
                    children.push(build_field(child)?);
                }
            }
            _ => {}
        }
    }
    Ok(FieldDecl { name, domain, children })
}

fn build_var(pair: Pair<Rule>) -> Result<VarDecl, String> {
    let mut name = None;
    let mut persistent = false;
    let mut kind = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::persistent_kw => persistent = true,
            Rule::var_name => {
                let ident = inner.into_inner().next().ok_or("var_name: ident")?;
                name = Some(ident.as_str().to_string());
            }
            Rule::data_var => kind = Some(build_data(inner)?),
            Rule::alt_var => {
                let mut choices = Vec::new();
                for choice in inner.into_inner() {
                    let mut weight = None;
                    let mut var = None;
                    for part in choice.into_inner() {
                        match part.as_rule() {
                            Rule::weight => {
                                weight = Some(part.as_str().parse::<u32>().map_err(|_| "alt weight number")?)
                            }
                            Rule::var_decl => var = Some(build_var(part)?),
                            _ => {}
                        }
                    }
                    choices.push((weight, var.ok_or("alt choice: variable")?));
                }
                kind = Some(VarDeclKind::Alt(choices));
            }
            Rule::agg_var => {
                let children = inner.into_inner().map(build_var).collect::<Result<Vec<_>, _>>()?;
                kind = Some(VarDeclKind::Agg(children));
            }
            Rule::repeat_var => kind = Some(build_repeat(inner)?),
            Rule::relation_var => kind = Some(VarDeclKind::Relation(build_relation(inner)?)),
            _ => {}
        }
    }
    Ok(VarDecl {
        name,
        persistent,
        kind: kind.ok_or("Missing variable body")?,
    })
}

fn build_data(pair: Pair<Rule>) -> Result<VarDeclKind, String> {
    let mut data_type = None;
    let mut value = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::type_decl => data_type = Some(build_type(inner)?),
            Rule::literal => value = Some(parse_literal(inner.as_str())?),
            _ => {}
        }
    }
    Ok(VarDeclKind::Data { data_type, value })
}

fn build_repeat(pair: Pair<Rule>) -> Result<VarDeclKind, String> {
    let mut child = None;
    let mut count = None;
    let mut delimiter = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::var_decl => child = Some(build_var(inner)?),
            Rule::count => count = Some(build_count(inner)?),
            Rule::literal => delimiter = Some(parse_literal(inner.as_str())?),
            _ => {}
        }
    }
    Ok(VarDeclKind::Repeat {
        child: Box::new(child.ok_or("repeat: variable")?),
        count: count.ok_or("repeat: count")?,
        delimiter,
    })
}

fn build_count(pair: Pair<Rule>) -> Result<CountDecl, String> {
    let inner = pair.into_inner().next().ok_or("Empty count")?;
    match inner.as_rule() {
        Rule::integer => Ok(CountDecl::Fixed(parse_usize(inner.as_str())?)),
        Rule::count_range => {
            let mut nums = inner.into_inner();
            let min = parse_usize(nums.next().ok_or("count min")?.as_str())?;
            let max = parse_usize(nums.next().ok_or("count max")?.as_str())?;
            Ok(CountDecl::Range(min, max))
        }
        Rule::reference => Ok(CountDecl::Reference(build_reference(inner)?)),
        _ => Err("Unknown count".to_string()),
    }
}

fn build_reference(pair: Pair<Rule>) -> Result<Reference, String> {
    let inner = pair.into_inner().next().ok_or("Empty reference")?;
    let rule = inner.as_rule();
    let name = inner.into_inner().next().ok_or("reference: ident")?.as_str().to_string();
    match rule {
        Rule::field_ref => Ok(Reference::Field(name)),
        Rule::var_ref => Ok(Reference::Variable(name)),
        _ => Err("Unknown reference".to_string()),
    }
}

fn build_relation(pair: Pair<Rule>) -> Result<RelationDecl, String> {
    let mut op = None;
    let mut references = Vec::new();
    let mut output_type = None;
    let mut offset = None;
    let mut unit_bits = None;
    let mut modulo = None;
    let mut fill = None;
    let mut once = false;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::relation_op => op = Some(parse_relation_op(inner.as_str())?),
            Rule::reference => references.push(build_reference(inner)?),
            Rule::relation_option => {
                let option = inner.into_inner().next().ok_or("Empty relation option")?;
                match option.as_rule() {
                    Rule::type_decl => output_type = Some(build_type(option)?),
                    Rule::offset_opt => {
                        let n = option.into_inner().next().ok_or("offset: value")?;
                        offset = Some(n.as_str().parse::<i64>().map_err(|_| "offset number")?);
                    }
                    Rule::unit_opt => {
                        let unit = option.into_inner().next().ok_or("unit: value")?;
                        unit_bits = Some(if unit.as_str() == "bits" { 1 } else { 8 });
                    }
                    Rule::modulo_opt => {
                        let n = option.into_inner().next().ok_or("modulo: value")?;
                        modulo = Some(n.as_str().parse::<usize>().map_err(|_| "modulo number")?);
                    }
                    Rule::fill_opt => {
                        let v = option.into_inner().next().ok_or("fill: value")?;
                        fill = Some(parse_fill(v.as_str())?);
                    }
                    Rule::once_kw => once = true,
                    _ => {}
                }
            }
            _ => {}
        }
    }
    Ok(RelationDecl {
        op: op.ok_or("relation: operator")?,
        references,
        output_type,
        offset,
        unit_bits,
        modulo,
        fill,
        once,
    })
}

/// A single filler byte, written `0x20` or `32`.
fn parse_fill(s: &str) -> Result<u8, String> {
    let byte = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u8::from_str_radix(digits, 16),
        None => s.parse::<u8>(),
    };
    byte.map_err(|_| format!("fill must be a single byte, got {}", s))
}

fn parse_relation_op(s: &str) -> Result<RelationOp, String> {
    match s {
        "size" => Ok(RelationOp::Size),
        "value" => Ok(RelationOp::Value),
        "checksum" => Ok(RelationOp::Checksum),
        "crc32" => Ok(RelationOp::Crc32),
        "crc16" => Ok(RelationOp::Crc16),
        "crc16_ccitt" => Ok(RelationOp::Crc16Ccitt),
        "padding" => Ok(RelationOp::Padding),
        _ => Err(format!("Unknown relation: {}", s)),
    }
}

fn build_type(pair: Pair<Rule>) -> Result<DataType, String> {
    let inner = pair.into_inner().next().ok_or("Empty type_decl")?;
    match inner.as_rule() {
        Rule::raw_type => {
            let (min, max) = build_length_range(inner.into_inner().next().ok_or("raw: length")?)?;
            Ok(DataType::raw(min, max))
        }
        Rule::bits_type => {
            let (min, max) = build_length_range(inner.into_inner().next().ok_or("bits: length")?)?;
            Ok(DataType::bits(min, max))
        }
        Rule::ascii_type => {
            let mut parts = inner.into_inner();
            let (min, max) = build_length_range(parts.next().ok_or("ascii: length")?)?;
            let t = DataType::ascii(min, max);
            match parts.next() {
                Some(charset) => Ok(t.with_alphabet(unescape(charset.as_str()).as_bytes())),
                None => Ok(t),
            }
        }
        Rule::int_type => {
            let mut width = 0;
            let mut signed = true;
            let mut endianness = Endianness::Big;
            let mut interval = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::int_name => {
                        let s = part.as_str();
                        signed = !s.starts_with('u');
                        width = s.trim_start_matches('u').trim_start_matches("int").parse().map_err(|_| "int width")?;
                    }
                    Rule::endian => {
                        endianness = if part.as_str() == "le" {
                            Endianness::Little
                        } else {
                            Endianness::Big
                        }
                    }
                    Rule::interval => {
                        let mut nums = part.into_inner();
                        let lo: i128 = nums.next().ok_or("interval min")?.as_str().parse().map_err(|_| "interval min number")?;
                        let hi: i128 = nums.next().ok_or("interval max")?.as_str().parse().map_err(|_| "interval max number")?;
                        interval = Some((lo, hi));
                    }
                    _ => {}
                }
            }
            let t = DataType::integer(width, signed, endianness);
            Ok(match interval {
                Some((lo, hi)) => t.with_interval(lo, hi),
                None => t,
            })
        }
        _ => Err("Unknown type".to_string()),
    }
}

fn build_length_range(pair: Pair<Rule>) -> Result<(usize, usize), String> {
    let mut nums = pair.into_inner();
    let min = parse_usize(nums.next().ok_or("length min")?.as_str())?;
    let max = match nums.next() {
        Some(n) => parse_usize(n.as_str())?,
        None => min,
    };
    Ok((min, max))
}

fn parse_usize(s: &str) -> Result<usize, String> {
    s.parse().map_err(|_| format!("Invalid number: {}", s))
}

fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    inner
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\r", "\r")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

fn parse_literal(s: &str) -> Result<Literal, String> {
    let s = s.trim();
    if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if digits.len() % 2 != 0 {
            return Err("Hex literal must have even length".to_string());
        }
        return hex::decode(digits).map(Literal::Hex).map_err(|e| format!("Invalid hex: {}", e));
    }
    if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
        return Ok(Literal::String(unescape(s)));
    }
    s.parse::<i128>()
        .map(Literal::Int)
        .map_err(|_| format!("Invalid literal: {}", s))
}
