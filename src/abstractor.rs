//! Abstraction: recover the binding of every grammar node from a bit string.
//!
//! Each node turns one path into zero or more candidate paths, each having
//! consumed a prefix of the remaining input. An empty result is an ordinary
//! "no match" and lets the parent try its next option.

use crate::config::{EngineConfig, Limits};
use crate::error::EngineError;
use crate::grammar::GrammarIndex;
use crate::memory::Memory;
use crate::path::{Binding, Path};
use crate::relation::{
    bind_field_value, bind_node, count_from, evaluate, pending_error, Evaluation, RelationCallback,
    RepeatCountCheck,
};
use crate::value::Bits;
use crate::variable::{CountSpec, Field, Relation, RelationKind, VarId, Variable, VariableKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Session object for repeated parses sharing one memory.
#[derive(Debug, Clone, Default)]
pub struct Abstractor {
    config: EngineConfig,
    memory: Memory,
}

impl Abstractor {
    pub fn new(config: EngineConfig) -> Self {
        Abstractor {
            config,
            memory: Memory::new(),
        }
    }

    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.memory = memory;
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn into_memory(self) -> Memory {
        self.memory
    }

    /// All bindings of `field` against `buffer`, preferred interpretation first.
    /// The memory of the first binding becomes the session memory.
    pub fn parse(
        &mut self,
        field: &Field,
        buffer: &Bits,
        must_consume_everything: bool,
    ) -> Result<Vec<Binding>, EngineError> {
        let bindings = abstract_field(field, buffer, &self.memory, must_consume_everything, &self.config.limits)?;
        if let Some(first) = bindings.first() {
            self.memory = first.memory().duplicate();
        }
        Ok(bindings)
    }

    /// The preferred binding, or `NoMatch`.
    pub fn parse_first(
        &mut self,
        field: &Field,
        buffer: &Bits,
        must_consume_everything: bool,
    ) -> Result<Binding, EngineError> {
        self.parse(field, buffer, must_consume_everything)?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NoMatch(field.name().to_string()))
    }
}

impl Field {
    /// One-shot parse with default configuration and a fresh memory.
    pub fn parse(&self, buffer: &Bits, must_consume_everything: bool) -> Result<Vec<Binding>, EngineError> {
        Abstractor::new(EngineConfig::default()).parse(self, buffer, must_consume_everything)
    }
}

/// Parse without touching any session state; `memory` is only read.
pub(crate) fn abstract_field(
    field: &Field,
    buffer: &Bits,
    memory: &Memory,
    must_consume_everything: bool,
    limits: &Limits,
) -> Result<Vec<Binding>, EngineError> {
    let index = GrammarIndex::build(field, limits)?;
    let mut env = ParseEnv {
        index: &index,
        buffer,
        explored: 0,
    };
    let path = Path::parsing(memory.duplicate(), buffer.len());
    let paths = parse_field(&mut env, field, path, 0)?;

    let mut pending = None;
    let mut bindings = Vec::new();
    for path in paths {
        if !path.is_valid() {
            continue;
        }
        if must_consume_everything && path.cursor() != buffer.len() {
            trace!(field = field.name(), consumed = path.cursor(), "leftover input");
            continue;
        }
        if path.has_pending() {
            if pending.is_none() {
                pending = Some(pending_error(&index, &path));
            }
            continue;
        }
        bindings.push(Binding::from_path(path, field.id()));
    }
    if bindings.is_empty() {
        if let Some(err) = pending {
            return Err(err);
        }
    }
    debug!(
        field = field.name(),
        bits = buffer.len(),
        candidates = bindings.len(),
        explored = env.explored,
        "abstracted"
    );
    Ok(bindings)
}

struct ParseEnv<'a> {
    index: &'a GrammarIndex<'a>,
    buffer: &'a Bits,
    explored: usize,
}

impl ParseEnv<'_> {
    fn charge(&mut self, location: &str, n: usize) -> Result<(), EngineError> {
        self.explored += n;
        let cap = self.index.limits().max_candidates;
        if self.explored > cap {
            warn!(location, cap, "candidate limit reached, search aborted");
            return Err(EngineError::limit(location, cap));
        }
        Ok(())
    }
}

fn fan_out<'a, F>(env: &mut ParseEnv<'a>, paths: Vec<Path<'a>>, mut step: F) -> Result<Vec<Path<'a>>, EngineError>
where
    F: FnMut(&mut ParseEnv<'a>, Path<'a>) -> Result<Vec<Path<'a>>, EngineError>,
{
    let mut out = Vec::new();
    for path in paths.into_iter().filter(Path::is_valid) {
        out.extend(step(env, path)?.into_iter().filter(Path::is_valid));
    }
    Ok(out)
}

fn parse_field<'a>(
    env: &mut ParseEnv<'a>,
    field: &'a Field,
    path: Path<'a>,
    depth: usize,
) -> Result<Vec<Path<'a>>, EngineError> {
    let start = path.cursor();
    let paths = match field.domain() {
        Some(domain) => parse_variable(env, domain, path, depth + 1)?,
        None => {
            let mut paths = vec![path];
            for child in field.children() {
                paths = fan_out(env, paths, |env, p| parse_field(env, child, p, depth + 1))?;
                if paths.is_empty() {
                    return Ok(paths);
                }
            }
            paths
        }
    };
    let mut out = Vec::with_capacity(paths.len());
    for mut path in paths.into_iter().filter(Path::is_valid) {
        let value = env.buffer.slice(start, path.cursor());
        bind_field_value(&mut path, field, value)?;
        if path.is_valid() {
            out.push(path);
        }
    }
    Ok(out)
}

/// Bind `var` to the bits between `start` and each path's cursor.
fn bind_consumed<'a>(
    env: &ParseEnv<'a>,
    var: &'a Variable,
    start: usize,
    paths: Vec<Path<'a>>,
) -> Result<Vec<Path<'a>>, EngineError> {
    let mut out = Vec::with_capacity(paths.len());
    for mut path in paths.into_iter().filter(Path::is_valid) {
        let value = env.buffer.slice(start, path.cursor());
        bind_node(&mut path, var, value)?;
        if path.is_valid() {
            out.push(path);
        }
    }
    Ok(out)
}

/// Consume `expected` at the cursor, or nothing.
fn consume_exact<'a>(
    env: &ParseEnv<'a>,
    var: &'a Variable,
    mut path: Path<'a>,
    expected: Bits,
) -> Result<Vec<Path<'a>>, EngineError> {
    if !env.buffer.matches_at(path.cursor(), &expected) || !path.advance(expected.len()) {
        trace!(var = var.name(), at = path.cursor(), "literal mismatch");
        return Ok(Vec::new());
    }
    bind_node(&mut path, var, expected)?;
    Ok(vec![path].into_iter().filter(Path::is_valid).collect())
}

/// Lengths from `hi` down to `lo` in steps of `unit`.
fn descending_lengths(lo: usize, hi: usize, unit: usize) -> impl Iterator<Item = usize> {
    let top = if hi >= lo { hi - (hi - lo) % unit } else { 0 };
    (lo..=top).rev().step_by(unit)
}

fn parse_variable<'a>(
    env: &mut ParseEnv<'a>,
    var: &'a Variable,
    path: Path<'a>,
    depth: usize,
) -> Result<Vec<Path<'a>>, EngineError> {
    let limits = *env.index.limits();
    if depth > limits.max_depth {
        return Err(EngineError::limit(var.name(), limits.max_depth));
    }
    let start = path.cursor();
    match var.kind() {
        VariableKind::Data(data) => {
            let remembered = if var.is_persistent() {
                path.memory().value(var.id()).cloned()
            } else {
                None
            };
            if let Some(expected) = remembered.or_else(|| data.value.clone()) {
                return consume_exact(env, var, path, expected);
            }
            let (lo, hi) = data.data_type.bit_bounds();
            let hi = hi.min(path.remaining());
            if lo > hi {
                trace!(var = var.name(), at = start, "buffer exhausted");
                return Ok(Vec::new());
            }
            let mut out = Vec::new();
            for len in descending_lengths(lo, hi, data.data_type.unit_bits()) {
                let candidate = env.buffer.slice(start, start + len);
                if !data.data_type.accepts(&candidate) {
                    continue;
                }
                env.charge(var.name(), 1)?;
                let mut branch = path.branch();
                if branch.advance(len) {
                    bind_node(&mut branch, var, candidate)?;
                    if branch.is_valid() {
                        out.push(branch);
                    }
                }
            }
            Ok(out)
        }
        VariableKind::Alt(alt) => {
            let mut out = Vec::new();
            for child in &alt.children {
                let results = parse_variable(env, child, path.branch(), depth + 1)?;
                env.charge(var.name(), results.len())?;
                out.extend(bind_consumed(env, var, start, results)?);
            }
            Ok(out)
        }
        VariableKind::Agg(children) => {
            let mut paths = vec![path];
            for child in children {
                paths = fan_out(env, paths, |env, p| parse_variable(env, child, p, depth + 1))?;
                env.charge(var.name(), paths.len())?;
                if paths.is_empty() {
                    return Ok(paths);
                }
            }
            bind_consumed(env, var, start, paths)
        }
        VariableKind::Repeat(_) => parse_repeat(env, var, path, depth),
        VariableKind::Relation(relation) => parse_relation(env, var, relation, path),
    }
}

fn parse_repeat<'a>(
    env: &mut ParseEnv<'a>,
    var: &'a Variable,
    path: Path<'a>,
    depth: usize,
) -> Result<Vec<Path<'a>>, EngineError> {
    let VariableKind::Repeat(repeat) = var.kind() else {
        return Ok(Vec::new());
    };
    let cap = env.index.limits().max_repeat;
    let start = path.cursor();
    let (min, max, unresolved) = match &repeat.count {
        CountSpec::Fixed(n) => (*n, *n, None),
        CountSpec::Range { min, max } => (*min, *max, None),
        CountSpec::Dependency(dep) => match path.value_of(*dep) {
            Some(bits) => {
                let Some(n) = count_from(env.index, *dep, bits) else {
                    trace!(var = var.name(), "count is not an integer");
                    return Ok(Vec::new());
                };
                if n > cap as u64 {
                    return Err(EngineError::limit(var.name(), cap));
                }
                (n as usize, n as usize, None)
            }
            None => (0, cap, Some(*dep)),
        },
    };
    let scope = env.index.repeat_scope(var.id()).cloned().unwrap_or_default();

    // Each frontier entry has repeated `count` times; the child's bindings of
    // the last repetition are kept aside so the next one can bind afresh.
    let mut frontier: Vec<(Path<'a>, HashMap<VarId, Bits>)> = vec![(path, HashMap::new())];
    let mut results = Vec::new();
    for count in 0..=max {
        if count >= min {
            for (candidate, last) in &frontier {
                let mut done = candidate.branch();
                done.restore_scope(last.clone())?;
                done.set_repetitions(var.id(), count);
                let value = env.buffer.slice(start, done.cursor());
                bind_node(&mut done, var, value)?;
                if let Some(dep) = unresolved {
                    done.register_callback(Arc::new(RepeatCountCheck::new(env.index, var, dep, count)))?;
                }
                if done.is_valid() {
                    results.push(done);
                }
            }
            env.charge(var.name(), frontier.len())?;
        }
        if count == max || frontier.is_empty() {
            break;
        }
        let mut next = Vec::new();
        for (mut candidate, _) in frontier {
            if count > 0 {
                if let Some(delimiter) = &repeat.delimiter {
                    if !env.buffer.matches_at(candidate.cursor(), delimiter) || !candidate.advance(delimiter.len()) {
                        continue;
                    }
                }
            }
            let before = candidate.cursor();
            for mut repeated in parse_variable(env, &repeat.child, candidate, depth + 1)? {
                if !repeated.is_valid() || (repeated.cursor() == before && count >= min) {
                    continue;
                }
                let last = repeated.take_scope(&scope);
                next.push((repeated, last));
            }
        }
        env.charge(var.name(), next.len())?;
        frontier = next;
    }
    Ok(results)
}

fn parse_relation<'a>(
    env: &mut ParseEnv<'a>,
    var: &'a Variable,
    relation: &'a Relation,
    path: Path<'a>,
) -> Result<Vec<Path<'a>>, EngineError> {
    let missing = match evaluate(env.index, var, relation, &path) {
        Ok(Evaluation::Ready(expected)) => return consume_exact(env, var, path, expected),
        Ok(Evaluation::Pending(missing)) => missing,
        Err(EngineError::UnsatisfiableRelation { reason, .. }) => {
            trace!(var = var.name(), %reason, "relation cannot hold here");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let start = path.cursor();
    let lengths: Vec<usize> = match relation.kind {
        RelationKind::Value => {
            // Bound parts have a known length; unbound ones contribute their static bounds.
            let mut lo = 0usize;
            let mut hi = 0usize;
            let mut unit = 8;
            for dep in &relation.dependencies {
                match path.value_of(*dep) {
                    Some(v) => {
                        lo += v.len();
                        hi += v.len();
                    }
                    None => {
                        let (a, b) = env.index.bit_bounds(*dep);
                        if a % 8 != 0 || b % 8 != 0 {
                            unit = 1;
                        }
                        lo = lo.saturating_add(a);
                        hi = hi.saturating_add(b);
                    }
                }
            }
            descending_lengths(lo, hi.min(path.remaining()), unit).collect()
        }
        RelationKind::Padding { modulo_bits, .. } => {
            descending_lengths(0, modulo_bits.saturating_sub(1).min(path.remaining()), 1).collect()
        }
        _ => vec![relation.output_type.bit_bounds().0],
    };

    let mut out = Vec::new();
    for len in lengths {
        if len > path.remaining() {
            continue;
        }
        let parsed = env.buffer.slice(start, start + len);
        if relation.kind.is_encoded() && !relation.output_type.accepts(&parsed) {
            continue;
        }
        env.charge(var.name(), 1)?;
        let mut branch = path.branch();
        branch.advance(len);
        bind_node(&mut branch, var, parsed.clone())?;
        branch.register_callback(Arc::new(RelationCallback::new(
            env.index,
            var,
            relation,
            missing.clone(),
            Some(parsed),
        )))?;
        if branch.is_valid() {
            out.push(branch);
        }
    }
    Ok(out)
}
