//! Specialization: turn a grammar into a concrete bit string.
//!
//! Every node is specialized against a [`Path`]; composite nodes concatenate
//! their children, relations compute from their dependencies, and anything
//! that cannot be computed yet is deferred through path callbacks.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::grammar::GrammarIndex;
use crate::memory::Memory;
use crate::path::{Binding, Callback, Path};
use crate::relation::{
    bind_field_value, bind_node, compose, count_from, evaluate, pending_error, Composite, Evaluation,
    RelationCallback,
};
use crate::value::Bits;
use crate::variable::{Alt, CountSpec, Dependency, Field, Repeat, Variable, VariableKind};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Values forced onto fields or variables instead of specializing them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Presets {
    values: HashMap<Dependency, Bits>,
}

impl Presets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, node: Dependency, value: impl Into<Bits>) -> &mut Self {
        self.values.insert(node, value.into());
        self
    }

    pub fn with(mut self, node: Dependency, value: impl Into<Bits>) -> Self {
        self.set(node, value);
        self
    }

    pub fn get(&self, node: Dependency) -> Option<&Bits> {
        self.values.get(&node)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A specialized message and the values chosen for every node.
#[derive(Debug, Clone, PartialEq)]
pub struct Specialization {
    binding: Binding,
}

impl Specialization {
    pub fn bits(&self) -> Bits {
        self.binding.value().cloned().unwrap_or_default()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits().to_bytes()
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn into_binding(self) -> Binding {
        self.binding
    }
}

/// Session object for repeated specializations sharing one memory.
#[derive(Debug)]
pub struct Specializer {
    config: EngineConfig,
    memory: Memory,
    rng: StdRng,
}

impl Specializer {
    pub fn new(config: EngineConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Specializer {
            config,
            memory: Memory::new(),
            rng,
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

    pub fn specialize(&mut self, field: &Field) -> Result<Specialization, EngineError> {
        self.specialize_with(field, &Presets::default())
    }

    /// Specialize `field`, forcing the nodes listed in `presets`.
    pub fn specialize_with(&mut self, field: &Field, presets: &Presets) -> Result<Specialization, EngineError> {
        let index = GrammarIndex::build(field, &self.config.limits)?;
        let env = Env {
            index: &index,
            presets,
        };
        let path = Path::specializing(self.memory.duplicate(), StdRng::seed_from_u64(self.rng.gen()));
        debug!(field = field.name(), "specialize");
        let paths = specialize_field(env, field, path, 0)?;
        let Some(path) = paths.into_iter().find(Path::is_valid) else {
            return Err(EngineError::NoMatch(field.name().to_string()));
        };
        if path.has_pending() || !path.has_field(field.id()) {
            return Err(pending_error(&index, &path));
        }
        self.memory = path.memory().duplicate();
        let binding = Binding::from_path(path, field.id());
        debug!(field = field.name(), bits = binding.consumed_bits(), "specialized");
        Ok(Specialization { binding })
    }
}

impl Field {
    /// One-shot specialization with default configuration and a fresh memory.
    pub fn specialize(&self, presets: Option<&Presets>) -> Result<Vec<u8>, EngineError> {
        let mut specializer = Specializer::new(EngineConfig::default());
        let out = match presets {
            Some(p) => specializer.specialize_with(self, p)?,
            None => specializer.specialize(self)?,
        };
        Ok(out.to_bytes())
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Env<'a> {
    index: &'a GrammarIndex<'a>,
    presets: &'a Presets,
}

/// Run `step` on every valid path and gather the valid results.
fn fan_out<'a, F>(paths: Vec<Path<'a>>, mut step: F) -> Result<Vec<Path<'a>>, EngineError>
where
    F: FnMut(Path<'a>) -> Result<Vec<Path<'a>>, EngineError>,
{
    let mut out = Vec::new();
    for path in paths.into_iter().filter(Path::is_valid) {
        out.extend(step(path)?.into_iter().filter(Path::is_valid));
    }
    Ok(out)
}

fn compose_all<'a>(
    paths: Vec<Path<'a>>,
    target: Composite<'a>,
    parts: &[Dependency],
) -> Result<Vec<Path<'a>>, EngineError> {
    let mut out = Vec::with_capacity(paths.len());
    for mut path in paths {
        compose(&mut path, target, parts.to_vec())?;
        if path.is_valid() {
            out.push(path);
        }
    }
    Ok(out)
}

fn specialize_field<'a>(
    env: Env<'a>,
    field: &'a Field,
    mut path: Path<'a>,
    depth: usize,
) -> Result<Vec<Path<'a>>, EngineError> {
    if let Some(value) = env.presets.get(field.dep()) {
        bind_field_value(&mut path, field, value.clone())?;
        return Ok(vec![path]);
    }
    match field.domain() {
        Some(domain) => {
            let paths = specialize_variable(env, domain, path, depth + 1)?;
            compose_all(paths, Composite::Field(field), &[domain.dep()])
        }
        None => {
            let mut paths = vec![path];
            for child in field.children() {
                paths = fan_out(paths, |p| specialize_field(env, child, p, depth + 1))?;
                if paths.is_empty() {
                    return Ok(paths);
                }
            }
            let parts: Vec<Dependency> = field.children().iter().map(Field::dep).collect();
            compose_all(paths, Composite::Field(field), &parts)
        }
    }
}

/// Children indices in a random order drawn by weight; zero-weight children are left out.
fn alt_order(alt: &Alt, rng: Option<&mut StdRng>) -> Vec<usize> {
    let mut pool: Vec<(usize, u32)> = match &alt.weights {
        Some(weights) => weights.iter().copied().enumerate().filter(|(_, w)| *w > 0).collect(),
        None => (0..alt.children.len()).map(|i| (i, 1)).collect(),
    };
    let Some(rng) = rng else {
        return pool.into_iter().map(|(i, _)| i).collect();
    };
    let mut order = Vec::with_capacity(pool.len());
    while !pool.is_empty() {
        let Ok(dist) = WeightedIndex::new(pool.iter().map(|(_, w)| u64::from(*w))) else { break };
        order.push(pool.remove(dist.sample(rng)).0);
    }
    order
}

pub(crate) fn specialize_variable<'a>(
    env: Env<'a>,
    var: &'a Variable,
    mut path: Path<'a>,
    depth: usize,
) -> Result<Vec<Path<'a>>, EngineError> {
    let limits = env.index.limits();
    if depth > limits.max_depth {
        return Err(EngineError::limit(var.name(), limits.max_depth));
    }
    if let Some(value) = env.presets.get(var.dep()) {
        bind_node(&mut path, var, value.clone())?;
        return Ok(vec![path]);
    }
    match var.kind() {
        VariableKind::Data(data) => {
            let remembered = if var.is_persistent() {
                path.memory().value(var.id()).cloned()
            } else {
                None
            };
            let value = match (remembered, &data.value) {
                (Some(v), _) => v,
                (None, Some(v)) => v.clone(),
                (None, None) => match path.rng() {
                    Some(rng) => data.data_type.generate(rng).ok_or_else(|| {
                        EngineError::InvalidGrammar(format!("'{}': {} has no values", var.name(), data.data_type))
                    })?,
                    None => return Ok(Vec::new()),
                },
            };
            bind_node(&mut path, var, value)?;
            Ok(vec![path])
        }
        VariableKind::Alt(alt) => {
            for i in alt_order(alt, path.rng()) {
                let child = &alt.children[i];
                let results = specialize_variable(env, child, path.branch(), depth + 1)?;
                let results = compose_all(
                    results.into_iter().filter(Path::is_valid).collect(),
                    Composite::Variable(var),
                    &[child.dep()],
                )?;
                if !results.is_empty() {
                    return Ok(results);
                }
                tracing::trace!(alt = var.name(), child = child.name(), "alternative failed");
            }
            Ok(Vec::new())
        }
        VariableKind::Agg(children) => {
            let mut paths = vec![path];
            for child in children {
                paths = fan_out(paths, |p| specialize_variable(env, child, p, depth + 1))?;
                if paths.is_empty() {
                    return Ok(paths);
                }
            }
            let parts: Vec<Dependency> = children.iter().map(Variable::dep).collect();
            compose_all(paths, Composite::Variable(var), &parts)
        }
        VariableKind::Repeat(repeat) => match &repeat.count {
            CountSpec::Fixed(n) => repeat_n(env, var, repeat, path, *n, depth),
            CountSpec::Range { min, max } => {
                let n = match path.rng() {
                    Some(rng) => rng.gen_range(*min..=*max),
                    None => *min,
                };
                repeat_n(env, var, repeat, path, n, depth)
            }
            CountSpec::Dependency(dep) => {
                if path.is_bound(*dep) {
                    let n = resolved_count(env.index, var, *dep, &path)?;
                    return repeat_n(env, var, repeat, path, n, depth);
                }
                path.register_callback(Arc::new(DeferredRepeat {
                    env,
                    var,
                    repeat,
                    triggers: [*dep],
                    depth,
                }))?;
                Ok(vec![path])
            }
        },
        VariableKind::Relation(relation) => {
            match evaluate(env.index, var, relation, &path)? {
                Evaluation::Ready(value) => bind_node(&mut path, var, value)?,
                Evaluation::Pending(missing) => path.register_callback(Arc::new(RelationCallback::new(
                    env.index, var, relation, missing, None,
                )))?,
            }
            Ok(vec![path])
        }
    }
}

fn resolved_count(
    index: &GrammarIndex<'_>,
    var: &Variable,
    dep: Dependency,
    path: &Path<'_>,
) -> Result<usize, EngineError> {
    let n = path
        .value_of(dep)
        .and_then(|bits| count_from(index, dep, bits))
        .ok_or_else(|| {
            EngineError::unsatisfiable(var.name(), format!("{} is not a count", index.describe(dep)))
        })?;
    let cap = index.limits().max_repeat;
    if n > cap as u64 {
        return Err(EngineError::limit(var.name(), cap));
    }
    Ok(n as usize)
}

/// Specialize the child of `var` exactly `n` times.
fn repeat_n<'a>(
    env: Env<'a>,
    var: &'a Variable,
    repeat: &'a Repeat,
    mut path: Path<'a>,
    n: usize,
    depth: usize,
) -> Result<Vec<Path<'a>>, EngineError> {
    let scope = env.index.repeat_scope(var.id()).cloned().unwrap_or_default();
    let mut parts = Vec::with_capacity(n);
    for i in 0..n {
        if i > 0 {
            path.take_scope(&scope);
        }
        let Some(next) = specialize_variable(env, &repeat.child, path, depth + 1)?
            .into_iter()
            .find(Path::is_valid)
        else {
            return Ok(Vec::new());
        };
        path = next;
        if !path.pending_targets_in(&scope).is_empty() {
            return Err(EngineError::unsatisfiable(
                var.name(),
                format!("repetition {} left a relation unresolved", i),
            ));
        }
        parts.push(path.get_variable(repeat.child.id()).cloned().unwrap_or_default());
    }
    let mut value = Bits::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            if let Some(delimiter) = &repeat.delimiter {
                value.extend(delimiter);
            }
        }
        value.extend(part);
    }
    path.set_repetitions(var.id(), n);
    bind_node(&mut path, var, value)?;
    Ok(vec![path])
}

/// A repeat whose count is read from a node that is not bound yet.
struct DeferredRepeat<'a> {
    env: Env<'a>,
    var: &'a Variable,
    repeat: &'a Repeat,
    triggers: [Dependency; 1],
    depth: usize,
}

impl fmt::Debug for DeferredRepeat<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredRepeat")
            .field("repeat", &self.var.name())
            .field("count", &self.triggers[0])
            .finish()
    }
}

impl<'a> Callback<'a> for DeferredRepeat<'a> {
    fn target(&self) -> Dependency {
        self.var.dep()
    }

    fn triggers(&self) -> &[Dependency] {
        &self.triggers
    }

    fn fire(&self, path: &mut Path<'a>) -> Result<(), EngineError> {
        let n = resolved_count(self.env.index, self.var, self.triggers[0], path)?;
        let results = repeat_n(self.env, self.var, self.repeat, path.branch(), n, self.depth)?;
        match results.into_iter().find(Path::is_valid) {
            Some(done) => *path = done,
            None => path.reject(format!("'{}' could not be repeated {} times", self.var.name(), n)),
        }
        Ok(())
    }
}
