//! Relation resolver shared by specialization and abstraction.
//!
//! A relation computes its value from the bound values of its dependencies.
//! When a dependency is not bound yet, the caller registers one of the
//! callbacks below on the path and the value is produced (specializing) or
//! checked (parsing) as soon as the last dependency gets bound.

use crate::checksum::internet_checksum;
use crate::error::EngineError;
use crate::grammar::GrammarIndex;
use crate::path::{Callback, Path};
use crate::value::Bits;
use crate::variable::{Dependency, Field, Relation, RelationKind, Variable, VariableKind};
use std::fmt;

pub(crate) enum Evaluation {
    Ready(Bits),
    /// Dependencies still unbound.
    Pending(Vec<Dependency>),
}

/// Bind a variable's value, memorizing it when the variable is persistent.
pub(crate) fn bind_node(path: &mut Path<'_>, var: &Variable, value: Bits) -> Result<(), EngineError> {
    if var.is_persistent() {
        path.memory_mut().memorize(var.id(), value.clone());
    }
    path.bind_variable(var.id(), value).map_err(|e| match e {
        EngineError::ConflictingBinding(_) => EngineError::ConflictingBinding(var.name().to_string()),
        other => other,
    })
}

pub(crate) fn bind_field_value(path: &mut Path<'_>, field: &Field, value: Bits) -> Result<(), EngineError> {
    path.bind_field(field.id(), value).map_err(|e| match e {
        EngineError::ConflictingBinding(_) => EngineError::ConflictingBinding(field.name().to_string()),
        other => other,
    })
}

/// Compute `relation` (owned by `var`) from the values bound in `path`.
pub(crate) fn evaluate(
    index: &GrammarIndex<'_>,
    var: &Variable,
    relation: &Relation,
    path: &Path<'_>,
) -> Result<Evaluation, EngineError> {
    let width = relation.output_type.bit_bounds().0;
    let mut values = Vec::with_capacity(relation.dependencies.len());
    let mut missing = Vec::new();
    for dep in &relation.dependencies {
        if index.is_self_reference(var, *dep) {
            values.push(Bits::zeros(width));
            continue;
        }
        match path.value_of(*dep) {
            Some(v) => values.push(v.clone()),
            None => missing.push(*dep),
        }
    }
    if !missing.is_empty() {
        return Ok(Evaluation::Pending(missing));
    }

    let encode = |n: u64| {
        relation.output_type.encode_unsigned(n).ok_or_else(|| {
            EngineError::unsatisfiable(
                var.name(),
                format!("{} cannot be encoded as {}", n, relation.output_type),
            )
        })
    };
    let value = match relation.kind {
        RelationKind::Size { unit_bits, offset } => {
            let units: usize = values.iter().map(|v| v.len().div_ceil(unit_bits)).sum();
            let n = units as i128 + offset as i128;
            let n = u64::try_from(n)
                .map_err(|_| EngineError::unsatisfiable(var.name(), format!("negative size {}", n)))?;
            encode(n)?
        }
        RelationKind::Value => Bits::concat(&values),
        RelationKind::Checksum => {
            let data = Bits::concat(&values).to_bytes();
            encode(u64::from(internet_checksum(&data)))?
        }
        RelationKind::Crc(algorithm) => {
            let data = Bits::concat(&values).to_bytes();
            encode(algorithm.checksum(&data))?
        }
        RelationKind::Padding {
            modulo_bits,
            offset,
            once,
            fill,
        } => {
            let covered: usize = values.iter().map(Bits::len).sum();
            let covered = covered as i128 + offset as i128;
            let covered = u128::try_from(covered)
                .map_err(|_| EngineError::unsatisfiable(var.name(), format!("negative padded length {}", covered)))?;
            let modulo = modulo_bits as u128;
            let rem = covered % modulo;
            let missing = if rem == 0 || (once && covered > modulo) { 0 } else { modulo - rem };
            filler(fill, missing as usize)
        }
    };
    Ok(Evaluation::Ready(value))
}

/// `len` bits of `byte` repeated.
fn filler(byte: u8, len: usize) -> Bits {
    Bits::from_bytes(&vec![byte; len.div_ceil(8)]).slice(0, len)
}

/// Integer value of a bound node, decoded with the node's own type when it has one.
pub(crate) fn count_from(index: &GrammarIndex<'_>, dep: Dependency, bits: &Bits) -> Option<u64> {
    let var = match dep {
        Dependency::Variable(id) => index.variable(id),
        Dependency::Field(id) => index.field(id).and_then(Field::domain),
    };
    match var.map(Variable::kind) {
        Some(VariableKind::Data(data)) => data.data_type.decode_unsigned(bits),
        Some(VariableKind::Relation(r)) if r.kind.is_encoded() => {
            r.output_type.decode_unsigned(bits)
        }
        _ => bits.to_u64(),
    }
}

/// Fatal error for a traversal that ended with callbacks still pending.
pub(crate) fn pending_error(index: &GrammarIndex<'_>, path: &Path<'_>) -> EngineError {
    if let Some(cycle) = path.pending_cycle() {
        let names: Vec<String> = cycle.iter().map(|d| index.describe(*d)).collect();
        return EngineError::DependencyCycle(names.join(" -> "));
    }
    match path.pending().first() {
        Some(cb) => {
            let waiting: Vec<String> = cb
                .triggers()
                .iter()
                .filter(|d| !path.is_bound(**d))
                .map(|d| index.describe(*d))
                .collect();
            EngineError::unsatisfiable(
                &index.describe(cb.target()),
                format!("still waiting on {}", waiting.join(", ")),
            )
        }
        None => EngineError::unsatisfiable(index.root().name(), "no pending relation"),
    }
}

/// Produces (specializing) or verifies (parsing) a relation once its dependencies are bound.
pub(crate) struct RelationCallback<'a> {
    index: &'a GrammarIndex<'a>,
    var: &'a Variable,
    relation: &'a Relation,
    triggers: Vec<Dependency>,
    /// Bits consumed for the relation while parsing; `None` when specializing.
    parsed: Option<Bits>,
}

impl<'a> RelationCallback<'a> {
    pub(crate) fn new(
        index: &'a GrammarIndex<'a>,
        var: &'a Variable,
        relation: &'a Relation,
        triggers: Vec<Dependency>,
        parsed: Option<Bits>,
    ) -> Self {
        RelationCallback {
            index,
            var,
            relation,
            triggers,
            parsed,
        }
    }
}

impl fmt::Debug for RelationCallback<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationCallback")
            .field("relation", &self.var.name())
            .field("triggers", &self.triggers)
            .field("parsed", &self.parsed)
            .finish()
    }
}

impl<'a> Callback<'a> for RelationCallback<'a> {
    fn target(&self) -> Dependency {
        self.var.dep()
    }

    fn triggers(&self) -> &[Dependency] {
        &self.triggers
    }

    fn fire(&self, path: &mut Path<'a>) -> Result<(), EngineError> {
        let evaluation = match evaluate(self.index, self.var, self.relation, path) {
            Err(EngineError::UnsatisfiableRelation { reason, .. }) if self.parsed.is_some() => {
                path.reject(reason);
                return Ok(());
            }
            other => other?,
        };
        match evaluation {
            Evaluation::Pending(missing) => path.register_callback(std::sync::Arc::new(RelationCallback::new(
                self.index,
                self.var,
                self.relation,
                missing,
                self.parsed.clone(),
            ))),
            Evaluation::Ready(expected) => match &self.parsed {
                Some(parsed) if *parsed != expected => {
                    path.reject(format!("'{}' does not match its dependencies", self.var.name()));
                    Ok(())
                }
                Some(_) => Ok(()),
                None => bind_node(path, self.var, expected),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Composite<'a> {
    Variable(&'a Variable),
    Field(&'a Field),
}

/// Binds a composite node to the concatenation of its parts once they are all bound.
pub(crate) struct ComposeCallback<'a> {
    target: Composite<'a>,
    parts: Vec<Dependency>,
    triggers: Vec<Dependency>,
}

impl<'a> ComposeCallback<'a> {
    pub(crate) fn new(target: Composite<'a>, parts: Vec<Dependency>, triggers: Vec<Dependency>) -> Self {
        ComposeCallback {
            target,
            parts,
            triggers,
        }
    }
}

impl fmt::Debug for ComposeCallback<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.target {
            Composite::Variable(v) => v.name(),
            Composite::Field(field) => field.name(),
        };
        f.debug_struct("ComposeCallback")
            .field("target", &name)
            .field("triggers", &self.triggers)
            .finish()
    }
}

impl<'a> Callback<'a> for ComposeCallback<'a> {
    fn target(&self) -> Dependency {
        match self.target {
            Composite::Variable(v) => v.dep(),
            Composite::Field(f) => f.dep(),
        }
    }

    fn triggers(&self) -> &[Dependency] {
        &self.triggers
    }

    fn fire(&self, path: &mut Path<'a>) -> Result<(), EngineError> {
        let value = Bits::concat(self.parts.iter().filter_map(|d| path.value_of(*d)));
        match self.target {
            Composite::Variable(v) => bind_node(path, v, value),
            Composite::Field(f) => bind_field_value(path, f, value),
        }
    }
}

/// Bind `target` to the concatenation of `parts` now, or defer until every part is bound.
pub(crate) fn compose<'a>(
    path: &mut Path<'a>,
    target: Composite<'a>,
    parts: Vec<Dependency>,
) -> Result<(), EngineError> {
    let missing: Vec<Dependency> = parts.iter().copied().filter(|d| !path.is_bound(*d)).collect();
    if missing.is_empty() {
        let value = Bits::concat(parts.iter().filter_map(|d| path.value_of(*d)));
        return match target {
            Composite::Variable(v) => bind_node(path, v, value),
            Composite::Field(f) => bind_field_value(path, f, value),
        };
    }
    path.register_callback(std::sync::Arc::new(ComposeCallback::new(target, parts, missing)))
}

/// Checks, once the referenced count is bound, that a Repeat parsed with an
/// unknown count really repeated that many times.
pub(crate) struct RepeatCountCheck<'a> {
    index: &'a GrammarIndex<'a>,
    var: &'a Variable,
    triggers: [Dependency; 1],
    repetitions: usize,
}

impl<'a> RepeatCountCheck<'a> {
    pub(crate) fn new(index: &'a GrammarIndex<'a>, var: &'a Variable, dep: Dependency, repetitions: usize) -> Self {
        RepeatCountCheck {
            index,
            var,
            triggers: [dep],
            repetitions,
        }
    }
}

impl fmt::Debug for RepeatCountCheck<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepeatCountCheck")
            .field("repeat", &self.var.name())
            .field("repetitions", &self.repetitions)
            .finish()
    }
}

impl<'a> Callback<'a> for RepeatCountCheck<'a> {
    fn target(&self) -> Dependency {
        self.var.dep()
    }

    fn triggers(&self) -> &[Dependency] {
        &self.triggers
    }

    fn fire(&self, path: &mut Path<'a>) -> Result<(), EngineError> {
        let dep = self.triggers[0];
        let expected = path.value_of(dep).and_then(|bits| count_from(self.index, dep, bits));
        if expected != Some(self.repetitions as u64) {
            path.reject(format!(
                "'{}' repeated {} times, {} says {:?}",
                self.var.name(),
                self.repetitions,
                self.index.describe(dep),
                expected
            ));
        }
        Ok(())
    }
}
