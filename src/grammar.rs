//! Validation and lookup tables for one grammar tree.
//!
//! Built once at the start of every top-level call. Rejects structural faults
//! (missing domains, dangling or cyclic references, malformed repeats) before
//! any traversal begins, and answers id lookups during the traversal.

use crate::config::Limits;
use crate::error::EngineError;
use crate::variable::{
    CountSpec, Dependency, Field, FieldId, RelationKind, VarId, Variable, VariableKind,
};
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct GrammarIndex<'g> {
    root: &'g Field,
    limits: Limits,
    variables: HashMap<VarId, &'g Variable>,
    fields: HashMap<FieldId, &'g Field>,
    /// For each Repeat: ids of every variable in its child subtree.
    repeat_scopes: HashMap<VarId, HashSet<VarId>>,
}

/// Ids of every variable under `field` (domains and child fields).
fn field_variables<'g>(field: &'g Field, out: &mut Vec<&'g Variable>) {
    if let Some(domain) = field.domain() {
        out.extend(domain.walk());
    }
    for child in field.children() {
        field_variables(child, out);
    }
}

impl<'g> GrammarIndex<'g> {
    pub fn build(root: &'g Field, limits: &Limits) -> Result<Self, EngineError> {
        let mut index = GrammarIndex {
            root,
            limits: *limits,
            variables: HashMap::new(),
            fields: HashMap::new(),
            repeat_scopes: HashMap::new(),
        };
        index.register_field(root)?;
        let vars: Vec<&'g Variable> = index.variables.values().copied().collect();
        for var in &vars {
            index.check_variable(var)?;
        }
        index.check_cycles()?;
        Ok(index)
    }

    fn register_field(&mut self, field: &'g Field) -> Result<(), EngineError> {
        if self.fields.insert(field.id(), field).is_some() {
            return Err(EngineError::InvalidGrammar(format!(
                "field '{}' appears twice in the tree",
                field.name()
            )));
        }
        match (field.domain(), field.children().is_empty()) {
            (None, true) => return Err(EngineError::UndefinedDomain(field.name().to_string())),
            (Some(_), false) => {
                return Err(EngineError::InvalidGrammar(format!(
                    "field '{}' has both a domain and child fields",
                    field.name()
                )))
            }
            _ => {}
        }
        if let Some(domain) = field.domain() {
            for var in domain.walk() {
                if self.variables.insert(var.id(), var).is_some() {
                    return Err(EngineError::InvalidGrammar(format!(
                        "variable '{}' appears twice in the tree",
                        var.name()
                    )));
                }
            }
        }
        for child in field.children() {
            self.register_field(child)?;
        }
        Ok(())
    }

    fn check_dependency(&self, owner: &Variable, dep: Dependency) -> Result<(), EngineError> {
        let known = match dep {
            Dependency::Field(id) => self.fields.contains_key(&id),
            Dependency::Variable(id) => self.variables.contains_key(&id),
        };
        if known {
            Ok(())
        } else {
            Err(EngineError::UnknownDependency(format!(
                "'{}' references {} which is not part of '{}'",
                owner.name(),
                dep,
                self.root.name()
            )))
        }
    }

    fn check_variable(&mut self, var: &'g Variable) -> Result<(), EngineError> {
        let invalid = |msg: &str| EngineError::InvalidGrammar(format!("'{}': {}", var.name(), msg));
        match var.kind() {
            VariableKind::Data(data) => {
                if let Err(msg) = data.data_type.validate() {
                    return Err(invalid(&msg));
                }
            }
            VariableKind::Alt(alt) => {
                if alt.children.is_empty() {
                    return Err(invalid("alternative without children"));
                }
                if let Some(weights) = &alt.weights {
                    if weights.len() != alt.children.len() {
                        return Err(invalid("one weight per alternative is required"));
                    }
                    if weights.iter().all(|w| *w == 0) {
                        return Err(invalid("all alternative weights are zero"));
                    }
                }
            }
            VariableKind::Agg(_) => {}
            VariableKind::Repeat(repeat) => {
                match &repeat.count {
                    CountSpec::Fixed(n) if *n > self.limits.max_repeat => {
                        return Err(EngineError::limit(var.name(), self.limits.max_repeat))
                    }
                    CountSpec::Range { min, max } if min > max => {
                        return Err(invalid("repeat minimum above maximum"))
                    }
                    CountSpec::Range { max, .. } if *max > self.limits.max_repeat => {
                        return Err(EngineError::limit(var.name(), self.limits.max_repeat))
                    }
                    CountSpec::Dependency(dep) => self.check_dependency(var, *dep)?,
                    _ => {}
                }
                let scope = repeat.child.walk().into_iter().map(Variable::id).collect();
                self.repeat_scopes.insert(var.id(), scope);
            }
            VariableKind::Relation(relation) => {
                if relation.dependencies.is_empty() {
                    return Err(invalid("relation without dependencies"));
                }
                for dep in &relation.dependencies {
                    self.check_dependency(var, *dep)?;
                }
                if relation.kind.is_encoded() {
                    if !relation.output_type.is_fixed_size() {
                        return Err(invalid("relation output type must have a fixed size"));
                    }
                    if let Err(msg) = relation.output_type.validate() {
                        return Err(invalid(&msg));
                    }
                }
                match relation.kind {
                    RelationKind::Size { unit_bits: 0, .. } => return Err(invalid("size unit must be at least one bit")),
                    RelationKind::Padding { modulo_bits: 0, .. } => {
                        return Err(invalid("padding modulo must be at least one bit"))
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Variables whose value waits on other nodes: relations and referenced repeat counts.
    fn dependents_of(var: &Variable) -> Option<Vec<Dependency>> {
        match var.kind() {
            VariableKind::Relation(r) => Some(r.dependencies.clone()),
            VariableKind::Repeat(r) => match r.count {
                CountSpec::Dependency(dep) => Some(vec![dep]),
                _ => None,
            },
            _ => None,
        }
    }

    fn subtree(&self, dep: Dependency) -> Vec<&'g Variable> {
        match dep {
            Dependency::Variable(id) => self
                .variables
                .get(&id)
                .copied()
                .map(Variable::walk)
                .unwrap_or_default(),
            Dependency::Field(id) => {
                let mut out = Vec::new();
                if let Some(field) = self.fields.get(&id).copied() {
                    field_variables(field, &mut out);
                }
                out
            }
        }
    }

    fn check_cycles(&self) -> Result<(), EngineError> {
        let mut edges: HashMap<VarId, Vec<VarId>> = HashMap::new();
        for var in self.variables.values() {
            let Some(deps) = Self::dependents_of(var) else { continue };
            let mut out = Vec::new();
            for dep in deps {
                if self.is_self_reference(var, dep) {
                    if matches!(var.kind(), VariableKind::Relation(r) if r.kind == RelationKind::Value) {
                        return Err(EngineError::DependencyCycle(format!(
                            "value relation '{}' copies itself",
                            var.name()
                        )));
                    }
                    continue;
                }
                for inner in self.subtree(dep) {
                    if inner.id() == var.id() {
                        return Err(EngineError::DependencyCycle(format!(
                            "'{}' depends on {} which contains it",
                            var.name(),
                            self.describe(dep)
                        )));
                    }
                    if Self::dependents_of(inner).is_some() {
                        out.push(inner.id());
                    }
                }
            }
            edges.insert(var.id(), out);
        }

        fn visit(
            node: VarId,
            edges: &HashMap<VarId, Vec<VarId>>,
            stack: &mut Vec<VarId>,
            done: &mut HashSet<VarId>,
        ) -> Option<VarId> {
            if stack.contains(&node) {
                return Some(node);
            }
            if !done.insert(node) {
                return None;
            }
            stack.push(node);
            for next in edges.get(&node).into_iter().flatten() {
                if let Some(hit) = visit(*next, edges, stack, done) {
                    return Some(hit);
                }
            }
            stack.pop();
            None
        }

        let mut done = HashSet::new();
        let mut starts: Vec<&VarId> = edges.keys().collect();
        starts.sort();
        for start in starts {
            if let Some(hit) = visit(*start, &edges, &mut Vec::new(), &mut done) {
                return Err(EngineError::DependencyCycle(format!(
                    "'{}' transitively depends on itself",
                    self.variable_name(hit)
                )));
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &'g Field {
        self.root
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn variable(&self, id: VarId) -> Option<&'g Variable> {
        self.variables.get(&id).copied()
    }

    pub fn field(&self, id: FieldId) -> Option<&'g Field> {
        self.fields.get(&id).copied()
    }

    pub fn variable_name(&self, id: VarId) -> &str {
        self.variables.get(&id).map(|v| v.name()).unwrap_or("?")
    }

    /// Human-readable name of a referenced node.
    pub fn describe(&self, dep: Dependency) -> String {
        match dep {
            Dependency::Field(id) => match self.fields.get(&id) {
                Some(f) => format!("field '{}'", f.name()),
                None => format!("unknown field {}", id),
            },
            Dependency::Variable(id) => match self.variables.get(&id) {
                Some(v) => format!("variable '{}'", v.name()),
                None => format!("unknown variable {}", id),
            },
        }
    }

    /// `dep` designates `var` itself, directly or as the domain of a field.
    pub fn is_self_reference(&self, var: &Variable, dep: Dependency) -> bool {
        match dep {
            Dependency::Variable(id) => id == var.id(),
            Dependency::Field(id) => self
                .fields
                .get(&id)
                .and_then(|f| f.domain())
                .is_some_and(|d| d.id() == var.id()),
        }
    }

    /// Variables in the child subtree of a Repeat node.
    pub fn repeat_scope(&self, id: VarId) -> Option<&HashSet<VarId>> {
        self.repeat_scopes.get(&id)
    }

    /// Static minimal and maximal bit length of a node.
    pub fn bit_bounds(&self, dep: Dependency) -> (usize, usize) {
        match dep {
            Dependency::Variable(id) => self
                .variables
                .get(&id)
                .map(|v| self.variable_bounds(v))
                .unwrap_or((0, 0)),
            Dependency::Field(id) => self
                .fields
                .get(&id)
                .map(|f| self.field_bounds(f))
                .unwrap_or((0, 0)),
        }
    }

    pub fn field_bounds(&self, field: &Field) -> (usize, usize) {
        match field.domain() {
            Some(domain) => self.variable_bounds(domain),
            None => field
                .children()
                .iter()
                .map(|c| self.field_bounds(c))
                .fold((0, 0), |(a, b), (c, d)| (a.saturating_add(c), b.saturating_add(d))),
        }
    }

    pub fn variable_bounds(&self, var: &Variable) -> (usize, usize) {
        match var.kind() {
            VariableKind::Data(data) => data.bit_bounds(),
            VariableKind::Alt(alt) => alt
                .children
                .iter()
                .map(|c| self.variable_bounds(c))
                .fold((usize::MAX, 0), |(a, b), (c, d)| (a.min(c), b.max(d))),
            VariableKind::Agg(children) => children
                .iter()
                .map(|c| self.variable_bounds(c))
                .fold((0, 0), |(a, b), (c, d)| (a.saturating_add(c), b.saturating_add(d))),
            VariableKind::Repeat(repeat) => {
                let (cmin, cmax) = self.variable_bounds(&repeat.child);
                let delim = repeat.delimiter.as_ref().map(|d| d.len()).unwrap_or(0);
                let (nmin, nmax) = match repeat.count {
                    CountSpec::Fixed(n) => (n, n),
                    CountSpec::Range { min, max } => (min, max),
                    CountSpec::Dependency(_) => (0, self.limits.max_repeat),
                };
                let total = |n: usize, each: usize| {
                    n.saturating_mul(each)
                        .saturating_add(n.saturating_sub(1).saturating_mul(delim))
                };
                (total(nmin, cmin), total(nmax, cmax))
            }
            VariableKind::Relation(relation) => match relation.kind {
                RelationKind::Value => relation
                    .dependencies
                    .iter()
                    .map(|d| self.bit_bounds(*d))
                    .fold((0, 0), |(a, b), (c, d)| (a.saturating_add(c), b.saturating_add(d))),
                RelationKind::Padding { modulo_bits, .. } => (0, modulo_bits.saturating_sub(1)),
                _ => relation.output_type.bit_bounds(),
            },
        }
    }
}
