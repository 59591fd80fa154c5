//! Traversal context: bound values, deferred callbacks and the parsing cursor.
//!
//! A path is owned by one traversal. Exploring several continuations means
//! branching it; branches share nothing mutable.

use crate::error::EngineError;
use crate::memory::Memory;
use crate::value::Bits;
use crate::variable::{Dependency, FieldId, VarId};
use rand::rngs::StdRng;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Deferred work attached to a path, run once every trigger is bound.
///
/// Firing may bind further nodes, which in turn fires further callbacks.
pub trait Callback<'g>: fmt::Debug + Send + Sync {
    /// The node this callback produces or verifies.
    fn target(&self) -> Dependency;
    fn triggers(&self) -> &[Dependency];
    fn fire(&self, path: &mut Path<'g>) -> Result<(), EngineError>;
}

#[derive(Debug, Clone)]
enum Flavor {
    Specializing { rng: StdRng },
    Parsing { cursor: usize, end: usize },
}

#[derive(Debug, Clone)]
pub struct Path<'g> {
    memory: Memory,
    variables: HashMap<VarId, Bits>,
    fields: HashMap<FieldId, Bits>,
    repetitions: HashMap<VarId, usize>,
    callbacks: Vec<Arc<dyn Callback<'g> + 'g>>,
    in_progress: Vec<Dependency>,
    flavor: Flavor,
    rejected: Option<String>,
}

impl<'g> Path<'g> {
    fn with_flavor(memory: Memory, flavor: Flavor) -> Self {
        Path {
            memory,
            variables: HashMap::new(),
            fields: HashMap::new(),
            repetitions: HashMap::new(),
            callbacks: Vec::new(),
            in_progress: Vec::new(),
            flavor,
            rejected: None,
        }
    }

    pub fn specializing(memory: Memory, rng: StdRng) -> Self {
        Path::with_flavor(memory, Flavor::Specializing { rng })
    }

    /// A parsing path over a buffer of `end` bits, cursor at 0.
    pub fn parsing(memory: Memory, end: usize) -> Self {
        Path::with_flavor(memory, Flavor::Parsing { cursor: 0, end })
    }

    pub fn branch(&self) -> Self {
        self.clone()
    }

    pub fn is_parsing(&self) -> bool {
        matches!(self.flavor, Flavor::Parsing { .. })
    }

    pub fn bind_variable(&mut self, id: VarId, value: Bits) -> Result<(), EngineError> {
        if let Some(existing) = self.variables.get(&id) {
            if *existing == value {
                return Ok(());
            }
            return Err(EngineError::ConflictingBinding(id.to_string()));
        }
        self.variables.insert(id, value);
        self.fire_ready()
    }

    pub fn bind_field(&mut self, id: FieldId, value: Bits) -> Result<(), EngineError> {
        if let Some(existing) = self.fields.get(&id) {
            if *existing == value {
                return Ok(());
            }
            return Err(EngineError::ConflictingBinding(id.to_string()));
        }
        self.fields.insert(id, value);
        self.fire_ready()
    }

    pub fn get_variable(&self, id: VarId) -> Option<&Bits> {
        self.variables.get(&id)
    }

    pub fn has_variable(&self, id: VarId) -> bool {
        self.variables.contains_key(&id)
    }

    pub fn get_field(&self, id: FieldId) -> Option<&Bits> {
        self.fields.get(&id)
    }

    pub fn has_field(&self, id: FieldId) -> bool {
        self.fields.contains_key(&id)
    }

    pub fn value_of(&self, dep: Dependency) -> Option<&Bits> {
        match dep {
            Dependency::Field(id) => self.fields.get(&id),
            Dependency::Variable(id) => self.variables.get(&id),
        }
    }

    pub fn is_bound(&self, dep: Dependency) -> bool {
        self.value_of(dep).is_some()
    }

    /// Queue `callback`; it fires immediately if its triggers are already bound.
    pub fn register_callback(&mut self, callback: Arc<dyn Callback<'g> + 'g>) -> Result<(), EngineError> {
        tracing::trace!(target_node = %callback.target(), "register callback");
        self.callbacks.push(callback);
        self.fire_ready()
    }

    fn fire_ready(&mut self) -> Result<(), EngineError> {
        while self.rejected.is_none() {
            let ready = self
                .callbacks
                .iter()
                .position(|cb| cb.triggers().iter().all(|d| self.is_bound(*d)));
            let Some(index) = ready else { break };
            let callback = self.callbacks.remove(index);
            let target = callback.target();
            if self.in_progress.contains(&target) {
                return Err(EngineError::DependencyCycle(format!(
                    "{} is required while it is being resolved",
                    target
                )));
            }
            tracing::trace!(target_node = %target, "fire callback");
            self.in_progress.push(target);
            let result = callback.fire(self);
            self.in_progress.retain(|d| *d != target);
            result?;
        }
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !self.callbacks.is_empty()
    }

    pub fn pending(&self) -> &[Arc<dyn Callback<'g> + 'g>] {
        &self.callbacks
    }

    /// Pending callbacks whose target is one of `ids`.
    pub fn pending_targets_in(&self, ids: &HashSet<VarId>) -> Vec<Dependency> {
        self.callbacks
            .iter()
            .map(|cb| cb.target())
            .filter(|t| matches!(t, Dependency::Variable(id) if ids.contains(id)))
            .collect()
    }

    /// A chain of pending callbacks that wait on each other, if any.
    pub fn pending_cycle(&self) -> Option<Vec<Dependency>> {
        let edges: HashMap<Dependency, Vec<Dependency>> = self
            .callbacks
            .iter()
            .map(|cb| (cb.target(), cb.triggers().to_vec()))
            .collect();
        fn visit(
            node: Dependency,
            edges: &HashMap<Dependency, Vec<Dependency>>,
            stack: &mut Vec<Dependency>,
            done: &mut HashSet<Dependency>,
        ) -> Option<Vec<Dependency>> {
            if let Some(pos) = stack.iter().position(|d| *d == node) {
                return Some(stack[pos..].to_vec());
            }
            if done.contains(&node) {
                return None;
            }
            stack.push(node);
            for next in edges.get(&node).into_iter().flatten() {
                if edges.contains_key(next) {
                    if let Some(cycle) = visit(*next, edges, stack, done) {
                        return Some(cycle);
                    }
                }
            }
            stack.pop();
            done.insert(node);
            None
        }
        let mut done = HashSet::new();
        for start in edges.keys() {
            if let Some(cycle) = visit(*start, &edges, &mut Vec::new(), &mut done) {
                return Some(cycle);
            }
        }
        None
    }

    /// Mark this path as violating a constraint; it will be discarded.
    pub fn reject(&mut self, reason: impl Into<String>) {
        if self.rejected.is_none() {
            let reason = reason.into();
            tracing::trace!(%reason, "path rejected");
            self.rejected = Some(reason);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.rejected.is_none()
    }

    pub fn rejection(&self) -> Option<&str> {
        self.rejected.as_deref()
    }

    /// Parsing cursor in bits (always 0 when specializing).
    pub fn cursor(&self) -> usize {
        match self.flavor {
            Flavor::Parsing { cursor, .. } => cursor,
            Flavor::Specializing { .. } => 0,
        }
    }

    /// Bits left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        match self.flavor {
            Flavor::Parsing { cursor, end } => end - cursor,
            Flavor::Specializing { .. } => 0,
        }
    }

    /// Move the cursor forward; refuses to pass the end of the buffer.
    pub fn advance(&mut self, bits: usize) -> bool {
        match &mut self.flavor {
            Flavor::Parsing { cursor, end } if *cursor + bits <= *end => {
                *cursor += bits;
                true
            }
            _ => false,
        }
    }

    pub fn rng(&mut self) -> Option<&mut StdRng> {
        match &mut self.flavor {
            Flavor::Specializing { rng } => Some(rng),
            Flavor::Parsing { .. } => None,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn set_repetitions(&mut self, id: VarId, n: usize) {
        self.repetitions.insert(id, n);
    }

    pub fn repetitions(&self, id: VarId) -> Option<usize> {
        self.repetitions.get(&id).copied()
    }

    /// Remove the bindings of `ids` and return them. Only used on scratch
    /// branches that run one repetition of a repeated subtree.
    pub(crate) fn take_scope(&mut self, ids: &HashSet<VarId>) -> HashMap<VarId, Bits> {
        let taken: HashMap<VarId, Bits> = ids
            .iter()
            .filter_map(|id| self.variables.remove(id).map(|v| (*id, v)))
            .collect();
        taken
    }

    /// Bind values previously removed with [`Path::take_scope`].
    pub(crate) fn restore_scope(&mut self, values: HashMap<VarId, Bits>) -> Result<(), EngineError> {
        for (id, value) in values {
            self.bind_variable(id, value)?;
        }
        Ok(())
    }
}

/// The outcome of one successful traversal: every visited node's value.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    root: FieldId,
    variables: HashMap<VarId, Bits>,
    fields: HashMap<FieldId, Bits>,
    repetitions: HashMap<VarId, usize>,
    memory: Memory,
}

impl Binding {
    pub(crate) fn from_path(path: Path<'_>, root: FieldId) -> Self {
        Binding {
            root,
            variables: path.variables,
            fields: path.fields,
            repetitions: path.repetitions,
            memory: path.memory,
        }
    }

    pub fn root(&self) -> FieldId {
        self.root
    }

    /// Value of the root field.
    pub fn value(&self) -> Option<&Bits> {
        self.fields.get(&self.root)
    }

    /// Bits consumed (parsing) or produced (specializing) by the root field.
    pub fn consumed_bits(&self) -> usize {
        self.value().map(Bits::len).unwrap_or(0)
    }

    pub fn variable(&self, id: VarId) -> Option<&Bits> {
        self.variables.get(&id)
    }

    pub fn field(&self, id: FieldId) -> Option<&Bits> {
        self.fields.get(&id)
    }

    pub fn get(&self, dep: Dependency) -> Option<&Bits> {
        match dep {
            Dependency::Field(id) => self.field(id),
            Dependency::Variable(id) => self.variable(id),
        }
    }

    /// Repetition count chosen for a Repeat node.
    pub fn repetitions(&self, id: VarId) -> Option<usize> {
        self.repetitions.get(&id).copied()
    }

    pub fn variables(&self) -> &HashMap<VarId, Bits> {
        &self.variables
    }

    pub fn fields(&self) -> &HashMap<FieldId, Bits> {
        &self.fields
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Same node values, ignoring memory.
    pub fn same_values(&self, other: &Binding) -> bool {
        self.variables == other.variables && self.fields == other.fields
    }
}
