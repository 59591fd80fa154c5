//! Cross-invocation store for persistent variables.

use crate::value::Bits;
use crate::variable::VarId;
use std::collections::HashMap;
use std::sync::Arc;

/// Last bound value of every persistent variable.
///
/// Cloning is cheap: the map is shared until one of the copies is written
/// (copy-on-write), so paths can duplicate memory on every branch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Memory {
    values: Arc<HashMap<VarId, Bits>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memorize(&mut self, id: VarId, value: Bits) {
        Arc::make_mut(&mut self.values).insert(id, value);
    }

    pub fn forget(&mut self, id: VarId) -> Option<Bits> {
        if !self.values.contains_key(&id) {
            return None;
        }
        Arc::make_mut(&mut self.values).remove(&id)
    }

    pub fn has_value(&self, id: VarId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn value(&self, id: VarId) -> Option<&Bits> {
        self.values.get(&id)
    }

    /// Independent snapshot.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VarId, &Bits)> {
        self.values.iter()
    }
}
