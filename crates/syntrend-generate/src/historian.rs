use std::collections::{BTreeMap, VecDeque};

use thiserror::Error;

use crate::value::Value;

/// Historians of a run, keyed by object name.
pub type Historians = BTreeMap<String, Historian>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("historian '{0}' has no values yet")]
    Empty(String),
    #[error("historian '{name}' only looks back: offset {offset} must be zero or negative")]
    PositiveOffset { name: String, offset: i64 },
}

/// Bounded lookback over the accepted records of one object.
///
/// Values are only reachable through [`Historian::get`]; there is no iteration
/// because only the last `capacity` records are guaranteed to be retained.
#[derive(Debug, Clone)]
pub struct Historian {
    name: String,
    capacity: usize,
    values: VecDeque<Value>,
}

impl Historian {
    /// A capacity of zero is raised to one.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push the newest value, evicting the oldest beyond capacity.
    pub fn append(&mut self, value: Value) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Value `offset` records back from the most recent (0 = most recent).
    /// Offsets past the retained window clamp to the oldest value.
    pub fn get(&self, offset: i64) -> Result<&Value, HistoryError> {
        if offset > 0 {
            return Err(HistoryError::PositiveOffset {
                name: self.name.clone(),
                offset,
            });
        }
        let newest = self
            .values
            .len()
            .checked_sub(1)
            .ok_or_else(|| HistoryError::Empty(self.name.clone()))?;
        let back = usize::try_from(offset.unsigned_abs()).unwrap_or(usize::MAX);
        let position = newest.saturating_sub(back);
        self.values
            .get(position)
            .ok_or_else(|| HistoryError::Empty(self.name.clone()))
    }

    pub fn current(&self) -> Result<&Value, HistoryError> {
        self.get(0)
    }

    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }
}
