//! Canonical ordered collection of source turns
//!
//! Written only by the ASR sink adapter; read by snapshotting. The map is
//! keyed by the provider-assigned turn id, so a later event for the same id
//! replaces the earlier one.

use crate::domain::models::Turn;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct TurnStore {
    turns: BTreeMap<u64, Turn>,
}

impl TurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the turn with this id.
    pub fn upsert(&mut self, turn: Turn) {
        self.turns.insert(turn.id, turn);
    }

    /// Current turns in id order, cloned for handoff across task boundaries.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.values().cloned().collect()
    }

    pub fn get(&self, id: u64) -> Option<&Turn> {
        self.turns.get(&id)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
