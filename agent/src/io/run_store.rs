//! Run checkpoints.
//!
//! The orchestrator records a [`Checkpoint`] after every step so a caller can
//! inspect a run in flight. The store is injected; [`InMemoryRunStore`] keeps
//! checkpoints for the lifetime of the process only.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::conversation::{Conversation, RunPhase};

/// Snapshot of a run after a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub repo: String,
    pub working_branch: String,
    pub phase: RunPhase,
    /// Model turns completed so far.
    pub turns: u32,
    pub conversation: Conversation,
}

/// Storage capability for run checkpoints.
pub trait RunStore: Send + Sync {
    fn save(&self, checkpoint: &Checkpoint);
    fn load(&self, run_id: &str) -> Option<Checkpoint>;
    fn discard(&self, run_id: &str);
    /// Ids of runs with a stored checkpoint, sorted.
    fn run_ids(&self) -> Vec<String>;
}

/// Process-local checkpoint store.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for InMemoryRunStore {
    fn save(&self, checkpoint: &Checkpoint) {
        debug!(run_id = %checkpoint.run_id, phase = ?checkpoint.phase, turns = checkpoint.turns, "saving checkpoint");
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(checkpoint.run_id.clone(), checkpoint.clone());
    }

    fn load(&self, run_id: &str) -> Option<Checkpoint> {
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned()
    }

    fn discard(&self, run_id: &str) {
        debug!(run_id, "discarding checkpoint");
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(run_id);
    }

    fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Store that keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRunStore;

impl RunStore for NoopRunStore {
    fn save(&self, _checkpoint: &Checkpoint) {}

    fn load(&self, _run_id: &str) -> Option<Checkpoint> {
        None
    }

    fn discard(&self, _run_id: &str) {}

    fn run_ids(&self) -> Vec<String> {
        Vec::new()
    }
}
