// src/core/state.rs

//! The small bundle of process-wide, shared components every session and
//! the replication client dispatch commands against.

use crate::core::replication::{ReplicaRegistry, ReplicationState};
use crate::core::storage::Store;
use std::sync::Arc;

/// Everything a session or the `ReplicationClient` needs a handle to.
/// Cheap to clone: every field is already an `Arc`.
#[derive(Clone)]
pub struct SharedState {
    pub store: Arc<Store>,
    pub registry: Arc<ReplicaRegistry>,
    pub repl: Arc<ReplicationState>,
}

impl SharedState {
    pub fn new(repl: Arc<ReplicationState>) -> Self {
        Self {
            store: Arc::new(Store::new()),
            registry: Arc::new(ReplicaRegistry::new()),
            repl,
        }
    }
}
