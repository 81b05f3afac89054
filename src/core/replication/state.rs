// src/core/replication/state.rs

//! The process-wide replication singleton: this server's role, its fixed
//! run ID, and its cumulative propagation/ingestion offset.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// The fixed 40-hex run ID this server reports in `INFO replication` and in
/// `PSYNC`/`FULLRESYNC` exchanges. Fixed rather than generated, since this
/// server never needs to distinguish itself from a prior incarnation.
pub const MASTER_REPLID: &str = "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb";

/// This server's role in the replication topology. Decided once at launch
/// from the `--replicaof` flag and never changed at runtime — there is no
/// replica-to-primary failover in this design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
}

/// Process-wide replication state.
///
/// On a primary, `master_repl_offset` is the cumulative wire-byte length of
/// write commands propagated to replicas. On a replica, it is the cumulative
/// wire-byte length of frames ingested from the primary after the initial
/// RDB payload. Monotonically non-decreasing in both roles.
#[derive(Debug)]
pub struct ReplicationState {
    pub role: Role,
    pub master_repl_offset: AtomicU64,
    /// Guards `{Store writes on primary, master_repl_offset, propagation,
    /// WAIT}` as one unit (§5): a `SET` holds this for the duration of
    /// applying to the store and queuing propagation, and a blocked `WAIT`
    /// holds it for its entire poll so its target offset cannot move out
    /// from under it.
    pub write_lock: Mutex<()>,
}

impl ReplicationState {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            master_repl_offset: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn offset(&self) -> u64 {
        self.master_repl_offset.load(Ordering::SeqCst)
    }

    /// Advances the offset by `by` bytes and returns the new value.
    pub fn advance(&self, by: u64) -> u64 {
        self.master_repl_offset.fetch_add(by, Ordering::SeqCst) + by
    }

    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }
}
