// src/core/replication/mod.rs

//! Primary-side and replica-side replication: the process-wide state
//! singleton, the registry of attached replicas, and the replica-side
//! client state machine.

pub mod client;
pub mod registry;
pub mod state;

pub use client::ReplicationClient;
pub use registry::{ReplicaRecord, ReplicaRegistry};
pub use state::{MASTER_REPLID, ReplicationState, Role};
