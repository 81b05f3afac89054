// src/core/replication/registry.rs

//! The primary-side registry of connected replicas: one entry per
//! `PSYNC`-graduated connection, keyed by its accepting `SocketAddr`.

use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// A single registered replica connection.
///
/// Keyed by the `SocketAddr` the primary accepted the connection on, not by
/// the replica's self-reported `listening-port` from `REPLCONF
/// listening-port`: the wire-time peer address is the only identity that is
/// guaranteed stable and unspoofable for the lifetime of the connection, and
/// `REPLCONF ACK` carries no other correlating field (§9).
pub struct ReplicaRecord {
    /// Shared with the owning session, which used the same handle to send
    /// the `FULLRESYNC` reply and RDB payload during the `PSYNC` that
    /// followed this connection's `REPLCONF listening-port`. After that
    /// point only the registry writes to it.
    writer: Arc<Mutex<OwnedWriteHalf>>,
    /// The offset this replica last acknowledged via `REPLCONF ACK`.
    pub acked_offset: AtomicU64,
    /// The `listening-port` it declared during the handshake, kept only for
    /// `INFO`/diagnostic display.
    pub listening_port: Option<u16>,
}

impl ReplicaRecord {
    /// Writes `bytes` to this replica's connection, propagating any I/O
    /// error back to the caller rather than dropping the replica here — the
    /// caller (the propagation loop) decides whether to evict it.
    pub async fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await
    }
}

/// Registry of every replica currently attached to this primary.
#[derive(Default)]
pub struct ReplicaRegistry {
    replicas: DashMap<SocketAddr, Arc<ReplicaRecord>>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self {
            replicas: DashMap::new(),
        }
    }

    /// Registers a connection as a replica, keyed by the `SocketAddr` the
    /// primary accepted it on (see [`ReplicaRecord`]). Called when a
    /// `REPLCONF listening-port` arrives on that connection; idempotent if
    /// called again for the same address.
    pub fn register(
        &self,
        addr: SocketAddr,
        writer: Arc<Mutex<OwnedWriteHalf>>,
        listening_port: Option<u16>,
    ) -> Arc<ReplicaRecord> {
        let record = Arc::new(ReplicaRecord {
            writer,
            acked_offset: AtomicU64::new(0),
            listening_port,
        });
        self.replicas.insert(addr, record.clone());
        record
    }

    pub fn unregister(&self, addr: &SocketAddr) {
        self.replicas.remove(addr);
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Records an acknowledged offset reported by the replica at `addr`.
    pub fn record_ack(&self, addr: &SocketAddr, offset: u64) {
        if let Some(record) = self.replicas.get(addr) {
            record.acked_offset.fetch_max(offset, Ordering::SeqCst);
        }
    }

    /// Counts replicas whose last acknowledged offset is at least `offset`.
    pub fn count_acked_at_least(&self, offset: u64) -> usize {
        self.replicas
            .iter()
            .filter(|entry| entry.acked_offset.load(Ordering::SeqCst) >= offset)
            .count()
    }

    /// Propagates `frame_bytes` to every registered replica, evicting any
    /// whose connection has gone bad. Returns the number of replicas the
    /// frame was successfully written to.
    pub async fn propagate(&self, frame_bytes: &Bytes) -> usize {
        let addrs: Vec<SocketAddr> = self.replicas.iter().map(|e| *e.key()).collect();
        let mut delivered = 0usize;
        for addr in addrs {
            let Some(record) = self.replicas.get(&addr).map(|e| e.value().clone()) else {
                continue;
            };
            match record.write_all(frame_bytes).await {
                Ok(()) => delivered += 1,
                Err(_) => {
                    self.replicas.remove(&addr);
                }
            }
        }
        delivered
    }

    /// Sends a `REPLCONF GETACK *` frame to every replica, used by `WAIT` to
    /// prompt a fresh round of acknowledgements.
    pub async fn request_acks(&self, getack_frame: &Bytes) {
        self.propagate(getack_frame).await;
    }
}
