//! The shared key-value store.
//!
//! Bundles the key-value map together with the set of attached replica
//! sockets behind a single lock. That is not an accident of convenience: a
//! master's `SET` must hand the exact received frame to every replica
//! socket *inside* the same critical section that mutates the map, so that
//! every replica observes writes in the same order the master applied them.
//! Splitting these into two locks would let a second writer interleave
//! between "mutate the map" and "fan out to replicas" on another thread
//! and break that ordering guarantee.

use std::collections::HashMap;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// One value in the store: an opaque payload plus an optional absolute
/// expiry in epoch milliseconds.
#[derive(Debug, Clone)]
pub struct Record {
    pub payload: Vec<u8>,
    pub expires_at_ms: Option<i64>,
}

impl Record {
    fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at_ms, Some(at) if now_ms >= at)
    }
}

/// The write half of a connection that completed PSYNC, kept around purely
/// so the master can fan writes out to it.
pub struct ReplicaHandle {
    pub addr: std::net::SocketAddr,
    writer: OwnedWriteHalf,
}

impl ReplicaHandle {
    pub fn new(addr: std::net::SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self { addr, writer }
    }
}

struct Shared {
    data: HashMap<Vec<u8>, Record>,
    replicas: Vec<ReplicaHandle>,
}

pub struct Store {
    shared: Mutex<Shared>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Shared {
                data: HashMap::new(),
                replicas: Vec::new(),
            }),
        }
    }

    /// Lazy-expiring read. If the record's deadline has passed, it is
    /// removed as part of this same critical section and `None` is
    /// returned.
    pub async fn get(&self, key: &[u8], now_ms: i64) -> Option<Vec<u8>> {
        let mut shared = self.shared.lock().await;
        match shared.data.get(key) {
            Some(record) if record.is_expired(now_ms) => {
                shared.data.remove(key);
                None
            }
            Some(record) => Some(record.payload.clone()),
            None => None,
        }
    }

    /// Plain upsert, no propagation. Used by a replica applying commands
    /// received on its master link, and by a master's own internal
    /// bookkeeping paths that are not client-facing writes.
    pub async fn set(&self, key: Vec<u8>, payload: Vec<u8>, expires_at_ms: Option<i64>) {
        let mut shared = self.shared.lock().await;
        shared.data.insert(key, Record { payload, expires_at_ms });
    }

    /// Master-side write path for `SET`: upserts the record and, within the
    /// same lock acquisition, writes `raw_frame` verbatim to every attached
    /// replica. A replica whose write fails is dropped from the attached
    /// set silently; such failures are never surfaced to the client that
    /// issued the write.
    pub async fn set_and_propagate(
        &self,
        key: Vec<u8>,
        payload: Vec<u8>,
        expires_at_ms: Option<i64>,
        raw_frame: &[u8],
    ) {
        let mut shared = self.shared.lock().await;
        shared.data.insert(key, Record { payload, expires_at_ms });

        let replicas = std::mem::take(&mut shared.replicas);
        let mut still_attached = Vec::with_capacity(replicas.len());
        for mut replica in replicas {
            match replica.writer.write_all(raw_frame).await {
                Ok(()) => still_attached.push(replica),
                Err(err) => {
                    tracing::warn!(addr = %replica.addr, error = %err, "dropping replica: write failed");
                }
            }
        }
        shared.replicas = still_attached;
    }

    /// Marks a connection as an attached replica under the same lock used
    /// by `set_and_propagate`.
    pub async fn attach_replica(&self, handle: ReplicaHandle) {
        let mut shared = self.shared.lock().await;
        shared.replicas.push(handle);
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.shared.lock().await.data.len()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_without_expiry() {
        let store = Store::new();
        store.set(b"foo".to_vec(), b"bar".to_vec(), None).await;
        assert_eq!(store.get(b"foo", 0).await, Some(b"bar".to_vec()));
        assert_eq!(store.get(b"missing", 0).await, None);
    }

    #[tokio::test]
    async fn expiry_monotonicity() {
        let store = Store::new();
        let t0 = 1_000_i64;
        let ttl = 100_i64;
        store
            .set(b"k".to_vec(), b"v".to_vec(), Some(t0 + ttl))
            .await;

        assert_eq!(store.get(b"k", t0 + ttl - 1).await, Some(b"v".to_vec()));
        assert_eq!(store.get(b"k", t0 + ttl).await, None);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn overwrite_replaces_expiry() {
        let store = Store::new();
        store.set(b"k".to_vec(), b"v1".to_vec(), Some(10)).await;
        store.set(b"k".to_vec(), b"v2".to_vec(), None).await;
        assert_eq!(store.get(b"k", 1_000_000).await, Some(b"v2".to_vec()));
    }
}
