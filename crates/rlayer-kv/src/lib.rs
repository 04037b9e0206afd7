//! A single-process, ordered, in-memory [`KVStore`]. Intended for tests and
//! for embedding the record layer without a separate storage engine — not a
//! durable or crash-safe store.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rlayer_core::{Error, KVStore, KeyRange, KeyValue, Result, Transaction, TransactionMode};
use tracing::instrument;

#[derive(Clone, Debug)]
enum WriteOp {
    Set(Vec<u8>, Vec<u8>),
    Clear(Vec<u8>),
    ClearRange(KeyRange),
    AtomicAdd(Vec<u8>, i64),
    VersionstampedKey { key_with_placeholder: Vec<u8>, offset: usize, value: Vec<u8> },
}

struct Shared {
    data: parking_lot::RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    commit_counter: AtomicU64,
}

/// An ordered, in-memory store. Cloning shares the underlying map.
#[derive(Clone)]
pub struct MemoryStore(Arc<Shared>);

impl MemoryStore {
    pub fn new() -> Self {
        Self(Arc::new(Shared {
            data: parking_lot::RwLock::new(BTreeMap::new()),
            commit_counter: AtomicU64::new(0),
        }))
    }

    /// Snapshot of every key-value pair currently committed, for assertions
    /// in tests.
    pub fn snapshot(&self) -> Vec<KeyValue> {
        self.0.data.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KVStore for MemoryStore {
    #[instrument(name = "memory_store.begin", skip(self))]
    async fn begin(&self, mode: TransactionMode) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            store: self.0.clone(),
            mode,
            writes: Mutex::new(Vec::new()),
        }))
    }
}

struct MemoryTransaction {
    store: Arc<Shared>,
    mode: TransactionMode,
    writes: Mutex<Vec<WriteOp>>,
}

impl MemoryTransaction {
    fn require_command(&self) -> Result<()> {
        if self.mode == TransactionMode::Query {
            return Err(Error::Store("cannot write inside a query transaction".to_string()));
        }
        Ok(())
    }

    /// Applies this transaction's buffered writes against a read of the
    /// committed map, so reads observe the transaction's own prior writes
    /// without requiring the committed map to be touched yet.
    fn overlay_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let writes = self.writes.lock();
        for op in writes.iter().rev() {
            match op {
                WriteOp::Set(k, v) if k == key => return Some(v.clone()),
                WriteOp::Clear(k) if k == key => return None,
                WriteOp::ClearRange(range) if key >= range.start.as_slice() && key < range.end.as_slice() => {
                    return None
                }
                WriteOp::AtomicAdd(k, _) if k == key => break,
                _ => {}
            }
        }
        drop(writes);
        self.store.data.read().get(key).cloned()
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    #[instrument(name = "memory_transaction.get", skip(self))]
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.overlay_get(key))
    }

    #[instrument(name = "memory_transaction.get_range", skip(self))]
    async fn get_range(&self, range: &KeyRange, limit: Option<usize>) -> Result<Vec<KeyValue>> {
        let data = self.store.data.read();
        let iter = data.range((Bound::Included(range.start.clone()), Bound::Excluded(range.end.clone())));
        let mut out: Vec<KeyValue> = iter.map(|(k, v)| (k.clone(), v.clone())).collect();
        drop(data);

        // Overlay buffered writes from this transaction before returning.
        let writes = self.writes.lock().clone();
        for op in writes {
            match op {
                WriteOp::Set(k, v) if k >= range.start && k < range.end => {
                    match out.binary_search_by(|(existing, _)| existing.cmp(&k)) {
                        Ok(idx) => out[idx].1 = v,
                        Err(idx) => out.insert(idx, (k, v)),
                    }
                }
                WriteOp::Clear(k) if k >= range.start && k < range.end => {
                    out.retain(|(existing, _)| existing != &k);
                }
                WriteOp::ClearRange(cleared) => {
                    out.retain(|(existing, _)| !(existing >= &cleared.start && existing < &cleared.end));
                }
                _ => {}
            }
        }

        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn set(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.require_command()?;
        self.writes.lock().push(WriteOp::Set(key, value));
        Ok(())
    }

    fn clear(&self, key: &[u8]) -> Result<()> {
        self.require_command()?;
        self.writes.lock().push(WriteOp::Clear(key.to_vec()));
        Ok(())
    }

    fn clear_range(&self, range: &KeyRange) -> Result<()> {
        self.require_command()?;
        self.writes.lock().push(WriteOp::ClearRange(range.clone()));
        Ok(())
    }

    fn atomic_add(&self, key: &[u8], delta: i64) -> Result<()> {
        self.require_command()?;
        self.writes.lock().push(WriteOp::AtomicAdd(key.to_vec(), delta));
        Ok(())
    }

    fn atomic_set_versionstamped_key(
        &self,
        key_with_placeholder: Vec<u8>,
        versionstamp_offset: usize,
        value: Vec<u8>,
    ) -> Result<()> {
        self.require_command()?;
        self.writes.lock().push(WriteOp::VersionstampedKey {
            key_with_placeholder,
            offset: versionstamp_offset,
            value,
        });
        Ok(())
    }

    #[instrument(name = "memory_transaction.commit", skip(self))]
    async fn commit(self: Box<Self>) -> Result<()> {
        if self.mode == TransactionMode::Query {
            return Ok(());
        }
        let writes = self.writes.into_inner();
        if writes.is_empty() {
            return Ok(());
        }

        let commit_version = self.store.commit_counter.fetch_add(1, Ordering::SeqCst);
        let mut data = self.store.data.write();
        let mut versionstamp_sequence: u16 = 0;

        for op in writes {
            match op {
                WriteOp::Set(k, v) => {
                    data.insert(k, v);
                }
                WriteOp::Clear(k) => {
                    data.remove(&k);
                }
                WriteOp::ClearRange(range) => {
                    let keys: Vec<Vec<u8>> = data
                        .range((Bound::Included(range.start.clone()), Bound::Excluded(range.end.clone())))
                        .map(|(k, _)| k.clone())
                        .collect();
                    for k in keys {
                        data.remove(&k);
                    }
                }
                WriteOp::AtomicAdd(k, delta) => {
                    let current = data.get(&k).map(|v| decode_i64_le(v)).unwrap_or(0);
                    data.insert(k, (current + delta).to_le_bytes().to_vec());
                }
                WriteOp::VersionstampedKey { mut key_with_placeholder, offset, value } => {
                    let stamp = versionstamp_bytes(commit_version, versionstamp_sequence);
                    versionstamp_sequence += 1;
                    key_with_placeholder[offset..offset + 10].copy_from_slice(&stamp);
                    data.insert(key_with_placeholder, value);
                }
            }
        }
        Ok(())
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn decode_i64_le(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    i64::from_le_bytes(buf)
}

/// The 10-byte transaction-order prefix of a versionstamp: an 8-byte
/// big-endian commit sequence followed by a 2-byte big-endian in-transaction
/// call order, matching FDB's versionstamp layout so lexicographic byte
/// order equals commit order.
fn versionstamp_bytes(commit_version: u64, sequence: u16) -> [u8; 10] {
    let mut out = [0u8; 10];
    out[0..8].copy_from_slice(&commit_version.to_be_bytes());
    out[8..10].copy_from_slice(&sequence.to_be_bytes());
    out
}
