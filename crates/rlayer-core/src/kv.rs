use async_trait::async_trait;

use crate::error::Result;

/// Execution mode a transaction was opened under (spec §6). A `Query`
/// transaction is read-only and may be served from a cached/materialized
/// snapshot; a `Command` transaction sees its own writes and is the only
/// kind allowed to mutate state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionMode {
    Command,
    Query,
}

/// One key/value pair as returned from a range scan, in key order.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// A half-open `[start, end)` byte-range scan request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    pub fn new(start: Vec<u8>, end: Vec<u8>) -> Self {
        Self { start, end }
    }
}

/// The ordered key-value transaction every higher component in the record
/// layer is built against. Methods take `&self`: the underlying store
/// provides its own interior mutability, which lets multiple cursors
/// (C9) borrow the same transaction concurrently without fighting the
/// borrow checker over `&mut self` (grounded in reifydb-transaction's
/// `ActiveCommandTransaction`, whose mutation methods likewise take `&self`
/// over a lock-guarded MVCC buffer).
///
/// `get_range` is materialized eagerly into a `Vec` rather than returned as
/// a lazy stream; true streaming cursor behaviour is layered on top in
/// `rlayer-query` via internal pagination over successive bounded ranges.
#[async_trait]
pub trait Transaction: Send + Sync {
    fn mode(&self) -> TransactionMode;

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Returns up to `limit` key-value pairs in `range`, in ascending key
    /// order. A `None` limit returns every pair in the range.
    async fn get_range(&self, range: &KeyRange, limit: Option<usize>) -> Result<Vec<KeyValue>>;

    fn set(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    fn clear(&self, key: &[u8]) -> Result<()>;

    fn clear_range(&self, range: &KeyRange) -> Result<()>;

    /// Adds `delta` to the little-endian integer stored at `key`,
    /// initializing it to zero first if absent. Used by the `count` and
    /// `sum` index maintainers to avoid read-modify-write races between
    /// concurrent commits (spec §4.4).
    fn atomic_add(&self, key: &[u8], delta: i64) -> Result<()>;

    /// Writes `value` under a key formed by splicing a transaction-global,
    /// monotonically increasing 10-byte versionstamp into `key_with_placeholder`
    /// at `versionstamp_offset`. Used by the `version` index maintainer to
    /// assign commit-order-stable index keys without a coordinator
    /// round-trip (spec §4.4, FDB-style versionstamp operation).
    fn atomic_set_versionstamped_key(
        &self,
        key_with_placeholder: Vec<u8>,
        versionstamp_offset: usize,
        value: Vec<u8>,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn cancel(self: Box<Self>) -> Result<()>;
}

/// Factory for transactions against one underlying key-value store.
/// Grounded in reifydb-transaction's `StandardTransaction`/`Transaction`
/// split between a store implementation and the transaction it hands out.
#[async_trait]
pub trait KVStore: Send + Sync {
    async fn begin(&self, mode: TransactionMode) -> Result<Box<dyn Transaction>>;
}
