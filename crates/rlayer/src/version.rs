use rlayer_core::{KeyRange, Result, Subspace, Transaction, Tuple};

/// Fixed 2-byte suffix appended after the store-assigned 10-byte
/// versionstamp to fill out the 12-byte version a caller compares against
/// in `save`'s `expected_version`. This store never runs more than one
/// version-affecting write per primary key per transaction, so the
/// user-controlled local-order suffix `VersionStamp` otherwise reserves for
/// disambiguating same-transaction writes is unused here and pinned to zero.
const LOCAL_ORDER_SUFFIX: [u8; 2] = [0, 0];

/// Tracks one optimistic-concurrency version per primary key, independent
/// of any user-declared `version`-kind index (spec §4.3's "each record
/// carries a version the facade bumps on every `save`" contract). A
/// `version`-kind index append-logs every write for replay/history; this
/// store only ever keeps the latest stamp, overwriting the prior marker on
/// each bump.
pub struct VersionStore {
    subspace: Subspace,
}

impl VersionStore {
    pub fn new(subspace: Subspace) -> Self {
        Self { subspace }
    }

    fn scope(&self, primary_key: &Tuple) -> Subspace {
        self.subspace.subspace(primary_key)
    }

    /// The version last written for `primary_key`, or `None` if it has
    /// never been saved (or was deleted).
    pub async fn current(&self, txn: &dyn Transaction, primary_key: &Tuple) -> Result<Option<[u8; 12]>> {
        let (start, end) = self.scope(primary_key).range();
        let rows = txn.get_range(&KeyRange::new(start, end), Some(1)).await?;
        Ok(rows.into_iter().next().map(|(key, _)| {
            let mut stamp = [0u8; 12];
            let tail = &key[key.len() - 12..];
            stamp.copy_from_slice(tail);
            stamp
        }))
    }

    /// Replaces `primary_key`'s marker with a fresh store-assigned stamp.
    pub fn bump(&self, txn: &dyn Transaction, primary_key: &Tuple) -> Result<()> {
        self.clear(txn, primary_key)?;
        let mut key = self.scope(primary_key).prefix().to_vec();
        let offset = key.len();
        key.extend_from_slice(&[0xff; 10]);
        key.extend_from_slice(&LOCAL_ORDER_SUFFIX);
        txn.atomic_set_versionstamped_key(key, offset, Vec::new())
    }

    /// Drops `primary_key`'s marker entirely, on record deletion.
    pub fn clear(&self, txn: &dyn Transaction, primary_key: &Tuple) -> Result<()> {
        let (start, end) = self.scope(primary_key).range();
        txn.clear_range(&KeyRange::new(start, end))
    }
}

#[cfg(test)]
mod tests {
    use rlayer_core::{Element, KVStore, TransactionMode};
    use rlayer_kv::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn fresh_primary_key_has_no_version() {
        let store = MemoryStore::new();
        let versions = VersionStore::new(Subspace::from("v"));
        let txn = store.begin(TransactionMode::Query).await.unwrap();
        assert_eq!(versions.current(&*txn, &vec![Element::Int(1)]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn bump_assigns_a_readable_stamp_after_commit() {
        let store = MemoryStore::new();
        let versions = VersionStore::new(Subspace::from("v"));
        let pk = vec![Element::Int(1)];

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        versions.bump(&*txn, &pk).unwrap();
        txn.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let stamp = versions.current(&*read, &pk).await.unwrap();
        assert!(stamp.is_some());
    }

    #[tokio::test]
    async fn repeated_bumps_leave_exactly_one_marker() {
        let store = MemoryStore::new();
        let versions = VersionStore::new(Subspace::from("v"));
        let pk = vec![Element::Int(1)];

        for _ in 0..3 {
            let txn = store.begin(TransactionMode::Command).await.unwrap();
            versions.bump(&*txn, &pk).unwrap();
            txn.commit().await.unwrap();
        }

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let (start, end) = versions.scope(&pk).range();
        let rows = read.get_range(&KeyRange::new(start, end), None).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_the_marker() {
        let store = MemoryStore::new();
        let versions = VersionStore::new(Subspace::from("v"));
        let pk = vec![Element::Int(1)];

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        versions.bump(&*txn, &pk).unwrap();
        txn.commit().await.unwrap();

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        versions.clear(&*txn, &pk).unwrap();
        txn.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        assert_eq!(versions.current(&*read, &pk).await.unwrap(), None);
    }
}
