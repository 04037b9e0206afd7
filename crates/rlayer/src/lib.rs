//! Record-oriented storage atop an ordered key-value store (spec §1-§9):
//! tuple-keyed CRUD, secondary index maintenance, and a cost-based query
//! planner, composed here into one facade (`RecordStore`) so a caller
//! touches a single type instead of wiring `rlayer-index`, `rlayer-stats`
//! and `rlayer-query` together itself.

mod predicate_check;
mod version;

use std::sync::Arc;

use rlayer_core::{
    Element, Error, FieldAccessor, IndexKind, InternalError, KVStore, Schema, Serializer, Subspace, Transaction,
    TransactionMode, Tuple,
};
use rlayer_evolution::ValidationResult;
use rlayer_index::{apply, check_unique, index_entries, IndexState, IndexStateStore, VectorIndex};
use rlayer_indexer::{BuildProgress, BuiltRangesStore, IndexBuildConfig, IndexBuilder};
use rlayer_query::{build_cursor, IndexLocator, Planner, Query, StatsProvider};
use rlayer_stats::{IndexStatistics, StatsStore};
use tracing::instrument;

use version::VersionStore;

/// One application record type backed by a primary-key subspace plus
/// whatever secondary indexes `schema` declares for it. Generic over the
/// caller's record type `R`; `accessor`/`serializer` are the only places
/// `R`'s shape is known, everything else here works in terms of
/// [`rlayer_core::Tuple`].
pub struct RecordStore<R> {
    kv: Arc<dyn KVStore>,
    root: Subspace,
    schema: Schema,
    record_type: String,
    accessor: Arc<dyn FieldAccessor<R>>,
    serializer: Arc<dyn Serializer<R>>,
    states: IndexStateStore,
    stats: StatsStore,
    versions: VersionStore,
    planner: Planner,
}

impl<R: Send + Sync> RecordStore<R> {
    pub fn new(
        kv: Arc<dyn KVStore>,
        root: Subspace,
        schema: Schema,
        record_type: impl Into<String>,
        accessor: Arc<dyn FieldAccessor<R>>,
        serializer: Arc<dyn Serializer<R>>,
    ) -> Self {
        let states = IndexStateStore::new(root.subspace(&[Element::str("state")]));
        let stats = StatsStore::new(root.subspace(&[Element::str("stats")]));
        let versions = VersionStore::new(root.subspace(&[Element::str("version")]));
        Self {
            kv,
            root,
            schema,
            record_type: record_type.into(),
            accessor,
            serializer,
            states,
            stats,
            versions,
            planner: Planner::new(),
        }
    }

    fn own_primary_subspace(&self) -> Subspace {
        self.root.subspace(&[Element::str("record"), Element::str(self.record_type.as_str())])
    }

    fn own_index_subspace(&self, index_name: &str) -> Subspace {
        self.root.subspace(&[Element::str("index"), Element::str(index_name)])
    }

    fn built_ranges_for(&self, index_name: &str) -> BuiltRangesStore {
        BuiltRangesStore::new(self.root.subspace(&[Element::str("built"), Element::str(index_name)]))
    }

    /// Starts a transaction against the underlying store; a thin
    /// convenience so a caller doesn't have to import `rlayer_core::KVStore`
    /// separately to drive `save`/`load`/`query`.
    pub async fn begin(&self, mode: TransactionMode) -> rlayer_core::Result<Box<dyn Transaction>> {
        self.kv.begin(mode).await
    }

    fn primary_key(&self, record: &R) -> rlayer_core::Result<Tuple> {
        let metadata = self.schema.record_type(&self.record_type)?;
        metadata
            .primary_key
            .evaluate(record, &*self.accessor)
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal(InternalError::new("primary key expression produced no tuple")))
    }

    /// Inserts or overwrites `record`, carrying its old-to-new delta to
    /// every applicable index maintainer (spec §4.3). If `expected_version`
    /// is `Some`, the write is rejected with `Error::VersionMismatch` unless
    /// it matches the version currently on file — optimistic concurrency
    /// for callers that read-modify-write across transactions.
    #[instrument(skip(self, record, txn), fields(record_type = %self.record_type))]
    pub async fn save(
        &self,
        record: &R,
        expected_version: Option<[u8; 12]>,
        txn: &dyn Transaction,
    ) -> rlayer_core::Result<()> {
        let primary_key = self.primary_key(record)?;
        let primary_subspace = self.own_primary_subspace();
        let key = primary_subspace.pack(&primary_key);

        let old_record = match txn.get(&key).await? {
            Some(bytes) => Some(self.serializer.deserialize(&bytes)?),
            None => None,
        };

        if let Some(expected) = expected_version {
            let current = self.versions.current(txn, &primary_key).await?;
            if current != Some(expected) {
                return Err(Error::VersionMismatch { expected: Some(expected), actual: current });
            }
        }

        txn.set(key, self.serializer.serialize(record))?;

        for index in self.schema.indexes_for(&self.record_type) {
            if self.states.get(txn, &index.name).await? == IndexState::Disabled {
                continue;
            }
            if let Some(old) = &old_record {
                self.maintain(txn, index, old, &primary_key, -1).await?;
            }
            self.maintain(txn, index, record, &primary_key, 1).await?;
        }

        self.versions.bump(txn, &primary_key)?;
        Ok(())
    }

    /// Removes the record at `primary_key`, retracting its contribution
    /// from every applicable index. A no-op if nothing is stored there.
    #[instrument(skip(self, txn), fields(record_type = %self.record_type))]
    pub async fn delete(&self, primary_key: &Tuple, txn: &dyn Transaction) -> rlayer_core::Result<()> {
        let key = self.own_primary_subspace().pack(primary_key);
        let Some(bytes) = txn.get(&key).await? else {
            return Ok(());
        };
        let record = self.serializer.deserialize(&bytes)?;

        for index in self.schema.indexes_for(&self.record_type) {
            if self.states.get(txn, &index.name).await? == IndexState::Disabled {
                continue;
            }
            self.maintain(txn, index, &record, primary_key, -1).await?;
        }

        txn.clear(&key)?;
        self.versions.clear(txn, primary_key)?;
        Ok(())
    }

    pub async fn load(&self, primary_key: &Tuple, txn: &dyn Transaction) -> rlayer_core::Result<Option<R>> {
        let key = self.own_primary_subspace().pack(primary_key);
        match txn.get(&key).await? {
            Some(bytes) => Ok(Some(self.serializer.deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`Self::load`], but also returns the version stamp assigned by
    /// the most recent `save` — the caller's read-side of optimistic
    /// concurrency, to pass back into a later `save`'s `expected_version`.
    pub async fn load_with_version(
        &self,
        primary_key: &Tuple,
        txn: &dyn Transaction,
    ) -> rlayer_core::Result<Option<(R, [u8; 12])>> {
        match self.load(primary_key, txn).await? {
            Some(record) => {
                let version = self.versions.current(txn, primary_key).await?.unwrap_or([0u8; 12]);
                Ok(Some((record, version)))
            }
            None => Ok(None),
        }
    }

    /// Plans and executes `query` (spec §4.8-§4.9), loading the full record
    /// behind each candidate primary key and re-checking every predicate
    /// against it — no covering indexes are implemented, so an `IndexScan`
    /// is always followed by a primary-key lookup.
    #[instrument(skip(self, query, txn), fields(record_type = %query.record_type))]
    pub async fn query(&self, query: &Query, txn: &dyn Transaction) -> rlayer_core::Result<Vec<R>> {
        let stats = BoundStats { store: &self.stats, txn };
        let plan = self.planner.plan(query, &self.schema, self, &stats).await?;
        let mut cursor = build_cursor(&plan, &self.schema, self)?;

        let mut results = Vec::new();
        while let Some(primary_key) = cursor.next(txn).await? {
            let Some(record) = self.load(&primary_key, txn).await? else {
                continue;
            };
            if query.predicates.iter().all(|p| predicate_check::matches(p, &record, &*self.accessor)) {
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Backfills `index_name` across every existing record of this store's
    /// type, driving it from `Disabled` through to `Readable` (spec §4.10).
    pub async fn build_index(&self, index_name: &str, config: IndexBuildConfig) -> rlayer_core::Result<()> {
        let builder = IndexBuilder::new(self.accessor.clone(), self.serializer.clone(), config);
        let primary_subspace = self.own_primary_subspace();
        let index_subspace = self.own_index_subspace(index_name);
        let built = self.built_ranges_for(index_name);
        builder.build(&*self.kv, &self.schema, index_name, &primary_subspace, &index_subspace, &self.states, &built).await
    }

    /// Progress of a build in flight (or paused) for `index_name`.
    pub async fn build_progress(&self, index_name: &str, txn: &dyn Transaction) -> rlayer_core::Result<BuildProgress> {
        let builder: IndexBuilder<R> =
            IndexBuilder::new(self.accessor.clone(), self.serializer.clone(), IndexBuildConfig::default());
        let primary_subspace = self.own_primary_subspace();
        let built = self.built_ranges_for(index_name);
        builder.progress(txn, &primary_subspace, &built).await
    }

    /// Checks whether `new_schema` can safely replace this store's current
    /// schema without desynchronizing persisted data (spec §4.11).
    pub fn validate_evolution(&self, new_schema: &Schema, allow_index_rebuilds: bool) -> ValidationResult {
        rlayer_evolution::validate(&self.schema, new_schema, allow_index_rebuilds)
    }

    /// Validates `new_schema` and, if it passes, adopts it — driving every
    /// index whose kind or key expression changed through the
    /// administrative `Readable -> WriteOnly` rebuild and a fresh backfill
    /// first (spec §3 Invariant 3's exception to otherwise-monotonic index
    /// state, unlocked here by `allow_index_rebuilds`). Leaves the store's
    /// schema untouched and returns the failing result if validation fails.
    #[instrument(skip(self, new_schema, config))]
    pub async fn apply_evolution(
        &mut self,
        new_schema: Schema,
        allow_index_rebuilds: bool,
        config: IndexBuildConfig,
    ) -> rlayer_core::Result<ValidationResult> {
        let result = rlayer_evolution::validate(&self.schema, &new_schema, allow_index_rebuilds);
        if !result.is_valid {
            return Ok(result);
        }
        if allow_index_rebuilds {
            for index_name in rlayer_evolution::format_changed_indexes(&self.schema, &new_schema) {
                self.rebuild_index(&index_name, &new_schema, config.clone()).await?;
            }
        }
        self.schema = new_schema;
        Ok(result)
    }

    /// Reverts `index_name` — assumed already `Readable` — to `WriteOnly`
    /// and re-backfills it from scratch under `schema`'s current definition
    /// for that index. Exposed directly, not just through
    /// [`Self::apply_evolution`], for a caller rebuilding one index without
    /// swapping the whole schema (e.g. after fixing a maintainer bug).
    pub async fn rebuild_index(
        &self,
        index_name: &str,
        schema: &Schema,
        config: IndexBuildConfig,
    ) -> rlayer_core::Result<()> {
        let builder = IndexBuilder::new(self.accessor.clone(), self.serializer.clone(), config);
        let primary_subspace = self.own_primary_subspace();
        let index_subspace = self.own_index_subspace(index_name);
        let built = self.built_ranges_for(index_name);
        builder.rebuild(&*self.kv, schema, index_name, &primary_subspace, &index_subspace, &self.states, &built).await
    }

    /// A live selectivity/cardinality snapshot for `index_name`, the same
    /// estimate the planner itself costs candidate plans with.
    pub async fn statistics(&self, index_name: &str, txn: &dyn Transaction) -> rlayer_core::Result<IndexStatistics> {
        self.stats.snapshot(txn, index_name).await
    }

    async fn maintain(
        &self,
        txn: &dyn Transaction,
        index: &rlayer_core::IndexDef,
        record: &R,
        primary_key: &Tuple,
        sign: i64,
    ) -> rlayer_core::Result<()> {
        let evaluated = index.expression.evaluate(record, &*self.accessor);
        let subspace = self.own_index_subspace(&index.name);

        match &index.kind {
            IndexKind::Vector { dimensions, m, ef_construction } => {
                let vector_index = VectorIndex::new(&subspace, *dimensions, *m, *ef_construction);
                if sign > 0 {
                    for tuple in &evaluated {
                        let vector = tuple_to_vector(tuple)?;
                        vector_index.insert(txn, primary_key, &vector).await?;
                    }
                } else {
                    vector_index.remove(txn, primary_key).await?;
                }
                Ok(())
            }
            _ => {
                let updates = index_entries(index, &subspace, primary_key, &evaluated)?;
                if sign > 0 {
                    check_unique(txn, index, &updates, primary_key).await?;
                }
                apply(txn, &updates, sign)?;
                if sign > 0 {
                    for tuple in &evaluated {
                        self.stats.observe(txn, &index.name, tuple).await?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl<R: Send + Sync> IndexLocator for RecordStore<R> {
    fn index_subspace(&self, index_name: &str) -> Subspace {
        self.own_index_subspace(index_name)
    }

    fn primary_subspace(&self, record_type: &str) -> Subspace {
        self.root.subspace(&[Element::str("record"), Element::str(record_type)])
    }
}

/// Binds a [`StatsStore`] to the transaction driving one `query` call, so
/// [`StatsProvider`]'s transaction-free signature can still read persisted
/// sketches.
struct BoundStats<'a> {
    store: &'a StatsStore,
    txn: &'a dyn Transaction,
}

#[async_trait::async_trait]
impl<'a> StatsProvider for BoundStats<'a> {
    async fn statistics(&self, index_name: &str) -> rlayer_core::Result<IndexStatistics> {
        self.store.snapshot(self.txn, index_name).await
    }
}

fn tuple_to_vector(tuple: &Tuple) -> rlayer_core::Result<Vec<f64>> {
    tuple
        .iter()
        .map(|e| match e {
            Element::Float(f) => Ok(f.0),
            Element::Int(i) => Ok(*i as f64),
            other => Err(Error::Internal(InternalError::new(format!(
                "vector index field must evaluate to numeric coordinates, found {other:?}"
            )))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rlayer_core::{BoundaryKind, FieldPath, IndexDef, KeyExpression};
    use rlayer_kv::MemoryStore;
    use rlayer_query::Predicate;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Person {
        id: i64,
        city: String,
    }

    struct PersonAccessor;
    impl FieldAccessor<Person> for PersonAccessor {
        fn extract(&self, record: &Person, path: &FieldPath) -> Vec<Tuple> {
            match path.to_string().as_str() {
                "id" => vec![vec![Element::Int(record.id)]],
                "city" => vec![vec![Element::str(record.city.clone())]],
                _ => Vec::new(),
            }
        }
    }

    struct PersonSerializer;
    impl Serializer<Person> for PersonSerializer {
        fn serialize(&self, record: &Person) -> Vec<u8> {
            rlayer_tuple::encode(&[Element::Int(record.id), Element::str(record.city.clone())])
        }

        fn deserialize(&self, bytes: &[u8]) -> rlayer_core::Result<Person> {
            let decoded = rlayer_tuple::decode(bytes)?;
            match (&decoded[0], &decoded[1]) {
                (Element::Int(id), Element::Utf8(city)) => Ok(Person { id: *id, city: city.clone() }),
                _ => Err(Error::Internal(InternalError::new("corrupt person record"))),
            }
        }
    }

    fn schema_with_by_city() -> Schema {
        let mut schema = Schema::new();
        schema.declare_record_type("person", KeyExpression::field("id"));
        schema
            .register_index(IndexDef {
                name: "by_city".into(),
                kind: IndexKind::Value,
                expression: KeyExpression::field("city"),
                record_types: Some(vec!["person".into()]),
                unique: false,
                range_metadata: None,
            })
            .unwrap();
        schema
    }

    fn store(schema: Schema) -> RecordStore<Person> {
        let kv: Arc<dyn KVStore> = Arc::new(MemoryStore::new());
        RecordStore::new(kv, Subspace::from("app"), schema, "person", Arc::new(PersonAccessor), Arc::new(PersonSerializer))
    }

    async fn enable_all_indexes(store: &RecordStore<Person>) {
        for index in store.schema.indexes_for("person") {
            let txn = store.begin(TransactionMode::Command).await.unwrap();
            store.states.transition(&*txn, &index.name, IndexState::Disabled, IndexState::WriteOnly).await.unwrap();
            txn.commit().await.unwrap();
            let txn = store.begin(TransactionMode::Command).await.unwrap();
            store.states.transition(&*txn, &index.name, IndexState::WriteOnly, IndexState::Readable).await.unwrap();
            txn.commit().await.unwrap();
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = store(schema_with_by_city());
        let record = Person { id: 1, city: "Rio".into() };

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        store.save(&record, None, &*txn).await.unwrap();
        txn.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let loaded = store.load(&vec![Element::Int(1)], &*read).await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn version_mismatch_rejects_stale_write() {
        let store = store(schema_with_by_city());
        let record = Person { id: 1, city: "Rio".into() };

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        store.save(&record, None, &*txn).await.unwrap();
        txn.commit().await.unwrap();

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        let stale = [0u8; 12];
        let err = store.save(&record, Some(stale), &*txn).await.unwrap_err();
        assert!(matches!(err, Error::VersionMismatch { .. }));
    }

    #[tokio::test]
    async fn version_mismatch_accepts_the_current_version() {
        let store = store(schema_with_by_city());
        let record = Person { id: 1, city: "Rio".into() };
        let pk = vec![Element::Int(1)];

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        store.save(&record, None, &*txn).await.unwrap();
        txn.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let (_, version) = store.load_with_version(&pk, &*read).await.unwrap().unwrap();

        let updated = Person { id: 1, city: "Oslo".into() };
        let txn = store.begin(TransactionMode::Command).await.unwrap();
        store.save(&updated, Some(version), &*txn).await.unwrap();
        txn.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        assert_eq!(store.load(&pk, &*read).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn delete_removes_record_and_retracts_index_entries() {
        let store = store(schema_with_by_city());
        enable_all_indexes(&store).await;
        let record = Person { id: 1, city: "Rio".into() };
        let pk = vec![Element::Int(1)];

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        store.save(&record, None, &*txn).await.unwrap();
        txn.commit().await.unwrap();

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        store.delete(&pk, &*txn).await.unwrap();
        txn.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        assert_eq!(store.load(&pk, &*read).await.unwrap(), None);

        let index_subspace = store.own_index_subspace("by_city");
        let (start, end) = index_subspace.range();
        let rows = read.get_range(&rlayer_core::KeyRange::new(start, end), None).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn save_moving_city_retracts_old_index_entry_and_adds_new_one() {
        let store = store(schema_with_by_city());
        enable_all_indexes(&store).await;

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        store.save(&Person { id: 1, city: "Rio".into() }, None, &*txn).await.unwrap();
        txn.commit().await.unwrap();

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        store.save(&Person { id: 1, city: "Oslo".into() }, None, &*txn).await.unwrap();
        txn.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let query = Query::new("person").filter(Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Rio") });
        assert!(store.query(&query, &*read).await.unwrap().is_empty());

        let query = Query::new("person").filter(Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Oslo") });
        assert_eq!(store.query(&query, &*read).await.unwrap(), vec![Person { id: 1, city: "Oslo".into() }]);
    }

    #[tokio::test]
    async fn query_uses_index_and_recheck_to_find_matching_records() {
        let store = store(schema_with_by_city());
        enable_all_indexes(&store).await;

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        store.save(&Person { id: 1, city: "Rio".into() }, None, &*txn).await.unwrap();
        store.save(&Person { id: 2, city: "Oslo".into() }, None, &*txn).await.unwrap();
        store.save(&Person { id: 3, city: "Rio".into() }, None, &*txn).await.unwrap();
        txn.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let query = Query::new("person").filter(Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Rio") });
        let mut results = store.query(&query, &*read).await.unwrap();
        results.sort_by_key(|p| p.id);
        assert_eq!(results, vec![Person { id: 1, city: "Rio".into() }, Person { id: 3, city: "Rio".into() }]);
    }

    #[tokio::test]
    async fn disabled_index_is_skipped_during_maintenance() {
        let store = store(schema_with_by_city());
        let record = Person { id: 1, city: "Rio".into() };

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        store.save(&record, None, &*txn).await.unwrap();
        txn.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let index_subspace = store.own_index_subspace("by_city");
        let (start, end) = index_subspace.range();
        let rows = read.get_range(&rlayer_core::KeyRange::new(start, end), None).await.unwrap();
        assert!(rows.is_empty(), "a disabled index must not be written to");
    }

    #[tokio::test]
    async fn schema_evolution_is_reachable_from_the_store() {
        let store = store(schema_with_by_city());
        let mut narrower = Schema::new();
        narrower.declare_record_type("person", KeyExpression::field("id"));
        let result = store.validate_evolution(&narrower, false);
        assert!(!result.is_valid);
    }

    #[test]
    fn boundary_kind_is_reexported_for_range_predicates() {
        let _ = BoundaryKind::HalfOpen;
    }

    #[tokio::test]
    async fn apply_evolution_rebuilds_a_readable_index_on_accepted_format_change() {
        let mut store = store(schema_with_by_city());
        enable_all_indexes(&store).await;

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        store.save(&Person { id: 1, city: "Rio".into() }, None, &*txn).await.unwrap();
        txn.commit().await.unwrap();

        let mut changed = schema_with_by_city();
        changed.indexes.get_mut("by_city").unwrap().kind = IndexKind::Rank;

        let result = store
            .apply_evolution(
                changed,
                true,
                IndexBuildConfig { throttle_delay: std::time::Duration::from_millis(0), ..Default::default() },
            )
            .await
            .unwrap();
        assert!(result.is_valid);

        let read = store.begin(TransactionMode::Query).await.unwrap();
        assert_eq!(store.states.get(&*read, "by_city").await.unwrap(), IndexState::Readable);
        assert_eq!(store.schema.index("by_city").unwrap().kind, IndexKind::Rank);
    }

    #[tokio::test]
    async fn apply_evolution_rejects_format_change_without_allow_rebuilds() {
        let mut store = store(schema_with_by_city());
        let mut changed = schema_with_by_city();
        changed.indexes.get_mut("by_city").unwrap().kind = IndexKind::Rank;

        let result = store.apply_evolution(changed, false, IndexBuildConfig::default()).await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(store.schema.index("by_city").unwrap().kind, IndexKind::Value);
    }
}
