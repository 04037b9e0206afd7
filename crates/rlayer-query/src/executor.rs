use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use rlayer_core::{Error, IndexKind, InternalError, KeyRange, Result, Schema, Transaction, Tuple};
use rlayer_index::VectorIndex;

use crate::plan::PlanNode;
use crate::planner::IndexLocator;

/// Pages pulled per `get_range` call while draining a scan cursor. A
/// documented simplification alongside `Transaction::get_range` itself
/// being eagerly materialized: true streaming is approximated by
/// re-issuing bounded range calls rather than holding an open iterator.
const PAGE_SIZE: usize = 256;

/// One primary-key tuple at a time, read against a transaction supplied
/// per call rather than stored on construction — this keeps a tree of
/// boxed cursors (`Intersection`/`Union`/`Filter`/`Sort` wrapping
/// arbitrary children) object-safe without threading a lifetime parameter
/// through every cursor type (spec §4.9, generalized from its "cursor
/// holds the transaction" framing; see `DESIGN.md`).
#[async_trait]
pub trait PlanCursor: Send {
    async fn next(&mut self, txn: &dyn Transaction) -> Result<Option<Tuple>>;
}

/// Builds a running cursor tree out of a [`PlanNode`] tree. Vector-index
/// scans need the index's stored configuration (dimensions/m/ef), which
/// isn't carried on the plan node itself, so this takes the schema and the
/// locator the planner used to resolve subspaces.
pub fn build_cursor(plan: &PlanNode, schema: &Schema, locator: &dyn IndexLocator) -> Result<Box<dyn PlanCursor>> {
    Ok(match plan {
        PlanNode::FullScan { subspace } => {
            let (start, end) = subspace.range();
            Box::new(ScanCursor::new(
                KeyRange::new(start, end),
                ScanDecode::SplitKey { subspace: subspace.clone(), key_arity: 0 },
            ))
        }
        PlanNode::IndexScan { subspace, range, key_arity, unique, .. } => Box::new(ScanCursor::new(
            range.clone(),
            if *unique { ScanDecode::UniqueValue } else { ScanDecode::SplitKey { subspace: subspace.clone(), key_arity: *key_arity } },
        )),
        PlanNode::VectorTopK { index_name, query, k } => {
            let index = schema.index(index_name)?;
            let (dimensions, m, ef_construction) = match &index.kind {
                IndexKind::Vector { dimensions, m, ef_construction } => (*dimensions, *m, *ef_construction),
                other => {
                    return Err(Error::Internal(
                        InternalError::new(format!("index `{index_name}` is not a vector index, got {other:?}"))
                            .with_index(index_name.clone()),
                    ))
                }
            };
            let subspace = locator.index_subspace(index_name);
            let vector_index = VectorIndex::new(&subspace, dimensions, m, ef_construction);
            Box::new(VectorTopKCursor { vector_index, query: query.clone(), k: *k, results: None, position: 0 })
        }
        PlanNode::Intersection(children) => {
            let children = children.iter().map(|c| build_cursor(c, schema, locator)).collect::<Result<Vec<_>>>()?;
            Box::new(SetCombineCursor { children, combine: SetCombine::Intersection, drained: None, position: 0 })
        }
        PlanNode::Union(children) => {
            let children = children.iter().map(|c| build_cursor(c, schema, locator)).collect::<Result<Vec<_>>>()?;
            Box::new(SetCombineCursor { children, combine: SetCombine::Union, drained: None, position: 0 })
        }
        PlanNode::Filter { child, description: _ } => {
            Box::new(PassthroughCursor { child: build_cursor(child, schema, locator)? })
        }
        PlanNode::Sort { child } => {
            Box::new(SortCursor { child: build_cursor(child, schema, locator)?, sorted: None, position: 0 })
        }
        PlanNode::Limit { child, limit } => {
            Box::new(LimitCursor { child: build_cursor(child, schema, locator)?, remaining: *limit })
        }
    })
}

/// How to turn one scanned key/value pair into a primary-key tuple.
enum ScanDecode {
    /// A unique index: the primary key was written as the value, not
    /// appended to the key (so two records can't collide on the unique
    /// key's bytes at all).
    UniqueValue,
    /// A full table scan (`key_arity == 0`, the whole tuple is the primary
    /// key) or a non-unique index scan (`key_arity > 0`, the primary key is
    /// appended after the index's own leading tuple elements).
    SplitKey { subspace: rlayer_core::Subspace, key_arity: usize },
}

/// Paginates a single `[start, end)` byte range via successive bounded
/// `get_range` calls, decoding each row into a primary-key tuple as it's
/// produced. Backs both `FullScan` and `IndexScan`.
struct ScanCursor {
    range: KeyRange,
    decode: ScanDecode,
    buffer: VecDeque<Tuple>,
    exhausted: bool,
}

impl ScanCursor {
    fn new(range: KeyRange, decode: ScanDecode) -> Self {
        Self { range, decode, buffer: VecDeque::new(), exhausted: false }
    }

    async fn fill(&mut self, txn: &dyn Transaction) -> Result<()> {
        if self.exhausted || !self.buffer.is_empty() {
            return Ok(());
        }
        let page = txn.get_range(&self.range, Some(PAGE_SIZE)).await?;
        if page.is_empty() {
            self.exhausted = true;
            return Ok(());
        }
        if page.len() < PAGE_SIZE {
            self.exhausted = true;
        } else if let Some((last_key, _)) = page.last() {
            self.range.start = key_after(last_key);
        }
        for (key, value) in &page {
            let tuple = match &self.decode {
                ScanDecode::UniqueValue => rlayer_tuple::decode(value)?,
                ScanDecode::SplitKey { subspace, key_arity } => {
                    let full = subspace.unpack(key)?;
                    full.into_iter().skip(*key_arity).collect()
                }
            };
            self.buffer.push_back(tuple);
        }
        Ok(())
    }
}

fn key_after(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0x00);
    next
}

#[async_trait]
impl PlanCursor for ScanCursor {
    async fn next(&mut self, txn: &dyn Transaction) -> Result<Option<Tuple>> {
        loop {
            if let Some(t) = self.buffer.pop_front() {
                return Ok(Some(t));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fill(txn).await?;
        }
    }
}

enum SetCombine {
    Intersection,
    Union,
}

/// Drains every child cursor fully into a `HashSet<Tuple>` and combines
/// them, rather than a streaming merge-join: different index scans yield
/// primary keys ordered by their own index's key, not by primary key, so
/// there's no shared order to merge on without an extra sort. A documented
/// pragmatic simplification given the `get_range`-materializes-to-`Vec`
/// simplification already made one layer down (see `DESIGN.md`).
struct SetCombineCursor {
    children: Vec<Box<dyn PlanCursor>>,
    combine: SetCombine,
    drained: Option<Vec<Tuple>>,
    position: usize,
}

#[async_trait]
impl PlanCursor for SetCombineCursor {
    async fn next(&mut self, txn: &dyn Transaction) -> Result<Option<Tuple>> {
        if self.drained.is_none() {
            let mut sets: Vec<HashSet<Tuple>> = Vec::with_capacity(self.children.len());
            for child in &mut self.children {
                let mut set = HashSet::new();
                while let Some(t) = child.next(txn).await? {
                    set.insert(t);
                }
                sets.push(set);
            }
            let combined: Vec<Tuple> = match self.combine {
                SetCombine::Intersection => {
                    let mut iter = sets.into_iter();
                    let first = iter.next().unwrap_or_default();
                    iter.fold(first, |acc, s| acc.intersection(&s).cloned().collect()).into_iter().collect()
                }
                SetCombine::Union => {
                    let mut union = HashSet::new();
                    for s in sets {
                        union.extend(s);
                    }
                    union.into_iter().collect()
                }
            };
            self.drained = Some(combined);
        }
        let drained = self.drained.as_ref().unwrap();
        if self.position >= drained.len() {
            return Ok(None);
        }
        let item = drained[self.position].clone();
        self.position += 1;
        Ok(Some(item))
    }
}

/// `Filter`'s index/tuple-level residual check is a no-op here: it only
/// has the primary-key tuple, not the deserialized record, so it can't
/// evaluate the residual predicate itself. The `description` it carries
/// documents what's left to check; actually re-checking it against a
/// deserialized record is the facade crate's job, since only the facade
/// holds the caller's `Serializer`.
struct PassthroughCursor {
    child: Box<dyn PlanCursor>,
}

#[async_trait]
impl PlanCursor for PassthroughCursor {
    async fn next(&mut self, txn: &dyn Transaction) -> Result<Option<Tuple>> {
        self.child.next(txn).await
    }
}

struct SortCursor {
    child: Box<dyn PlanCursor>,
    sorted: Option<Vec<Tuple>>,
    position: usize,
}

#[async_trait]
impl PlanCursor for SortCursor {
    async fn next(&mut self, txn: &dyn Transaction) -> Result<Option<Tuple>> {
        if self.sorted.is_none() {
            let mut all = Vec::new();
            while let Some(t) = self.child.next(txn).await? {
                all.push(t);
            }
            all.sort();
            self.sorted = Some(all);
        }
        let sorted = self.sorted.as_ref().unwrap();
        if self.position >= sorted.len() {
            return Ok(None);
        }
        let item = sorted[self.position].clone();
        self.position += 1;
        Ok(Some(item))
    }
}

struct LimitCursor {
    child: Box<dyn PlanCursor>,
    remaining: usize,
}

#[async_trait]
impl PlanCursor for LimitCursor {
    async fn next(&mut self, txn: &dyn Transaction) -> Result<Option<Tuple>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let next = self.child.next(txn).await?;
        if next.is_some() {
            self.remaining -= 1;
        }
        Ok(next)
    }
}

struct VectorTopKCursor {
    vector_index: VectorIndex,
    query: Vec<f64>,
    k: usize,
    results: Option<Vec<Tuple>>,
    position: usize,
}

#[async_trait]
impl PlanCursor for VectorTopKCursor {
    async fn next(&mut self, txn: &dyn Transaction) -> Result<Option<Tuple>> {
        if self.results.is_none() {
            self.results = Some(self.vector_index.search(txn, &self.query, self.k).await?);
        }
        let results = self.results.as_ref().unwrap();
        if self.position >= results.len() {
            return Ok(None);
        }
        let item = results[self.position].clone();
        self.position += 1;
        Ok(Some(item))
    }
}

#[cfg(test)]
mod tests {
    use rlayer_core::{Element, KVStore, Subspace, TransactionMode};
    use rlayer_kv::MemoryStore;

    use super::*;
    use crate::planner::IndexLocator;

    struct FixedLocator(Subspace);
    impl IndexLocator for FixedLocator {
        fn index_subspace(&self, _index_name: &str) -> Subspace {
            self.0.clone()
        }
        fn primary_subspace(&self, _record_type: &str) -> Subspace {
            self.0.clone()
        }
    }

    async fn drain(cursor: &mut dyn PlanCursor, txn: &dyn Transaction) -> Vec<Tuple> {
        let mut out = Vec::new();
        while let Some(t) = cursor.next(txn).await.unwrap() {
            out.push(t);
        }
        out
    }

    #[tokio::test]
    async fn full_scan_cursor_yields_every_primary_key_in_the_subspace() {
        let subspace = Subspace::from("pk");
        let store = MemoryStore::new();
        let write = store.begin(TransactionMode::Command).await.unwrap();
        for i in 0..3 {
            write.set(subspace.pack(&[Element::Int(i)]), Vec::new()).unwrap();
        }
        write.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let mut cursor =
            build_cursor(&PlanNode::FullScan { subspace: subspace.clone() }, &Schema::new(), &FixedLocator(subspace))
                .unwrap();
        let mut results = drain(&mut *cursor, &*read).await;
        results.sort();
        assert_eq!(results, vec![vec![Element::Int(0)], vec![Element::Int(1)], vec![Element::Int(2)]]);
    }

    #[tokio::test]
    async fn index_scan_cursor_splits_primary_key_from_non_unique_index_key() {
        let subspace = Subspace::from("idx");
        let store = MemoryStore::new();
        let write = store.begin(TransactionMode::Command).await.unwrap();
        write.set(subspace.pack(&[Element::str("Rio"), Element::Int(1)]), Vec::new()).unwrap();
        write.set(subspace.pack(&[Element::str("Rio"), Element::Int(2)]), Vec::new()).unwrap();
        write.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let (start, end) = subspace.range_for(&[Element::str("Rio")]);
        let plan = PlanNode::IndexScan {
            index_name: "by_city".into(),
            subspace: subspace.clone(),
            range: KeyRange::new(start, end),
            key_arity: 1,
            unique: false,
        };
        let mut cursor = build_cursor(&plan, &Schema::new(), &FixedLocator(subspace)).unwrap();
        let mut results = drain(&mut *cursor, &*read).await;
        results.sort();
        assert_eq!(results, vec![vec![Element::Int(1)], vec![Element::Int(2)]]);
    }

    #[tokio::test]
    async fn intersection_cursor_returns_only_shared_primary_keys() {
        let left = Subspace::from("left");
        let right = Subspace::from("right");
        let store = MemoryStore::new();
        let write = store.begin(TransactionMode::Command).await.unwrap();
        write.set(left.pack(&[Element::Int(1)]), Vec::new()).unwrap();
        write.set(left.pack(&[Element::Int(2)]), Vec::new()).unwrap();
        write.set(right.pack(&[Element::Int(2)]), Vec::new()).unwrap();
        write.set(right.pack(&[Element::Int(3)]), Vec::new()).unwrap();
        write.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let plan = PlanNode::Intersection(vec![
            PlanNode::FullScan { subspace: left.clone() },
            PlanNode::FullScan { subspace: right.clone() },
        ]);
        let mut cursor = build_cursor(&plan, &Schema::new(), &FixedLocator(left)).unwrap();
        let results = drain(&mut *cursor, &*read).await;
        assert_eq!(results, vec![vec![Element::Int(2)]]);
    }

    #[tokio::test]
    async fn limit_cursor_stops_after_n_results() {
        let subspace = Subspace::from("pk");
        let store = MemoryStore::new();
        let write = store.begin(TransactionMode::Command).await.unwrap();
        for i in 0..5 {
            write.set(subspace.pack(&[Element::Int(i)]), Vec::new()).unwrap();
        }
        write.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let plan =
            PlanNode::Limit { child: Box::new(PlanNode::FullScan { subspace: subspace.clone() }), limit: 2 };
        let mut cursor = build_cursor(&plan, &Schema::new(), &FixedLocator(subspace)).unwrap();
        let results = drain(&mut *cursor, &*read).await;
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn sort_cursor_orders_by_element_ord() {
        let subspace = Subspace::from("pk");
        let store = MemoryStore::new();
        let write = store.begin(TransactionMode::Command).await.unwrap();
        write.set(subspace.pack(&[Element::Int(3)]), Vec::new()).unwrap();
        write.set(subspace.pack(&[Element::Int(1)]), Vec::new()).unwrap();
        write.set(subspace.pack(&[Element::Int(2)]), Vec::new()).unwrap();
        write.commit().await.unwrap();

        let read = store.begin(TransactionMode::Query).await.unwrap();
        let plan = PlanNode::Sort { child: Box::new(PlanNode::FullScan { subspace: subspace.clone() }) };
        let mut cursor = build_cursor(&plan, &Schema::new(), &FixedLocator(subspace)).unwrap();
        let results = drain(&mut *cursor, &*read).await;
        assert_eq!(results, vec![vec![Element::Int(1)], vec![Element::Int(2)], vec![Element::Int(3)]]);
    }
}
