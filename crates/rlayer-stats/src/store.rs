use rlayer_core::{Element, Error, InternalError, Result, Subspace, Transaction};
use tracing::instrument;

use crate::{HyperLogLog, IndexStatsCollector, IndexStatistics, ReservoirSample};

/// Persists one [`IndexStatsCollector`] per index under a stats subspace,
/// so estimates survive across transactions instead of resetting on every
/// restart (spec §4.7).
pub struct StatsStore {
    subspace: Subspace,
}

impl StatsStore {
    pub fn new(subspace: Subspace) -> Self {
        Self { subspace }
    }

    fn hll_key(&self, index_name: &str) -> Vec<u8> {
        self.subspace.pack(&[Element::str(index_name), Element::str("hll")])
    }

    fn sample_key(&self, index_name: &str) -> Vec<u8> {
        self.subspace.pack(&[Element::str(index_name), Element::str("sample")])
    }

    /// Records one more observed key tuple for `index_name`, merging it
    /// into whatever sketch/sample is already persisted.
    #[instrument(skip(self, txn, key_tuple))]
    pub async fn observe(
        &self,
        txn: &dyn Transaction,
        index_name: &str,
        key_tuple: &rlayer_core::Tuple,
    ) -> Result<()> {
        let mut collector = self.load(txn, index_name).await?;
        collector.observe(key_tuple);
        self.save(txn, index_name, &collector)
    }

    #[instrument(skip(self, txn))]
    pub async fn load(&self, txn: &dyn Transaction, index_name: &str) -> Result<IndexStatsCollector> {
        let hll = match txn.get(&self.hll_key(index_name)).await? {
            Some(bytes) => HyperLogLog::deserialize(&bytes)
                .ok_or_else(|| Error::Internal(InternalError::new("corrupt hyperloglog sketch")))?,
            None => HyperLogLog::new(12),
        };

        let (reservoir, null_count, min, max) = match txn.get(&self.sample_key(index_name)).await? {
            Some(bytes) => {
                let decoded = decode_sample(&bytes)?;
                (decoded.reservoir, decoded.null_count, decoded.min, decoded.max)
            }
            None => (ReservoirSample::new(256), 0, None, None),
        };

        Ok(IndexStatsCollector::from_parts(hll, reservoir, null_count, min, max))
    }

    fn save(&self, txn: &dyn Transaction, index_name: &str, collector: &IndexStatsCollector) -> Result<()> {
        txn.set(self.hll_key(index_name), collector.hll().serialize())?;
        txn.set(self.sample_key(index_name), encode_sample(collector))?;
        Ok(())
    }

    #[instrument(skip(self, txn))]
    pub async fn snapshot(&self, txn: &dyn Transaction, index_name: &str) -> Result<IndexStatistics> {
        Ok(self.load(txn, index_name).await?.snapshot())
    }
}

fn encode_sample(collector: &IndexStatsCollector) -> Vec<u8> {
    let snapshot = collector.snapshot();
    let mut elements = vec![
        Element::Int(snapshot.records_observed as i64),
        Element::Int(snapshot.null_count as i64),
        snapshot.min.map(Element::Tuple).unwrap_or(Element::Null),
        snapshot.max.map(Element::Tuple).unwrap_or(Element::Null),
    ];
    elements.extend(snapshot.sample.into_iter().map(Element::Tuple));
    rlayer_tuple::encode(&elements)
}

/// The `(reservoir, null_count, min, max)` state [`IndexStatsCollector::from_parts`]
/// needs, decoded from what [`encode_sample`] persisted.
struct DecodedSample {
    reservoir: ReservoirSample<rlayer_core::Tuple>,
    null_count: u64,
    min: Option<rlayer_core::Tuple>,
    max: Option<rlayer_core::Tuple>,
}

fn decode_sample(bytes: &[u8]) -> Result<DecodedSample> {
    let decoded = rlayer_tuple::decode(bytes)?;
    let mut iter = decoded.into_iter();
    let seen = match iter.next() {
        Some(Element::Int(n)) => n as u64,
        _ => return Err(Error::Internal(InternalError::new("corrupt reservoir sample header"))),
    };
    let null_count = match iter.next() {
        Some(Element::Int(n)) => n as u64,
        _ => return Err(Error::Internal(InternalError::new("corrupt reservoir sample header"))),
    };
    let min = match iter.next() {
        Some(Element::Null) => None,
        Some(Element::Tuple(t)) => Some(t),
        _ => return Err(Error::Internal(InternalError::new("corrupt reservoir sample header"))),
    };
    let max = match iter.next() {
        Some(Element::Null) => None,
        Some(Element::Tuple(t)) => Some(t),
        _ => return Err(Error::Internal(InternalError::new("corrupt reservoir sample header"))),
    };
    let mut reservoir = ReservoirSample::restore(256, seen);
    for element in iter {
        match element {
            Element::Tuple(t) => reservoir.push_restored(t),
            _ => return Err(Error::Internal(InternalError::new("corrupt reservoir sample entry"))),
        }
    }
    Ok(DecodedSample { reservoir, null_count, min, max })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlayer_core::{KVStore, TransactionMode};
    use rlayer_kv::MemoryStore;

    #[tokio::test]
    async fn observations_persist_across_transactions() {
        let store = MemoryStore::new();
        let stats = StatsStore::new(Subspace::from("stats"));

        let txn = store.begin(TransactionMode::Command).await.unwrap();
        for i in 0..50i64 {
            stats.observe(&*txn, "by_city", &vec![Element::Int(i)]).await.unwrap();
        }
        txn.commit().await.unwrap();

        let txn2 = store.begin(TransactionMode::Query).await.unwrap();
        let snapshot = stats.snapshot(&*txn2, "by_city").await.unwrap();
        assert_eq!(snapshot.records_observed, 50);
        assert!(snapshot.distinct_keys_estimate > 0.0);
    }

    #[tokio::test]
    async fn unobserved_index_has_empty_snapshot() {
        let store = MemoryStore::new();
        let stats = StatsStore::new(Subspace::from("stats"));
        let txn = store.begin(TransactionMode::Query).await.unwrap();
        let snapshot = stats.snapshot(&*txn, "never_seen").await.unwrap();
        assert_eq!(snapshot.records_observed, 0);
    }
}
