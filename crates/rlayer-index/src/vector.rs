//! A single-layer simplification of hierarchical navigable small world
//! graphs (spec §4.4's `vector` index kind). Real HNSW layers nodes across
//! multiple levels to get logarithmic search; this keeps one flat graph and
//! relies on `ef_construction`/`m` alone to bound neighbor-list quality,
//! which is enough to serve nearest-neighbor queries correctly but degrades
//! to roughly linear search on a graph with many disconnected regions.
//! Noted as a reduced-fidelity substitute in `DESIGN.md`.

use std::collections::HashSet;

use rlayer_core::{Element, Error, InternalError, Result, Subspace, Transaction, Tuple};
use tracing::instrument;

pub struct VectorIndex {
    vectors: Subspace,
    graph: Subspace,
    entry_point: Vec<u8>,
    dimensions: usize,
    m: usize,
    ef_construction: usize,
}

impl VectorIndex {
    pub fn new(base: &Subspace, dimensions: usize, m: usize, ef_construction: usize) -> Self {
        Self {
            vectors: base.subspace(&[Element::str("vectors")]),
            graph: base.subspace(&[Element::str("graph")]),
            entry_point: base.pack(&[Element::str("entry")]),
            dimensions,
            m,
            ef_construction,
        }
    }

    fn validate(&self, vector: &[f64]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::DimensionMismatch { expected: self.dimensions, actual: vector.len() });
        }
        Ok(())
    }

    fn encode_vector(vector: &[f64]) -> Vec<u8> {
        rlayer_tuple::encode(&vector.iter().map(|&v| Element::float(v)).collect::<Vec<_>>())
    }

    fn decode_vector(bytes: &[u8]) -> Result<Vec<f64>> {
        rlayer_tuple::decode(bytes)?
            .into_iter()
            .map(|e| match e {
                Element::Float(f) => Ok(f.0),
                other => Err(Error::Internal(InternalError::new(format!(
                    "corrupt vector index entry, expected float, found {other:?}"
                )))),
            })
            .collect()
    }

    fn encode_neighbors(neighbors: &[Tuple]) -> Vec<u8> {
        rlayer_tuple::encode(&[Element::Tuple(neighbors.iter().cloned().map(Element::Tuple).collect())])
    }

    fn decode_neighbors(bytes: &[u8]) -> Result<Vec<Tuple>> {
        let decoded = rlayer_tuple::decode(bytes)?;
        match decoded.into_iter().next() {
            Some(Element::Tuple(inner)) => inner
                .into_iter()
                .map(|e| match e {
                    Element::Tuple(t) => Ok(t),
                    other => Err(Error::Internal(InternalError::new(format!(
                        "corrupt vector index neighbor list entry {other:?}"
                    )))),
                })
                .collect(),
            _ => Err(Error::Internal(InternalError::new("corrupt vector index neighbor list"))),
        }
    }

    async fn neighbors_of(&self, txn: &dyn Transaction, node: &Tuple) -> Result<Vec<Tuple>> {
        match txn.get(&self.graph.pack(node)).await? {
            Some(bytes) => Self::decode_neighbors(&bytes),
            None => Ok(Vec::new()),
        }
    }

    async fn vector_of(&self, txn: &dyn Transaction, node: &Tuple) -> Result<Option<Vec<f64>>> {
        match txn.get(&self.vectors.pack(node)).await? {
            Some(bytes) => Ok(Some(Self::decode_vector(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn all_nodes(&self, txn: &dyn Transaction) -> Result<Vec<Tuple>> {
        let (start, end) = self.vectors.range();
        let pairs = txn.get_range(&rlayer_core::KeyRange::new(start, end), None).await?;
        pairs.into_iter().map(|(k, _)| self.vectors.unpack(&k).map_err(Error::from)).collect()
    }

    /// Inserts or updates `primary_key`'s vector, connecting it to its `m`
    /// closest neighbors among an `ef_construction`-sized candidate pool
    /// gathered from a greedy walk starting at the current entry point.
    #[instrument(skip(self, txn, vector))]
    pub async fn insert(&self, txn: &dyn Transaction, primary_key: &Tuple, vector: &[f64]) -> Result<()> {
        self.validate(vector)?;
        txn.set(self.vectors.pack(primary_key), Self::encode_vector(vector))?;

        let entry: Option<Tuple> = match txn.get(&self.entry_point).await? {
            Some(bytes) => Some(rlayer_tuple::decode(&bytes)?),
            None => None,
        };

        let Some(entry) = entry else {
            txn.set(self.entry_point.clone(), rlayer_tuple::encode(primary_key))?;
            txn.set(self.graph.pack(primary_key), Self::encode_neighbors(&[]))?;
            return Ok(());
        };

        let candidates = self.greedy_search(txn, vector, &entry, self.ef_construction).await?;
        let chosen: Vec<Tuple> = candidates.into_iter().take(self.m).map(|(_, node)| node).collect();

        for neighbor in &chosen {
            let mut their_neighbors = self.neighbors_of(txn, neighbor).await?;
            their_neighbors.push(primary_key.clone());
            if their_neighbors.len() > self.m {
                self.trim_to_closest(txn, neighbor, &mut their_neighbors).await?;
            }
            txn.set(self.graph.pack(neighbor), Self::encode_neighbors(&their_neighbors))?;
        }
        txn.set(self.graph.pack(primary_key), Self::encode_neighbors(&chosen))?;
        Ok(())
    }

    async fn trim_to_closest(&self, txn: &dyn Transaction, node: &Tuple, neighbors: &mut Vec<Tuple>) -> Result<()> {
        let Some(center) = self.vector_of(txn, node).await? else { return Ok(()) };
        let mut scored = Vec::with_capacity(neighbors.len());
        for n in neighbors.drain(..) {
            if let Some(v) = self.vector_of(txn, &n).await? {
                scored.push((squared_distance(&center, &v), n));
            }
        }
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.m);
        *neighbors = scored.into_iter().map(|(_, n)| n).collect();
        Ok(())
    }

    /// Removes `primary_key` from the graph, splicing its neighbors'
    /// neighbor lists to drop the reference. Reassigns the entry point to
    /// an arbitrary remaining node if the removed node was it.
    #[instrument(skip(self, txn))]
    pub async fn remove(&self, txn: &dyn Transaction, primary_key: &Tuple) -> Result<()> {
        let own_neighbors = self.neighbors_of(txn, primary_key).await?;
        txn.clear(&self.vectors.pack(primary_key))?;
        txn.clear(&self.graph.pack(primary_key))?;

        for neighbor in &own_neighbors {
            let mut their_neighbors = self.neighbors_of(txn, neighbor).await?;
            their_neighbors.retain(|n| n != primary_key);
            txn.set(self.graph.pack(neighbor), Self::encode_neighbors(&their_neighbors))?;
        }

        if let Some(bytes) = txn.get(&self.entry_point).await? {
            if rlayer_tuple::decode(&bytes)? == *primary_key {
                let remaining = self.all_nodes(txn).await?;
                match remaining.into_iter().find(|n| n != primary_key) {
                    Some(new_entry) => txn.set(self.entry_point.clone(), rlayer_tuple::encode(&new_entry))?,
                    None => txn.clear(&self.entry_point)?,
                }
            }
        }
        Ok(())
    }

    /// Returns the `k` nodes whose stored vector is closest to `query`,
    /// nearest first, via a greedy walk from the entry point.
    #[instrument(skip(self, txn, query))]
    pub async fn search(&self, txn: &dyn Transaction, query: &[f64], k: usize) -> Result<Vec<Tuple>> {
        self.validate(query)?;
        let Some(bytes) = txn.get(&self.entry_point).await? else { return Ok(Vec::new()) };
        let entry: Tuple = rlayer_tuple::decode(&bytes)?;
        let candidates = self.greedy_search(txn, query, &entry, self.ef_construction.max(k)).await?;
        Ok(candidates.into_iter().take(k).map(|(_, node)| node).collect())
    }

    /// Beam search from `start`: repeatedly expands the closest unvisited
    /// frontier node's neighbors until no closer candidate is found or
    /// `beam_width` nodes have been visited, returning candidates sorted by
    /// ascending squared distance to `query`.
    async fn greedy_search(
        &self,
        txn: &dyn Transaction,
        query: &[f64],
        start: &Tuple,
        beam_width: usize,
    ) -> Result<Vec<(f64, Tuple)>> {
        let mut visited = HashSet::new();
        let mut best: Vec<(f64, Tuple)> = Vec::new();
        let mut frontier: Vec<(f64, Tuple)> = Vec::new();

        if let Some(v) = self.vector_of(txn, start).await? {
            frontier.push((squared_distance(query, &v), start.clone()));
        }

        while let Some((dist, node)) = pop_closest(&mut frontier) {
            if !visited.insert(node.clone()) {
                continue;
            }
            best.push((dist, node.clone()));
            if visited.len() >= beam_width {
                break;
            }
            for neighbor in self.neighbors_of(txn, &node).await? {
                if visited.contains(&neighbor) {
                    continue;
                }
                if let Some(v) = self.vector_of(txn, &neighbor).await? {
                    frontier.push((squared_distance(query, &v), neighbor));
                }
            }
        }

        best.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(best)
    }
}

fn pop_closest(frontier: &mut Vec<(f64, Tuple)>) -> Option<(f64, Tuple)> {
    if frontier.is_empty() {
        return None;
    }
    let mut min_idx = 0;
    for i in 1..frontier.len() {
        if frontier[i].0 < frontier[min_idx].0 {
            min_idx = i;
        }
    }
    Some(frontier.remove(min_idx))
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlayer_core::{KVStore, TransactionMode};
    use rlayer_kv::MemoryStore;

    fn pk(i: i64) -> Tuple {
        vec![Element::Int(i)]
    }

    #[tokio::test]
    async fn search_returns_nearest_neighbors_in_distance_order() {
        let store = MemoryStore::new();
        let txn = store.begin(TransactionMode::Command).await.unwrap();
        let index = VectorIndex::new(&Subspace::from("vec"), 2, 4, 8);

        index.insert(&*txn, &pk(1), &[0.0, 0.0]).await.unwrap();
        index.insert(&*txn, &pk(2), &[1.0, 0.0]).await.unwrap();
        index.insert(&*txn, &pk(3), &[10.0, 10.0]).await.unwrap();

        let results = index.search(&*txn, &[0.1, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], pk(1));
        assert_eq!(results[1], pk(2));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = MemoryStore::new();
        let txn = store.begin(TransactionMode::Command).await.unwrap();
        let index = VectorIndex::new(&Subspace::from("vec"), 3, 4, 8);
        let err = index.insert(&*txn, &pk(1), &[0.0, 0.0]).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn remove_reassigns_entry_point_and_prunes_neighbor_lists() {
        let store = MemoryStore::new();
        let txn = store.begin(TransactionMode::Command).await.unwrap();
        let index = VectorIndex::new(&Subspace::from("vec"), 1, 4, 8);
        index.insert(&*txn, &pk(1), &[0.0]).await.unwrap();
        index.insert(&*txn, &pk(2), &[1.0]).await.unwrap();
        index.remove(&*txn, &pk(1)).await.unwrap();

        let results = index.search(&*txn, &[0.0], 5).await.unwrap();
        assert_eq!(results, vec![pk(2)]);
    }

    /// Approximate search only earns its keep if it actually finds most of
    /// the true nearest neighbors. Inserts a few hundred random vectors,
    /// then for a batch of query points compares `search`'s top-10 against
    /// an exhaustive brute-force scan of the same data and asserts recall
    /// stays high — this single flat graph has no layering to fall back on,
    /// so a regression in `greedy_search`'s beam width or neighbor
    /// selection shows up directly as a recall drop rather than a crash.
    #[tokio::test]
    async fn recall_at_10_is_high_against_brute_force() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        const DIMENSIONS: usize = 8;
        const CORPUS_SIZE: usize = 300;
        const QUERY_COUNT: usize = 20;
        const K: usize = 10;

        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        let random_vector = |rng: &mut StdRng| -> Vec<f64> {
            (0..DIMENSIONS).map(|_| rng.gen_range(-1.0..1.0)).collect()
        };

        let store = MemoryStore::new();
        let txn = store.begin(TransactionMode::Command).await.unwrap();
        let index = VectorIndex::new(&Subspace::from("vec"), DIMENSIONS, 16, 64);

        let mut corpus: Vec<(Tuple, Vec<f64>)> = Vec::with_capacity(CORPUS_SIZE);
        for i in 0..CORPUS_SIZE as i64 {
            let vector = random_vector(&mut rng);
            index.insert(&*txn, &pk(i), &vector).await.unwrap();
            corpus.push((pk(i), vector));
        }

        let mut total_recall = 0.0;
        for _ in 0..QUERY_COUNT {
            let query = random_vector(&mut rng);

            let mut exact: Vec<(f64, Tuple)> =
                corpus.iter().map(|(node, v)| (squared_distance(&query, v), node.clone())).collect();
            exact.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            let exact_top_k: HashSet<Tuple> = exact.into_iter().take(K).map(|(_, n)| n).collect();

            let approx = index.search(&*txn, &query, K).await.unwrap();
            let hits = approx.iter().filter(|n| exact_top_k.contains(*n)).count();
            total_recall += hits as f64 / K as f64;
        }

        let mean_recall = total_recall / QUERY_COUNT as f64;
        assert!(mean_recall >= 0.8, "mean recall@{K} over {QUERY_COUNT} queries was {mean_recall}, expected >= 0.8");
    }
}
