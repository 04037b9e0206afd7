//! Per-index statistics (spec §4.7) the query planner's cost model
//! (`rlayer-query`) consumes to pick between candidate plans: an estimated
//! distinct-key count via [`HyperLogLog`], a uniform sample of observed key
//! tuples via [`ReservoirSample`], and the sample-derived summary
//! (min/max/null count/histogram) used to estimate how selective a given
//! predicate is likely to be.

mod hll;
mod reservoir;
mod store;

pub use hll::HyperLogLog;
pub use reservoir::ReservoirSample;
pub use store::StatsStore;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rlayer_core::{Element, Tuple};
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_PRECISION: u8 = 12;
const DEFAULT_SAMPLE_CAPACITY: usize = 256;
const HISTOGRAM_BUCKETS: usize = 8;

/// The accumulator fed one observation (one evaluated index-key tuple) per
/// record write; call [`IndexStatsCollector::snapshot`] to get the
/// point-in-time estimate the planner reads.
pub struct IndexStatsCollector {
    hll: HyperLogLog,
    reservoir: ReservoirSample<Tuple>,
    rng: StdRng,
    null_count: u64,
    min: Option<Tuple>,
    max: Option<Tuple>,
}

impl IndexStatsCollector {
    pub fn new() -> Self {
        Self::with_seed(0x5EED)
    }

    /// Deterministic constructor for tests: sampling is otherwise
    /// inherently non-reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            hll: HyperLogLog::new(DEFAULT_PRECISION),
            reservoir: ReservoirSample::new(DEFAULT_SAMPLE_CAPACITY),
            rng: StdRng::seed_from_u64(seed),
            null_count: 0,
            min: None,
            max: None,
        }
    }

    pub fn observe(&mut self, key_tuple: &Tuple) {
        self.hll.insert(&rlayer_tuple::encode(key_tuple));
        self.reservoir.observe(key_tuple.clone(), &mut self.rng);
        if key_tuple.iter().all(|e| matches!(e, Element::Null)) {
            self.null_count += 1;
        }
        if self.min.as_ref().is_none_or(|m| key_tuple < m) {
            self.min = Some(key_tuple.clone());
        }
        if self.max.as_ref().is_none_or(|m| key_tuple > m) {
            self.max = Some(key_tuple.clone());
        }
    }

    pub fn snapshot(&self) -> IndexStatistics {
        let records_observed = self.reservoir.seen();
        IndexStatistics {
            distinct_keys_estimate: self.hll.estimate(),
            records_observed,
            sample: self.reservoir.samples().to_vec(),
            null_count: self.null_count,
            min: self.min.clone(),
            max: self.max.clone(),
            histogram: build_histogram(self.reservoir.samples()),
            total_count: records_observed,
            collected_at: now_millis(),
        }
    }

    pub fn hll(&self) -> &HyperLogLog {
        &self.hll
    }

    pub fn null_count(&self) -> u64 {
        self.null_count
    }

    pub fn min(&self) -> Option<&Tuple> {
        self.min.as_ref()
    }

    pub fn max(&self) -> Option<&Tuple> {
        self.max.as_ref()
    }

    /// Reconstructs a collector from a previously persisted sketch, sample
    /// and running min/max/null-count (see [`crate::StatsStore`]); the RNG
    /// is reseeded fresh since only the accumulated state, not the seed,
    /// needs to persist.
    pub fn from_parts(
        hll: HyperLogLog,
        reservoir: ReservoirSample<Tuple>,
        null_count: u64,
        min: Option<Tuple>,
        max: Option<Tuple>,
    ) -> Self {
        Self { hll, reservoir, rng: StdRng::seed_from_u64(0x5EED), null_count, min, max }
    }
}

impl Default for IndexStatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// One equi-depth bucket of a sample-derived key-tuple histogram: how many
/// sampled tuples (and how many distinct ones) fall in `[lower, upper]`.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramBucket {
    pub lower: Tuple,
    pub upper: Tuple,
    pub count: u64,
    pub distinct_in_bucket: u64,
}

/// Splits `sample` (sorted) into up to [`HISTOGRAM_BUCKETS`] equal-size
/// chunks. Built from the reservoir sample rather than every observation,
/// same tradeoff the rest of this crate makes: approximate but bounded
/// memory regardless of how many records an index has seen.
fn build_histogram(sample: &[Tuple]) -> Vec<HistogramBucket> {
    if sample.is_empty() {
        return Vec::new();
    }
    let mut sorted = sample.to_vec();
    sorted.sort();
    let bucket_count = HISTOGRAM_BUCKETS.min(sorted.len());
    let chunk_size = sorted.len().div_ceil(bucket_count);
    sorted
        .chunks(chunk_size)
        .map(|chunk| {
            let mut distinct = chunk.to_vec();
            distinct.dedup();
            HistogramBucket {
                lower: chunk.first().expect("chunks() never yields an empty slice").clone(),
                upper: chunk.last().expect("chunks() never yields an empty slice").clone(),
                count: chunk.len() as u64,
                distinct_in_bucket: distinct.len() as u64,
            }
        })
        .collect()
}

/// Point-in-time statistics for one index, as consumed by the planner's
/// cost model.
#[derive(Clone, Debug)]
pub struct IndexStatistics {
    pub distinct_keys_estimate: f64,
    pub records_observed: u64,
    pub sample: Vec<Tuple>,
    /// Observations whose entire key tuple was `Null` (e.g. the field was
    /// absent on the record). Lets the planner discount an index whose
    /// keys are mostly null from a selectivity estimate that would
    /// otherwise treat `Null` as just another equally-likely value.
    pub null_count: u64,
    pub min: Option<Tuple>,
    pub max: Option<Tuple>,
    pub histogram: Vec<HistogramBucket>,
    /// Total observations this snapshot is built from. Equal to
    /// `records_observed` today (both count every `observe()` call); kept
    /// as its own field since the two track conceptually different things
    /// (population size vs. reservoir occupancy) and a future change to
    /// the reservoir's eviction policy could make them diverge.
    pub total_count: u64,
    /// Unix epoch milliseconds when this snapshot was taken.
    pub collected_at: u64,
}

impl IndexStatistics {
    /// The statistics of an index with no observations at all — the
    /// planner's default when a [`crate::StatsStore`] has never seen a
    /// given index name.
    pub fn empty() -> Self {
        Self {
            distinct_keys_estimate: 0.0,
            records_observed: 0,
            sample: Vec::new(),
            null_count: 0,
            min: None,
            max: None,
            histogram: Vec::new(),
            total_count: 0,
            collected_at: 0,
        }
    }

    /// Builds a minimal snapshot carrying only the two fields the cost
    /// model actually reads most often, for tests that don't need a full
    /// sample/histogram fixture.
    pub fn with_totals(distinct_keys_estimate: f64, records_observed: u64) -> Self {
        Self { distinct_keys_estimate, records_observed, total_count: records_observed, ..Self::empty() }
    }

    /// Fraction of records this index's scan is expected to touch if a
    /// query pins `matching_distinct_values` distinct key values (1 for an
    /// equality predicate, the sample-derived count of keys falling in a
    /// bound for a range predicate). Used by the planner's cost model to
    /// rank candidate plans (spec §4.8).
    pub fn selectivity(&self, matching_distinct_values: f64) -> f64 {
        if self.distinct_keys_estimate <= 0.0 {
            return 1.0;
        }
        (matching_distinct_values / self.distinct_keys_estimate).clamp(0.0, 1.0)
    }

    /// Selectivity of a range predicate `[lower, upper)`, estimated as the
    /// fraction of the reservoir sample whose tuple falls inside the bound.
    /// Falls back to a conservative `1.0` (no pruning) when the sample is
    /// empty.
    pub fn range_selectivity(&self, lower: &Tuple, upper: &Tuple) -> f64 {
        if self.sample.is_empty() {
            return 1.0;
        }
        let matching = self.sample.iter().filter(|t| *t >= lower && *t < upper).count();
        matching as f64 / self.sample.len() as f64
    }

    /// Whether `value` falls outside `[min, max]`, i.e. an equality
    /// predicate against it cannot match anything this index has ever
    /// observed. Returns `false` (don't prune) when no bounds have been
    /// recorded yet.
    pub fn out_of_range(&self, value: &Tuple) -> bool {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => value < min || value > max,
            _ => false,
        }
    }
}
