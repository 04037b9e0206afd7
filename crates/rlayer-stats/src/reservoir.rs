use rand::Rng;

/// Algorithm R reservoir sampling: maintains a uniform random sample of up
/// to `capacity` items seen so far out of an unbounded, one-pass stream
/// (spec §4.7's value-distribution sample feeding histogram-style
/// selectivity estimates, alongside the [`crate::HyperLogLog`] cardinality
/// estimate).
#[derive(Clone, Debug)]
pub struct ReservoirSample<T> {
    capacity: usize,
    samples: Vec<T>,
    seen: u64,
}

impl<T> ReservoirSample<T> {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, samples: Vec::with_capacity(capacity), seen: 0 }
    }

    pub fn observe(&mut self, item: T, rng: &mut impl Rng) {
        self.seen += 1;
        if self.samples.len() < self.capacity {
            self.samples.push(item);
            return;
        }
        let j = rng.gen_range(0..self.seen);
        if (j as usize) < self.capacity {
            self.samples[j as usize] = item;
        }
    }

    pub fn samples(&self) -> &[T] {
        &self.samples
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Reconstructs a reservoir from a persisted `(seen, samples)` pair
    /// without re-running the sampling decision — used when loading a
    /// sketch back from storage, where the samples it already kept are
    /// exactly the state to resume from.
    pub fn restore(capacity: usize, seen: u64) -> Self {
        Self { capacity, samples: Vec::with_capacity(capacity), seen }
    }

    pub fn push_restored(&mut self, item: T) {
        self.samples.push(item);
    }
}
