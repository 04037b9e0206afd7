//! Resumable, throttled backfill of one index across a record type's
//! existing rows (spec §4.10), without blocking foreground reads or writes.

mod built_ranges;
mod builder;

pub use built_ranges::BuiltRangesStore;
pub use builder::{BuildProgress, IndexBuildConfig, IndexBuilder};
