//! Index maintainers (spec §4.4: one per index kind) and the per-index
//! readiness state machine (spec §4.5) that gates whether a maintainer's
//! output may be trusted by the planner.

mod maintainer;
mod state;
mod vector;

pub use maintainer::{apply, check_unique, index_entries, zorder_interleave, IndexEntry, IndexUpdate};
pub use state::{IndexState, IndexStateStore};
pub use vector::VectorIndex;
