use rlayer_core::{Error, Subspace, Transaction};
use rlayer_core::Result;
use tracing::{instrument, warn};

/// Readiness of one index, gating whether the planner may trust its output
/// (spec §4.5).
///
/// `Disabled` — not maintained, not queryable.
/// `WriteOnly` — maintained on every write, not yet queryable (the online
/// builder is backfilling historical records).
/// `ReadableUniquePending` — maintained and queryable, but a `unique: true`
/// index whose historical backfill hasn't finished checking older records
/// for collisions; the planner may still use it for non-uniqueness-dependent
/// reads.
/// `Readable` — fully maintained, backfilled and (if unique) verified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexState {
    Disabled,
    WriteOnly,
    ReadableUniquePending,
    Readable,
}

impl IndexState {
    fn to_byte(self) -> u8 {
        match self {
            IndexState::Disabled => 0,
            IndexState::WriteOnly => 1,
            IndexState::ReadableUniquePending => 2,
            IndexState::Readable => 3,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(IndexState::Disabled),
            1 => Some(IndexState::WriteOnly),
            2 => Some(IndexState::ReadableUniquePending),
            3 => Some(IndexState::Readable),
            _ => None,
        }
    }

    /// Whether the planner may issue reads against an index in this state.
    pub fn is_queryable(self) -> bool {
        matches!(self, IndexState::Readable | IndexState::ReadableUniquePending)
    }

    fn allowed_next(self) -> &'static [IndexState] {
        match self {
            IndexState::Disabled => &[IndexState::WriteOnly],
            IndexState::WriteOnly => &[IndexState::ReadableUniquePending, IndexState::Readable, IndexState::Disabled],
            IndexState::ReadableUniquePending => &[IndexState::Readable, IndexState::Disabled],
            // Administrative rebuild: an operator accepting a format change
            // via `allow_index_rebuilds` reverts a `Readable` index to
            // `WriteOnly` so the online builder can re-backfill it under the
            // new format before it's trusted for reads again.
            IndexState::Readable => &[IndexState::WriteOnly, IndexState::Disabled],
        }
    }
}

/// Persists each index's [`IndexState`] under one key per index name.
///
/// Grounded on the same three-tier lookup shape
/// `catalog/src/catalog/table.rs` uses for table metadata: state is always
/// read straight from the transaction's view of the store (which already
/// folds in this transaction's own uncommitted writes), falling back to
/// `Disabled` with a `warn!` only when an index has genuinely never been
/// registered.
pub struct IndexStateStore {
    subspace: Subspace,
}

impl IndexStateStore {
    pub fn new(subspace: Subspace) -> Self {
        Self { subspace }
    }

    fn key(&self, index_name: &str) -> Vec<u8> {
        self.subspace.pack(&[rlayer_core::Element::str(index_name)])
    }

    #[instrument(name = "index_state_store.get", skip(self, txn))]
    pub async fn get(&self, txn: &dyn Transaction, index_name: &str) -> Result<IndexState> {
        match txn.get(&self.key(index_name)).await? {
            Some(bytes) => bytes
                .first()
                .copied()
                .and_then(IndexState::from_byte)
                .ok_or_else(|| Error::Store(format!("corrupt index state for `{index_name}`"))),
            None => {
                warn!(index = index_name, "no recorded state for index, defaulting to disabled");
                Ok(IndexState::Disabled)
            }
        }
    }

    /// Moves `index_name` from `expected` to `next`, failing with
    /// `ConcurrentStateChange` if another writer already moved it away from
    /// `expected` (spec §4.5's compare-and-set state transition contract).
    #[instrument(name = "index_state_store.transition", skip(self, txn))]
    pub async fn transition(
        &self,
        txn: &dyn Transaction,
        index_name: &str,
        expected: IndexState,
        next: IndexState,
    ) -> Result<()> {
        let current = self.get(txn, index_name).await?;
        if current != expected {
            return Err(Error::ConcurrentStateChange(index_name.to_string()));
        }
        if !expected.allowed_next().contains(&next) {
            return Err(Error::Internal(rlayer_core::InternalError::new(format!(
                "illegal index state transition {expected:?} -> {next:?}"
            ))));
        }
        txn.set(self.key(index_name), vec![next.to_byte()])?;
        Ok(())
    }
}
