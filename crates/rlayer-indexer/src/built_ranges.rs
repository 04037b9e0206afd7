use rlayer_core::{Element, KeyRange, Result, Subspace, Transaction};

/// Tracks which sub-ranges of a primary-key subspace an online index build
/// has already covered (spec §4.10's "a restarted build reads
/// `built_ranges` and skips covered sub-ranges"). One marker key per
/// covered `[start, end)` span, keyed by its start byte string so a range
/// scan returns them start-ordered; mirrors `rlayer_index::IndexStateStore`
/// and `rlayer_stats::StatsStore`'s "one key per concern under a typed
/// subspace" layout.
pub struct BuiltRangesStore {
    subspace: Subspace,
}

impl BuiltRangesStore {
    pub fn new(subspace: Subspace) -> Self {
        Self { subspace }
    }

    fn key(&self, start: &[u8]) -> Vec<u8> {
        self.subspace.pack(&[Element::Bytes(start.to_vec())])
    }

    /// Every covered span currently recorded, sorted by start and merged
    /// so adjacent/overlapping markers collapse into one — "markers may be
    /// consolidated opportunistically to bound metadata size" (spec §4.10).
    async fn merged(&self, txn: &dyn Transaction) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let (start, end) = self.subspace.range();
        let rows = txn.get_range(&KeyRange::new(start, end), None).await?;
        let mut spans: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            if let Ok(elements) = self.subspace.unpack(&key) {
                if let Some(Element::Bytes(start)) = elements.into_iter().next() {
                    spans.push((start, value));
                }
            }
        }
        spans.sort();
        let mut merged: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some((_, last_end)) if start <= *last_end => {
                    if end > *last_end {
                        *last_end = end;
                    }
                }
                _ => merged.push((start, end)),
            }
        }
        Ok(merged)
    }

    /// The earliest point at or after `from` not yet covered by any
    /// recorded span, i.e. where the next batch should resume scanning.
    pub async fn next_uncovered_start(&self, txn: &dyn Transaction, from: &[u8]) -> Result<Vec<u8>> {
        let mut cursor = from.to_vec();
        for (start, end) in self.merged(txn).await? {
            if start <= cursor {
                if end > cursor {
                    cursor = end;
                }
            } else {
                break;
            }
        }
        Ok(cursor)
    }

    /// Records `[start, end)` as covered and immediately consolidates
    /// overlapping/adjacent markers into one, keeping the stored marker
    /// count close to the number of disjoint covered spans rather than the
    /// number of batches ever committed.
    pub async fn mark_built(&self, txn: &dyn Transaction, start: &[u8], end: &[u8]) -> Result<()> {
        let mut spans = self.merged(txn).await?;
        let (subspace_start, subspace_end) = self.subspace.range();
        let existing = txn.get_range(&KeyRange::new(subspace_start, subspace_end), None).await?;
        for (key, _) in &existing {
            txn.clear(key)?;
        }
        spans.push((start.to_vec(), end.to_vec()));
        spans.sort();
        let mut consolidated: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(spans.len());
        for (s, e) in spans {
            match consolidated.last_mut() {
                Some((_, last_end)) if s <= *last_end => {
                    if e > *last_end {
                        *last_end = e;
                    }
                }
                _ => consolidated.push((s, e)),
            }
        }
        for (s, e) in consolidated {
            txn.set(self.key(&s), e)?;
        }
        Ok(())
    }

    /// Drops every recorded span, so a subsequent build starts scanning
    /// from the beginning of the primary-key range again. Used by an
    /// administrative rebuild: the old coverage markers describe backfill
    /// progress against the index's *previous* format and would otherwise
    /// make the rebuild skip records it still needs to re-index.
    pub async fn clear_all(&self, txn: &dyn Transaction) -> Result<()> {
        let (start, end) = self.subspace.range();
        txn.clear_range(&KeyRange::new(start, end))
    }

    /// Sum of byte-span lengths covered, used as a cheap (distribution-
    /// agnostic only for roughly uniform keys, e.g. sequential integers or
    /// UUIDs) proxy for `covered_keys` in the progress ratio spec §4.10
    /// defines, since counting actual covered primary keys would require
    /// re-scanning every batch's rows rather than just its span marker.
    pub async fn covered_span_bytes(&self, txn: &dyn Transaction) -> Result<u64> {
        let mut total = 0u64;
        for (start, end) in self.merged(txn).await? {
            total += span_len(&start, &end);
        }
        Ok(total)
    }
}

/// Interprets a key's trailing bytes (up to 8) as a big-endian integer so
/// two spans can be subtracted into an approximate length; exact for
/// sequential-integer or short-UUID primary keys, a rough proxy otherwise.
fn span_len(start: &[u8], end: &[u8]) -> u64 {
    fn trailing_value(b: &[u8]) -> u64 {
        let take = b.len().min(8);
        b[b.len() - take..].iter().fold(0u64, |acc, &byte| (acc << 8) | byte as u64)
    }
    trailing_value(end).saturating_sub(trailing_value(start))
}
