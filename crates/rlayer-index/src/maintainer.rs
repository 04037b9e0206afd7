use rlayer_core::{Element, Error, FieldPath, IndexDef, IndexKind, InternalError, RangeMetadata, Result, Subspace, Tuple};
use rlayer_core::{KVStore, Transaction};
use tracing::instrument;

/// One physical key/value pair a non-aggregate index kind writes or clears.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// The effect an index maintainer has on the underlying store for one
/// evaluated tuple of one record, independent of whether it's applied as
/// an insert or a removal (spec §4.4).
#[derive(Clone, Debug)]
pub enum IndexUpdate {
    /// Plain key/value writes — `value`/`unique`/`permuted`/`rank`/`spatial`.
    Entries(Vec<IndexEntry>),
    /// Grouped counter — `count`. `delta` is `+1` on insert, `-1` on remove.
    Counter { key: Vec<u8>, delta: i64 },
    /// Grouped numeric accumulator — `sum`. `delta` is the (possibly
    /// negated) summand, pre-scaled to a fixed-point i64 by the caller.
    Sum { key: Vec<u8>, delta: i64 },
    /// Append-only, commit-order-stable entry — `version`. Only meaningful
    /// on insert; version index entries are never individually retracted,
    /// they're superseded by a newer entry for the same primary key.
    Versionstamped { key_with_placeholder: Vec<u8>, offset: usize, value: Vec<u8> },
}

/// Computes the index updates a given evaluation of `index`'s expression
/// over one record produces. `evaluated` is the output of
/// `KeyExpression::evaluate` and `primary_key` is that record's primary key
/// tuple (spec §4.2's "field accessor produces tuples, expressions combine
/// them" pipeline feeding into §4.4's per-kind maintenance rules).
#[instrument(skip(subspace, evaluated, primary_key), fields(index = %index.name, kind = index.kind.name()))]
pub fn index_entries(
    index: &IndexDef,
    subspace: &Subspace,
    primary_key: &Tuple,
    evaluated: &[Tuple],
) -> Result<Vec<IndexUpdate>> {
    match &index.kind {
        IndexKind::Value => Ok(vec![IndexUpdate::Entries(
            evaluated.iter().map(|t| value_entry(subspace, t, primary_key, index.unique)).collect(),
        )]),

        IndexKind::Rank => Ok(vec![IndexUpdate::Entries(
            evaluated.iter().map(|t| value_entry(subspace, t, primary_key, false)).collect(),
        )]),

        IndexKind::Permuted(permutation) => {
            let mut entries = Vec::with_capacity(evaluated.len());
            for t in evaluated {
                let permuted = apply_permutation(t, permutation, index)?;
                entries.push(value_entry(subspace, &permuted, primary_key, index.unique));
            }
            Ok(vec![IndexUpdate::Entries(entries)])
        }

        IndexKind::Count => Ok(evaluated
            .iter()
            .map(|t| IndexUpdate::Counter { key: subspace.pack(t), delta: 1 })
            .collect()),

        IndexKind::Sum => evaluated
            .iter()
            .map(|t| {
                let (group, summand) = split_summand(t, index)?;
                Ok(IndexUpdate::Sum { key: subspace.pack(&group), delta: summand })
            })
            .collect(),

        IndexKind::Version => Ok(evaluated
            .iter()
            .map(|t| {
                let mut key = subspace.pack(t);
                let offset = key.len();
                key.extend_from_slice(&[0xffu8; 10]);
                IndexUpdate::Versionstamped {
                    key_with_placeholder: key,
                    offset,
                    value: rlayer_tuple::encode(primary_key),
                }
            })
            .collect()),

        IndexKind::Spatial { dimensions, depth, .. } => {
            let dims = match dimensions {
                rlayer_core::SpatialDimensions::Two => 2,
                rlayer_core::SpatialDimensions::Three => 3,
            };
            let mut entries = Vec::with_capacity(evaluated.len());
            for t in evaluated {
                let code = zorder_code(t, dims, *depth)?;
                let key_tuple = vec![Element::Int(code as i64)];
                entries.push(value_entry(subspace, &key_tuple, primary_key, false));
            }
            Ok(vec![IndexUpdate::Entries(entries)])
        }

        IndexKind::Vector { .. } => Err(Error::Internal(InternalError::new(
            "vector indexes are maintained incrementally via rlayer_index::vector, not index_entries",
        ).with_index(index.name.clone()))),
    }
}

fn value_entry(subspace: &Subspace, tuple: &Tuple, primary_key: &Tuple, unique: bool) -> IndexEntry {
    if unique {
        IndexEntry { key: subspace.pack(tuple), value: rlayer_tuple::encode(primary_key) }
    } else {
        let mut combined = tuple.clone();
        combined.extend(primary_key.iter().cloned());
        IndexEntry { key: subspace.pack(&combined), value: Vec::new() }
    }
}

fn apply_permutation(tuple: &Tuple, permutation: &[usize], index: &IndexDef) -> Result<Tuple> {
    if permutation.len() != tuple.len() {
        return Err(Error::Internal(
            InternalError::new(format!(
                "permuted index expects a {}-element tuple, evaluated {}",
                permutation.len(),
                tuple.len()
            ))
            .with_index(index.name.clone()),
        ));
    }
    permutation
        .iter()
        .map(|&i| {
            tuple.get(i).cloned().ok_or_else(|| {
                Error::Internal(
                    InternalError::new(format!("permutation index {i} out of bounds"))
                        .with_index(index.name.clone()),
                )
            })
        })
        .collect()
}

/// Splits a `sum` index's evaluated tuple into its grouping prefix and its
/// fixed-point (x1000) numeric summand, the last element.
fn split_summand(tuple: &Tuple, index: &IndexDef) -> Result<(Tuple, i64)> {
    let (last, prefix) = tuple.split_last().ok_or_else(|| {
        Error::Internal(InternalError::new("sum index requires at least one element").with_index(index.name.clone()))
    })?;
    let value = match last {
        Element::Int(i) => *i,
        Element::Float(f) => (f.0 * 1000.0).round() as i64,
        other => {
            return Err(Error::NonNumericSummand(format!("{:?}", other)));
        }
    };
    Ok((prefix.to_vec(), value))
}

/// Interleaves the bits of `dims` quantized coordinates into one Z-order
/// curve code, `depth` bits per coordinate (spec §4.4's spatial index).
/// Coordinates must already be mapped into `[0, 2^depth)`.
pub fn zorder_interleave(coords: &[u64], depth: u32) -> u128 {
    let mut code: u128 = 0;
    for bit in 0..depth {
        for (axis, &coord) in coords.iter().enumerate() {
            if (coord >> bit) & 1 == 1 {
                code |= 1u128 << (bit as usize * coords.len() + axis);
            }
        }
    }
    code
}

fn zorder_code(tuple: &Tuple, dims: usize, depth: u32) -> Result<u128> {
    if tuple.len() != dims {
        return Err(Error::DimensionMismatch { expected: dims, actual: tuple.len() });
    }
    let max = (1u64 << depth).saturating_sub(1);
    let coords: Result<Vec<u64>> = tuple
        .iter()
        .enumerate()
        .map(|(axis, e)| match e {
            Element::Int(i) if *i >= 0 && (*i as u64) <= max => Ok(*i as u64),
            Element::Int(i) => Err(Error::CoordinateOutOfRange { axis, value: *i as f64 }),
            other => Err(Error::Internal(InternalError::new(format!(
                "spatial index coordinate must be a non-negative integer, got {other:?}"
            )))),
        })
        .collect();
    Ok(zorder_interleave(&coords?, depth))
}

/// Writes or clears `updates` against `txn`. `sign` is `1` to apply an
/// insert, `-1` to retract a removed record's contribution.
pub fn apply(txn: &dyn Transaction, updates: &[IndexUpdate], sign: i64) -> Result<()> {
    for update in updates {
        match update {
            IndexUpdate::Entries(entries) => {
                for entry in entries {
                    if sign > 0 {
                        txn.set(entry.key.clone(), entry.value.clone())?;
                    } else {
                        txn.clear(&entry.key)?;
                    }
                }
            }
            IndexUpdate::Counter { key, delta } | IndexUpdate::Sum { key, delta } => {
                txn.atomic_add(key, delta * sign)?;
            }
            IndexUpdate::Versionstamped { key_with_placeholder, offset, value } => {
                if sign > 0 {
                    txn.atomic_set_versionstamped_key(
                        key_with_placeholder.clone(),
                        *offset,
                        value.clone(),
                    )?;
                }
            }
        }
    }
    Ok(())
}

/// Rejects an index's `unique: true` contribution at insert time if its key
/// is already present under a different primary key (spec §4.4/§7).
pub async fn check_unique(
    txn: &dyn Transaction,
    index: &IndexDef,
    updates: &[IndexUpdate],
    primary_key: &Tuple,
) -> Result<()> {
    if !index.unique {
        return Ok(());
    }
    for update in updates {
        if let IndexUpdate::Entries(entries) = update {
            for entry in entries {
                if let Some(existing) = txn.get(&entry.key).await? {
                    if existing != rlayer_tuple::encode(primary_key) {
                        return Err(Error::UniqueViolation {
                            index: index.name.clone(),
                            primary_key: existing,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Reconstructs the `{component, boundaryType}` a `RangeKey` index
/// contributes, given the field it's declared over — used by the
/// range-bound planner (`rlayer-range`) to locate a sibling boundary index.
pub fn range_metadata_field(metadata: &RangeMetadata) -> &FieldPath {
    &metadata.parent_field
}
