//! Range-bound query infrastructure (spec §4.6). A `Range`-typed field
//! can never be indexed directly (`rlayer_core::Schema::register_index`
//! rejects it); instead a schema declares one `value` index per boundary
//! (`RangeKey(.., LowerBound, ..)` / `RangeKey(.., UpperBound, ..)`), and
//! this crate turns a query predicate over the original field back into a
//! pair of scans — one per sibling index — whose primary keys the planner
//! intersects.

use rlayer_core::{BoundaryKind, Element, KeyRange, Subspace};

/// The two half-open byte scans answering a range predicate: one over the
/// index tracking each record's lower bound, one over the index tracking
/// each record's upper bound. The planner (`rlayer-query`) intersects the
/// primary keys each scan yields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeWindow {
    pub lower_index_scan: KeyRange,
    pub upper_index_scan: KeyRange,
}

/// Appends a byte guaranteed to sort after any tag a tuple element's
/// encoding can start with, turning a prefix into an exclusive upper bound
/// covering every tuple beginning with that prefix (same trick
/// `Subspace::range` uses for a whole-subspace scan).
fn successor(mut key: Vec<u8>) -> Vec<u8> {
    key.push(0xFF);
    key
}

/// The byte key such that every key in `subspace` whose leading element is
/// `< value` (`inclusive = false`) or `<= value` (`inclusive = true`) sorts
/// strictly before it.
fn upper_bound(subspace: &Subspace, value: &Element, inclusive: bool) -> Vec<u8> {
    let packed = subspace.pack(std::slice::from_ref(value));
    if inclusive { successor(packed) } else { packed }
}

/// The byte key such that every key in `subspace` whose leading element is
/// `> value` (`inclusive = false`) or `>= value` (`inclusive = true`) sorts
/// at or after it.
fn lower_bound(subspace: &Subspace, value: &Element, inclusive: bool) -> Vec<u8> {
    let packed = subspace.pack(std::slice::from_ref(value));
    if inclusive { packed } else { successor(packed) }
}

/// Window for "does this record's range overlap `[query_lower, query_upper)`
/// (or `[query_lower, query_upper]` under [`BoundaryKind::Closed`])?".
///
/// Half-open ranges overlap iff `record.lower < query_upper` and
/// `record.upper > query_lower`; closed ranges overlap iff
/// `record.lower <= query_upper` and `record.upper >= query_lower`.
pub fn overlap_window(
    lower_index: &Subspace,
    upper_index: &Subspace,
    query_lower: &Element,
    query_upper: &Element,
    boundary: BoundaryKind,
) -> RangeWindow {
    let inclusive = boundary == BoundaryKind::Closed;
    RangeWindow {
        lower_index_scan: KeyRange::new(
            lower_index.prefix().to_vec(),
            upper_bound(lower_index, query_upper, inclusive),
        ),
        upper_index_scan: KeyRange::new(
            lower_bound(upper_index, query_lower, inclusive),
            upper_index.range().1,
        ),
    }
}

/// Window for "does this record's range contain point `p`?": equivalent to
/// `overlap_window` with a degenerate one-point query window.
pub fn contains_point_window(
    lower_index: &Subspace,
    upper_index: &Subspace,
    point: &Element,
    boundary: BoundaryKind,
) -> RangeWindow {
    overlap_window(lower_index, upper_index, point, point, boundary)
}

/// Cost-model statistics for one range-typed field's sibling bound indexes
/// (spec §4.6/§4.7), distinct from `rlayer_stats::IndexStatistics` because
/// a range overlap query's selectivity depends on how *wide* the stored
/// ranges are, not just on how many distinct boundary values exist.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeIndexStatistics {
    /// Mean `upper - lower` across the sample, in the field's native units.
    pub avg_width: f64,
    /// Expected number of sampled ranges covering an arbitrary domain
    /// point, assuming ranges are placed independently (>= 1.0).
    pub overlap_factor: f64,
    /// Fraction of the domain a single average-width range covers — the
    /// planner's starting selectivity estimate for a point-containment or
    /// narrow overlap query before correcting for `overlap_factor`.
    pub base_selectivity: f64,
    pub sample_size: usize,
}

impl RangeIndexStatistics {
    /// The statistics of a range field with no observations, or whose
    /// bounds aren't numeric (width is undefined) — the planner's default,
    /// treating the index as unhelpfully unselective rather than refusing
    /// to use it.
    pub fn empty() -> Self {
        Self { avg_width: 0.0, overlap_factor: 1.0, base_selectivity: 1.0, sample_size: 0 }
    }
}

/// Derives [`RangeIndexStatistics`] from a sample of `(lower, upper)` pairs
/// observed for a range-typed field and the field's overall domain width
/// (e.g. the difference between the smallest observed lower bound and the
/// largest observed upper bound).
pub fn range_statistics(domain_width: f64, samples: &[(Element, Element)]) -> RangeIndexStatistics {
    if domain_width <= 0.0 {
        return RangeIndexStatistics::empty();
    }
    let widths: Vec<f64> = samples.iter().filter_map(|(lower, upper)| numeric_width(lower, upper)).collect();
    if widths.is_empty() {
        return RangeIndexStatistics::empty();
    }
    let avg_width = widths.iter().sum::<f64>() / widths.len() as f64;
    let overlap_factor = (widths.len() as f64 * avg_width / domain_width).max(1.0);
    let base_selectivity = (avg_width / domain_width).clamp(0.0, 1.0);
    RangeIndexStatistics { avg_width, overlap_factor, base_selectivity, sample_size: samples.len() }
}

fn numeric_width(lower: &Element, upper: &Element) -> Option<f64> {
    match (lower, upper) {
        (Element::Int(lo), Element::Int(hi)) => Some((*hi - *lo) as f64),
        (Element::Float(lo), Element::Float(hi)) => Some(hi.0 - lo.0),
        _ => None,
    }
}
