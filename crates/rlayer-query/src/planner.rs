use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use parking_lot::Mutex;
use rlayer_core::{
    BoundaryKind, Element, Error, IndexDef, IndexKind, InternalError, RangeComponent, Result, Schema, Subspace, Tuple,
};
use rlayer_stats::IndexStatistics;
use tracing::{instrument, trace};

use crate::plan::PlanNode;
use crate::predicate::{Predicate, Query};

/// Resolves an index or a record type's primary-key subspace by name;
/// implemented by whatever owns the keyspace layout (the record store
/// facade in `rlayer`).
pub trait IndexLocator: Send + Sync {
    fn index_subspace(&self, index_name: &str) -> Subspace;
    fn primary_subspace(&self, record_type: &str) -> Subspace;
}

/// Supplies the planner's cost model with per-index cardinality/selectivity
/// estimates (`rlayer-stats`), abstracted so planning doesn't have to take
/// a transaction directly.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn statistics(&self, index_name: &str) -> Result<IndexStatistics>;
}

/// A path to one predicate inside a (normalized) query's predicate forest:
/// `[i]` is `predicates[i]`, `[i, j]` is that predicate's `j`-th `And`/`Or`
/// child, and so on. Addressing predicates by position rather than
/// embedding their literal values in the shape keeps a [`PlanShape`]
/// reusable across queries that share structure but differ in literals.
type PredicatePath = Vec<usize>;

/// A planning decision independent of a query's literal values: which
/// index (if any) serves which predicate, and how the pieces combine. The
/// plan cache stores this, not the realized byte ranges, so the same shape
/// serves repeat queries carrying different literals (spec §4.8).
#[derive(Clone, Debug, PartialEq)]
enum PlanShape {
    FullScan,
    IndexScanEq { index_name: String, predicate_path: PredicatePath },
    RangeWindow { lower_index_name: String, upper_index_name: String, predicate_path: PredicatePath },
    VectorTopK { index_name: String, predicate_path: PredicatePath },
    /// AND of several indexed predicates; any predicate not named by a
    /// child is applied as a residual filter over the combination.
    Intersection(Vec<PlanShape>),
    /// OR of several indexed predicates, each of which resolved to its own
    /// candidate — spec §4.7 step 4's "Union: for OR predicates whose
    /// disjuncts match indexes". Only built when *every* disjunct resolves
    /// to an index; a partially-indexable OR is left as a residual filter
    /// instead, since scanning some disjuncts and not others would silently
    /// under-return matches for the unindexed ones.
    Union(Vec<PlanShape>),
}

impl PlanShape {
    fn covered_predicates(&self, out: &mut Vec<usize>) {
        match self {
            PlanShape::FullScan => {}
            PlanShape::IndexScanEq { predicate_path, .. }
            | PlanShape::RangeWindow { predicate_path, .. }
            | PlanShape::VectorTopK { predicate_path, .. } => out.push(predicate_path[0]),
            PlanShape::Intersection(children) | PlanShape::Union(children) => {
                children.iter().for_each(|c| c.covered_predicates(out))
            }
        }
    }
}

/// A conservative stand-in for "how many records of this type exist" when
/// no index has observed any writes yet — favors trying an index over a
/// full scan until statistics say otherwise.
const UNKNOWN_CARDINALITY_ESTIMATE: f64 = 1_000_000.0;

/// Cost-based planner (spec §4.8): turns a [`Query`] into a [`PlanNode`]
/// tree, caching the index-selection decision per schema version and
/// predicate shape so repeat queries skip candidate search and costing.
pub struct Planner {
    cache: Mutex<HashMap<String, PlanShape>>,
}

impl Planner {
    pub fn new() -> Self {
        Self { cache: Mutex::new(HashMap::new()) }
    }

    fn cache_key(schema: &Schema, query: &Query) -> String {
        format!("v{}:{}", schema.version, query.shape_key())
    }

    /// Produces an execution plan for `query` against `schema`, using
    /// `locator` to resolve index/primary-key subspaces and `stats` to cost
    /// candidate scans. Caches the shape of the decision (not literal
    /// values) keyed by the schema's version, so a schema change correctly
    /// invalidates every cached shape. Predicates are normalized (spec
    /// §4.7: flatten And/Or, push Not down) before candidate search.
    #[instrument(skip(self, schema, locator, stats), fields(record_type = %query.record_type))]
    pub async fn plan(
        &self,
        query: &Query,
        schema: &Schema,
        locator: &dyn IndexLocator,
        stats: &dyn StatsProvider,
    ) -> Result<PlanNode> {
        let predicates = query.normalized_predicates();
        let key = Self::cache_key(schema, query);
        let cached = self.cache.lock().get(&key).cloned();
        let shape = match cached {
            Some(shape) => {
                trace!(cache = "hit", %key);
                shape
            }
            None => {
                trace!(cache = "miss", %key);
                let shape = self.choose_shape(&predicates, &query.record_type, schema, stats).await?;
                self.cache.lock().insert(key, shape.clone());
                shape
            }
        };

        let mut node = materialize(&shape, &predicates, &query.record_type, locator)?;
        if query.sorted {
            node = PlanNode::Sort { child: Box::new(node) };
        }
        if let Some(limit) = query.limit {
            node = PlanNode::Limit { child: Box::new(node), limit };
        }
        Ok(node)
    }

    async fn choose_shape(
        &self,
        predicates: &[Predicate],
        record_type: &str,
        schema: &Schema,
        stats: &dyn StatsProvider,
    ) -> Result<PlanShape> {
        let indexes = schema.indexes_for(record_type);

        // Unique short-circuit: a top-level equality predicate served by a
        // unique index already narrows to at most one record, so no other
        // candidate (or combination) can beat it. Other predicates become
        // a residual filter over that single-row scan.
        for (i, predicate) in predicates.iter().enumerate() {
            if let Predicate::Equals { path, .. } = predicate {
                if let Some(index) =
                    indexes.iter().find(|idx| idx.unique && idx.expression.leaf_paths() == vec![path.clone()])
                {
                    return Ok(PlanShape::IndexScanEq { index_name: index.name.clone(), predicate_path: vec![i] });
                }
            }
        }

        let mut chosen = Vec::new();
        for (i, predicate) in predicates.iter().enumerate() {
            if let Some(shape) = self.shape_for(predicate, vec![i], &indexes, predicates, stats).await? {
                chosen.push(shape);
            }
        }

        if chosen.is_empty() {
            return Ok(PlanShape::FullScan);
        }

        let indexed_shape = if chosen.len() == 1 { chosen.remove(0) } else { PlanShape::Intersection(chosen) };

        let indexed_cost = self.estimate_cost(&indexed_shape, predicates, stats).await?;
        let full_scan_cost = self.estimate_cost(&PlanShape::FullScan, predicates, stats).await?;
        if indexed_cost < full_scan_cost {
            Ok(indexed_shape)
        } else {
            Ok(PlanShape::FullScan)
        }
    }

    /// Recursively resolves one (sub)predicate at `path` to a [`PlanShape`],
    /// or `None` if it cannot be served by any index and must fall back to
    /// a residual filter. `And` combines whatever children it can index
    /// into an `Intersection` (children it can't index are simply omitted,
    /// same as the top-level AND list always has); `Or` requires every
    /// child to resolve or the whole predicate is left unindexed, since a
    /// partial union would silently drop matches from the unindexed
    /// disjuncts. `Not` is never indexable.
    fn shape_for<'a>(
        &'a self,
        predicate: &'a Predicate,
        path: PredicatePath,
        indexes: &'a [&'a IndexDef],
        predicates: &'a [Predicate],
        stats: &'a dyn StatsProvider,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PlanShape>>> + Send + 'a>> {
        Box::pin(async move {
            match predicate {
                Predicate::Equals { .. } | Predicate::Range { .. } | Predicate::VectorNearest { .. } => {
                    let candidates = candidates_for(predicate, path, indexes);
                    if candidates.is_empty() {
                        return Ok(None);
                    }
                    let mut best: Option<(f64, PlanShape)> = None;
                    for shape in candidates {
                        let cost = self.estimate_cost(&shape, predicates, stats).await?;
                        if best.as_ref().map(|(c, _)| cost < *c).unwrap_or(true) {
                            best = Some((cost, shape));
                        }
                    }
                    Ok(best.map(|(_, shape)| shape))
                }
                Predicate::And(children) => {
                    let mut child_shapes = Vec::new();
                    for (i, child) in children.iter().enumerate() {
                        let mut child_path = path.clone();
                        child_path.push(i);
                        if let Some(shape) = self.shape_for(child, child_path, indexes, predicates, stats).await? {
                            child_shapes.push(shape);
                        }
                    }
                    if child_shapes.is_empty() {
                        return Ok(None);
                    }
                    Ok(Some(if child_shapes.len() == 1 {
                        child_shapes.remove(0)
                    } else {
                        PlanShape::Intersection(child_shapes)
                    }))
                }
                Predicate::Or(children) => {
                    let mut child_shapes = Vec::with_capacity(children.len());
                    for (i, child) in children.iter().enumerate() {
                        let mut child_path = path.clone();
                        child_path.push(i);
                        match self.shape_for(child, child_path, indexes, predicates, stats).await? {
                            Some(shape) => child_shapes.push(shape),
                            None => return Ok(None),
                        }
                    }
                    Ok(Some(PlanShape::Union(child_shapes)))
                }
                Predicate::Not(_) => Ok(None),
            }
        })
    }

    fn estimate_cost<'a>(
        &'a self,
        shape: &'a PlanShape,
        predicates: &'a [Predicate],
        stats: &'a dyn StatsProvider,
    ) -> Pin<Box<dyn Future<Output = Result<f64>> + Send + 'a>> {
        Box::pin(async move {
            match shape {
                PlanShape::FullScan => Ok(UNKNOWN_CARDINALITY_ESTIMATE),
                PlanShape::IndexScanEq { index_name, .. } => {
                    let s = stats.statistics(index_name).await?;
                    let rows = s.records_observed.max(1) as f64;
                    Ok(rows * s.selectivity(1.0))
                }
                PlanShape::RangeWindow { lower_index_name, predicate_path, .. } => {
                    let s = stats.statistics(lower_index_name).await?;
                    let rows = s.records_observed.max(1) as f64;
                    let (lower, upper) = range_bounds(predicate_at(predicates, predicate_path));
                    Ok(rows * s.range_selectivity(&lower, &upper))
                }
                PlanShape::VectorTopK { predicate_path, .. } => match predicate_at(predicates, predicate_path) {
                    Predicate::VectorNearest { k, .. } => Ok(*k as f64 * 2.0),
                    _ => Ok(1.0),
                },
                PlanShape::Intersection(children) => {
                    let mut total = 0.0;
                    for child in children {
                        total += self.estimate_cost(child, predicates, stats).await?;
                    }
                    Ok(total)
                }
                PlanShape::Union(children) => {
                    // A true union's cardinality is bounded above by the sum
                    // of its branches (minus overlap this simple model
                    // doesn't track); summing keeps the estimate
                    // conservative rather than underselling the cost of a
                    // wide OR relative to a plain AND of the same branches.
                    let mut total = 0.0;
                    for child in children {
                        total += self.estimate_cost(child, predicates, stats).await?;
                    }
                    Ok(total)
                }
            }
        })
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks `path` into `predicates`' nested `And`/`Or` structure to find the
/// leaf predicate a [`PlanShape`] addresses.
fn predicate_at<'a>(predicates: &'a [Predicate], path: &[usize]) -> &'a Predicate {
    let mut current = &predicates[path[0]];
    for &index in &path[1..] {
        current = match current {
            Predicate::And(children) | Predicate::Or(children) => &children[index],
            other => other,
        };
    }
    current
}

/// Bounds for a range predicate's sample-based selectivity estimate. An
/// absent side is represented by a one-element tuple holding a sentinel
/// that sorts before/after every real value (`Null` ranks lowest, `Bool`
/// ranks highest in `Element`'s tag order) rather than an empty tuple,
/// which would compare as smaller than any real bound on either side and
/// silently zero out the estimate.
fn range_bounds(predicate: &Predicate) -> (Tuple, Tuple) {
    match predicate {
        Predicate::Range { lower, upper, .. } => {
            (vec![lower.clone().unwrap_or(Element::Null)], vec![upper.clone().unwrap_or(Element::Bool(true))])
        }
        _ => (vec![Element::Null], vec![Element::Bool(true)]),
    }
}

fn candidates_for(predicate: &Predicate, path: PredicatePath, indexes: &[&IndexDef]) -> Vec<PlanShape> {
    match predicate {
        Predicate::Equals { path: field, .. } => indexes
            .iter()
            .filter(|idx| {
                matches!(idx.kind, IndexKind::Value | IndexKind::Rank | IndexKind::Permuted(_))
                    && idx.expression.leaf_paths() == vec![field.clone()]
            })
            .map(|idx| PlanShape::IndexScanEq { index_name: idx.name.clone(), predicate_path: path.clone() })
            .collect(),
        Predicate::Range { path: field, .. } => {
            let lower = indexes.iter().find(|idx| {
                idx.range_metadata
                    .as_ref()
                    .is_some_and(|m| &m.parent_field == field && m.component == RangeComponent::LowerBound)
            });
            let upper = indexes.iter().find(|idx| {
                idx.range_metadata
                    .as_ref()
                    .is_some_and(|m| &m.parent_field == field && m.component == RangeComponent::UpperBound)
            });
            match (lower, upper) {
                (Some(l), Some(u)) => vec![PlanShape::RangeWindow {
                    lower_index_name: l.name.clone(),
                    upper_index_name: u.name.clone(),
                    predicate_path: path,
                }],
                _ => Vec::new(),
            }
        }
        Predicate::VectorNearest { path: field, .. } => indexes
            .iter()
            .filter(|idx| matches!(idx.kind, IndexKind::Vector { .. }) && idx.expression.leaf_paths() == vec![field.clone()])
            .map(|idx| PlanShape::VectorTopK { index_name: idx.name.clone(), predicate_path: path.clone() })
            .collect(),
        Predicate::And(_) | Predicate::Or(_) | Predicate::Not(_) => Vec::new(),
    }
}

fn materialize(shape: &PlanShape, predicates: &[Predicate], record_type: &str, locator: &dyn IndexLocator) -> Result<PlanNode> {
    let node = match shape {
        PlanShape::FullScan => PlanNode::FullScan { subspace: locator.primary_subspace(record_type) },
        PlanShape::IndexScanEq { index_name, predicate_path } => {
            let value = match predicate_at(predicates, predicate_path) {
                Predicate::Equals { value, .. } => value.clone(),
                _ => return Err(planner_error("IndexScanEq shape bound to a non-equality predicate")),
            };
            let subspace = locator.index_subspace(index_name);
            let (start, end) = subspace.range_for(&[value]);
            PlanNode::IndexScan {
                index_name: index_name.clone(),
                subspace,
                range: rlayer_core::KeyRange::new(start, end),
                key_arity: 1,
                unique: false,
            }
        }
        PlanShape::RangeWindow { lower_index_name, upper_index_name, predicate_path } => {
            let (query_lower, query_upper, boundary): (Element, Element, BoundaryKind) =
                match predicate_at(predicates, predicate_path) {
                    Predicate::Range { lower, upper, boundary, .. } => {
                        (lower.clone().unwrap_or(Element::Null), upper.clone().unwrap_or(Element::Null), *boundary)
                    }
                    _ => return Err(planner_error("RangeWindow shape bound to a non-range predicate")),
                };
            let lower_subspace = locator.index_subspace(lower_index_name);
            let upper_subspace = locator.index_subspace(upper_index_name);
            let window: rlayer_range::RangeWindow =
                rlayer_range::overlap_window(&lower_subspace, &upper_subspace, &query_lower, &query_upper, boundary);
            PlanNode::Intersection(vec![
                PlanNode::IndexScan {
                    index_name: lower_index_name.clone(),
                    subspace: lower_subspace,
                    range: window.lower_index_scan,
                    key_arity: 1,
                    unique: false,
                },
                PlanNode::IndexScan {
                    index_name: upper_index_name.clone(),
                    subspace: upper_subspace,
                    range: window.upper_index_scan,
                    key_arity: 1,
                    unique: false,
                },
            ])
        }
        PlanShape::VectorTopK { index_name, predicate_path } => {
            let (query_vec, k) = match predicate_at(predicates, predicate_path) {
                Predicate::VectorNearest { query, k, .. } => (query.clone(), *k),
                _ => return Err(planner_error("VectorTopK shape bound to a non-vector predicate")),
            };
            PlanNode::VectorTopK { index_name: index_name.clone(), query: query_vec, k }
        }
        PlanShape::Intersection(children) => PlanNode::Intersection(
            children.iter().map(|c| materialize(c, predicates, record_type, locator)).collect::<Result<_>>()?,
        ),
        PlanShape::Union(children) => PlanNode::Union(
            children.iter().map(|c| materialize(c, predicates, record_type, locator)).collect::<Result<_>>()?,
        ),
    };

    let mut covered = Vec::new();
    shape.covered_predicates(&mut covered);
    let residual: Vec<&Predicate> =
        predicates.iter().enumerate().filter(|(i, _)| !covered.contains(i)).map(|(_, p)| p).collect();

    if residual.is_empty() {
        Ok(node)
    } else {
        let description = residual.iter().map(|p| p.describe()).collect::<Vec<_>>().join(", ");
        Ok(PlanNode::Filter { child: Box::new(node), description })
    }
}

fn planner_error(message: &str) -> Error {
    Error::Internal(InternalError::new(message))
}
