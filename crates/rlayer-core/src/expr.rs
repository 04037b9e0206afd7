use crate::accessor::{FieldAccessor, Tuple};
use crate::path::FieldPath;
use rlayer_tuple::Element;

/// Which end of a `Range`-typed field a [`KeyExpression::RangeKey`] selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RangeComponent {
    LowerBound,
    UpperBound,
}

/// Whether a range's selected endpoint is inclusive (`Closed`) or exclusive
/// (`HalfOpen`) of the boundary value. Derived per query (see `SPEC_FULL.md`
/// §12.2), not persisted on the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoundaryKind {
    HalfOpen,
    Closed,
}

/// Composable index-key expression (spec §4.2).
#[derive(Clone, Debug, PartialEq)]
pub enum KeyExpression {
    /// Yields one empty tuple.
    Empty,
    /// `FieldAccessor::extract` at `path`.
    FieldKey(FieldPath),
    /// Cartesian product over children, concatenated per combination.
    Concatenate(Vec<KeyExpression>),
    /// Evaluates `child` with all of its field paths resolved relative to
    /// `parent` (i.e. `parent.child_path`), modeling "evaluate child within
    /// the nested record at parent".
    Nest(FieldPath, Box<KeyExpression>),
    /// Projects one endpoint out of a `Range`-typed field.
    RangeKey(FieldPath, RangeComponent, BoundaryKind),
}

impl KeyExpression {
    pub fn field(path: impl Into<FieldPath>) -> Self {
        KeyExpression::FieldKey(path.into())
    }

    pub fn concat(children: impl IntoIterator<Item = KeyExpression>) -> Self {
        KeyExpression::Concatenate(children.into_iter().collect())
    }

    pub fn nest(parent: impl Into<FieldPath>, child: KeyExpression) -> Self {
        KeyExpression::Nest(parent.into(), Box::new(child))
    }

    pub fn range_key(
        path: impl Into<FieldPath>,
        component: RangeComponent,
        boundary: BoundaryKind,
    ) -> Self {
        KeyExpression::RangeKey(path.into(), component, boundary)
    }

    /// Evaluates this expression over `record`, returning the resulting
    /// sequence of tuples (one per combination for `Concatenate`, one per
    /// repetition for a repeated `FieldKey`).
    pub fn evaluate<R>(&self, record: &R, accessor: &dyn FieldAccessor<R>) -> Vec<Tuple> {
        match self {
            KeyExpression::Empty => vec![Vec::new()],
            KeyExpression::FieldKey(path) => accessor.extract(record, path),
            KeyExpression::Concatenate(children) => {
                let mut acc = vec![Tuple::new()];
                for child in children {
                    let results = child.evaluate(record, accessor);
                    acc = cartesian_concat(&acc, &results);
                }
                acc
            }
            KeyExpression::Nest(parent, child) => {
                let prefixed = child.prefixed_with(parent);
                prefixed.evaluate(record, accessor)
            }
            KeyExpression::RangeKey(path, component, _boundary) => accessor
                .extract(record, path)
                .into_iter()
                .map(|range_tuple| vec![project_range_component(&range_tuple, *component)])
                .collect(),
        }
    }

    /// Returns every `FieldPath` a `FieldKey`/`RangeKey` leaf in this
    /// expression references, fully resolved through any enclosing `Nest`.
    /// Used by the planner to match predicates against index expressions
    /// and by the range-bound infrastructure to find sibling boundary
    /// indexes on the same parent field.
    pub fn leaf_paths(&self) -> Vec<FieldPath> {
        match self {
            KeyExpression::Empty => Vec::new(),
            KeyExpression::FieldKey(path) => vec![path.clone()],
            KeyExpression::RangeKey(path, ..) => vec![path.clone()],
            KeyExpression::Concatenate(children) => {
                children.iter().flat_map(KeyExpression::leaf_paths).collect()
            }
            KeyExpression::Nest(parent, child) => {
                child.leaf_paths().into_iter().map(|p| p.nested_under(parent)).collect()
            }
        }
    }

    fn prefixed_with(&self, parent: &FieldPath) -> KeyExpression {
        match self {
            KeyExpression::Empty => KeyExpression::Empty,
            KeyExpression::FieldKey(path) => KeyExpression::FieldKey(path.nested_under(parent)),
            KeyExpression::RangeKey(path, component, boundary) => {
                KeyExpression::RangeKey(path.nested_under(parent), *component, *boundary)
            }
            KeyExpression::Concatenate(children) => {
                KeyExpression::Concatenate(children.iter().map(|c| c.prefixed_with(parent)).collect())
            }
            KeyExpression::Nest(inner_parent, child) => {
                KeyExpression::Nest(inner_parent.nested_under(parent), child.clone())
            }
        }
    }

    /// Structural equality used by the schema evolution validator: same
    /// variant, same child order, same field names.
    pub fn structurally_equal(&self, other: &KeyExpression) -> bool {
        use KeyExpression::*;
        match (self, other) {
            (Empty, Empty) => true,
            (FieldKey(a), FieldKey(b)) => a == b,
            (RangeKey(a, ca, ba), RangeKey(b, cb, bb)) => a == b && ca == cb && ba == bb,
            (Concatenate(a), Concatenate(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structurally_equal(y))
            }
            (Nest(pa, ca), Nest(pb, cb)) => pa == pb && ca.structurally_equal(cb),
            _ => false,
        }
    }
}

fn project_range_component(range_tuple: &Tuple, component: RangeComponent) -> Element {
    let idx = match component {
        RangeComponent::LowerBound => 0,
        RangeComponent::UpperBound => 1,
    };
    range_tuple.get(idx).cloned().unwrap_or(Element::Null)
}

fn cartesian_concat(left: &[Tuple], right: &[Tuple]) -> Vec<Tuple> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            let mut combined = l.clone();
            combined.extend(r.iter().cloned());
            out.push(combined);
        }
    }
    out
}
