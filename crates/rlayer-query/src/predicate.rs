use rlayer_core::{BoundaryKind, Element, FieldPath};

/// One condition a query asks every matching record to satisfy (spec §4.8):
/// a boolean algebra of `And`/`Or`/`Not` over leaf field comparisons. A
/// [`Query`]'s top-level `predicates` list is itself an implicit `And`.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Equals { path: FieldPath, value: Element },
    /// `lower`/`upper` are `None` for an unbounded side.
    Range { path: FieldPath, lower: Option<Element>, upper: Option<Element>, boundary: BoundaryKind },
    VectorNearest { path: FieldPath, query: Vec<f64>, k: usize },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn and(predicates: Vec<Predicate>) -> Predicate {
        Predicate::And(predicates)
    }

    pub fn or(predicates: Vec<Predicate>) -> Predicate {
        Predicate::Or(predicates)
    }

    pub fn not(predicate: Predicate) -> Predicate {
        Predicate::Not(Box::new(predicate))
    }

    /// A stable label for this predicate's shape (combinator structure and
    /// field paths, never literal values) — used both as the planner's
    /// per-predicate plan-cache fragment and as a `Filter` node's
    /// human-readable residual description.
    pub fn describe(&self) -> String {
        match self {
            Predicate::Equals { path, .. } => format!("eq:{path}"),
            Predicate::Range { path, .. } => format!("range:{path}"),
            Predicate::VectorNearest { path, k, .. } => format!("vec:{path}:{k}"),
            Predicate::And(children) => {
                format!("and({})", children.iter().map(Predicate::describe).collect::<Vec<_>>().join(","))
            }
            Predicate::Or(children) => {
                format!("or({})", children.iter().map(Predicate::describe).collect::<Vec<_>>().join(","))
            }
            Predicate::Not(inner) => format!("not({})", inner.describe()),
        }
    }

    /// Normalizes the predicate per spec §4.7's planning step: flattens
    /// nested `And`/`Or` of the same kind and pushes `Not` down to the
    /// leaves via De Morgan's laws. A `Not` wrapping a leaf comparison has
    /// no further simplification available (leaf kinds carry no built-in
    /// negation) and is left in place — the planner treats any `Not` it
    /// meets as unindexable and falls back to residual filtering for it.
    pub fn normalize(&self) -> Predicate {
        match self {
            Predicate::Not(inner) => match inner.normalize() {
                Predicate::And(children) => {
                    Predicate::Or(children.into_iter().map(|c| Predicate::not(c).normalize()).collect())
                }
                Predicate::Or(children) => {
                    Predicate::And(children.into_iter().map(|c| Predicate::not(c).normalize()).collect())
                }
                Predicate::Not(double_negated) => *double_negated,
                leaf => Predicate::not(leaf),
            },
            Predicate::And(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.normalize() {
                        Predicate::And(nested) => flat.extend(nested),
                        other => flat.push(other),
                    }
                }
                Predicate::And(flat)
            }
            Predicate::Or(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.normalize() {
                        Predicate::Or(nested) => flat.extend(nested),
                        other => flat.push(other),
                    }
                }
                Predicate::Or(flat)
            }
            leaf => leaf.clone(),
        }
    }
}

/// A query against one record type: its predicates (ANDed), an optional
/// result cap, and whether results must come back primary-key ordered.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub record_type: String,
    pub predicates: Vec<Predicate>,
    pub limit: Option<usize>,
    pub sorted: bool,
}

impl Query {
    pub fn new(record_type: impl Into<String>) -> Self {
        Self { record_type: record_type.into(), predicates: Vec::new(), limit: None, sorted: false }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn sorted(mut self) -> Self {
        self.sorted = true;
        self
    }

    /// The top-level predicates after the planner's normalize step (flatten
    /// `And`/`Or`, push `Not` down). Computed fresh each call rather than
    /// cached, since it's cheap and this keeps `Query` itself immutable.
    pub fn normalized_predicates(&self) -> Vec<Predicate> {
        self.predicates.iter().map(Predicate::normalize).collect()
    }

    /// A stable signature identifying this query's shape (not its literal
    /// values) for the plan cache — two queries with the same predicate
    /// paths/kinds/combinators in the same order hit the same cache entry.
    pub fn shape_key(&self) -> String {
        let mut key = format!("{}|L{:?}|S{}", self.record_type, self.limit, self.sorted);
        for p in &self.predicates {
            key.push('|');
            key.push_str(&p.describe());
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_key_ignores_literal_values() {
        let a = Query::new("person").filter(Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Rio") });
        let b = Query::new("person").filter(Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Oslo") });
        assert_eq!(a.shape_key(), b.shape_key());
    }

    #[test]
    fn shape_key_distinguishes_predicate_kind_and_path() {
        let equals = Query::new("person").filter(Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Rio") });
        let range = Query::new("person").filter(Predicate::Range {
            path: FieldPath::from("city"),
            lower: None,
            upper: None,
            boundary: BoundaryKind::HalfOpen,
        });
        assert_ne!(equals.shape_key(), range.shape_key());
    }

    #[test]
    fn builder_methods_compose() {
        let query = Query::new("person")
            .filter(Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Rio") })
            .limit(10)
            .sorted();
        assert_eq!(query.predicates.len(), 1);
        assert_eq!(query.limit, Some(10));
        assert!(query.sorted);
    }

    fn eq(path: &str, value: &str) -> Predicate {
        Predicate::Equals { path: FieldPath::from(path), value: Element::str(value) }
    }

    #[test]
    fn normalize_flattens_nested_and() {
        let nested = Predicate::and(vec![eq("a", "1"), Predicate::and(vec![eq("b", "2"), eq("c", "3")])]);
        match nested.normalize() {
            Predicate::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected a flat And, got {other:?}"),
        }
    }

    #[test]
    fn normalize_flattens_nested_or() {
        let nested = Predicate::or(vec![eq("a", "1"), Predicate::or(vec![eq("b", "2"), eq("c", "3")])]);
        match nested.normalize() {
            Predicate::Or(children) => assert_eq!(children.len(), 3),
            other => panic!("expected a flat Or, got {other:?}"),
        }
    }

    #[test]
    fn normalize_pushes_not_through_and_into_or_of_nots() {
        let predicate = Predicate::not(Predicate::and(vec![eq("a", "1"), eq("b", "2")]));
        match predicate.normalize() {
            Predicate::Or(children) => {
                assert_eq!(children.len(), 2);
                assert!(children.iter().all(|c| matches!(c, Predicate::Not(_))));
            }
            other => panic!("expected Or(Not, Not), got {other:?}"),
        }
    }

    #[test]
    fn normalize_pushes_not_through_or_into_and_of_nots() {
        let predicate = Predicate::not(Predicate::or(vec![eq("a", "1"), eq("b", "2")]));
        match predicate.normalize() {
            Predicate::And(children) => {
                assert_eq!(children.len(), 2);
                assert!(children.iter().all(|c| matches!(c, Predicate::Not(_))));
            }
            other => panic!("expected And(Not, Not), got {other:?}"),
        }
    }

    #[test]
    fn normalize_cancels_double_negation() {
        let predicate = Predicate::not(Predicate::not(eq("a", "1")));
        assert_eq!(predicate.normalize(), eq("a", "1"));
    }

    #[test]
    fn normalize_leaves_a_negated_leaf_in_place() {
        let predicate = Predicate::not(eq("a", "1"));
        assert_eq!(predicate.normalize(), predicate);
    }

    #[test]
    fn describe_ignores_literal_values_for_composites_too() {
        let a = Predicate::or(vec![eq("city", "Rio"), eq("city", "Oslo")]);
        let b = Predicate::or(vec![eq("city", "Berlin"), eq("city", "Lima")]);
        assert_eq!(a.describe(), b.describe());
    }
}
