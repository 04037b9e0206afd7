use rlayer_core::{BoundaryKind, Element, FieldAccessor};
use rlayer_query::Predicate;

/// Re-checks `predicate` against a deserialized record. The planner's
/// `Filter` node only carries which field paths are left unverified, not
/// the predicates themselves (it has no serializer to check a record with),
/// so the facade re-evaluates every predicate here rather than trusting a
/// scan to have fully proven the match — this also quietly covers any
/// index lagging in `WriteOnly` that still got chosen as a candidate.
///
/// `VectorNearest` predicates are not re-checked: the planner's top-k scan
/// is already the source of truth for "nearest", and re-deriving the same
/// distance metric here would just duplicate `rlayer_index::vector`.
pub fn matches<R>(predicate: &Predicate, record: &R, accessor: &dyn FieldAccessor<R>) -> bool {
    match predicate {
        Predicate::Equals { path, value } => {
            accessor.extract(record, path).iter().any(|tuple| tuple.first() == Some(value))
        }
        Predicate::Range { path, lower, upper, boundary } => accessor
            .extract(record, path)
            .iter()
            .filter_map(|tuple| tuple.first())
            .any(|element| in_range(element, lower.as_ref(), upper.as_ref(), *boundary)),
        Predicate::VectorNearest { .. } => true,
        Predicate::And(children) => children.iter().all(|p| matches(p, record, accessor)),
        Predicate::Or(children) => children.iter().any(|p| matches(p, record, accessor)),
        Predicate::Not(inner) => !matches(inner, record, accessor),
    }
}

fn in_range(value: &Element, lower: Option<&Element>, upper: Option<&Element>, boundary: BoundaryKind) -> bool {
    if let Some(lower) = lower {
        if value < lower {
            return false;
        }
    }
    if let Some(upper) = upper {
        match boundary {
            BoundaryKind::HalfOpen if value >= upper => return false,
            BoundaryKind::Closed if value > upper => return false,
            _ => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use rlayer_core::{FieldPath, Tuple};

    use super::*;

    struct ScalarField(&'static str, Element);
    impl FieldAccessor<ScalarField> for ScalarField {
        fn extract(&self, record: &ScalarField, path: &FieldPath) -> Vec<Tuple> {
            if path.to_string() == record.0 {
                vec![vec![record.1.clone()]]
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn equals_matches_only_the_same_value() {
        let record = ScalarField("city", Element::str("Rio"));
        let hit = Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Rio") };
        let miss = Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Oslo") };
        assert!(matches(&hit, &record, &record));
        assert!(!matches(&miss, &record, &record));
    }

    #[test]
    fn half_open_range_excludes_upper_bound() {
        let record = ScalarField("age", Element::Int(30));
        let inside = Predicate::Range {
            path: FieldPath::from("age"),
            lower: Some(Element::Int(20)),
            upper: Some(Element::Int(30)),
            boundary: BoundaryKind::HalfOpen,
        };
        let closed = Predicate::Range {
            path: FieldPath::from("age"),
            lower: Some(Element::Int(20)),
            upper: Some(Element::Int(30)),
            boundary: BoundaryKind::Closed,
        };
        assert!(!matches(&inside, &record, &record));
        assert!(matches(&closed, &record, &record));
    }

    #[test]
    fn unbounded_side_always_passes() {
        let record = ScalarField("age", Element::Int(5));
        let predicate = Predicate::Range {
            path: FieldPath::from("age"),
            lower: None,
            upper: Some(Element::Int(10)),
            boundary: BoundaryKind::HalfOpen,
        };
        assert!(matches(&predicate, &record, &record));
    }

    #[test]
    fn or_matches_if_either_branch_matches() {
        let record = ScalarField("city", Element::str("Rio"));
        let predicate = Predicate::or(vec![
            Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Oslo") },
            Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Rio") },
        ]);
        assert!(matches(&predicate, &record, &record));
    }

    #[test]
    fn and_requires_every_branch_to_match() {
        let record = ScalarField("city", Element::str("Rio"));
        let predicate = Predicate::and(vec![
            Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Rio") },
            Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Oslo") },
        ]);
        assert!(!matches(&predicate, &record, &record));
    }

    #[test]
    fn not_inverts_the_inner_predicate() {
        let record = ScalarField("city", Element::str("Rio"));
        let predicate =
            Predicate::not(Predicate::Equals { path: FieldPath::from("city"), value: Element::str("Oslo") });
        assert!(matches(&predicate, &record, &record));
    }
}
