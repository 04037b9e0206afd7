//! Pre-commit compatibility checks between two [`Schema`] snapshots (spec
//! §4.11): rejects a metadata change that would silently desynchronize
//! persisted data from what the new metadata claims about it, unless the
//! caller explicitly opts into an index rebuild.

use std::collections::HashSet;

use rlayer_core::{IndexKind, Schema};
use tracing::instrument;

/// One incompatibility found between an old and a new [`Schema`]. Named
/// after the rule it violates rather than a generic "incompatible" bucket,
/// so a caller can decide per-kind whether to surface, log, or (for
/// `IndexFormatChanged`) trigger a rebuild.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvolutionError {
    RecordTypeRemoved { record_type: String },
    PrimaryKeyChanged { record_type: String },
    FieldRemoved { record_type: String, field: String },
    IndexRemovedWithoutFormer { index: String },
    IndexFormatChanged { index: String },
    FormerIndexConflict { index: String },
}

impl std::fmt::Display for EvolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvolutionError::RecordTypeRemoved { record_type } => {
                write!(f, "record type `{record_type}` was removed")
            }
            EvolutionError::PrimaryKeyChanged { record_type } => {
                write!(f, "primary key of `{record_type}` changed shape")
            }
            EvolutionError::FieldRemoved { record_type, field } => {
                write!(f, "field `{field}` of `{record_type}`'s primary key was removed")
            }
            EvolutionError::IndexRemovedWithoutFormer { index } => {
                write!(f, "index `{index}` was removed without recording a matching former index")
            }
            EvolutionError::IndexFormatChanged { index } => {
                write!(f, "index `{index}` changed kind or key expression without allowing a rebuild")
            }
            EvolutionError::FormerIndexConflict { index } => {
                write!(f, "`{index}` names both a live index and a former index")
            }
        }
    }
}

/// The outcome of one [`validate`] call. Errors are always fully collected —
/// never short-circuited on the first failure — so one pass reports every
/// incompatibility at once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<EvolutionError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<EvolutionError>) -> Self {
        Self { is_valid: errors.is_empty(), errors }
    }
}

/// Compares `old` against `new`, collecting every violation of spec §4.11's
/// rules. `allow_index_rebuilds` waives `IndexFormatChanged` only — every
/// other rule always applies, since they protect data the evolution can't
/// safely reinterpret no matter how the caller wants to handle rebuilds.
#[instrument(skip(old, new))]
pub fn validate(old: &Schema, new: &Schema, allow_index_rebuilds: bool) -> ValidationResult {
    let mut errors = Vec::new();

    for (name, old_type) in &old.record_types {
        let Some(new_type) = new.record_types.get(name) else {
            errors.push(EvolutionError::RecordTypeRemoved { record_type: name.clone() });
            continue;
        };

        if !old_type.primary_key.structurally_equal(&new_type.primary_key) {
            errors.push(EvolutionError::PrimaryKeyChanged { record_type: name.clone() });
        }

        let new_leaves: HashSet<_> = new_type.primary_key.leaf_paths().into_iter().collect();
        for old_leaf in old_type.primary_key.leaf_paths() {
            if !new_leaves.contains(&old_leaf) {
                errors.push(EvolutionError::FieldRemoved {
                    record_type: name.clone(),
                    field: old_leaf.to_string(),
                });
            }
        }
    }

    let former_names: HashSet<&str> = old
        .former_indexes
        .iter()
        .chain(new.former_indexes.iter())
        .map(|f| f.name.as_str())
        .collect();

    for (name, old_index) in &old.indexes {
        match new.indexes.get(name) {
            None => {
                if !new.former_indexes.iter().any(|f| f.name == *name) {
                    errors.push(EvolutionError::IndexRemovedWithoutFormer { index: name.clone() });
                }
            }
            Some(new_index) => {
                let format_changed = !index_kind_matches(&old_index.kind, &new_index.kind)
                    || !old_index.expression.structurally_equal(&new_index.expression);
                if format_changed && !allow_index_rebuilds {
                    errors.push(EvolutionError::IndexFormatChanged { index: name.clone() });
                }
            }
        }
    }

    for name in new.indexes.keys() {
        if former_names.contains(name.as_str()) {
            errors.push(EvolutionError::FormerIndexConflict { index: name.clone() });
        }
    }

    ValidationResult::from_errors(errors)
}

/// Names of indexes present in both `old` and `new` whose kind or key
/// expression changed — the set an `allow_index_rebuilds = true` caller must
/// drive through the administrative `Readable -> WriteOnly` rebuild path
/// (spec §3 Invariant 3) before the new schema can be trusted for reads.
pub fn format_changed_indexes(old: &Schema, new: &Schema) -> Vec<String> {
    old.indexes
        .iter()
        .filter_map(|(name, old_index)| {
            let new_index = new.indexes.get(name)?;
            let format_changed = !index_kind_matches(&old_index.kind, &new_index.kind)
                || !old_index.expression.structurally_equal(&new_index.expression);
            format_changed.then(|| name.clone())
        })
        .collect()
}

/// Same-kind comparison ignoring kind-internal parameters that don't change
/// the on-disk key format (e.g. HNSW's `ef_construction` tunes search
/// quality, not the stored graph's shape) — only the discriminant and the
/// parameters spec §3 documents as format-determining are compared.
fn index_kind_matches(old: &IndexKind, new: &IndexKind) -> bool {
    match (old, new) {
        (IndexKind::Value, IndexKind::Value) => true,
        (IndexKind::Count, IndexKind::Count) => true,
        (IndexKind::Sum, IndexKind::Sum) => true,
        (IndexKind::Version, IndexKind::Version) => true,
        (IndexKind::Rank, IndexKind::Rank) => true,
        (IndexKind::Permuted(a), IndexKind::Permuted(b)) => a == b,
        (
            IndexKind::Vector { dimensions: ad, .. },
            IndexKind::Vector { dimensions: bd, .. },
        ) => ad == bd,
        (
            IndexKind::Spatial { dimensions: ad, depth: ap, .. },
            IndexKind::Spatial { dimensions: bd, depth: bp, .. },
        ) => ad == bd && ap == bp,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use rlayer_core::{FormerIndex, IndexDef, KeyExpression};

    use super::*;

    fn base_schema() -> Schema {
        let mut schema = Schema::new();
        schema.declare_record_type("person", KeyExpression::field("id"));
        schema
            .register_index(IndexDef {
                name: "by_city".into(),
                kind: IndexKind::Value,
                expression: KeyExpression::field("city"),
                record_types: Some(vec!["person".into()]),
                unique: false,
                range_metadata: None,
            })
            .unwrap();
        schema
    }

    #[test]
    fn identical_schemas_are_valid() {
        let schema = base_schema();
        let result = validate(&schema, &schema, false);
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn removed_record_type_is_reported() {
        let old = base_schema();
        let mut new = Schema::new();
        new.register_index(old.index("by_city").unwrap().clone()).unwrap();
        let result = validate(&old, &new, false);
        assert!(result.errors.contains(&EvolutionError::RecordTypeRemoved { record_type: "person".into() }));
    }

    #[test]
    fn primary_key_shape_change_is_reported() {
        let old = base_schema();
        let mut new = base_schema();
        new.record_types.get_mut("person").unwrap().primary_key =
            KeyExpression::concat(vec![KeyExpression::field("id"), KeyExpression::field("tenant")]);
        let result = validate(&old, &new, false);
        assert!(result.errors.iter().any(|e| matches!(e, EvolutionError::PrimaryKeyChanged { .. })));
    }

    #[test]
    fn removing_a_primary_key_field_is_reported() {
        let old = base_schema();
        let mut new = base_schema();
        new.record_types.get_mut("person").unwrap().primary_key = KeyExpression::field("uuid");
        let result = validate(&old, &new, false);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, EvolutionError::FieldRemoved { field, .. } if field == "id")));
    }

    #[test]
    fn index_removed_without_former_marker_is_reported() {
        let old = base_schema();
        let mut new = Schema::new();
        new.declare_record_type("person", KeyExpression::field("id"));
        let result = validate(&old, &new, false);
        assert!(result.errors.contains(&EvolutionError::IndexRemovedWithoutFormer { index: "by_city".into() }));
    }

    #[test]
    fn index_removed_with_former_marker_is_accepted() {
        let old = base_schema();
        let mut new = Schema::new();
        new.declare_record_type("person", KeyExpression::field("id"));
        new.former_indexes.push(FormerIndex { name: "by_city".into(), added_at_version: 1, removed_at_version: 2 });
        let result = validate(&old, &new, false);
        assert!(result.is_valid);
    }

    #[test]
    fn index_kind_change_is_rejected_unless_rebuilds_allowed() {
        let old = base_schema();
        let mut new = base_schema();
        new.indexes.get_mut("by_city").unwrap().kind = IndexKind::Rank;
        let blocked = validate(&old, &new, false);
        assert!(blocked.errors.contains(&EvolutionError::IndexFormatChanged { index: "by_city".into() }));

        let allowed = validate(&old, &new, true);
        assert!(allowed.is_valid);
    }

    #[test]
    fn format_changed_indexes_names_only_indexes_whose_shape_changed() {
        let old = base_schema();
        let mut new = base_schema();
        new.indexes.get_mut("by_city").unwrap().kind = IndexKind::Rank;
        assert_eq!(format_changed_indexes(&old, &new), vec!["by_city".to_string()]);

        let unchanged = base_schema();
        assert!(format_changed_indexes(&old, &unchanged).is_empty());
    }

    #[test]
    fn new_index_reusing_a_former_name_is_a_conflict() {
        let old = base_schema();
        let mut new = base_schema();
        new.former_indexes.push(FormerIndex { name: "by_city".into(), added_at_version: 1, removed_at_version: 2 });
        let result = validate(&old, &new, false);
        assert!(result.errors.contains(&EvolutionError::FormerIndexConflict { index: "by_city".into() }));
    }

    #[test]
    fn errors_are_fully_collected_not_short_circuited() {
        let old = base_schema();
        let mut new = Schema::new();
        new.former_indexes.push(FormerIndex { name: "by_city".into(), added_at_version: 1, removed_at_version: 2 });
        let result = validate(&old, &new, false);
        assert!(result.errors.iter().any(|e| matches!(e, EvolutionError::RecordTypeRemoved { .. })));
        assert_eq!(result.errors.len(), 1);
    }
}
