use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::expr::{KeyExpression, RangeComponent};
use crate::path::FieldPath;

/// Fixed permutation applied to a `permuted` index's evaluated tuple.
pub type Permutation = Vec<usize>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpatialDimensions {
    Two,
    Three,
}

/// Per-index-kind configuration that doesn't fit the common
/// `{name, kind, fields}` shape (spec §3/§4.4).
#[derive(Clone, Debug, PartialEq)]
pub enum IndexKind {
    Value,
    Count,
    Sum,
    Version,
    Permuted(Permutation),
    Rank,
    Vector { dimensions: usize, m: usize, ef_construction: usize },
    Spatial { dimensions: SpatialDimensions, depth: u32, max_ranges: usize },
}

impl IndexKind {
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Value => "value",
            IndexKind::Count => "count",
            IndexKind::Sum => "sum",
            IndexKind::Version => "version",
            IndexKind::Permuted(_) => "permuted",
            IndexKind::Rank => "rank",
            IndexKind::Vector { .. } => "vector",
            IndexKind::Spatial { .. } => "spatial",
        }
    }
}

/// `{component: lowerBound|upperBound, boundaryType, parentField}` (spec §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeMetadata {
    pub component: RangeComponent,
    pub parent_field: FieldPath,
}

/// `{name, kind, fields, record-types, unique?, expression, options}` (spec §3).
#[derive(Clone, Debug, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub kind: IndexKind,
    pub expression: KeyExpression,
    pub record_types: Option<Vec<String>>,
    pub unique: bool,
    pub range_metadata: Option<RangeMetadata>,
}

impl IndexDef {
    pub fn applies_to(&self, record_type: &str) -> bool {
        match &self.record_types {
            None => true,
            Some(types) => types.iter().any(|t| t == record_type),
        }
    }
}

/// A retired index name: prevents the name from being reused (spec §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormerIndex {
    pub name: String,
    pub added_at_version: u64,
    pub removed_at_version: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordTypeMetadata {
    pub name: String,
    pub primary_key: KeyExpression,
}

/// The set of record types, indexes and retired index names known to the
/// store, plus the monotonic version counter the planner's plan cache and
/// the schema evolution validator both key off (SPEC_FULL §3).
#[derive(Clone, Debug, Default)]
pub struct Schema {
    pub record_types: HashMap<String, RecordTypeMetadata>,
    pub indexes: HashMap<String, IndexDef>,
    pub former_indexes: Vec<FormerIndex>,
    /// Fields declared to hold a `Range` value — used only to detect a
    /// direct (unselected) range index at registration time, since the
    /// core never introspects the application's field types itself.
    pub range_fields: HashSet<FieldPath>,
    pub version: u64,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_record_type(&mut self, name: impl Into<String>, primary_key: KeyExpression) {
        let name = name.into();
        self.record_types.insert(name.clone(), RecordTypeMetadata { name, primary_key });
        self.version += 1;
    }

    pub fn declare_range_field(&mut self, path: impl Into<FieldPath>) {
        self.range_fields.insert(path.into());
    }

    /// Registers a new index. Rejects a direct reference to a declared
    /// range field (`DirectRangeIndexForbidden`) and a name collision with
    /// a retired index (`FormerIndexConflict`).
    pub fn register_index(&mut self, index: IndexDef) -> Result<()> {
        if let Some(former) = self.former_indexes.iter().find(|f| f.name == index.name) {
            return Err(Error::SchemaIncompatible(vec![format!(
                "index name `{}` was retired at version {} and cannot be reused",
                former.name, former.removed_at_version
            )]));
        }
        for leaf in index.expression.leaf_paths() {
            if self.range_fields.contains(&leaf) {
                return Err(Error::DirectRangeIndexForbidden { field: leaf.to_string() });
            }
        }
        self.indexes.insert(index.name.clone(), index);
        self.version += 1;
        Ok(())
    }

    /// Drops an index, recording a `FormerIndex` marker in its place so the
    /// name cannot be reused.
    pub fn drop_index(&mut self, name: &str, added_at_version: u64, removed_at_version: u64) -> Result<()> {
        if self.indexes.remove(name).is_none() {
            return Err(Error::UnknownIndex(name.to_string()));
        }
        self.former_indexes.push(FormerIndex {
            name: name.to_string(),
            added_at_version,
            removed_at_version,
        });
        self.version += 1;
        Ok(())
    }

    pub fn index(&self, name: &str) -> Result<&IndexDef> {
        self.indexes.get(name).ok_or_else(|| Error::UnknownIndex(name.to_string()))
    }

    pub fn record_type(&self, name: &str) -> Result<&RecordTypeMetadata> {
        self.record_types.get(name).ok_or_else(|| Error::UnknownRecordType(name.to_string()))
    }

    /// Every index that applies to `record_type`, regardless of state.
    pub fn indexes_for(&self, record_type: &str) -> Vec<&IndexDef> {
        self.indexes.values().filter(|i| i.applies_to(record_type)).collect()
    }
}
