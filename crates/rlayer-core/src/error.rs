use rlayer_tuple::DecodeError;
use thiserror::Error;

/// Extra diagnostic context for [`Error::Internal`] — enough to locate the
/// failure (index name, primary key, field path) without the caller having
/// to re-derive it from a bare message, per spec's §7 category-3 contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalError {
    pub message: String,
    pub index: Option<String>,
    pub primary_key: Option<Vec<u8>>,
    pub field_path: Option<String>,
}

impl InternalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), index: None, primary_key: None, field_path: None }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn with_primary_key(mut self, pk: Vec<u8>) -> Self {
        self.primary_key = Some(pk);
        self
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }
}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(index) = &self.index {
            write!(f, " (index={index})")?;
        }
        if let Some(pk) = &self.primary_key {
            write!(f, " (primary_key={})", hex::encode(pk))?;
        }
        if let Some(path) = &self.field_path {
            write!(f, " (field_path={path})")?;
        }
        Ok(())
    }
}

/// Errors observed at the record layer's boundary (spec §6/§7).
///
/// Contract violations (`UniqueViolation`..`ConcurrentStateChange`) are the
/// caller's fault and are surfaced verbatim, never retried. `Internal` is a
/// fatal invariant breach. `Store` wraps whatever the underlying `KVStore`
/// or serializer reported.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unique constraint violated on index {index}: primary key {primary_key:02x?} already present")]
    UniqueViolation { index: String, primary_key: Vec<u8> },

    #[error("version mismatch: expected {expected:?}, found {actual:?}")]
    VersionMismatch { expected: Option<[u8; 12]>, actual: Option<[u8; 12]> },

    #[error("unknown record type: {0}")]
    UnknownRecordType(String),

    #[error("unknown index: {0}")]
    UnknownIndex(String),

    #[error("index on `{field}` must select .lowerBound or .upperBound, not the range field directly")]
    DirectRangeIndexForbidden { field: String },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("coordinate out of range on axis {axis}: {value}")]
    CoordinateOutOfRange { axis: usize, value: f64 },

    #[error("schema incompatible: {0:?}")]
    SchemaIncompatible(Vec<String>),

    #[error("concurrent state change on index {0}")]
    ConcurrentStateChange(String),

    #[error("non-numeric summand on index {0}")]
    NonNumericSummand(String),

    #[error("{0}")]
    Internal(InternalError),

    #[error(transparent)]
    Codec(#[from] DecodeError),

    #[error("kv store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;
