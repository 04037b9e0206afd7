//! Shared types the rest of the record layer is built on: the field
//! accessor/serializer contract an application record type must supply,
//! the key-expression algebra indexes are defined with, schema metadata,
//! the underlying key-value store contract, and the crate's error type.

mod accessor;
mod error;
mod expr;
mod kv;
mod path;
mod schema;

pub use accessor::{FieldAccessor, Serializer, Tuple};
pub use error::{Error, InternalError, Result};
pub use expr::{BoundaryKind, KeyExpression, RangeComponent};
pub use kv::{KVStore, KeyRange, KeyValue, Transaction, TransactionMode};
pub use path::FieldPath;
pub use schema::{
    FormerIndex, IndexDef, IndexKind, Permutation, RangeMetadata, RecordTypeMetadata, Schema,
    SpatialDimensions,
};

pub use rlayer_tuple::{Element, OrderedFloat, Subspace, VersionStamp};
