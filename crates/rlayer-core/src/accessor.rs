use crate::error::Result;
use crate::path::FieldPath;
use rlayer_tuple::Element;

/// One resolved key-expression result: an ordered tuple of scalar elements.
pub type Tuple = Vec<Element>;

/// Total, pluggable access into an application record type `R`.
///
/// `extract` already resolves repeated fields: for a scalar leaf it returns
/// one single-element tuple, for a repeated leaf it returns one
/// single-element tuple per repetition, and an absent optional returns an
/// empty `Vec`. This is the one capability the core needs from the
/// application's record shape — see spec §3/§4.2.
///
/// A field of `Range` type is represented as a two-element tuple
/// `[lower_bound, upper_bound]`, with [`Element::Null`] standing in for an
/// unbounded side; [`crate::expr::KeyExpression::RangeKey`] projects one
/// side out of it. This keeps range semantics out of the accessor and in
/// the expression evaluator, so implementors only ever deal in tuples.
pub trait FieldAccessor<R>: Send + Sync {
    fn extract(&self, record: &R, path: &FieldPath) -> Vec<Tuple>;
}

/// Total (de)serialization of an application record type `R`.
///
/// Must not reorder fields in a way that changes the wire contract across
/// schema versions — the record store treats `serialize`/`deserialize` as
/// the single source of truth for what's on disk.
pub trait Serializer<R>: Send + Sync {
    fn serialize(&self, record: &R) -> Vec<u8>;
    fn deserialize(&self, bytes: &[u8]) -> Result<R>;
}
