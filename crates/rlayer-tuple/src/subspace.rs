use crate::codec;
use crate::element::Element;
use crate::error::{DecodeError, Result};

/// An immutable byte prefix under which a set of keys is organized.
///
/// Extending a subspace with a tuple yields a new, independent subspace;
/// the original is never mutated. This is how the record layer builds its
/// hierarchical keyspace (`R/<type>/...`, `I/<index>/...`, `S/<index>`)
/// out of a single caller-supplied root prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn root() -> Self {
        Self { prefix: Vec::new() }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Returns a new subspace nested under this one by appending the
    /// encoding of `tuple`.
    pub fn subspace(&self, tuple: &[Element]) -> Subspace {
        let mut prefix = self.prefix.clone();
        prefix.extend(codec::encode(tuple));
        Subspace { prefix }
    }

    /// `prefix ++ encode(tuple)` — the key for `tuple` within this subspace.
    pub fn pack(&self, tuple: &[Element]) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.extend(codec::encode(tuple));
        key
    }

    /// Strict-checks that `key` starts with this subspace's prefix, strips
    /// it, and decodes the remainder as a tuple.
    pub fn unpack(&self, key: &[u8]) -> Result<Vec<Element>> {
        let rest = key.strip_prefix(self.prefix.as_slice()).ok_or(DecodeError::PrefixMismatch)?;
        codec::decode(rest)
    }

    /// The half-open byte range `[prefix, prefix ++ 0xFF)` covering every
    /// key in this subspace, for a prefix scan.
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        let begin = self.prefix.clone();
        let mut end = self.prefix.clone();
        end.push(0xFF);
        (begin, end)
    }

    /// The half-open byte range covering only keys whose tuple begins with
    /// `tuple` (a prefix scan scoped one level deeper than [`Self::range`]).
    pub fn range_for(&self, tuple: &[Element]) -> (Vec<u8>, Vec<u8>) {
        self.subspace(tuple).range()
    }
}

impl From<&str> for Subspace {
    fn from(s: &str) -> Self {
        Subspace::new(s.as_bytes().to_vec())
    }
}
