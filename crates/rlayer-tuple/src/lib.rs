//! Ordering-preserving tuple encoding and hierarchical subspaces.
//!
//! Everything above this crate assumes that a prefix scan over the KV store
//! returns entries in tuple order; [`codec::encode`]/[`codec::decode`] are
//! where that guarantee actually lives. Any change here has to be made with
//! the ordering invariant (`a < b => encode(a) < encode(b)` lexicographically)
//! front of mind — see `tests` below for the exhaustive same-type checks.

mod codec;
mod element;
mod error;
mod subspace;

pub use codec::{decode, encode, encode_concat};
pub use element::{Element, OrderedFloat, VersionStamp};
pub use error::{DecodeError, Result};
pub use subspace::Subspace;
