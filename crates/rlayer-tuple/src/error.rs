use thiserror::Error;

/// Failures from decoding a byte string produced outside of [`crate::encode`],
/// or from stripping a subspace prefix that does not actually prefix the key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input while decoding a tuple element")]
    UnexpectedEof,

    #[error("unknown tuple element tag {0:#04x}")]
    UnknownTag(u8),

    #[error("unterminated byte string")]
    UnterminatedString,

    #[error("invalid utf8 in string element: {0}")]
    InvalidUtf8(String),

    #[error("unterminated nested tuple")]
    UnterminatedTuple,

    #[error("trailing bytes after a complete tuple")]
    TrailingBytes,

    #[error("key does not start with the expected subspace prefix")]
    PrefixMismatch,
}

pub type Result<T> = std::result::Result<T, DecodeError>;
