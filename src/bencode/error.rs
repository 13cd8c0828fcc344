use thiserror::Error;

use super::value::ValueKind;

#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid string length")]
    InvalidStringLength,

    #[error("unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("dictionary key at offset {0} is not a byte string")]
    NonStringKey(usize),

    #[error("trailing data after value")]
    TrailingData,

    #[error("nesting too deep")]
    NestingTooDeep,

    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("byte string is not valid utf-8")]
    InvalidUtf8,
}

impl BencodeError {
    /// Returns `true` if the error means the input bytes are not valid bencode.
    ///
    /// Accessor failures (`TypeMismatch`, `InvalidUtf8`) are not encoding
    /// problems.
    pub fn is_malformed(&self) -> bool {
        !matches!(
            self,
            BencodeError::TypeMismatch { .. } | BencodeError::InvalidUtf8
        )
    }
}
