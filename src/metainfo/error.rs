use thiserror::Error;

use crate::bencode::{BencodeError, ValueKind};

/// Errors that can occur when loading a torrent file.
#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The torrent file contains invalid bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    /// A required field is missing from the torrent file.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field holds the wrong kind of bencode value.
    #[error("field {field} should be a {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: ValueKind,
    },

    /// A field has the right type but an unusable value.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// The info hash has an invalid length (must be 20 bytes).
    #[error("invalid info hash length")]
    InvalidInfoHashLength,

    /// An I/O error occurred while reading the torrent file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetainfoError {
    /// Attaches a field name to a failed [`Value`](crate::bencode::Value) accessor.
    pub(crate) fn field(field: &'static str, err: BencodeError) -> Self {
        match err {
            BencodeError::TypeMismatch { expected, .. } => {
                MetainfoError::TypeMismatch { field, expected }
            }
            _ => MetainfoError::InvalidField(field),
        }
    }
}
