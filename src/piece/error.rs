use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PieceError {
    /// Handing a verified piece to storage failed. The piece is back in the
    /// allocation pool.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A block did not have the length its claim asked for.
    #[error("block for piece {piece} at {offset} is {actual} bytes, expected {expected}")]
    BlockLength {
        piece: u32,
        offset: u32,
        expected: u32,
        actual: usize,
    },

    /// A piece longer than the wire protocol can address.
    #[error("piece {0} is too large")]
    PieceTooLarge(u32),

    #[error("hashing task failed: {0}")]
    Hashing(String),
}
