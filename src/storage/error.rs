use thiserror::Error;

/// Failures of a [`PieceStorage`](super::PieceStorage) sink.
///
/// Any of these ends a download: a sink that cannot take verified data is
/// not something another peer can fix.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("piece {0} is out of range")]
    InvalidPieceIndex(u32),

    #[error("piece {piece} is {actual} bytes, expected {expected}")]
    InvalidPieceLength {
        piece: u32,
        expected: u64,
        actual: u64,
    },

    #[error("file path escapes the download directory: {0}")]
    PathTraversal(String),
}
