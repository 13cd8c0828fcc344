use crate::peer::PeerError;
use crate::piece::{ConnectionId, PieceError};
use crate::storage::StorageError;
use crate::tracker::TrackerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Every tracker and every peer is exhausted with pieces still missing.
    #[error("download stalled with {missing} pieces missing")]
    Stalled { missing: usize },

    #[error("download cancelled")]
    Cancelled,

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("piece error: {0}")]
    Piece(#[from] PieceError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The connection delivered too many pieces that failed verification.
    #[error("{0} poisoned by repeated hash failures")]
    Poisoned(ConnectionId),

    #[error("peer task failed: {0}")]
    Task(String),
}

impl DownloadError {
    /// Returns `true` if the whole download must stop, not just one peer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DownloadError::Storage(_) | DownloadError::Piece(PieceError::Storage(_))
        )
    }
}
