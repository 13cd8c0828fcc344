use thiserror::Error;

/// Errors that end a single peer connection.
///
/// None of these are fatal to a download; the connection is closed and its
/// claims are released.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The preamble was not a BitTorrent handshake.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The peer answered for a different torrent.
    #[error("info hash mismatch")]
    HandshakeMismatch,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    /// Well-formed message that breaks the protocol's rules.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The caller tried to send a request while choked or not interested.
    #[error("request not permitted: choked or not interested")]
    RequestNotPermitted,
}

impl PeerError {
    /// Returns `true` if the peer misbehaved, as opposed to the link failing.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            PeerError::InvalidHandshake
                | PeerError::HandshakeMismatch
                | PeerError::InvalidMessage(_)
                | PeerError::InvalidMessageId(_)
                | PeerError::Protocol(_)
        )
    }
}
