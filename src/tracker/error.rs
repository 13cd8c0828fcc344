use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// The tracker answered with a `failure reason`.
    #[error("tracker rejected announce: {0}")]
    Rejected(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The tracker URL uses a transport this client does not speak.
    #[error("unsupported tracker transport: {0}")]
    UnsupportedTransport(String),

    /// Every tracker in the list failed or was unusable.
    #[error("all trackers failed")]
    Exhausted,
}

impl TrackerError {
    /// Returns `true` if announcing to the same tracker again later may succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TrackerError::UnsupportedTransport(_) | TrackerError::Exhausted
        )
    }
}
