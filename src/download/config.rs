use crate::constants::{
    DEFAULT_PORT, KEEPALIVE_INTERVAL, MAX_ANNOUNCE_RETRIES, MAX_PEERS, MIN_ANNOUNCE_INTERVAL,
    PEER_IDLE_TIMEOUT, TRACKER_RETRY_DELAY,
};
use crate::peer::PeerId;
use crate::piece::PieceManagerConfig;
use std::time::Duration;

/// Settings for a [`Download`](super::Download).
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Identity sent in handshakes and announces.
    pub peer_id: PeerId,
    /// Port reported to trackers.
    pub port: u16,
    /// Most peer connections open at once.
    pub max_peers: usize,
    /// A connection that receives nothing for this long is closed.
    pub idle_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Lower bound on the re-announce period, whatever the tracker asks for.
    pub min_announce_interval: Duration,
    /// Wait before announcing again after every tracker failed.
    pub tracker_retry_delay: Duration,
    /// Consecutive recoverable announce failures retried before the
    /// trackers count as exhausted.
    pub max_announce_retries: u32,
    pub piece: PieceManagerConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            peer_id: PeerId::generate(),
            port: DEFAULT_PORT,
            max_peers: MAX_PEERS,
            idle_timeout: PEER_IDLE_TIMEOUT,
            keepalive_interval: KEEPALIVE_INTERVAL,
            min_announce_interval: MIN_ANNOUNCE_INTERVAL,
            tracker_retry_delay: TRACKER_RETRY_DELAY,
            max_announce_retries: MAX_ANNOUNCE_RETRIES,
            piece: PieceManagerConfig::default(),
        }
    }
}
