//! Protocol constants and tuning parameters.
//!
//! Defaults for [`DownloadConfig`](crate::download::DownloadConfig) and
//! [`PieceManagerConfig`](crate::piece::PieceManagerConfig) come from here.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &[u8; 8] = b"-PM0001-";

/// User agent string for HTTP requests
pub const USER_AGENT: &str = "piecemeal/0.1.0";

/// Default BitTorrent listen port
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Connection limits
// ============================================================================

/// Maximum peers a single download talks to at once
pub const MAX_PEERS: usize = 30;

/// Outstanding block claims allowed per connection
pub const PIPELINE_DEPTH: usize = 5;

/// Piece failures attributable to one connection before it is poisoned
pub const MAX_HASH_FAILURES: u32 = 3;

// ============================================================================
// Block and message sizes
// ============================================================================

/// Standard block size (16KB)
pub const BLOCK_SIZE: u32 = 16384;

/// Largest frame accepted from a peer. A piece message carrying a full block
/// is 13 bytes of header plus the block; bitfields of very large torrents
/// stay well below this.
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

// ============================================================================
// Timeouts
// ============================================================================

/// TCP connection timeout
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake timeout after TCP connect
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A peer that sends nothing for this long is dropped
pub const PEER_IDLE_TIMEOUT: Duration = Duration::from_secs(180);

/// Timeout for a single write to a peer
pub const PEER_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a block claim may stay outstanding before it is reaped
pub const CLAIM_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP tracker request timeout
pub const HTTP_TRACKER_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Intervals
// ============================================================================

/// Keepalive message interval
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// How often the reaper sweeps expired claims
pub const REAPER_INTERVAL: Duration = Duration::from_secs(5);

/// Announce interval used until a tracker tells us otherwise
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1800);

/// Floor for tracker-provided announce intervals
pub const MIN_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(60);

/// Delay before retrying when every tracker failed
pub const TRACKER_RETRY_DELAY: Duration = Duration::from_secs(15);

/// Consecutive recoverable announce failures retried before giving up
pub const MAX_ANNOUNCE_RETRIES: u32 = 5;

// ============================================================================
// Protocol constants
// ============================================================================

/// BitTorrent protocol string
pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// Reserved bytes in handshake. No extensions are negotiated.
pub const RESERVED_BYTES: [u8; 8] = [0; 8];

/// Pieces verified concurrently by `PieceManager::resume`
pub const RESUME_VERIFY_CONCURRENCY: usize = 4;
