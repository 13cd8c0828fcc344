use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one peer connection to the piece manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Returns an id never handed out before in this process.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Exclusive right of one connection to fetch one block until `deadline`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockClaim {
    pub(super) id: u64,
    pub connection: ConnectionId,
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
    pub claimed_at: Instant,
    pub deadline: Instant,
}

impl BlockClaim {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Whether a received `piece` message answers this claim.
    pub fn matches(&self, piece: u32, offset: u32) -> bool {
        self.piece == piece && self.offset == offset
    }
}
