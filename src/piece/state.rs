use super::claim::ConnectionId;
use std::collections::HashSet;

/// Where a piece is in its lifecycle.
///
/// `Failed` only exists while a hash failure is being charged to the
/// contributing connections, under the manager's lock, so
/// [`PieceManager::piece_status`](super::PieceManager::piece_status) never
/// reports it: the piece is back to `Missing` once the lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceStatus {
    /// No block written and none claimed.
    Missing,
    /// At least one block claimed or written.
    InProgress,
    /// Every block written; hash check running.
    Verifying,
    /// Hash check failed; about to be reset.
    Failed,
    /// Verified and handed to storage.
    Complete,
}

/// Per-piece assembly state. Only touched under the manager's lock.
#[derive(Debug)]
pub(super) struct PieceState {
    pub length: u32,
    pub expected_hash: [u8; 20],
    pub status: PieceStatus,
    pub block_size: u32,
    /// Written blocks, by block index.
    pub written: Vec<bool>,
    /// Live claim id per block.
    pub claimed: Vec<Option<u64>>,
    pub buffer: Option<Vec<u8>>,
    /// Connections that delivered at least one written block.
    pub contributors: HashSet<ConnectionId>,
}

impl PieceState {
    pub fn new(length: u32, expected_hash: [u8; 20], block_size: u32) -> Self {
        let blocks = length.div_ceil(block_size) as usize;
        Self {
            length,
            expected_hash,
            status: PieceStatus::Missing,
            block_size,
            written: vec![false; blocks],
            claimed: vec![None; blocks],
            buffer: None,
            contributors: HashSet::new(),
        }
    }

    pub fn block_count(&self) -> usize {
        self.written.len()
    }

    pub fn block_offset(&self, block: usize) -> u32 {
        block as u32 * self.block_size
    }

    pub fn block_len(&self, block: usize) -> u32 {
        (self.length - self.block_offset(block)).min(self.block_size)
    }

    /// Maps an offset to its block index if it is a block boundary.
    pub fn block_at(&self, offset: u32) -> Option<usize> {
        if offset % self.block_size != 0 {
            return None;
        }
        let block = (offset / self.block_size) as usize;
        (block < self.block_count()).then_some(block)
    }

    pub fn is_selectable(&self) -> bool {
        matches!(self.status, PieceStatus::Missing | PieceStatus::InProgress)
    }

    /// Lowest block neither written nor claimed.
    pub fn first_free_block(&self) -> Option<usize> {
        (0..self.block_count()).find(|&b| !self.written[b] && self.claimed[b].is_none())
    }

    pub fn is_fully_written(&self) -> bool {
        self.written.iter().all(|&w| w)
    }

    /// Recomputes Missing/InProgress after claims or writes changed.
    pub fn refresh_status(&mut self) {
        if !self.is_selectable() {
            return;
        }
        let active = self.written.iter().any(|&w| w) || self.claimed.iter().any(Option::is_some);
        self.status = if active {
            PieceStatus::InProgress
        } else {
            PieceStatus::Missing
        };
    }

    /// Throws away everything written. Claims are left alone.
    pub fn reset(&mut self) {
        self.written.iter_mut().for_each(|w| *w = false);
        self.buffer = None;
        self.contributors.clear();
        self.status = PieceStatus::Missing;
        self.refresh_status();
    }

    pub fn mark_complete(&mut self) {
        self.written.iter_mut().for_each(|w| *w = true);
        self.claimed.iter_mut().for_each(|c| *c = None);
        self.buffer = None;
        self.contributors.clear();
        self.status = PieceStatus::Complete;
    }
}
