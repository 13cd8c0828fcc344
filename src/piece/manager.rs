use super::claim::{BlockClaim, ConnectionId};
use super::error::PieceError;
use super::state::{PieceState, PieceStatus};
use crate::constants::{
    BLOCK_SIZE, CLAIM_TIMEOUT, MAX_HASH_FAILURES, PIPELINE_DEPTH, REAPER_INTERVAL,
    RESUME_VERIFY_CONCURRENCY,
};
use crate::metainfo::Info;
use crate::peer::Bitfield;
use crate::storage::PieceStorage;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Tuning for a [`PieceManager`].
#[derive(Debug, Clone)]
pub struct PieceManagerConfig {
    pub block_size: u32,
    /// Most claims one connection may hold at once.
    pub pipeline_depth: usize,
    pub claim_timeout: Duration,
    /// Failed pieces a connection may contribute to before it is poisoned.
    pub max_hash_failures: u32,
    pub reaper_interval: Duration,
}

impl Default for PieceManagerConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            pipeline_depth: PIPELINE_DEPTH,
            claim_timeout: CLAIM_TIMEOUT,
            max_hash_failures: MAX_HASH_FAILURES,
            reaper_interval: REAPER_INTERVAL,
        }
    }
}

/// What became of a submitted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Stored in the piece buffer; the piece still has blocks to go.
    Accepted,
    /// Last block of the piece; it verified and was written to storage.
    PieceComplete(u32),
    /// Last block of the piece; the hash did not match and the piece was reset.
    HashMismatch(u32),
    /// The claim was no longer live (released, reaped or never issued).
    Unsolicited,
}

#[derive(Debug, Default)]
struct ConnectionEntry {
    bitfield: Option<Bitfield>,
    claims: HashSet<u64>,
    failures: u32,
    poisoned: bool,
}

struct Inner {
    pieces: Vec<PieceState>,
    /// Number of connections advertising each piece.
    availability: Vec<u32>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    claims: HashMap<u64, BlockClaim>,
    next_claim_id: u64,
    completed: usize,
    downloaded: u64,
}

impl Inner {
    /// Rarest piece the peer has that still has a free block. Ties go to the
    /// lowest index.
    fn select_piece(&self, bitfield: &Bitfield) -> Option<usize> {
        self.pieces
            .iter()
            .enumerate()
            .filter(|(i, p)| p.is_selectable() && bitfield.has(*i) && p.first_free_block().is_some())
            .min_by_key(|(i, _)| (self.availability[*i], *i))
            .map(|(i, _)| i)
    }

    fn release(&mut self, claim_id: u64) -> Option<BlockClaim> {
        let claim = self.claims.remove(&claim_id)?;
        if let Some(entry) = self.connections.get_mut(&claim.connection) {
            entry.claims.remove(&claim_id);
        }

        let piece = &mut self.pieces[claim.piece as usize];
        if let Some(block) = piece.block_at(claim.offset) {
            if piece.claimed[block] == Some(claim_id) {
                piece.claimed[block] = None;
            }
        }
        piece.refresh_status();
        Some(claim)
    }

    fn release_connection(&mut self, conn: ConnectionId) -> usize {
        let ids: Vec<u64> = match self.connections.get(&conn) {
            Some(entry) => entry.claims.iter().copied().collect(),
            None => return 0,
        };
        ids.iter().filter(|id| self.release(**id).is_some()).count()
    }
}

/// Central block allocator shared by every connection of a download.
///
/// Hands out [`BlockClaim`]s rarest-first, assembles submitted blocks,
/// verifies finished pieces and writes them to the storage sink. All
/// bookkeeping sits behind one lock so that no two connections ever hold a
/// claim on the same block; SHA-1 and storage writes run outside it.
pub struct PieceManager {
    inner: Mutex<Inner>,
    storage: Arc<dyn PieceStorage>,
    config: PieceManagerConfig,
    completed_tx: broadcast::Sender<u32>,
    total_length: u64,
}

impl PieceManager {
    pub fn new(
        info: &Info,
        storage: Arc<dyn PieceStorage>,
        config: PieceManagerConfig,
    ) -> Result<Self, PieceError> {
        let mut pieces = Vec::with_capacity(info.piece_count());
        for (index, hash) in info.pieces.iter().enumerate() {
            let index = index as u32;
            let length = info.piece_len(index).unwrap_or_default();
            let length = u32::try_from(length).map_err(|_| PieceError::PieceTooLarge(index))?;
            pieces.push(PieceState::new(length, *hash, config.block_size));
        }

        let (completed_tx, _) = broadcast::channel(pieces.len().clamp(16, 1024));
        let availability = vec![0; pieces.len()];

        Ok(Self {
            inner: Mutex::new(Inner {
                pieces,
                availability,
                connections: HashMap::new(),
                claims: HashMap::new(),
                next_claim_id: 1,
                completed: 0,
                downloaded: 0,
            }),
            storage,
            config,
            completed_tx,
            total_length: info.total_length,
        })
    }

    pub fn config(&self) -> &PieceManagerConfig {
        &self.config
    }

    /// Claims the next block for `conn` from the pieces `peer_bitfield` has.
    ///
    /// Returns `None` if the connection is poisoned, already holds
    /// `pipeline_depth` claims, or the peer has nothing we still need.
    pub fn claim_next_block(
        &self,
        conn: ConnectionId,
        peer_bitfield: &Bitfield,
    ) -> Option<BlockClaim> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let entry = inner.connections.entry(conn).or_default();
        if entry.poisoned || entry.claims.len() >= self.config.pipeline_depth {
            return None;
        }

        let index = inner.select_piece(peer_bitfield)?;
        let piece = &mut inner.pieces[index];
        let block = piece.first_free_block()?;

        let id = inner.next_claim_id;
        inner.next_claim_id += 1;

        let now = Instant::now();
        let claim = BlockClaim {
            id,
            connection: conn,
            piece: index as u32,
            offset: piece.block_offset(block),
            length: piece.block_len(block),
            claimed_at: now,
            deadline: now + self.config.claim_timeout,
        };

        piece.claimed[block] = Some(id);
        piece.refresh_status();
        inner.claims.insert(id, claim.clone());
        inner
            .connections
            .entry(conn)
            .or_default()
            .claims
            .insert(id);

        trace!(%conn, piece = claim.piece, offset = claim.offset, "claimed block");
        Some(claim)
    }

    /// Stores the data for a claimed block.
    ///
    /// When this completes a piece, the piece is hashed and, if it matches,
    /// written to storage before this returns. Completion is announced on
    /// [`subscribe_completed`](Self::subscribe_completed).
    pub async fn submit_block(
        &self,
        claim: &BlockClaim,
        data: Bytes,
    ) -> Result<SubmitOutcome, PieceError> {
        let (index, assembled, expected, contributors) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;

            // Offsets and lengths come from the stored claim; a caller's copy
            // that differs from it in any field is not an answer to it.
            let claim = match inner.claims.get(&claim.id) {
                Some(live) if live == claim => live.clone(),
                _ => {
                    trace!(conn = %claim.connection, piece = claim.piece, offset = claim.offset, "unsolicited block");
                    return Ok(SubmitOutcome::Unsolicited);
                }
            };
            let index = claim.piece;

            inner.release(claim.id);

            if data.len() != claim.length as usize {
                return Err(PieceError::BlockLength {
                    piece: index,
                    offset: claim.offset,
                    expected: claim.length,
                    actual: data.len(),
                });
            }

            let piece = &mut inner.pieces[index as usize];
            let Some(block) = piece.block_at(claim.offset) else {
                return Ok(SubmitOutcome::Unsolicited);
            };

            let length = piece.length as usize;
            let start = claim.offset as usize;
            let buffer = piece.buffer.get_or_insert_with(|| vec![0u8; length]);
            buffer[start..start + data.len()].copy_from_slice(&data);
            piece.written[block] = true;
            piece.contributors.insert(claim.connection);
            piece.refresh_status();
            inner.downloaded += data.len() as u64;

            if !piece.is_fully_written() {
                return Ok(SubmitOutcome::Accepted);
            }

            piece.status = PieceStatus::Verifying;
            let assembled = Bytes::from(piece.buffer.take().unwrap_or_default());
            let contributors = std::mem::take(&mut piece.contributors);
            (index, assembled, piece.expected_hash, contributors)
        };

        let (assembled, valid) = match hash_matches(assembled, expected).await {
            Ok(result) => result,
            Err(e) => {
                self.inner.lock().pieces[index as usize].reset();
                return Err(e);
            }
        };

        if !valid {
            self.record_hash_failure(index, contributors);
            return Ok(SubmitOutcome::HashMismatch(index));
        }

        if let Err(e) = self.storage.write_piece(index, assembled).await {
            warn!("Failed to store piece {}: {}", index, e);
            self.inner.lock().pieces[index as usize].reset();
            return Err(e.into());
        }

        let completed = {
            let mut inner = self.inner.lock();
            inner.pieces[index as usize].mark_complete();
            inner.completed += 1;
            inner.completed
        };

        debug!(
            "Piece {} verified ({}/{})",
            index,
            completed,
            self.piece_count()
        );
        let _ = self.completed_tx.send(index);

        Ok(SubmitOutcome::PieceComplete(index))
    }

    fn record_hash_failure(&self, index: u32, contributors: HashSet<ConnectionId>) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.pieces[index as usize].status = PieceStatus::Failed;

        warn!(
            "Piece {} failed hash check, {} contributing connection(s)",
            index,
            contributors.len()
        );

        for conn in contributors {
            let Some(entry) = inner.connections.get_mut(&conn) else {
                continue;
            };
            entry.failures += 1;
            if entry.failures >= self.config.max_hash_failures && !entry.poisoned {
                entry.poisoned = true;
                warn!(%conn, failures = entry.failures, "connection poisoned");
            }
        }

        inner.pieces[index as usize].reset();
    }

    /// Releases every claim `conn` holds. Returns how many were released.
    pub fn release_claims(&self, conn: ConnectionId) -> usize {
        let released = self.inner.lock().release_connection(conn);
        if released > 0 {
            debug!(%conn, released, "released claims");
        }
        released
    }

    /// Forgets a connection: releases its claims and withdraws its pieces
    /// from the availability counts.
    pub fn remove_peer(&self, conn: ConnectionId) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let released = inner.release_connection(conn);
        if let Some(entry) = inner.connections.remove(&conn) {
            if let Some(bitfield) = entry.bitfield {
                for i in bitfield.iter_set() {
                    if let Some(count) = inner.availability.get_mut(i) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }
        released
    }

    /// Records a peer's full bitfield, replacing any earlier one.
    pub fn peer_bitfield(&self, conn: ConnectionId, bitfield: &Bitfield) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let entry = inner.connections.entry(conn).or_default();

        if let Some(old) = entry.bitfield.take() {
            for i in old.iter_set() {
                if let Some(count) = inner.availability.get_mut(i) {
                    *count = count.saturating_sub(1);
                }
            }
        }

        for i in bitfield.iter_set() {
            if let Some(count) = inner.availability.get_mut(i) {
                *count += 1;
            }
        }
        entry.bitfield = Some(bitfield.clone());
    }

    /// Records a `have` from a peer.
    pub fn peer_have(&self, conn: ConnectionId, index: u32) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let piece_count = inner.pieces.len();
        if index as usize >= piece_count {
            return;
        }

        let entry = inner.connections.entry(conn).or_default();
        let bitfield = entry
            .bitfield
            .get_or_insert_with(|| Bitfield::new(piece_count));
        if !bitfield.has(index as usize) {
            bitfield.set(index as usize);
            inner.availability[index as usize] += 1;
        }
    }

    /// Releases every claim whose deadline is at or before `now`.
    pub fn reap_expired(&self, now: Instant) -> Vec<BlockClaim> {
        let mut inner = self.inner.lock();
        let expired: Vec<u64> = inner
            .claims
            .values()
            .filter(|c| c.is_expired(now))
            .map(|c| c.id)
            .collect();

        let reaped: Vec<BlockClaim> = expired
            .into_iter()
            .filter_map(|id| inner.release(id))
            .collect();

        if !reaped.is_empty() {
            debug!("Reaped {} expired claims", reaped.len());
        }
        reaped
    }

    /// Runs [`reap_expired`](Self::reap_expired) every `reaper_interval`
    /// until the manager is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let period = self.config.reaper_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.reap_expired(Instant::now());
            }
        })
    }

    /// Indices of pieces as they complete.
    pub fn subscribe_completed(&self) -> broadcast::Receiver<u32> {
        self.completed_tx.subscribe()
    }

    /// Marks pieces already present and valid in storage as complete.
    ///
    /// Meant to run before any claim is issued. Returns the number of pieces
    /// recovered.
    pub async fn resume(&self) -> Result<usize, PieceError> {
        let candidates: Vec<(u32, [u8; 20])> = {
            let inner = self.inner.lock();
            inner
                .pieces
                .iter()
                .enumerate()
                .filter(|(_, p)| p.status == PieceStatus::Missing)
                .map(|(i, p)| (i as u32, p.expected_hash))
                .collect()
        };

        let verified: Vec<u32> = stream::iter(candidates)
            .map(|(index, expected)| async move {
                let Some(data) = self.storage.read_piece(index).await? else {
                    return Ok(None);
                };
                let (_, valid) = hash_matches(data, expected).await?;
                Ok::<_, PieceError>(valid.then_some(index))
            })
            .buffer_unordered(RESUME_VERIFY_CONCURRENCY)
            .try_filter_map(|index| async move { Ok(index) })
            .try_collect()
            .await?;

        let mut inner = self.inner.lock();
        let mut recovered = 0;
        for index in verified {
            let piece = &mut inner.pieces[index as usize];
            if piece.status == PieceStatus::Missing {
                piece.mark_complete();
                recovered += 1;
            }
        }
        inner.completed += recovered;

        if recovered > 0 {
            info!(
                "Resumed {}/{} pieces from storage",
                recovered,
                inner.pieces.len()
            );
        }
        Ok(recovered)
    }

    /// True iff every piece is complete.
    pub fn is_complete(&self) -> bool {
        let inner = self.inner.lock();
        inner.completed == inner.pieces.len()
    }

    pub fn piece_count(&self) -> usize {
        self.inner.lock().pieces.len()
    }

    pub fn completed_count(&self) -> usize {
        self.inner.lock().completed
    }

    pub fn piece_status(&self, index: u32) -> Option<PieceStatus> {
        self.inner
            .lock()
            .pieces
            .get(index as usize)
            .map(|p| p.status)
    }

    /// Our own pieces as a bitfield.
    pub fn have_bitfield(&self) -> Bitfield {
        let inner = self.inner.lock();
        let mut bitfield = Bitfield::new(inner.pieces.len());
        for (i, piece) in inner.pieces.iter().enumerate() {
            if piece.status == PieceStatus::Complete {
                bitfield.set(i);
            }
        }
        bitfield
    }

    /// Whether the peer has any piece we still need.
    pub fn wants_any(&self, peer_bitfield: &Bitfield) -> bool {
        let inner = self.inner.lock();
        inner
            .pieces
            .iter()
            .enumerate()
            .any(|(i, p)| p.status != PieceStatus::Complete && peer_bitfield.has(i))
    }

    /// Bytes of pieces not yet complete.
    pub fn bytes_left(&self) -> u64 {
        let inner = self.inner.lock();
        let done: u64 = inner
            .pieces
            .iter()
            .filter(|p| p.status == PieceStatus::Complete)
            .map(|p| u64::from(p.length))
            .sum();
        self.total_length - done
    }

    /// Block bytes accepted from peers, including pieces that later failed
    /// verification.
    pub fn downloaded_bytes(&self) -> u64 {
        self.inner.lock().downloaded
    }

    pub fn is_poisoned(&self, conn: ConnectionId) -> bool {
        self.inner
            .lock()
            .connections
            .get(&conn)
            .is_some_and(|e| e.poisoned)
    }

    /// Claims `conn` currently holds.
    pub fn outstanding(&self, conn: ConnectionId) -> usize {
        self.inner
            .lock()
            .connections
            .get(&conn)
            .map_or(0, |e| e.claims.len())
    }

    /// Blocks that are neither written nor claimed in pieces still being
    /// downloaded.
    pub fn unclaimed_blocks(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .pieces
            .iter()
            .filter(|p| p.is_selectable())
            .map(|p| {
                (0..p.block_count())
                    .filter(|&b| !p.written[b] && p.claimed[b].is_none())
                    .count()
            })
            .sum()
    }
}

async fn hash_matches(data: Bytes, expected: [u8; 20]) -> Result<(Bytes, bool), PieceError> {
    tokio::task::spawn_blocking(move || {
        let digest: [u8; 20] = Sha1::digest(&data).into();
        let valid = digest == expected;
        (data, valid)
    })
    .await
    .map_err(|e| PieceError::Hashing(e.to_string()))
}
