use super::config::DownloadConfig;
use super::error::DownloadError;
use crate::peer::{Message, PeerConnection, PeerError};
use crate::piece::{BlockClaim, ConnectionId, PieceManager, SubmitOutcome};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::time::{interval_at, sleep_until, MissedTickBehavior};
use tracing::{debug, trace};

/// A connection's standing with the piece manager. Dropping it releases the
/// connection's claims and availability, also when the task is aborted.
struct Registration {
    manager: Arc<PieceManager>,
    id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let released = self.manager.remove_peer(self.id);
        if released > 0 {
            debug!(conn = %self.id, released, "returned claims of closed connection");
        }
    }
}

/// Downloads from one peer until the torrent is complete or the connection
/// fails.
pub(super) struct PeerWorker<S> {
    // Declared first so claims are released before the connection is dropped.
    registration: Registration,
    conn: PeerConnection<S>,
    manager: Arc<PieceManager>,
    completed: broadcast::Receiver<u32>,
    inflight: Vec<BlockClaim>,
    keepalive_interval: Duration,
    idle_timeout: Duration,
}

impl<S> PeerWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        mut conn: PeerConnection<S>,
        manager: Arc<PieceManager>,
        config: &DownloadConfig,
    ) -> Self {
        conn.set_read_timeout(config.idle_timeout);
        let id = ConnectionId::next();
        debug!(conn = %id, addr = ?conn.addr(), peer_id = ?conn.peer_id(), "peer worker started");

        Self {
            registration: Registration {
                manager: manager.clone(),
                id,
            },
            completed: manager.subscribe_completed(),
            conn,
            manager,
            inflight: Vec::new(),
            keepalive_interval: config.keepalive_interval,
            idle_timeout: config.idle_timeout,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.registration.id
    }

    pub async fn run(mut self) -> Result<(), DownloadError> {
        let result = self.drive().await;
        self.inflight.clear();
        self.manager.remove_peer(self.id());
        self.conn.close();
        result
    }

    async fn drive(&mut self) -> Result<(), DownloadError> {
        let have = self.manager.have_bitfield();
        if !have.is_empty() {
            self.conn.send(Message::Bitfield(have.to_bytes())).await?;
        }

        let mut keepalive = interval_at(
            tokio::time::Instant::now() + self.keepalive_interval,
            self.keepalive_interval,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.manager.is_complete() {
                self.flush_haves().await?;
                return Ok(());
            }

            // Only a received message moves the deadline; our own keep-alives
            // and haves do not.
            let idle_deadline = tokio::time::Instant::from_std(
                self.conn.last_message_at() + self.idle_timeout,
            );

            tokio::select! {
                message = self.conn.receive() => self.handle(message?).await?,
                _ = sleep_until(idle_deadline) => {
                    debug!(conn = %self.id(), idle = ?self.idle_timeout, "peer went silent");
                    return Err(PeerError::Timeout.into());
                }
                completed = self.completed.recv() => match completed {
                    Ok(piece) => self.conn.send(Message::Have { piece }).await?,
                    Err(RecvError::Lagged(skipped)) => {
                        trace!(conn = %self.id(), skipped, "missed completion notices");
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
                _ = keepalive.tick() => self.conn.send(Message::KeepAlive).await?,
            }
        }
    }

    async fn handle(&mut self, message: Message) -> Result<(), DownloadError> {
        let id = self.id();
        match message {
            Message::Bitfield(_) => {
                self.manager.peer_bitfield(id, self.conn.bitfield());
                self.update_interest().await?;
            }
            Message::Have { piece } => {
                self.manager.peer_have(id, piece);
                self.update_interest().await?;
            }
            Message::Choke => {
                // A choking peer drops our queued requests.
                self.inflight.clear();
                self.manager.release_claims(id);
            }
            Message::Piece { index, begin, data } => self.receive_block(index, begin, data).await?,
            Message::Request { index, begin, .. } => {
                trace!(conn = %id, index, begin, "ignoring request from choked peer");
            }
            _ => {}
        }

        self.fill_pipeline().await
    }

    async fn update_interest(&mut self) -> Result<(), DownloadError> {
        let wanted = self.manager.wants_any(self.conn.bitfield());
        let interested = self.conn.choking().am_interested;

        if wanted && !interested {
            self.conn.send(Message::Interested).await?;
        } else if !wanted && interested {
            self.conn.send(Message::NotInterested).await?;
        }
        Ok(())
    }

    async fn receive_block(
        &mut self,
        index: u32,
        begin: u32,
        data: Bytes,
    ) -> Result<(), DownloadError> {
        let id = self.id();
        let Some(pos) = self.inflight.iter().position(|c| c.matches(index, begin)) else {
            trace!(conn = %id, index, begin, "discarding unsolicited block");
            return Ok(());
        };
        let claim = self.inflight.swap_remove(pos);

        match self.manager.submit_block(&claim, data).await? {
            SubmitOutcome::HashMismatch(_) if self.manager.is_poisoned(id) => {
                Err(DownloadError::Poisoned(id))
            }
            SubmitOutcome::HashMismatch(piece) => {
                debug!(conn = %id, piece, "contributed to a corrupt piece");
                Ok(())
            }
            SubmitOutcome::Unsolicited => {
                trace!(conn = %id, index, begin, "block arrived after its claim lapsed");
                Ok(())
            }
            SubmitOutcome::Accepted | SubmitOutcome::PieceComplete(_) => Ok(()),
        }
    }

    /// Cancels lapsed requests and claims blocks until the pipeline is full.
    async fn fill_pipeline(&mut self) -> Result<(), DownloadError> {
        let id = self.id();
        if self.manager.is_poisoned(id) {
            return Err(DownloadError::Poisoned(id));
        }

        let now = Instant::now();
        let (expired, live): (Vec<_>, Vec<_>) =
            self.inflight.drain(..).partition(|c| c.is_expired(now));
        self.inflight = live;
        for claim in expired {
            self.conn
                .send(Message::Cancel {
                    index: claim.piece,
                    begin: claim.offset,
                    length: claim.length,
                })
                .await?;
        }

        while self.conn.can_request() {
            let Some(claim) = self.manager.claim_next_block(id, self.conn.bitfield()) else {
                break;
            };
            self.inflight.push(claim.clone());
            self.conn
                .send_request(claim.piece, claim.offset, claim.length)
                .await?;
        }
        Ok(())
    }

    /// Announces pieces that completed since the last `have` went out.
    async fn flush_haves(&mut self) -> Result<(), DownloadError> {
        loop {
            match self.completed.try_recv() {
                Ok(piece) => self.conn.send(Message::Have { piece }).await?,
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return Ok(()),
            }
        }
    }
}
