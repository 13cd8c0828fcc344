use super::config::DownloadConfig;
use super::error::DownloadError;
use super::worker::PeerWorker;
use crate::metainfo::{InfoHash, Metainfo};
use crate::peer::PeerConnection;
use crate::piece::PieceManager;
use crate::storage::PieceStorage;
use crate::tracker::{AnnounceRequest, AnnounceResponse, TrackerError, TrackerEvent, TrackerList};
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Asks a running [`Download`] to stop. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// What a peer task needs; shared by every task of one download.
struct PeerContext {
    manager: Arc<PieceManager>,
    info_hash: InfoHash,
    config: DownloadConfig,
}

async fn connect_and_run(addr: SocketAddr, ctx: Arc<PeerContext>) -> Result<(), DownloadError> {
    let conn = PeerConnection::connect(
        addr,
        ctx.info_hash,
        ctx.config.peer_id,
        ctx.manager.piece_count(),
    )
    .await?;
    PeerWorker::new(conn, ctx.manager.clone(), &ctx.config)
        .run()
        .await
}

/// Downloads one torrent: announces to its trackers, runs a worker per
/// peer and hands verified pieces to the storage sink.
pub struct Download {
    metainfo: Metainfo,
    manager: Arc<PieceManager>,
    trackers: TrackerList,
    config: DownloadConfig,
    peers: Vec<SocketAddr>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Download {
    pub fn new(
        metainfo: Metainfo,
        storage: Arc<dyn PieceStorage>,
        config: DownloadConfig,
    ) -> Result<Self, DownloadError> {
        let manager = PieceManager::new(&metainfo.info, storage, config.piece.clone())?;
        let trackers = TrackerList::from_metainfo(&metainfo);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            metainfo,
            manager: Arc::new(manager),
            trackers,
            config,
            peers: Vec::new(),
            shutdown: Arc::new(shutdown),
        })
    }

    /// Replaces the trackers taken from the metainfo.
    pub fn with_trackers(mut self, trackers: TrackerList) -> Self {
        self.trackers = trackers;
        self
    }

    /// Peers to try before any tracker has answered.
    pub fn add_peers(&mut self, peers: impl IntoIterator<Item = SocketAddr>) {
        self.peers.extend(peers);
    }

    pub fn metainfo(&self) -> &Metainfo {
        &self.metainfo
    }

    pub fn manager(&self) -> &Arc<PieceManager> {
        &self.manager
    }

    pub fn trackers(&self) -> &TrackerList {
        &self.trackers
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Runs the download to completion.
    ///
    /// Pieces already in storage are verified first. A recoverable tracker
    /// failure is retried every `tracker_retry_delay`, at most
    /// `max_announce_retries` times in a row. Returns
    /// [`DownloadError::Stalled`] once no tracker answers and no peer is
    /// left to try, and [`DownloadError::Cancelled`] after a shutdown
    /// request.
    pub async fn run(&mut self) -> Result<(), DownloadError> {
        self.manager.resume().await?;
        if self.manager.is_complete() {
            info!("{} is already complete", self.metainfo.info.name);
            return Ok(());
        }

        let reaper = self.manager.spawn_reaper();
        let result = self.drive().await;
        reaper.abort();
        result
    }

    async fn drive(&mut self) -> Result<(), DownloadError> {
        let ctx = Arc::new(PeerContext {
            manager: self.manager.clone(),
            info_hash: self.metainfo.info_hash,
            config: self.config.clone(),
        });
        let max_peers = self.config.max_peers.max(1);

        let mut shutdown = self.shutdown.subscribe();
        let mut completed = self.manager.subscribe_completed();
        let mut workers: JoinSet<(SocketAddr, Result<(), DownloadError>)> = JoinSet::new();
        let mut active: HashSet<SocketAddr> = HashSet::new();
        let mut failed: HashSet<SocketAddr> = HashSet::new();
        let mut queue: VecDeque<SocketAddr> = self.peers.drain(..).collect();

        let mut event = TrackerEvent::Started;
        let mut next_announce = Instant::now();
        let mut last_announce = Instant::now();
        // Whether the last peer source produced an address worth trying.
        let mut fresh_peers = !queue.is_empty();
        // Whether a recoverable announce failure is waiting on its retry.
        let mut retrying = false;
        let mut retries_left = self.config.max_announce_retries;

        loop {
            let stop = *shutdown.borrow();
            if stop {
                workers.shutdown().await;
                self.announce_quietly(TrackerEvent::Stopped).await;
                info!("Download of {} cancelled", self.metainfo.info.name);
                return Err(DownloadError::Cancelled);
            }

            if self.manager.is_complete() {
                workers.shutdown().await;
                self.announce_quietly(TrackerEvent::Completed).await;
                info!(
                    "Download of {} complete ({} bytes)",
                    self.metainfo.info.name, self.metainfo.info.total_length
                );
                return Ok(());
            }

            if Instant::now() >= next_announce {
                last_announce = Instant::now();
                match self.announce(event).await {
                    Ok(response) => {
                        event = TrackerEvent::None;
                        retrying = false;
                        retries_left = self.config.max_announce_retries;

                        let interval = response
                            .interval_duration()
                            .max(self.config.min_announce_interval);
                        next_announce = Instant::now() + interval;

                        let before = queue.len();
                        for peer in response.peers {
                            let addr = peer.addr;
                            if !active.contains(&addr)
                                && !failed.contains(&addr)
                                && !queue.contains(&addr)
                            {
                                queue.push_back(addr);
                            }
                        }
                        fresh_peers = queue.len() > before;
                    }
                    Err(e) => {
                        fresh_peers = false;
                        retrying = e.is_recoverable() && retries_left > 0;
                        if retrying {
                            retries_left -= 1;
                            warn!(
                                "Announce failed, retrying in {:?} ({} retries left): {}",
                                self.config.tracker_retry_delay, retries_left, e
                            );
                        } else {
                            warn!("Announce failed: {}", e);
                        }
                        next_announce = Instant::now() + self.config.tracker_retry_delay;
                    }
                }
            }

            while workers.len() < max_peers {
                let Some(addr) = queue.pop_front() else {
                    break;
                };
                active.insert(addr);
                let ctx = ctx.clone();
                workers.spawn(async move { (addr, connect_and_run(addr, ctx).await) });
            }

            if workers.is_empty() && !retrying {
                if !fresh_peers {
                    let missing = self.manager.piece_count() - self.manager.completed_count();
                    warn!(
                        "Download of {} stalled: no tracker or peer left, {} pieces missing",
                        self.metainfo.info.name, missing
                    );
                    return Err(DownloadError::Stalled { missing });
                }
                // Every peer we knew of is gone; ask for more as soon as allowed.
                fresh_peers = false;
                next_announce =
                    next_announce.min(last_announce + self.config.min_announce_interval);
            }

            tokio::select! {
                _ = sleep_until(next_announce) => {}
                Some(joined) = workers.join_next() => match joined {
                    Ok((addr, result)) => {
                        active.remove(&addr);
                        match result {
                            Ok(()) => debug!("Peer {} finished", addr),
                            Err(e) if e.is_fatal() => {
                                warn!("Peer {} hit a fatal error: {}", addr, e);
                                workers.shutdown().await;
                                return Err(e);
                            }
                            Err(e) => {
                                debug!("Peer {} dropped: {}", addr, e);
                                failed.insert(addr);
                            }
                        }
                    }
                    Err(e) => warn!("Peer task ended abnormally: {}", e),
                },
                _ = completed.recv() => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn announce(&mut self, event: TrackerEvent) -> Result<AnnounceResponse, TrackerError> {
        let request = AnnounceRequest {
            info_hash: self.metainfo.info_hash,
            peer_id: self.config.peer_id,
            port: self.config.port,
            uploaded: 0,
            downloaded: self.manager.downloaded_bytes(),
            left: self.manager.bytes_left(),
            event,
        };
        self.trackers.announce(&request).await
    }

    async fn announce_quietly(&mut self, event: TrackerEvent) {
        if let Err(e) = self.announce(event).await {
            debug!("Final {:?} announce failed: {}", event, e);
        }
    }
}
