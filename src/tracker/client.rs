use super::error::TrackerError;
use super::http::HttpTracker;
use super::response::{AnnounceResponse, TrackerEvent};
use crate::metainfo::{InfoHash, Metainfo};
use crate::peer::PeerId;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// How a tracker URL is reached, chosen from its scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerTransport {
    Http,
    /// BEP-15 UDP trackers. Recognized, not implemented.
    Udp,
    Unknown,
}

impl TrackerTransport {
    pub fn from_url(url: &str) -> Self {
        match Url::parse(url) {
            Ok(parsed) => match parsed.scheme() {
                "http" | "https" => TrackerTransport::Http,
                "udp" => TrackerTransport::Udp,
                _ => TrackerTransport::Unknown,
            },
            Err(_) => TrackerTransport::Unknown,
        }
    }
}

/// Everything a tracker needs to know about us for one announce.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: TrackerEvent,
}

/// Outcome of the most recent announce to a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceStatus {
    Succeeded { peers: usize },
    Failed(String),
}

/// A single tracker and what we last heard from it.
pub struct Tracker {
    url: String,
    transport: TrackerTransport,
    http: Option<HttpTracker>,
    last_interval: Option<Duration>,
    last_announce: Option<AnnounceStatus>,
}

impl Tracker {
    pub fn new(url: &str) -> Self {
        let transport = TrackerTransport::from_url(url);
        let http = match transport {
            TrackerTransport::Http => match HttpTracker::new(url) {
                Ok(http) => Some(http),
                Err(e) => {
                    warn!("Failed to set up HTTP tracker {}: {}", url, e);
                    None
                }
            },
            _ => None,
        };
        Self::from_parts(url, transport, http)
    }

    pub fn with_http_client(url: &str, client: reqwest::Client) -> Self {
        let transport = TrackerTransport::from_url(url);
        let http = match transport {
            TrackerTransport::Http => HttpTracker::with_client(url, client).ok(),
            _ => None,
        };
        Self::from_parts(url, transport, http)
    }

    fn from_parts(url: &str, transport: TrackerTransport, http: Option<HttpTracker>) -> Self {
        Self {
            url: url.to_string(),
            transport,
            http,
            last_interval: None,
            last_announce: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn transport(&self) -> TrackerTransport {
        self.transport
    }

    pub fn last_interval(&self) -> Option<Duration> {
        self.last_interval
    }

    pub fn last_announce(&self) -> Option<&AnnounceStatus> {
        self.last_announce.as_ref()
    }

    pub async fn announce(
        &mut self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TrackerError> {
        let result = match self.transport {
            TrackerTransport::Http => self.announce_http(request).await,
            TrackerTransport::Udp => Err(TrackerError::UnsupportedTransport(self.url.clone())),
            TrackerTransport::Unknown => Err(TrackerError::UnsupportedTransport(self.url.clone())),
        };

        match &result {
            Ok(response) => {
                self.last_interval = Some(response.interval_duration());
                self.last_announce = Some(AnnounceStatus::Succeeded {
                    peers: response.peers.len(),
                });
                if let Some(warning) = &response.warning_message {
                    warn!("Tracker {} warning: {}", self.url, warning);
                }
            }
            Err(e) => {
                self.last_announce = Some(AnnounceStatus::Failed(e.to_string()));
            }
        }

        result
    }

    async fn announce_http(
        &self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TrackerError> {
        let http = self
            .http
            .as_ref()
            .ok_or_else(|| TrackerError::UnsupportedTransport(self.url.clone()))?;
        http.announce(request).await
    }
}

/// The trackers of one torrent, tried in order.
pub struct TrackerList {
    trackers: Vec<Tracker>,
}

impl TrackerList {
    pub fn new(trackers: Vec<Tracker>) -> Self {
        Self { trackers }
    }

    pub fn from_urls<S: AsRef<str>>(urls: &[S]) -> Self {
        Self::new(urls.iter().map(|u| Tracker::new(u.as_ref())).collect())
    }

    pub fn from_metainfo(metainfo: &Metainfo) -> Self {
        Self::from_urls(&metainfo.trackers)
    }

    pub fn trackers(&self) -> &[Tracker] {
        &self.trackers
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Announces to each tracker in turn and returns the first success.
    ///
    /// Trackers with an unsupported transport are skipped. When none answers,
    /// the last recoverable failure is returned so the caller can retry, or
    /// [`TrackerError::Exhausted`] if there was none.
    pub async fn announce(
        &mut self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TrackerError> {
        let mut retryable = None;
        for tracker in &mut self.trackers {
            match tracker.announce(request).await {
                Ok(response) => {
                    debug!(
                        "Tracker {} returned {} peers, interval {}s",
                        tracker.url(),
                        response.peers.len(),
                        response.interval
                    );
                    return Ok(response);
                }
                Err(TrackerError::UnsupportedTransport(url)) => {
                    debug!("Skipping tracker {}: unsupported transport", url);
                }
                Err(e) => {
                    warn!("Announce to {} failed: {}", tracker.url(), e);
                    if e.is_recoverable() {
                        retryable = Some(e);
                    }
                }
            }
        }

        Err(retryable.unwrap_or(TrackerError::Exhausted))
    }
}
