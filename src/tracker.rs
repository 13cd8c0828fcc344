//! Tracker announces (BEP-3, BEP-23)
//!
//! HTTP(S) trackers are spoken directly. UDP tracker URLs are recognized
//! and reported as [`TrackerError::UnsupportedTransport`] so that a
//! [`TrackerList`] can fall through to the next tracker.

mod client;
mod error;
mod http;
mod response;

pub use client::{AnnounceRequest, AnnounceStatus, Tracker, TrackerList, TrackerTransport};
pub use error::TrackerError;
pub use http::HttpTracker;
pub use response::{
    parse_announce_response, parse_compact_peers, AnnounceResponse, CompactPeer, Peer,
    TrackerEvent,
};
