//! piecemeal - A BitTorrent download library
//!
//! This library downloads torrents over the BitTorrent protocol
//! ([BEP-3]): it decodes torrent files, announces to HTTP trackers, talks
//! the peer wire protocol and assembles hash-verified pieces from many
//! peers at once.
//!
//! # Modules
//!
//! - [`bencode`] - Bencode encoding/decoding with retained source spans
//! - [`metainfo`] - Torrent metainfo and the info hash
//! - [`tracker`] - HTTP tracker announces (UDP is recognised but unsupported)
//! - [`peer`] - Peer wire protocol: handshake, framing and connection state
//! - [`piece`] - Rarest-first block allocation and piece verification
//! - [`storage`] - The sink verified pieces are written to
//! - [`download`] - Per-torrent coordination of trackers and peers
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

pub mod bencode;
pub mod constants;
pub mod download;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod storage;
pub mod tracker;

pub use bencode::{decode, encode, BencodeError, Dict, Value};
pub use download::{Download, DownloadConfig, DownloadError, ShutdownHandle};
pub use metainfo::{File, Info, InfoHash, Metainfo, MetainfoError};
pub use peer::{
    Bitfield, ChokingState, ConnectionState, Handshake, Message, PeerConnection, PeerError,
    PeerId,
};
pub use piece::{BlockClaim, ConnectionId, PieceError, PieceManager, PieceStatus, SubmitOutcome};
pub use storage::{FileStorage, MemoryStorage, PieceStorage, StorageError};
pub use tracker::{
    AnnounceResponse, CompactPeer, HttpTracker, Tracker, TrackerError, TrackerEvent, TrackerList,
    TrackerTransport,
};
