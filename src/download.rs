//! Download coordination.
//!
//! A [`Download`] ties the other modules together for one torrent:
//!
//! 1. pieces already in the storage sink are verified and kept,
//! 2. the trackers are announced to and return peers,
//! 3. each peer gets its own task, which claims blocks from the shared
//!    [`PieceManager`](crate::piece::PieceManager), requests them and
//!    submits what arrives,
//! 4. a reaper task returns claims that outlive their deadline, and
//! 5. the trackers are re-announced to on their interval.
//!
//! A peer failure only ends that peer's task; its claims go back to the
//! pool. The download fails only when the storage sink fails or when no
//! tracker and no peer is left.
//!
//! # Examples
//!
//! ```no_run
//! use piecemeal::download::{Download, DownloadConfig};
//! use piecemeal::metainfo::Metainfo;
//! use piecemeal::storage::FileStorage;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let metainfo = Metainfo::from_file("example.torrent")?;
//! let storage = Arc::new(FileStorage::new("downloads", &metainfo.info)?);
//!
//! let mut download = Download::new(metainfo, storage, DownloadConfig::default())?;
//! download.run().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod session;
mod worker;

pub use config::DownloadConfig;
pub use error::DownloadError;
pub use session::{Download, ShutdownHandle};

#[cfg(test)]
mod tests;
