//! Piece storage sinks.
//!
//! The piece manager hands every verified piece to a [`PieceStorage`]
//! exactly once. Pieces are independent regions, so writes for different
//! pieces may run concurrently.
//!
//! - [`MemoryStorage`] - keeps pieces in memory
//! - [`FileStorage`] - maps pieces onto the torrent's files on disk
//!
//! # Examples
//!
//! ```no_run
//! use piecemeal::metainfo::Metainfo;
//! use piecemeal::storage::{FileStorage, PieceStorage};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let metainfo = Metainfo::from_file("example.torrent")?;
//! let storage = FileStorage::new("./downloads", &metainfo.info)?;
//! storage.preallocate().await?;
//! assert_eq!(storage.total_length(), metainfo.info.total_length);
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! File paths containing `..` or absolute paths are rejected.

mod disk;
mod error;
mod file;
mod memory;

use async_trait::async_trait;
use bytes::Bytes;

pub use disk::FileStorage;
pub use error::StorageError;
pub use file::{FileEntry, Layout, PieceFileSpan};
pub use memory::MemoryStorage;

/// Where verified pieces go.
#[async_trait]
pub trait PieceStorage: Send + Sync {
    /// Stores a verified piece at its final offset.
    async fn write_piece(&self, index: u32, data: Bytes) -> Result<(), StorageError>;

    /// Reads a piece back. `Ok(None)` if it has not been stored.
    async fn read_piece(&self, index: u32) -> Result<Option<Bytes>, StorageError>;

    /// Total size of the torrent's content.
    fn total_length(&self) -> u64;
}
