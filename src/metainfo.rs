//! Torrent metainfo handling ([BEP-3]).
//!
//! A torrent file (`.torrent`) is a bencoded dictionary describing the content
//! to be shared:
//!
//! - **announce** - Primary tracker URL (required)
//! - **announce-list** - Additional tracker tiers ([BEP-12]), flattened in order
//! - **info** - Core torrent metadata, hashed to create the info hash
//!   - `name` - Suggested file/directory name
//!   - `piece length` - Size of each piece in bytes
//!   - `pieces` - Concatenated SHA-1 hashes of each piece
//!   - `length` - Total size (single-file) OR `files` list (multi-file)
//!
//! The info hash is the SHA-1 of the info dictionary exactly as authored in
//! the file. [`Metainfo`] uses the byte span retained by the decoder rather
//! than re-encoding the parsed value.
//!
//! # Examples
//!
//! ```
//! use piecemeal::metainfo::Metainfo;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut data = b"d8:announce18:http://t.example/a4:infod6:lengthi3e4:name1:f".to_vec();
//! data.extend_from_slice(b"12:piece lengthi16384e6:pieces20:");
//! data.extend_from_slice(&[0u8; 20]);
//! data.extend_from_slice(b"ee");
//!
//! let torrent = Metainfo::from_bytes(&data)?;
//! assert_eq!(torrent.info.name, "f");
//! assert_eq!(torrent.info.piece_count(), 1);
//! assert_eq!(torrent.trackers, vec!["http://t.example/a".to_string()]);
//! # Ok(())
//! # }
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html
//! [BEP-12]: http://bittorrent.org/beps/bep_0012.html

mod error;
mod info_hash;
mod torrent;

pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use torrent::{File, Info, Metainfo};
