use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, encode, Dict, Value};
use bytes::Bytes;
use std::path::{Path, PathBuf};

/// A parsed torrent file.
///
/// Built once from a decoded bencode tree and immutable afterwards.
///
/// # Examples
///
/// ```no_run
/// use piecemeal::metainfo::Metainfo;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let metainfo = Metainfo::from_file("example.torrent")?;
///
/// println!("Torrent: {}", metainfo.info.name);
/// println!("Size: {} bytes", metainfo.info.total_length);
/// println!("Info hash: {}", metainfo.info_hash);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// The info dictionary containing file and piece information.
    pub info: Info,
    /// SHA-1 of the info dictionary exactly as it appears in the file.
    pub info_hash: InfoHash,
    /// Unique tracker URLs, primary `announce` URL first unless it already
    /// appears in `announce-list`.
    pub trackers: Vec<String>,
    /// Unix timestamp when the torrent was created.
    pub creation_date: Option<i64>,
    /// Optional comment about the torrent.
    pub comment: Option<String>,
    /// Name/version of the program that created the torrent.
    pub created_by: Option<String>,
    raw_info: Bytes,
}

/// The info dictionary from a torrent file.
#[derive(Debug, Clone)]
pub struct Info {
    /// Suggested name for the file or directory.
    pub name: String,
    /// Number of bytes per piece. Every piece but the last has this length.
    pub piece_length: u64,
    /// SHA-1 hash of each piece, in piece index order.
    pub pieces: Vec<[u8; 20]>,
    /// Files in the torrent, in the order their bytes are concatenated.
    pub files: Vec<File>,
    /// Total size of all files combined.
    pub total_length: u64,
    /// If true, clients should only use trackers in the metainfo.
    pub private: bool,
}

/// A file within a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Path relative to the torrent root. Single-file torrents use the name.
    pub path: PathBuf,
    /// Size of the file in bytes.
    pub length: u64,
    /// Byte offset within the torrent's piece data.
    pub offset: u64,
}

impl Metainfo {
    /// Decodes and parses a torrent file from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let value = decode(data)?;
        Self::from_value(&value)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MetainfoError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Builds a torrent descriptor from an already decoded bencode tree.
    ///
    /// The info hash is computed over the byte span the info dictionary was
    /// decoded from. A tree assembled in memory has no such span; its info
    /// dictionary is encoded as stored instead.
    pub fn from_value(root: &Value) -> Result<Self, MetainfoError> {
        let dict = root
            .try_dict()
            .map_err(|e| MetainfoError::field("root", e))?;

        let info_value = dict
            .get(b"info")
            .ok_or(MetainfoError::MissingField("info"))?;
        let info_dict = info_value
            .try_dict()
            .map_err(|e| MetainfoError::field("info", e))?;

        let raw_info = match info_dict.raw_bytes() {
            Some(raw) => raw.clone(),
            None => Bytes::from(encode(info_value)?),
        };
        let info_hash = InfoHash::from_info_bytes(&raw_info);

        let trackers = parse_trackers(dict)?;
        let info = parse_info(info_dict)?;

        let creation_date = dict
            .get(b"creation date")
            .and_then(|v| v.as_integer());

        let comment = dict
            .get(b"comment")
            .and_then(|v| v.as_str())
            .map(String::from);

        let created_by = dict
            .get(b"created by")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Self {
            info,
            info_hash,
            trackers,
            creation_date,
            comment,
            created_by,
            raw_info,
        })
    }

    /// Returns the bencoded info dictionary the info hash was computed over.
    pub fn raw_info(&self) -> &Bytes {
        &self.raw_info
    }

    /// The primary tracker URL.
    pub fn announce(&self) -> Option<&str> {
        self.trackers.first().map(String::as_str)
    }
}

impl Info {
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Length of the piece at `index`; the last piece may be short.
    pub fn piece_len(&self, index: u32) -> Option<u64> {
        let index = index as usize;
        if index >= self.pieces.len() {
            return None;
        }
        let start = index as u64 * self.piece_length;
        Some((self.total_length - start).min(self.piece_length))
    }

    pub fn piece_hash(&self, index: u32) -> Option<&[u8; 20]> {
        self.pieces.get(index as usize)
    }

    pub fn is_single_file(&self) -> bool {
        self.files.len() == 1 && self.files[0].path == Path::new(&self.name)
    }
}

fn required<'a>(dict: &'a Dict, key: &'static str) -> Result<&'a Value, MetainfoError> {
    dict.get(key.as_bytes())
        .ok_or(MetainfoError::MissingField(key))
}

fn parse_trackers(dict: &Dict) -> Result<Vec<String>, MetainfoError> {
    let mut trackers: Vec<String> = Vec::new();

    if let Some(list) = dict.get(b"announce-list") {
        let tiers = list
            .try_list()
            .map_err(|e| MetainfoError::field("announce-list", e))?;
        for tier in tiers {
            let urls = tier
                .try_list()
                .map_err(|e| MetainfoError::field("announce-list", e))?;
            for url in urls {
                let url = url
                    .try_str()
                    .map_err(|e| MetainfoError::field("announce-list", e))?;
                if !trackers.iter().any(|t| t == url) {
                    trackers.push(url.to_string());
                }
            }
        }
    }

    let announce = required(dict, "announce")?
        .try_str()
        .map_err(|e| MetainfoError::field("announce", e))?;

    if !trackers.iter().any(|t| t == announce) {
        trackers.insert(0, announce.to_string());
    }

    Ok(trackers)
}

fn parse_info(dict: &Dict) -> Result<Info, MetainfoError> {
    let name = required(dict, "name")?
        .try_str()
        .map_err(|e| MetainfoError::field("name", e))?
        .to_string();

    let piece_length = required(dict, "piece length")?
        .try_integer()
        .map_err(|e| MetainfoError::field("piece length", e))?;
    if piece_length <= 0 {
        return Err(MetainfoError::InvalidField("piece length"));
    }
    let piece_length = piece_length as u64;

    let pieces_bytes = required(dict, "pieces")?
        .try_bytes()
        .map_err(|e| MetainfoError::field("pieces", e))?;

    if pieces_bytes.len() % 20 != 0 {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    let pieces: Vec<[u8; 20]> = pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut arr = [0u8; 20];
            arr.copy_from_slice(chunk);
            arr
        })
        .collect();

    let private = dict
        .get(b"private")
        .and_then(|v| v.as_integer())
        .map(|v| v == 1)
        .unwrap_or(false);

    let (files, total_length) = if let Some(length) = dict.get(b"length") {
        let length = non_negative(length, "length")?;
        let file = File {
            path: PathBuf::from(&name),
            length,
            offset: 0,
        };
        (vec![file], length)
    } else if let Some(files_value) = dict.get(b"files") {
        parse_files(files_value)?
    } else {
        return Err(MetainfoError::MissingField("length or files"));
    };

    let expected_pieces = total_length.div_ceil(piece_length);
    if pieces.len() as u64 != expected_pieces {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    Ok(Info {
        name,
        piece_length,
        pieces,
        files,
        total_length,
        private,
    })
}

fn parse_files(value: &Value) -> Result<(Vec<File>, u64), MetainfoError> {
    let list = value
        .try_list()
        .map_err(|e| MetainfoError::field("files", e))?;

    let mut files = Vec::with_capacity(list.len());
    let mut offset = 0u64;

    for file_value in list {
        let file_dict = file_value
            .try_dict()
            .map_err(|e| MetainfoError::field("files", e))?;

        let length = non_negative(required(file_dict, "length")?, "length")?;

        let segments = required(file_dict, "path")?
            .try_list()
            .map_err(|e| MetainfoError::field("path", e))?;
        if segments.is_empty() {
            return Err(MetainfoError::InvalidField("path"));
        }

        let mut path = PathBuf::new();
        for segment in segments {
            let segment = segment
                .try_str()
                .map_err(|e| MetainfoError::field("path", e))?;
            path.push(segment);
        }

        files.push(File {
            path,
            length,
            offset,
        });

        offset = offset
            .checked_add(length)
            .ok_or(MetainfoError::InvalidField("length"))?;
    }

    Ok((files, offset))
}

fn non_negative(value: &Value, field: &'static str) -> Result<u64, MetainfoError> {
    let n = value
        .try_integer()
        .map_err(|e| MetainfoError::field(field, e))?;
    u64::try_from(n).map_err(|_| MetainfoError::InvalidField(field))
}
