use super::error::StorageError;
use crate::metainfo::Info;
use std::path::{Component, Path, PathBuf};

/// A file of the torrent and where its bytes sit in the piece stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the storage root.
    pub path: PathBuf,
    pub length: u64,
    pub offset: u64,
}

/// A contiguous region of one file covered by (part of) a piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceFileSpan {
    pub file_index: usize,
    pub file_offset: u64,
    pub length: u64,
}

impl FileEntry {
    pub fn new(path: PathBuf, length: u64, offset: u64) -> Self {
        Self {
            path,
            length,
            offset,
        }
    }

    pub fn byte_range(&self) -> std::ops::Range<u64> {
        self.offset..self.offset + self.length
    }
}

/// Piece geometry plus the file list, enough to map any piece onto disk.
#[derive(Debug, Clone)]
pub struct Layout {
    pub files: Vec<FileEntry>,
    pub piece_length: u64,
    pub piece_count: usize,
    pub total_length: u64,
}

impl Layout {
    /// Multi-file torrents are laid out under a directory named after the
    /// torrent; single-file torrents use the name as the file name.
    pub fn from_info(info: &Info) -> Result<Self, StorageError> {
        let name = Path::new(&info.name);
        validate_file_path(name)?;

        let files = info
            .files
            .iter()
            .map(|f| {
                validate_file_path(&f.path)?;
                let path = if info.is_single_file() {
                    f.path.clone()
                } else {
                    name.join(&f.path)
                };
                Ok(FileEntry::new(path, f.length, f.offset))
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        Ok(Self {
            files,
            piece_length: info.piece_length,
            piece_count: info.piece_count(),
            total_length: info.total_length,
        })
    }

    pub fn piece_len(&self, index: u32) -> Result<u64, StorageError> {
        if index as usize >= self.piece_count {
            return Err(StorageError::InvalidPieceIndex(index));
        }
        let start = index as u64 * self.piece_length;
        Ok((self.total_length - start).min(self.piece_length))
    }

    pub fn piece_file_spans(&self, index: u32) -> Result<Vec<PieceFileSpan>, StorageError> {
        let mut remaining = self.piece_len(index)?;
        let mut current_offset = index as u64 * self.piece_length;
        let mut spans = Vec::new();

        for (file_idx, file) in self.files.iter().enumerate() {
            if remaining == 0 {
                break;
            }

            let file_end = file.offset + file.length;

            if current_offset >= file.offset && current_offset < file_end {
                let file_offset = current_offset - file.offset;
                let take = remaining.min(file_end - current_offset);

                spans.push(PieceFileSpan {
                    file_index: file_idx,
                    file_offset,
                    length: take,
                });

                current_offset += take;
                remaining -= take;
            }
        }

        Ok(spans)
    }

    pub(super) fn check_piece(&self, index: u32, len: usize) -> Result<(), StorageError> {
        let expected = self.piece_len(index)?;
        if len as u64 != expected {
            return Err(StorageError::InvalidPieceLength {
                piece: index,
                expected,
                actual: len as u64,
            });
        }
        Ok(())
    }
}

pub(super) fn validate_file_path(file_path: &Path) -> Result<(), StorageError> {
    for component in file_path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::PathTraversal(file_path.display().to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}
