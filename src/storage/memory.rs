use super::error::StorageError;
use super::file::Layout;
use super::PieceStorage;
use crate::metainfo::Info;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

/// Keeps verified pieces in memory.
#[derive(Debug)]
pub struct MemoryStorage {
    layout: Layout,
    pieces: DashMap<u32, Bytes>,
}

impl MemoryStorage {
    pub fn new(info: &Info) -> Result<Self, StorageError> {
        Ok(Self::from_layout(Layout::from_info(info)?))
    }

    pub fn from_layout(layout: Layout) -> Self {
        Self {
            layout,
            pieces: DashMap::new(),
        }
    }

    /// Stores a piece without any checks, as if left over from an earlier run.
    pub fn insert(&self, index: u32, data: Bytes) {
        self.pieces.insert(index, data);
    }

    pub fn piece(&self, index: u32) -> Option<Bytes> {
        self.pieces.get(&index).map(|p| p.clone())
    }

    pub fn written_count(&self) -> usize {
        self.pieces.len()
    }

    /// Concatenates every piece in index order. `None` if any is missing.
    pub fn contents(&self) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(self.layout.total_length as usize);
        for index in 0..self.layout.piece_count as u32 {
            out.extend_from_slice(&self.pieces.get(&index)?);
        }
        Some(out)
    }
}

#[async_trait]
impl PieceStorage for MemoryStorage {
    async fn write_piece(&self, index: u32, data: Bytes) -> Result<(), StorageError> {
        self.layout.check_piece(index, data.len())?;
        self.pieces.insert(index, data);
        Ok(())
    }

    async fn read_piece(&self, index: u32) -> Result<Option<Bytes>, StorageError> {
        self.layout.piece_len(index)?;
        Ok(self.piece(index))
    }

    fn total_length(&self) -> u64 {
        self.layout.total_length
    }
}
