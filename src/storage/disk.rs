use super::error::StorageError;
use super::file::Layout;
use super::PieceStorage;
use crate::metainfo::Info;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as TokioMutex;
use tracing::trace;

struct PerFileHandle {
    file: TokioMutex<File>,
    is_write: bool,
}

/// Open files by index. Read-only handles are upgraded on first write.
struct FileHandleCache {
    handles: DashMap<usize, Arc<PerFileHandle>>,
    root: PathBuf,
}

impl FileHandleCache {
    fn new(root: PathBuf) -> Self {
        Self {
            handles: DashMap::new(),
            root,
        }
    }

    /// `Ok(None)` if the file does not exist yet.
    async fn get_or_open_read(
        &self,
        layout: &Layout,
        file_index: usize,
    ) -> Result<Option<Arc<PerFileHandle>>, StorageError> {
        if let Some(handle) = self.handles.get(&file_index) {
            return Ok(Some(handle.clone()));
        }

        let path = self.root.join(&layout.files[file_index].path);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let handle = Arc::new(PerFileHandle {
            file: TokioMutex::new(file),
            is_write: false,
        });

        self.handles.insert(file_index, handle.clone());
        Ok(Some(handle))
    }

    async fn get_or_open_write(
        &self,
        layout: &Layout,
        file_index: usize,
    ) -> Result<Arc<PerFileHandle>, StorageError> {
        if let Some(handle) = self.handles.get(&file_index) {
            if handle.is_write {
                return Ok(handle.clone());
            }
            drop(handle);
            self.handles.remove(&file_index);
        }

        let path = self.root.join(&layout.files[file_index].path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;

        let handle = Arc::new(PerFileHandle {
            file: TokioMutex::new(file),
            is_write: true,
        });

        self.handles.insert(file_index, handle.clone());
        Ok(handle)
    }

    async fn flush_all(&self) -> Result<(), StorageError> {
        let keys: Vec<usize> = self.handles.iter().map(|r| *r.key()).collect();
        for key in keys {
            if let Some((_, handle)) = self.handles.remove(&key) {
                if handle.is_write {
                    let file = handle.file.lock().await;
                    file.sync_data().await?;
                }
            }
        }
        Ok(())
    }
}

/// Writes pieces straight into the torrent's files under a root directory.
///
/// Pieces that straddle file boundaries are split across files. Paths with
/// `..`, a root or a drive prefix are rejected up front.
pub struct FileStorage {
    layout: Layout,
    handle_cache: FileHandleCache,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>, info: &Info) -> Result<Self, StorageError> {
        Ok(Self::from_layout(root, Layout::from_info(info)?))
    }

    pub fn from_layout(root: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            layout,
            handle_cache: FileHandleCache::new(root.into()),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn root(&self) -> &std::path::Path {
        &self.handle_cache.root
    }

    /// Creates every file at its final length.
    pub async fn preallocate(&self) -> Result<(), StorageError> {
        for index in 0..self.layout.files.len() {
            let handle = self.handle_cache.get_or_open_write(&self.layout, index).await?;
            let file = handle.file.lock().await;
            file.set_len(self.layout.files[index].length).await?;
        }
        Ok(())
    }

    /// Syncs and closes every open handle.
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.handle_cache.flush_all().await
    }
}

#[async_trait]
impl PieceStorage for FileStorage {
    async fn write_piece(&self, index: u32, data: Bytes) -> Result<(), StorageError> {
        self.layout.check_piece(index, data.len())?;

        let spans = self.layout.piece_file_spans(index)?;
        let mut data_offset = 0usize;

        for span in spans {
            let handle = self
                .handle_cache
                .get_or_open_write(&self.layout, span.file_index)
                .await?;
            let mut file = handle.file.lock().await;
            file.seek(SeekFrom::Start(span.file_offset)).await?;

            let chunk = &data[data_offset..data_offset + span.length as usize];
            file.write_all(chunk).await?;

            data_offset += span.length as usize;
        }

        trace!("wrote piece {} ({} bytes)", index, data.len());
        Ok(())
    }

    async fn read_piece(&self, index: u32) -> Result<Option<Bytes>, StorageError> {
        let length = self.layout.piece_len(index)?;
        let spans = self.layout.piece_file_spans(index)?;
        let mut data = Vec::with_capacity(length as usize);

        for span in spans {
            let Some(handle) = self
                .handle_cache
                .get_or_open_read(&self.layout, span.file_index)
                .await?
            else {
                return Ok(None);
            };
            let mut file = handle.file.lock().await;
            file.seek(SeekFrom::Start(span.file_offset)).await?;

            let start = data.len();
            data.resize(start + span.length as usize, 0);
            match file.read_exact(&mut data[start..]).await {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Some(Bytes::from(data)))
    }

    fn total_length(&self) -> u64 {
        self.layout.total_length
    }
}
