//! On-disk storage for an embedding index.
//!
//! Two files live under the index root:
//! - `ids.json`: pretty-printed JSON array of ids, index `i` names record `i`
//! - `embeddings.bin`: flat records of `dimensions` native-endian f32 values,
//!   no header, no delimiters
//!
//! There are two persistence tiers and they must not be confused:
//! - incremental: [`IndexFileStore::set`] and [`IndexFileStore::remove_at_index`]
//!   touch exactly one record (plus [`IndexFileStore::save_ids`], which is cheap
//!   because it only holds strings)
//! - bulk: [`IndexFileStore::save_index`] and [`IndexFileStore::load_index`]
//!   rewrite or read everything and honour cancellation between records
//!
//! Any write failing because the device is out of space deletes both files,
//! so a torn pair is never left behind.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{IndexError, IndexResult};
use crate::vector::types::{BYTES_PER_F32, Embedding, EntityId, VectorDimension};

/// Name of the id list file.
pub const IDS_FILE_NAME: &str = "ids.json";

/// Name of the flat vector file.
pub const EMBEDDINGS_FILE_NAME: &str = "embeddings.bin";

/// Contents of a persisted index, in storage order.
#[derive(Debug, Clone, Default)]
pub struct PersistedIndex {
    pub ids: Vec<EntityId>,
    pub embeddings: Vec<Embedding>,
}

impl PersistedIndex {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(id, embedding)` pairs in storage order.
    pub fn into_pairs(self) -> impl Iterator<Item = (EntityId, Embedding)> {
        self.ids.into_iter().zip(self.embeddings)
    }
}

/// File pair backing one index instance.
///
/// The store holds no file handles; every call opens what it needs. It must be
/// owned by exactly one index since nothing here locks across processes.
#[derive(Debug, Clone)]
pub struct IndexFileStore {
    root: PathBuf,
    dimension: VectorDimension,
}

impl IndexFileStore {
    /// Creates a store rooted at `root`. Nothing is touched on disk until the first write.
    pub fn new(root: impl Into<PathBuf>, dimension: VectorDimension) -> Self {
        Self {
            root: root.into(),
            dimension,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    pub fn ids_path(&self) -> PathBuf {
        self.root.join(IDS_FILE_NAME)
    }

    pub fn embeddings_path(&self) -> PathBuf {
        self.root.join(EMBEDDINGS_FILE_NAME)
    }

    /// Both files are present.
    pub fn exists(&self) -> bool {
        self.ids_path().exists() && self.embeddings_path().exists()
    }

    /// Number of whole records currently in the vector file (0 if absent).
    pub fn record_count(&self) -> IndexResult<usize> {
        let path = self.embeddings_path();
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(meta.len() as usize / self.dimension.record_size()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(source) => Err(IndexError::FileRead { path, source }),
        }
    }

    /// Reads the record at `position` without loading the rest of the file.
    pub fn get(&self, position: usize) -> IndexResult<Embedding> {
        let path = self.embeddings_path();
        let record_size = self.dimension.record_size();

        let mut buf = vec![0u8; record_size];
        let mut file = File::open(&path).map_err(read_error(&path))?;
        file.seek(SeekFrom::Start(self.offset(position)))
            .map_err(read_error(&path))?;
        file.read_exact(&mut buf).map_err(read_error(&path))?;

        Ok(decode_record(&buf))
    }

    /// Overwrites exactly the record at `position`, or appends when `position`
    /// is one past the last record. Writing further out would leave a gap of
    /// zeroed records and is refused.
    pub fn set(&self, position: usize, embedding: &Embedding) -> IndexResult<()> {
        self.dimension.validate(embedding)?;
        let count = self.record_count()?;
        if position > count {
            return Err(IndexError::IndexCorrupted {
                reason: format!(
                    "write at record {position} would leave a gap after {count} records in {EMBEDDINGS_FILE_NAME}"
                ),
            });
        }
        self.ensure_root()?;

        let path = self.embeddings_path();
        let bytes = encode_record(embedding);
        let offset = self.offset(position);

        self.guarded(&path, || {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&bytes)?;
            file.flush()
        })?;

        debug!(position, "wrote embedding record");
        Ok(())
    }

    /// Swap-and-truncate removal.
    ///
    /// The last record is copied into `position` (unless `position` is the last
    /// slot) and the file shrinks by one record. The caller must relabel
    /// whichever id used to own the last slot.
    pub fn remove_at_index(&self, position: usize) -> IndexResult<()> {
        let path = self.embeddings_path();
        let record_size = self.dimension.record_size();

        let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(IndexError::FileWrite { path, source }),
        };

        let len = file.metadata().map_err(read_error(&path))?.len();
        let count = len / record_size as u64;
        if position as u64 >= count {
            warn!(
                position,
                count, "remove_at_index past the end of the vector file; nothing to do"
            );
            return Ok(());
        }

        let last = count - 1;
        let last_offset = last * record_size as u64;
        let target_offset = self.offset(position);

        self.guarded(&path, || {
            if target_offset != last_offset {
                let mut buf = vec![0u8; record_size];
                file.seek(SeekFrom::Start(last_offset))?;
                file.read_exact(&mut buf)?;
                file.seek(SeekFrom::Start(target_offset))?;
                file.write_all(&buf)?;
            }
            file.set_len(last_offset)?;
            file.flush()
        })?;

        debug!(position, moved_from = last, "swap-and-truncate removal");
        Ok(())
    }

    /// Bulk read of both files.
    ///
    /// Returns `Ok(None)` if either file is missing. A vector file whose length
    /// does not match the id count is reported as corruption.
    pub fn load_index(&self, cancel: &CancellationToken) -> IndexResult<Option<PersistedIndex>> {
        let ids_path = self.ids_path();
        let embeddings_path = self.embeddings_path();
        if !ids_path.exists() || !embeddings_path.exists() {
            debug!(root = %self.root.display(), "no persisted index");
            return Ok(None);
        }

        let ids = self.read_ids()?;

        let file = File::open(&embeddings_path).map_err(read_error(&embeddings_path))?;
        let len = file
            .metadata()
            .map_err(read_error(&embeddings_path))?
            .len() as usize;
        let record_size = self.dimension.record_size();
        let expected = ids.len() * record_size;
        if len != expected {
            warn!(
                ids = ids.len(),
                bytes = len,
                expected, "id file and vector file disagree"
            );
            return Err(IndexError::IndexCorrupted {
                reason: format!(
                    "{} holds {} ids but {} is {len} bytes (expected {expected})",
                    IDS_FILE_NAME,
                    ids.len(),
                    EMBEDDINGS_FILE_NAME
                ),
            });
        }

        let mut embeddings = Vec::with_capacity(ids.len());
        if len > 0 {
            // SAFETY: the store exclusively owns this file and nothing truncates it
            // while the map is alive; the map is dropped before returning.
            let mmap = unsafe { Mmap::map(&file) }.map_err(read_error(&embeddings_path))?;
            for chunk in mmap.chunks_exact(record_size) {
                if cancel.is_cancelled() {
                    return Err(IndexError::Cancelled);
                }
                embeddings.push(decode_record(chunk));
            }
        }

        let persisted = PersistedIndex { ids, embeddings };
        info!(entries = persisted.len(), root = %self.root.display(), "loaded embedding index");
        Ok(Some(persisted))
    }

    /// Rewrites the id file only.
    pub fn save_ids(&self, ids: &[EntityId]) -> IndexResult<()> {
        self.ensure_root()?;
        let tmp = self.write_ids_tmp(ids)?;
        self.persist(tmp, &self.ids_path())?;
        debug!(ids = ids.len(), "rewrote id file");
        Ok(())
    }

    /// Rewrites both files.
    ///
    /// Records go to temporary files first; the real files are replaced only
    /// once every record is written. A cancelled or failed call leaves the
    /// previous pair untouched.
    pub fn save_index(
        &self,
        ids: &[EntityId],
        embeddings: &[Embedding],
        cancel: &CancellationToken,
    ) -> IndexResult<()> {
        debug_assert_eq!(ids.len(), embeddings.len());
        for embedding in embeddings {
            self.dimension.validate(embedding)?;
        }
        self.ensure_root()?;

        let embeddings_path = self.embeddings_path();
        let tmp = self.guarded(&embeddings_path, || NamedTempFile::new_in(&self.root))?;
        let mut writer = BufWriter::new(tmp);
        for embedding in embeddings {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            self.guarded(&embeddings_path, || {
                writer.write_all(&encode_record(embedding))
            })?;
        }
        let tmp = self.guarded(&embeddings_path, || {
            writer.into_inner().map_err(|e| e.into_error())
        })?;

        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        let ids_tmp = self.write_ids_tmp(ids)?;

        self.persist(tmp, &embeddings_path)?;
        self.persist(ids_tmp, &self.ids_path())?;

        info!(entries = ids.len(), root = %self.root.display(), "saved embedding index");
        Ok(())
    }

    /// Removes both files, ignoring ones that are already gone.
    pub fn delete_files(&self) {
        for path in [self.ids_path(), self.embeddings_path()] {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove index file");
                }
            }
        }
    }

    // Private helper methods

    fn offset(&self, position: usize) -> u64 {
        (position * self.dimension.record_size()) as u64
    }

    fn ensure_root(&self) -> IndexResult<()> {
        self.guarded(&self.root, || std::fs::create_dir_all(&self.root))
    }

    fn read_ids(&self) -> IndexResult<Vec<EntityId>> {
        let path = self.ids_path();
        let json = std::fs::read(&path).map_err(read_error(&path))?;
        let ids: Vec<String> =
            serde_json::from_slice(&json).map_err(|source| IndexError::IdFile {
                path: path.clone(),
                source,
            })?;
        Ok(ids.into_iter().map(Arc::from).collect())
    }

    fn write_ids_tmp(&self, ids: &[EntityId]) -> IndexResult<NamedTempFile> {
        let path = self.ids_path();
        let json = serde_json::to_vec_pretty(ids).map_err(|source| IndexError::IdFile {
            path: path.clone(),
            source,
        })?;

        self.guarded(&path, || {
            let mut tmp = NamedTempFile::new_in(&self.root)?;
            tmp.write_all(&json)?;
            tmp.flush()?;
            Ok(tmp)
        })
    }

    fn persist(&self, tmp: NamedTempFile, target: &Path) -> IndexResult<()> {
        self.guarded(target, || tmp.persist(target).map(drop).map_err(|e| e.error))
    }

    /// Runs a write, discarding both files if it failed for lack of space.
    fn guarded<T>(&self, path: &Path, op: impl FnOnce() -> io::Result<T>) -> IndexResult<T> {
        op().map_err(|source| {
            if is_out_of_space(&source) {
                warn!(
                    path = %path.display(),
                    "out of disk space, discarding persisted index files"
                );
                self.delete_files();
                IndexError::DiskFull {
                    path: path.to_path_buf(),
                }
            } else {
                IndexError::FileWrite {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })
    }
}

fn is_out_of_space(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded
    )
}

fn read_error(path: &Path) -> impl Fn(io::Error) -> IndexError + '_ {
    move |source| IndexError::FileRead {
        path: path.to_path_buf(),
        source,
    }
}

fn encode_record(embedding: &Embedding) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.dimensions() * BYTES_PER_F32);
    for value in embedding.values() {
        bytes.extend_from_slice(&value.to_ne_bytes());
    }
    bytes
}

fn decode_record(bytes: &[u8]) -> Embedding {
    Embedding::new(
        bytes
            .chunks_exact(BYTES_PER_F32)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect::<Arc<[f32]>>(),
    )
}
