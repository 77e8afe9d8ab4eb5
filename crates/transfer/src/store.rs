//! Durable transfer state and chunk storage.
//!
//! Layout under the data root:
//!
//! ```text
//! transfers/<transfer_id>.json        state record
//! chunks/<transfer_id>/<index>        raw chunk bytes
//! assembled/<transfer_id>_<file_name> output of a completed transfer
//! ```
//!
//! Every file is written to a uniquely named temp file and renamed into
//! place, so readers never observe a half-written record, chunk, or output.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use sureroute_protocol::TransferState;

use crate::TransferError;
use crate::locks::{TransferLockGuard, TransferLocks};
use crate::validation::validate_path_component;

const TRANSFERS_DIR: &str = "transfers";
const CHUNKS_DIR: &str = "chunks";
const ASSEMBLED_DIR: &str = "assembled";

/// Filesystem-backed store for transfer state and chunk blobs.
pub struct TransferStore {
    root: PathBuf,
    locks: TransferLocks,
}

impl TransferStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let root = root.into();
        for dir in [TRANSFERS_DIR, CHUNKS_DIR, ASSEMBLED_DIR] {
            tokio::fs::create_dir_all(root.join(dir)).await?;
        }
        tracing::debug!(root = %root.display(), "transfer store opened");
        Ok(Self {
            root,
            locks: TransferLocks::new(),
        })
    }

    /// Data root of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    fn state_path(&self, id: &str) -> Result<PathBuf, TransferError> {
        validate_path_component(id)?;
        Ok(self.root.join(TRANSFERS_DIR).join(format!("{id}.json")))
    }

    fn chunk_dir(&self, id: &str) -> Result<PathBuf, TransferError> {
        validate_path_component(id)?;
        Ok(self.root.join(CHUNKS_DIR).join(id))
    }

    fn chunk_path(&self, id: &str, index: usize) -> Result<PathBuf, TransferError> {
        Ok(self.chunk_dir(id)?.join(index.to_string()))
    }

    /// Where the assembled output of `id` lives.
    pub fn assembled_path(&self, id: &str, file_name: &str) -> Result<PathBuf, TransferError> {
        validate_path_component(id)?;
        validate_path_component(file_name)?;
        Ok(self
            .root
            .join(ASSEMBLED_DIR)
            .join(format!("{id}_{file_name}")))
    }

    // -----------------------------------------------------------------------
    // State records
    // -----------------------------------------------------------------------

    /// Waits for exclusive access to one transfer's state.
    ///
    /// Holders for the same id are served in submission order. Every
    /// read-modify-write of a state record must happen under this guard.
    pub async fn lock(&self, id: &str) -> Result<TransferLockGuard, TransferError> {
        validate_path_component(id)?;
        Ok(self.locks.lock(id).await)
    }

    /// Reads the state record of `id`, `None` if it doesn't exist.
    ///
    /// A record whose per-chunk vectors don't match `total_chunks` is
    /// reported as [`TransferError::CorruptState`].
    pub async fn read_state(&self, id: &str) -> Result<Option<TransferState>, TransferError> {
        let path = self.state_path(id)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: TransferState = serde_json::from_slice(&raw)?;
        check_aligned(&state)?;
        Ok(Some(state))
    }

    /// Replaces the state record of `state.transfer_id` (full overwrite).
    pub async fn write_state(&self, state: &TransferState) -> Result<(), TransferError> {
        check_aligned(state)?;
        let path = self.state_path(&state.transfer_id)?;
        let json = serde_json::to_vec_pretty(state)?;
        atomic_write(&path, &json).await
    }

    /// Flips `received_chunks[index]` to true under the transfer's lock.
    ///
    /// This is the only mutation path for received flags. Returns the
    /// updated state, or `None` if the transfer doesn't exist.
    pub async fn mark_chunk_received(
        &self,
        id: &str,
        index: usize,
    ) -> Result<Option<TransferState>, TransferError> {
        let _guard = self.lock(id).await?;
        let Some(mut state) = self.read_state(id).await? else {
            return Ok(None);
        };
        if index >= state.total_chunks {
            return Err(TransferError::IndexOutOfRange {
                index,
                total: state.total_chunks,
            });
        }
        if !state.received_chunks[index] {
            state.received_chunks[index] = true;
            self.write_state(&state).await?;
        }
        Ok(Some(state))
    }

    /// Serialized read-modify-write of one transfer's record.
    ///
    /// `f` runs under the transfer's lock; the record is written back only
    /// if `f` changed it. Returns `None` if the transfer doesn't exist.
    pub async fn update<F, T>(&self, id: &str, f: F) -> Result<Option<T>, TransferError>
    where
        F: FnOnce(&mut TransferState) -> T,
    {
        let _guard = self.lock(id).await?;
        let Some(mut state) = self.read_state(id).await? else {
            return Ok(None);
        };
        let before = state.clone();
        let out = f(&mut state);
        if state != before {
            self.write_state(&state).await?;
        }
        Ok(Some(out))
    }

    // -----------------------------------------------------------------------
    // Chunk blobs
    // -----------------------------------------------------------------------

    /// Indices in `0..total` that have a chunk file on disk.
    ///
    /// Checks storage directly; this is the source of truth for resume.
    pub async fn list_present_chunks(
        &self,
        id: &str,
        total: usize,
    ) -> Result<BTreeSet<usize>, TransferError> {
        let dir = self.chunk_dir(id)?;
        let mut present = BTreeSet::new();
        for index in 0..total {
            if tokio::fs::try_exists(dir.join(index.to_string())).await? {
                present.insert(index);
            }
        }
        Ok(present)
    }

    /// Stores the bytes of one chunk, replacing any previous copy.
    pub async fn write_chunk(
        &self,
        id: &str,
        index: usize,
        data: &[u8],
    ) -> Result<(), TransferError> {
        let path = self.chunk_path(id, index)?;
        atomic_write(&path, data).await
    }

    /// Reads the bytes of one chunk, `None` if absent.
    pub async fn read_chunk(
        &self,
        id: &str,
        index: usize,
    ) -> Result<Option<Vec<u8>>, TransferError> {
        let path = self.chunk_path(id, index)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Assembly
    // -----------------------------------------------------------------------

    /// Concatenates chunks `0..total` in order into the assembled file.
    ///
    /// Fails with [`TransferError::MissingChunk`] on the first absent chunk.
    /// The output only appears at its final path once every chunk has been
    /// written, so a failed assembly never leaves a partial file behind.
    pub async fn assemble(
        &self,
        id: &str,
        total: usize,
        file_name: &str,
    ) -> Result<PathBuf, TransferError> {
        let out_path = self.assembled_path(id, file_name)?;
        let chunk_dir = self.chunk_dir(id)?;
        let tmp_path = temp_sibling(&out_path);

        let result: Result<(), TransferError> = async {
            let mut out = tokio::fs::File::create(&tmp_path).await?;
            for index in 0..total {
                let mut part = match tokio::fs::File::open(chunk_dir.join(index.to_string())).await
                {
                    Ok(f) => f,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(TransferError::MissingChunk(index));
                    }
                    Err(e) => return Err(e.into()),
                };
                tokio::io::copy(&mut part, &mut out).await?;
            }
            out.flush().await?;
            out.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &out_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        tracing::info!(transfer_id = %id, chunks = total, path = %out_path.display(), "transfer assembled");
        Ok(out_path)
    }
}

/// Temp file next to `path`, unique per call.
fn check_aligned(state: &TransferState) -> Result<(), TransferError> {
    if state.received_chunks.len() != state.total_chunks
        || state.chunks.len() != state.total_chunks
    {
        return Err(TransferError::CorruptState(state.transfer_id.clone()));
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}

/// Writes `content` to a temp file beside `path`, then renames it over `path`.
async fn atomic_write(path: &Path, content: &[u8]) -> Result<(), TransferError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = temp_sibling(path);
    if let Err(e) = tokio::fs::write(&tmp_path, content).await {
        tracing::error!(path = %tmp_path.display(), error = %e, "failed to write temp file");
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        tracing::error!(
            from = %tmp_path.display(),
            to = %path.display(),
            error = %e,
            "failed to rename temp file"
        );
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    Ok(())
}
