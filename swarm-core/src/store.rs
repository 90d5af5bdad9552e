//! Content store: one directory per manifest (named by `info_hash`), one file per chunk
//! named by the chunk's own digest.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::integrity::{self, FileHasher};
use crate::manifest::FileManifest;

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_dir(&self, info_hash: &str) -> Result<PathBuf, StoreError> {
        check_name(info_hash)?;
        Ok(self.root.join(info_hash))
    }

    fn chunk_path(&self, info_hash: &str, chunk_hash: &str) -> Result<PathBuf, StoreError> {
        check_name(chunk_hash)?;
        Ok(self.chunk_dir(info_hash)?.join(chunk_hash))
    }

    /// Chunk hashes present for `info_hash`. Empty if the directory does not exist.
    pub fn list_chunks(&self, info_hash: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.chunk_dir(info_hash)?;
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                // Skip in-progress temp files.
                if integrity::is_digest(name) {
                    out.push(name.to_owned());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn has_chunk(&self, info_hash: &str, chunk_hash: &str) -> bool {
        self.chunk_path(info_hash, chunk_hash)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Chunk bytes, or None if not held.
    pub fn read_chunk(&self, info_hash: &str, chunk_hash: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.chunk_path(info_hash, chunk_hash)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify `payload` hashes to `chunk_hash`, then store it. Rejected chunks are never written.
    /// Writes go through a temp file + rename, so concurrent writers of the same chunk are safe.
    pub fn write_chunk(&self, info_hash: &str, chunk_hash: &str, payload: &[u8]) -> Result<(), StoreError> {
        let actual = integrity::hash_chunk(payload);
        if !actual.eq_ignore_ascii_case(chunk_hash) {
            return Err(StoreError::ChunkIntegrityMismatch {
                expected: chunk_hash.to_owned(),
                actual,
            });
        }
        let path = self.chunk_path(info_hash, chunk_hash)?;
        let dir = self.chunk_dir(info_hash)?;
        fs::create_dir_all(&dir)?;
        write_atomic(&dir, &path, payload)?;
        debug!(info_hash, chunk_hash, len = payload.len(), "chunk stored");
        Ok(())
    }

    /// Pieces of `manifest` not present locally, as (index, hash) in piece order.
    pub fn missing_chunks(&self, manifest: &FileManifest) -> Result<Vec<(u32, String)>, StoreError> {
        let present: HashSet<String> = self.list_chunks(&manifest.info_hash)?.into_iter().collect();
        Ok(manifest
            .info
            .pieces
            .iter()
            .filter(|(_, h)| !present.contains(h.as_str()))
            .map(|(&i, h)| (i, h.clone()))
            .collect())
    }

    /// Concatenate all chunks in piece order into `dest` and check the whole-file digest.
    /// On mismatch the written file is removed.
    pub fn assemble(&self, manifest: &FileManifest, dest: &Path) -> Result<(), StoreError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut hasher = FileHasher::new();
        let result = (|| -> Result<(), StoreError> {
            let mut out = BufWriter::new(File::create(dest)?);
            for (&index, hash) in &manifest.info.pieces {
                let bytes = self
                    .read_chunk(&manifest.info_hash, hash)?
                    .ok_or_else(|| StoreError::MissingChunk {
                        index,
                        hash: hash.clone(),
                    })?;
                hasher.update(&bytes);
                out.write_all(&bytes)?;
            }
            out.flush()?;
            Ok(())
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(dest);
            return Err(e);
        }
        let actual = hasher.finish();
        if actual != manifest.info.file_hash {
            warn!(dest = %dest.display(), "reassembled file failed whole-file check, removing");
            let _ = fs::remove_file(dest);
            return Err(StoreError::FileIntegrityMismatch {
                expected: manifest.info.file_hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Fresh staging directory for a manifest under construction.
    pub fn begin_staging(&self) -> Result<Staging, StoreError> {
        fs::create_dir_all(&self.root)?;
        let dir = self.root.join(format!(".staging-{}", uuid::Uuid::new_v4()));
        fs::create_dir(&dir)?;
        Ok(Staging {
            dir,
            promoted: false,
        })
    }
}

/// Chunks written while a manifest is built. Removed on drop unless promoted.
pub struct Staging {
    dir: PathBuf,
    promoted: bool,
}

impl Staging {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write a chunk named by its digest. Returns the digest.
    pub fn put(&self, payload: &[u8]) -> Result<String, StoreError> {
        let hash = integrity::hash_chunk(payload);
        let path = self.dir.join(&hash);
        if !path.exists() {
            write_atomic(&self.dir, &path, payload)?;
        }
        Ok(hash)
    }

    /// Rename the staging directory to the canonical `info_hash` directory, replacing any existing one.
    pub fn promote(mut self, store: &ContentStore, info_hash: &str) -> Result<PathBuf, StoreError> {
        let target = store.chunk_dir(info_hash)?;
        if target.exists() {
            debug!(info_hash, "replacing existing chunk directory");
            fs::remove_dir_all(&target)?;
        }
        fs::rename(&self.dir, &target)?;
        self.promoted = true;
        Ok(target)
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.promoted {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// Write via a uniquely named temp file, so concurrent writers of one path never
/// share a temp file.
pub(crate) fn write_atomic(dir: &Path, path: &Path, payload: &[u8]) -> io::Result<()> {
    let tmp = dir.join(format!(".part-{}", uuid::Uuid::new_v4()));
    fs::write(&tmp, payload)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), StoreError> {
    if integrity::is_digest(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_owned()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("not a content digest: {0:?}")]
    InvalidName(String),
    #[error("chunk integrity mismatch: expected {expected}, got {actual}")]
    ChunkIntegrityMismatch { expected: String, actual: String },
    #[error("chunk {index} ({hash}) missing from store")]
    MissingChunk { index: u32, hash: String },
    #[error("file integrity mismatch: expected {expected}, got {actual}")]
    FileIntegrityMismatch { expected: String, actual: String },
}
