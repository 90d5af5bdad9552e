//! File manifest ("torrent"): descriptive fields, their digest (`info_hash`), and validation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunk;
use crate::integrity;

/// Descriptive fields of one shared file. `info_hash` is computed over exactly these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestInfo {
    pub file_name: String,
    pub total_length: u64,
    pub chunk_length: u64,
    /// Piece index -> chunk hash, contiguous from 0.
    pub pieces: BTreeMap<u32, String>,
    pub file_hash: String,
}

impl ManifestInfo {
    /// Deterministic digest of the descriptive fields.
    pub fn info_hash(&self) -> Result<String, ManifestError> {
        let encoded = serde_json::to_vec(self)?;
        Ok(integrity::hash_chunk(&encoded))
    }

    /// Chunk hashes in piece order.
    pub fn piece_hashes(&self) -> impl Iterator<Item = &str> {
        self.pieces.values().map(String::as_str)
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }
}

/// Manifest record as persisted locally and sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    pub announce_url: String,
    pub info: ManifestInfo,
    pub info_hash: String,
}

impl FileManifest {
    pub fn new(announce_url: impl Into<String>, info: ManifestInfo) -> Result<Self, ManifestError> {
        let info_hash = info.info_hash()?;
        Ok(Self {
            announce_url: announce_url.into(),
            info,
            info_hash,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.info.file_name
    }

    /// Check internal consistency: digest matches fields and the piece list matches the lengths.
    /// Used on every manifest received from a peer.
    pub fn verify(&self) -> Result<(), ManifestError> {
        let computed = self.info.info_hash()?;
        if computed != self.info_hash {
            return Err(ManifestError::InfoHashMismatch {
                expected: self.info_hash.clone(),
                actual: computed,
            });
        }
        let expected = chunk::piece_count(self.info.total_length, self.info.chunk_length);
        if self.info.chunk_length == 0 || self.info.pieces.len() != expected {
            return Err(ManifestError::BadLayout);
        }
        let contiguous = self
            .info
            .pieces
            .keys()
            .enumerate()
            .all(|(i, &k)| i as u64 == u64::from(k));
        if !contiguous {
            return Err(ManifestError::BadLayout);
        }
        if !self.info.piece_hashes().all(integrity::is_digest) || !integrity::is_digest(&self.info_hash) {
            return Err(ManifestError::BadDigest);
        }
        Ok(())
    }

    /// Expected byte length of the chunk at `index`.
    pub fn chunk_len(&self, index: u32) -> Option<u64> {
        chunk::span_len(self.info.total_length, self.info.chunk_length, index)
    }

    /// The file name if it is a single plain path component, safe to join onto an output dir.
    pub fn safe_file_name(&self) -> Option<&str> {
        let name = self.info.file_name.as_str();
        let p = Path::new(name);
        match p.file_name() {
            Some(f) if f == p.as_os_str() && name != "." && name != ".." && !name.is_empty() => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("info_hash mismatch: manifest claims {expected}, fields hash to {actual}")]
    InfoHashMismatch { expected: String, actual: String },
    #[error("piece list does not match file and chunk lengths")]
    BadLayout,
    #[error("manifest contains a malformed digest")]
    BadDigest,
}
