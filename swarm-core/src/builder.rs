//! Manifest builder: split a source file into chunks, stage them, and publish the manifest.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::catalog::{CatalogError, ManifestCatalog};
use crate::chunk::DEFAULT_CHUNK_LENGTH;
use crate::integrity::FileHasher;
use crate::manifest::{FileManifest, ManifestError, ManifestInfo};
use crate::store::{ContentStore, StoreError};
use crate::wire::MAX_CHUNK_LENGTH;

pub struct ManifestBuilder {
    chunk_length: u64,
    announce_url: String,
}

impl ManifestBuilder {
    pub fn new(announce_url: impl Into<String>) -> Self {
        Self {
            chunk_length: DEFAULT_CHUNK_LENGTH,
            announce_url: announce_url.into(),
        }
    }

    /// Chunk length for new manifests. Zero keeps the default.
    pub fn chunk_length(mut self, len: u64) -> Self {
        if len > 0 {
            self.chunk_length = len;
        }
        self
    }

    /// Chunk `source` into `store`, then persist the manifest in `catalog`.
    /// Nothing is published if reading the source fails part way.
    pub fn build(
        &self,
        source: &Path,
        store: &ContentStore,
        catalog: &ManifestCatalog,
    ) -> Result<FileManifest, BuildError> {
        if self.chunk_length > MAX_CHUNK_LENGTH {
            return Err(BuildError::ChunkTooLarge {
                len: self.chunk_length,
                max: MAX_CHUNK_LENGTH,
            });
        }
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BuildError::BadSourceName(source.to_path_buf()))?
            .to_owned();
        let open_err = |e: io::Error| BuildError::Read {
            path: source.to_path_buf(),
            source: e,
        };
        let mut reader = BufReader::new(File::open(source).map_err(open_err)?);

        let staging = store.begin_staging()?;
        let mut file_hash = FileHasher::new();
        let mut pieces = BTreeMap::new();
        let mut index = 0u32;
        let mut block = Vec::new();
        loop {
            block.clear();
            let n = (&mut reader)
                .take(self.chunk_length)
                .read_to_end(&mut block)
                .map_err(open_err)?;
            if n == 0 {
                break;
            }
            file_hash.update(&block);
            let hash = staging.put(&block)?;
            pieces.insert(index, hash);
            index += 1;
        }

        let info = ManifestInfo {
            file_name,
            total_length: file_hash.bytes_hashed(),
            chunk_length: self.chunk_length,
            pieces,
            file_hash: file_hash.finish(),
        };
        let manifest = FileManifest::new(self.announce_url.clone(), info)?;
        staging.promote(store, &manifest.info_hash)?;
        catalog.save(&manifest)?;
        info!(
            info_hash = %manifest.info_hash,
            name = %manifest.info.file_name,
            pieces = manifest.info.piece_count(),
            "manifest published"
        );
        Ok(manifest)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("chunk length {len} exceeds the largest transferable chunk ({max})")]
    ChunkTooLarge { len: u64, max: u64 },
    #[error("source path has no usable file name: {0}")]
    BadSourceName(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
