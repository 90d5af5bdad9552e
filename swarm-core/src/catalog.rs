//! Manifest catalog: persisted manifest records, one JSON file per `info_hash`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::integrity;
use crate::manifest::FileManifest;
use crate::store::write_atomic;

#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    dir: PathBuf,
}

impl ManifestCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, info_hash: &str) -> Option<PathBuf> {
        integrity::is_digest(info_hash).then(|| self.dir.join(format!("{info_hash}.json")))
    }

    /// Persist a record. Written to a temp file first so readers never see a partial record.
    pub fn save(&self, manifest: &FileManifest) -> Result<PathBuf, CatalogError> {
        let path = self
            .record_path(&manifest.info_hash)
            .ok_or_else(|| CatalogError::InvalidInfoHash(manifest.info_hash.clone()))?;
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(manifest)?;
        write_atomic(&self.dir, &path, &json)?;
        Ok(path)
    }

    /// Record for `info_hash`, or None if unknown.
    pub fn load(&self, info_hash: &str) -> Result<Option<FileManifest>, CatalogError> {
        let Some(path) = self.record_path(info_hash) else {
            return Ok(None);
        };
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: FileManifest = serde_json::from_slice(&bytes)?;
        if manifest.info_hash != info_hash {
            return Ok(None);
        }
        Ok(Some(manifest))
    }

    /// All readable records. Unreadable ones are logged and skipped.
    pub fn list(&self) -> Result<Vec<FileManifest>, CatalogError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            match fs::read(&path)
                .map_err(CatalogError::from)
                .and_then(|b| serde_json::from_slice::<FileManifest>(&b).map_err(CatalogError::from))
            {
                Ok(m) => out.push(m),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable manifest record"),
            }
        }
        out.sort_by(|a, b| a.info_hash.cmp(&b.info_hash));
        Ok(out)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad manifest record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a content digest: {0:?}")]
    InvalidInfoHash(String),
}
