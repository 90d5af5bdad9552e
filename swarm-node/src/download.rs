//! Download orchestrator: discover peers, acquire and authenticate the manifest, probe
//! availability, fetch missing chunks in passes, reassemble and verify, announce completion.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use swarm_core::{
    CatalogError, ContentStore, FetchState, FileManifest, ManifestCatalog, PeerRecord, ProgressEvent, StoreError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tracker::{AnnounceEvent, TrackerClient};
use crate::transport::{PeerClient, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("no peers available")]
    NoPeersAvailable,
    #[error("no reachable peer supplied the manifest")]
    ManifestUnavailable,
    #[error("manifest names an unsafe output file: {0:?}")]
    UnsafeFileName(String),
    #[error("no peer can supply the remaining {missing} chunk(s)")]
    UnrecoverableGap { missing: usize },
    #[error("reassembled file failed verification: expected {expected}, got {actual}")]
    FileIntegrityMismatch { expected: String, actual: String },
    #[error("download cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Abort flag checked between fetch passes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A download running on its own task.
pub struct DownloadHandle {
    pub progress: mpsc::UnboundedReceiver<ProgressEvent>,
    cancel: CancelToken,
    task: JoinHandle<Result<PathBuf, DownloadError>>,
}

impl DownloadHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<PathBuf, DownloadError> {
        self.task.await?
    }
}

struct Reporter(Option<mpsc::UnboundedSender<ProgressEvent>>);

impl Reporter {
    fn send(&self, ev: ProgressEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(ev);
        }
    }
}

pub struct Downloader {
    tracker: Arc<TrackerClient>,
    client: PeerClient,
    store: ContentStore,
    catalog: ManifestCatalog,
    downloads_dir: PathBuf,
}

impl Downloader {
    pub fn new(
        tracker: Arc<TrackerClient>,
        client: PeerClient,
        store: ContentStore,
        catalog: ManifestCatalog,
        downloads_dir: PathBuf,
    ) -> Self {
        Self {
            tracker,
            client,
            store,
            catalog,
            downloads_dir,
        }
    }

    /// Run a download on its own task; the caller reads progress from the handle.
    pub fn spawn(self: &Arc<Self>, info_hash: String, name: String) -> DownloadHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancelToken::new();
        let this = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { this.download(&info_hash, &name, Some(tx), &token).await });
        DownloadHandle {
            progress: rx,
            cancel,
            task,
        }
    }

    /// Download `info_hash` into the downloads directory. Returns the output path.
    /// A terminal `success` or `failed` event is always sent last.
    pub async fn download(
        &self,
        info_hash: &str,
        name: &str,
        progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
        cancel: &CancelToken,
    ) -> Result<PathBuf, DownloadError> {
        let reporter = Reporter(progress);
        let result = self.run(info_hash, name, &reporter, cancel).await;
        match &result {
            Ok(path) => {
                info!(info_hash, path = %path.display(), "download complete");
                reporter.send(ProgressEvent::Success);
            }
            Err(e) => {
                warn!(info_hash, error = %e, "download failed");
                reporter.send(ProgressEvent::Failed { reason: e.to_string() });
            }
        }
        result
    }

    async fn run(
        &self,
        info_hash: &str,
        name: &str,
        reporter: &Reporter,
        cancel: &CancelToken,
    ) -> Result<PathBuf, DownloadError> {
        let mut peers = self.discover(info_hash, name).await;
        if peers.is_empty() {
            return Err(DownloadError::NoPeersAvailable);
        }

        let manifest = self.acquire_manifest(info_hash, &mut peers).await?;
        let file_name = manifest
            .safe_file_name()
            .ok_or_else(|| DownloadError::UnsafeFileName(manifest.info.file_name.clone()))?
            .to_string();
        self.catalog.save(&manifest)?;

        let present = self.store.list_chunks(info_hash)?;
        let mut state = FetchState::new(&manifest, &present);
        debug!(info_hash, missing = state.missing().len(), present = present.len(), "deficit computed");

        if !state.is_complete() {
            self.probe(info_hash, &peers, &mut state).await;
        }
        reporter.send(ProgressEvent::Update {
            percent: state.percent(),
        });

        while !state.is_complete() {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            if state.is_stalled() {
                return Err(DownloadError::UnrecoverableGap {
                    missing: state.missing().len(),
                });
            }
            let plan = state.plan_pass();
            self.fetch_pass(info_hash, plan, &mut state).await;
            reporter.send(ProgressEvent::Update {
                percent: state.percent(),
            });
        }

        let dest = self.downloads_dir.join(&file_name);
        let store = self.store.clone();
        let out = dest.clone();
        tokio::task::spawn_blocking(move || store.assemble(&manifest, &out))
            .await?
            .map_err(|e| match e {
                StoreError::FileIntegrityMismatch { expected, actual } => {
                    DownloadError::FileIntegrityMismatch { expected, actual }
                }
                other => DownloadError::Store(other),
            })?;

        self.tracker.announce(info_hash, name, AnnounceEvent::Completed).await;
        Ok(dest)
    }

    /// Peers from the tracker (or its cache), deduplicated, without this node.
    async fn discover(&self, info_hash: &str, name: &str) -> Vec<PeerRecord> {
        let me = self.tracker.identity().as_peer();
        let mut peers: Vec<PeerRecord> = Vec::new();
        for p in self.tracker.announce(info_hash, name, AnnounceEvent::Started).await {
            if p != me && !peers.contains(&p) {
                peers.push(p);
            }
        }
        debug!(info_hash, peers = peers.len(), "peers discovered");
        peers
    }

    /// First authentic manifest from any peer. Peers that fail are dropped from `peers`.
    async fn acquire_manifest(
        &self,
        info_hash: &str,
        peers: &mut Vec<PeerRecord>,
    ) -> Result<FileManifest, DownloadError> {
        let mut unreachable = Vec::new();
        let mut found = None;
        for peer in peers.iter() {
            match self.client.fetch_manifest(peer, info_hash).await {
                Ok(Some(m)) if m.info_hash == info_hash && m.verify().is_ok() => {
                    found = Some(m);
                    break;
                }
                Ok(Some(_)) => {
                    warn!(%peer, info_hash, "peer sent a manifest that does not match its info_hash");
                    unreachable.push(peer.clone());
                }
                Ok(None) => debug!(%peer, info_hash, "peer does not hold the manifest"),
                Err(e) => {
                    warn!(%peer, error = %e, "peer unreachable");
                    unreachable.push(peer.clone());
                }
            }
        }
        peers.retain(|p| !unreachable.contains(p));
        found.ok_or(DownloadError::ManifestUnavailable)
    }

    /// Ask every peer which chunks it holds. Peers that fail simply claim nothing.
    async fn probe(&self, info_hash: &str, peers: &[PeerRecord], state: &mut FetchState) {
        for peer in peers {
            match self.client.available_chunks(peer, info_hash).await {
                Ok(list) => {
                    debug!(%peer, claimed = list.len(), "availability");
                    state.set_claims(peer.clone(), list);
                }
                Err(e) => {
                    warn!(%peer, error = %e, "availability probe failed");
                    state.set_claims(peer.clone(), Vec::new());
                }
            }
        }
    }

    /// One pass: each peer fetches its assigned chunks on its own task.
    async fn fetch_pass(&self, info_hash: &str, plan: Vec<(PeerRecord, Vec<String>)>, state: &mut FetchState) {
        let mut tasks = Vec::with_capacity(plan.len());
        for (peer, hashes) in plan {
            let client = self.client;
            let store = self.store.clone();
            let ih = info_hash.to_string();
            let p = peer.clone();
            let batch = hashes.clone();
            let task = tokio::spawn(async move { fetch_from_peer(client, store, ih, p, batch).await });
            tasks.push((peer, hashes, task));
        }
        for (peer, hashes, task) in tasks {
            match task.await {
                Ok(batch) => {
                    for (hash, stored) in batch.outcomes {
                        state.record_attempt(&peer, &hash, stored);
                    }
                    if batch.unreachable {
                        state.drop_peer(&peer);
                    }
                }
                Err(e) => {
                    warn!(%peer, error = %e, "fetch task failed");
                    for hash in hashes {
                        state.record_attempt(&peer, &hash, false);
                    }
                }
            }
        }
    }
}

struct BatchResult {
    /// (hash, stored) for each attempted chunk.
    outcomes: Vec<(String, bool)>,
    /// The peer failed to connect or timed out; it gets nothing more this download.
    unreachable: bool,
}

/// Fetch `hashes` from one peer, one connection per chunk. Stops at the first connect
/// failure or timeout.
async fn fetch_from_peer(
    client: PeerClient,
    store: ContentStore,
    info_hash: String,
    peer: PeerRecord,
    hashes: Vec<String>,
) -> BatchResult {
    let mut outcomes = Vec::with_capacity(hashes.len());
    for hash in hashes {
        let bytes = match client.fetch_chunk(&peer, &info_hash, &hash).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(%peer, chunk = %hash, "peer no longer holds chunk");
                outcomes.push((hash, false));
                continue;
            }
            Err(e @ (TransportError::Connect(_) | TransportError::Timeout)) => {
                warn!(%peer, error = %e, "peer unreachable, dropping it from this download");
                outcomes.push((hash, false));
                return BatchResult {
                    outcomes,
                    unreachable: true,
                };
            }
            Err(e) => {
                warn!(%peer, chunk = %hash, error = %e, "chunk request failed");
                outcomes.push((hash, false));
                continue;
            }
        };
        let store = store.clone();
        let (ih, h) = (info_hash.clone(), hash.clone());
        let stored = match tokio::task::spawn_blocking(move || store.write_chunk(&ih, &h, &bytes)).await {
            Ok(Ok(())) => true,
            Ok(Err(StoreError::ChunkIntegrityMismatch { actual, .. })) => {
                warn!(%peer, chunk = %hash, got = %actual, "discarding chunk that fails verification");
                false
            }
            Ok(Err(e)) => {
                warn!(chunk = %hash, error = %e, "storing chunk failed");
                false
            }
            Err(e) => {
                warn!(chunk = %hash, error = %e, "store task failed");
                false
            }
        };
        outcomes.push((hash, stored));
    }
    BatchResult {
        outcomes,
        unreachable: false,
    }
}
