// swarm: peer server, tracker client and downloader over one data directory.

mod config;
mod download;
#[cfg(test)]
mod test_support;
mod tracker;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use swarm_core::{ContentStore, ManifestBuilder, ManifestCatalog, NodeIdentity, PeerCache, PeerId, ProgressEvent};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::download::Downloader;
use crate::tracker::{AnnounceEvent, TrackerClient};
use crate::transport::{PeerClient, PeerServer, Responder};

#[derive(Parser)]
#[command(name = "swarm", version, about = "Content-addressed peer-to-peer file sharing")]
struct Cli {
    /// Config file (default: ~/.config/swarm/config.toml, then /etc/swarm/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Re-announce everything held locally and serve it until interrupted
    Serve,
    /// Chunk a file, announce it, then serve it
    Publish {
        file: PathBuf,
        #[arg(long)]
        chunk_length: Option<u64>,
        /// Exit after announcing instead of serving
        #[arg(long, default_value_t = false)]
        no_serve: bool,
    },
    /// Fetch a file by info hash into the downloads directory
    Download {
        info_hash: String,
        #[arg(default_value = "")]
        name: String,
    },
    /// List files known to the tracker
    List,
}

/// Everything a command needs: local storage, the bound server and a tracker client
/// announcing the server's real port.
struct Node {
    cfg: Config,
    store: ContentStore,
    catalog: ManifestCatalog,
    tracker: Arc<TrackerClient>,
    server: PeerServer,
}

impl Node {
    async fn start(cfg: Config) -> Result<Self> {
        let store = ContentStore::new(cfg.chunks_dir());
        let catalog = ManifestCatalog::new(cfg.torrents_dir());
        let bind = format!("{}:{}", cfg.listen_ip, cfg.listen_port);
        let server = PeerServer::bind(&bind, Responder::new(store.clone(), catalog.clone()), cfg.io_timeout())
            .await
            .with_context(|| format!("bind peer server on {bind}"))?;
        let port = server.local_addr()?.port();
        let peer_id = cfg.peer_id.clone().map(PeerId::from).unwrap_or_else(PeerId::generate);
        let identity = NodeIdentity::new(peer_id, cfg.advertise_ip.clone(), port);
        info!(peer_id = %identity.peer_id, advertise = %identity.as_peer(), "node identity");
        let tracker = TrackerClient::new(&cfg.tracker_url, identity, Arc::new(PeerCache::new()), cfg.tracker_timeout())
            .context("build tracker client")?;
        Ok(Self {
            cfg,
            store,
            catalog,
            tracker: Arc::new(tracker),
            server,
        })
    }

    /// Tell the tracker about every catalog record: "stopped" first, then as a holder.
    async fn reannounce(&self) -> Result<()> {
        let records = self.catalog.list().context("read manifest catalog")?;
        for m in &records {
            self.tracker.announce(&m.info_hash, m.file_name(), AnnounceEvent::Stopped).await;
            self.tracker.announce(&m.info_hash, m.file_name(), AnnounceEvent::Empty).await;
        }
        info!(count = records.len(), "re-announced held files");
        Ok(())
    }

    async fn serve_until_shutdown(self) -> Result<()> {
        info!(addr = %self.server.local_addr()?, "serving peers");
        let server = tokio::spawn(self.server.run());
        tokio::select! {
            res = server => res.context("peer server task")?.context("peer server")?,
            res = shutdown_signal() => res?,
        }
        info!("shutting down");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    match cli.cmd {
        Cmd::Serve => {
            let node = Node::start(cfg).await?;
            node.reannounce().await?;
            node.serve_until_shutdown().await
        }
        Cmd::Publish {
            file,
            chunk_length,
            no_serve,
        } => publish(cfg, file, chunk_length, no_serve).await,
        Cmd::Download { info_hash, name } => download(cfg, info_hash, name).await,
        Cmd::List => list(cfg).await,
    }
}

async fn publish(cfg: Config, file: PathBuf, chunk_length: Option<u64>, no_serve: bool) -> Result<()> {
    let node = Node::start(cfg).await?;
    let builder = ManifestBuilder::new(node.tracker.announce_url()).chunk_length(chunk_length.unwrap_or(node.cfg.chunk_length));
    let (store, catalog, src) = (node.store.clone(), node.catalog.clone(), file.clone());
    let manifest = tokio::task::spawn_blocking(move || builder.build(&src, &store, &catalog))
        .await?
        .with_context(|| format!("publish {}", file.display()))?;
    node.tracker
        .announce(&manifest.info_hash, manifest.file_name(), AnnounceEvent::Empty)
        .await;
    println!("{}  {}", manifest.info_hash, manifest.file_name());
    if no_serve {
        return Ok(());
    }
    node.serve_until_shutdown().await
}

async fn download(cfg: Config, info_hash: String, name: String) -> Result<()> {
    let node = Node::start(cfg).await?;
    let server = tokio::spawn(node.server.run());
    let downloader = Arc::new(Downloader::new(
        node.tracker.clone(),
        PeerClient::new(node.cfg.connect_timeout(), node.cfg.io_timeout()),
        node.store.clone(),
        node.catalog.clone(),
        node.cfg.downloads_dir(),
    ));
    let mut handle = downloader.spawn(info_hash.clone(), name);
    loop {
        tokio::select! {
            ev = handle.progress.recv() => {
                let Some(ev) = ev else { break };
                if let ProgressEvent::Update { percent } = ev {
                    info!(%info_hash, percent, "progress");
                }
                if ev.is_terminal() {
                    break;
                }
            }
            res = shutdown_signal() => {
                res?;
                warn!("interrupted, cancelling after the current pass");
                handle.cancel();
            }
        }
    }
    let result = handle.wait().await;
    server.abort();
    let path = result.with_context(|| format!("download {info_hash}"))?;
    println!("{}", path.display());
    Ok(())
}

async fn list(cfg: Config) -> Result<()> {
    let id = NodeIdentity::new(
        cfg.peer_id.clone().map(PeerId::from).unwrap_or_else(PeerId::generate),
        cfg.advertise_ip.clone(),
        cfg.listen_port,
    );
    let tracker = TrackerClient::new(&cfg.tracker_url, id, Arc::new(PeerCache::new()), cfg.tracker_timeout())
        .context("build tracker client")?;
    let entries = tracker.scrape().await;
    if entries.is_empty() {
        warn!(tracker = %cfg.tracker_url, "tracker listed no files");
    }
    for e in entries {
        println!("{}  {:>4} peer(s)  {}", e.info_hash, e.peer_count(), e.name);
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
