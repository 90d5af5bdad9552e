//! Test helpers: a canned-response tracker over raw TCP and seeding peers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use swarm_core::wire::MAX_REQUEST_LEN;
use swarm_core::{ContentStore, FileManifest, ManifestBuilder, ManifestCatalog, PeerRecord, Request};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::transport::{read_frame, write_frame, PeerServer, Responder};

pub struct MockTracker {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl MockTracker {
    /// Serve `announce` for /announce and `scrape` for /scrape/all, forever.
    pub async fn start(announce: &str, scrape: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();
        let (announce, scrape) = (announce.to_string(), scrape.to_string());
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = log.clone();
                let (announce, scrape) = (announce.clone(), scrape.clone());
                tokio::spawn(async move {
                    let _ = answer(stream, log, &announce, &scrape).await;
                });
            }
        });
        Self {
            addr,
            requests,
            task,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Request targets seen so far, in arrival order.
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

impl Drop for MockTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(
    mut stream: TcpStream,
    log: Arc<Mutex<Vec<String>>>,
    announce: &str,
    scrape: &str,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let path = loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => break req.path.unwrap_or("/").to_string(),
            Ok(httparse::Status::Partial) => continue,
            Err(_) => return Ok(()),
        }
    };
    log.lock().await.push(path.clone());
    let body = if path.starts_with("/announce") {
        announce
    } else if path.starts_with("/scrape/all") {
        scrape
    } else {
        ""
    };
    let status = if body.is_empty() { "404 Not Found" } else { "200 OK" };
    let resp = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(resp.as_bytes()).await?;
    stream.shutdown().await
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A published file served by a live peer server.
pub struct Seed {
    _dir: tempfile::TempDir,
    pub store: ContentStore,
    pub catalog: ManifestCatalog,
    pub peer: PeerRecord,
    pub manifest: FileManifest,
    pub data: Vec<u8>,
}

/// Publish `data` as `shared.bin` and serve it on a loopback port.
pub async fn seed(data: &[u8], chunk_len: u64) -> Seed {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().join("chunks"));
    let catalog = ManifestCatalog::new(dir.path().join("torrents"));
    let src = dir.path().join("shared.bin");
    std::fs::write(&src, data).unwrap();
    let manifest = ManifestBuilder::new("http://t/")
        .chunk_length(chunk_len)
        .build(&src, &store, &catalog)
        .unwrap();
    let peer = serve(store.clone(), catalog.clone()).await;
    Seed {
        _dir: dir,
        store,
        catalog,
        peer,
        manifest,
        data: data.to_vec(),
    }
}

/// Serve whatever `store` and `catalog` hold.
pub async fn serve(store: ContentStore, catalog: ManifestCatalog) -> PeerRecord {
    let server = PeerServer::bind("127.0.0.1:0", Responder::new(store, catalog), Duration::from_secs(5))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    PeerRecord::new("127.0.0.1", addr.port())
}

/// Answers manifest and availability requests from `store` and `catalog`, then never
/// answers a chunk request.
pub async fn stalling_peer(store: ContentStore, catalog: ManifestCatalog) -> PeerRecord {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let responder = Arc::new(Responder::new(store, catalog));
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let responder = responder.clone();
            tokio::spawn(async move {
                let Ok(req) = read_frame::<Request, _>(&mut stream, MAX_REQUEST_LEN).await else {
                    return;
                };
                if matches!(req, Request::Chunk { .. }) {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    return;
                }
                let _ = write_frame(&mut stream, &responder.respond(req)).await;
            });
        }
    });
    PeerRecord::new("127.0.0.1", port)
}
