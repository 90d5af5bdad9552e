//! Peer transport: TCP server answering manifest / availability / chunk requests, and the
//! matching one-shot client. Each connection carries exactly one length-prefixed request
//! frame and one response frame, then closes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use swarm_core::wire::{body_len, decode_body, encode_frame, LEN_SIZE, MAX_FRAME_LEN, MAX_REQUEST_LEN};
use swarm_core::{
    ContentStore, FileManifest, FrameDecodeError, FrameEncodeError, ManifestCatalog, PeerRecord, Request,
    Response,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Answers requests from what this node holds. No per-connection state.
pub struct Responder {
    store: ContentStore,
    catalog: ManifestCatalog,
}

impl Responder {
    pub fn new(store: ContentStore, catalog: ManifestCatalog) -> Self {
        Self { store, catalog }
    }

    /// Lookup failures are logged and answered as "not held".
    pub fn respond(&self, req: Request) -> Response {
        match req {
            Request::Manifest { info_hash } => {
                let manifest = self.catalog.load(&info_hash).unwrap_or_else(|e| {
                    warn!(%info_hash, error = %e, "manifest lookup failed");
                    None
                });
                Response::Manifest(manifest)
            }
            Request::AvailableChunks { info_hash } => {
                let chunks = self.store.list_chunks(&info_hash).unwrap_or_else(|e| {
                    warn!(%info_hash, error = %e, "chunk listing failed");
                    Vec::new()
                });
                Response::AvailableChunks(chunks)
            }
            Request::Chunk {
                info_hash,
                chunk_hash,
            } => {
                let bytes = self.store.read_chunk(&info_hash, &chunk_hash).unwrap_or_else(|e| {
                    warn!(%info_hash, %chunk_hash, error = %e, "chunk read failed");
                    None
                });
                Response::Chunk(bytes)
            }
        }
    }
}

pub struct PeerServer {
    listener: TcpListener,
    responder: Arc<Responder>,
    io_timeout: Duration,
}

impl PeerServer {
    pub async fn bind(addr: &str, responder: Responder, io_timeout: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            responder: Arc::new(responder),
            io_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept forever; each connection is served on its own task so a slow peer stalls only itself.
    pub async fn run(self) -> io::Result<()> {
        info!(addr = %self.listener.local_addr()?, "peer server listening");
        let mut failures = 0u32;
        loop {
            let (stream, from) = match self.listener.accept().await {
                Ok(s) => {
                    failures = 0;
                    s
                }
                Err(e) => {
                    let delay = accept_backoff(failures);
                    failures = failures.saturating_add(1);
                    warn!(error = %e, retry_in = ?delay, "accept failed");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            let responder = self.responder.clone();
            let io_timeout = self.io_timeout;
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, responder, io_timeout).await {
                    debug!(%from, error = %e, "connection dropped");
                }
            });
        }
    }
}

/// Pause after the `failures`-th consecutive accept error (fd exhaustion and the like):
/// 10 ms doubling up to one second.
fn accept_backoff(failures: u32) -> Duration {
    Duration::from_millis(10u64.saturating_mul(1 << failures.min(7))).min(Duration::from_secs(1))
}

async fn serve_connection(
    mut stream: TcpStream,
    responder: Arc<Responder>,
    io_timeout: Duration,
) -> Result<(), TransportError> {
    let req: Request = timeout(io_timeout, read_frame(&mut stream, MAX_REQUEST_LEN))
        .await
        .map_err(|_| TransportError::Timeout)??;
    debug!(kind = req.kind(), info_hash = req.info_hash(), "request");
    let resp = tokio::task::spawn_blocking(move || responder.respond(req))
        .await
        .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
    timeout(io_timeout, write_frame(&mut stream, &resp))
        .await
        .map_err(|_| TransportError::Timeout)??;
    stream.shutdown().await?;
    Ok(())
}

/// Read one frame of at most `max` body bytes. The buffer grows as bytes arrive,
/// so a header alone never reserves the announced length.
pub(crate) async fn read_frame<T, R>(r: &mut R, max: u32) -> Result<T, TransportError>
where
    T: serde::de::DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LEN_SIZE];
    r.read_exact(&mut header).await?;
    let len = body_len(header, max)?;
    let mut body = Vec::new();
    r.take(len as u64).read_to_end(&mut body).await?;
    if body.len() < len {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "frame body cut short").into());
    }
    Ok(decode_body(&body)?)
}

pub(crate) async fn write_frame<T, W>(w: &mut W, msg: &T) -> Result<(), TransportError>
where
    T: serde::Serialize,
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg)?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// One-shot requester: connect, send one frame, read one frame, close.
#[derive(Debug, Clone, Copy)]
pub struct PeerClient {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl PeerClient {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    pub async fn request(&self, peer: &PeerRecord, req: &Request) -> Result<Response, TransportError> {
        let mut stream = timeout(self.connect_timeout, TcpStream::connect(peer.addr()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Connect)?;
        let resp: Response = timeout(self.io_timeout, async {
            write_frame(&mut stream, req).await?;
            read_frame::<Response, _>(&mut stream, MAX_FRAME_LEN).await
        })
        .await
        .map_err(|_| TransportError::Timeout)??;
        if !resp.answers(req) {
            return Err(TransportError::UnexpectedResponse(req.kind()));
        }
        Ok(resp)
    }

    pub async fn fetch_manifest(
        &self,
        peer: &PeerRecord,
        info_hash: &str,
    ) -> Result<Option<FileManifest>, TransportError> {
        let req = Request::Manifest {
            info_hash: info_hash.to_string(),
        };
        match self.request(peer, &req).await? {
            Response::Manifest(m) => Ok(m),
            _ => Err(TransportError::UnexpectedResponse(req.kind())),
        }
    }

    pub async fn available_chunks(&self, peer: &PeerRecord, info_hash: &str) -> Result<Vec<String>, TransportError> {
        let req = Request::AvailableChunks {
            info_hash: info_hash.to_string(),
        };
        match self.request(peer, &req).await? {
            Response::AvailableChunks(list) => Ok(list),
            _ => Err(TransportError::UnexpectedResponse(req.kind())),
        }
    }

    pub async fn fetch_chunk(
        &self,
        peer: &PeerRecord,
        info_hash: &str,
        chunk_hash: &str,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let req = Request::Chunk {
            info_hash: info_hash.to_string(),
            chunk_hash: chunk_hash.to_string(),
        };
        match self.request(peer, &req).await? {
            Response::Chunk(bytes) => Ok(bytes),
            _ => Err(TransportError::UnexpectedResponse(req.kind())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(io::Error),
    #[error("timed out")]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
    #[error("peer sent the wrong response kind to a {0} request")]
    UnexpectedResponse(&'static str),
}
