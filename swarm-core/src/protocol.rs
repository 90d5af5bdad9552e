//! Peer wire protocol: one request, one response, per connection.

use serde::{Deserialize, Serialize};

use crate::manifest::FileManifest;

/// Current protocol version. First byte of every frame body.
pub const PROTOCOL_VERSION: u8 = 1;

/// Requests a peer can make. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Send the manifest record for `info_hash`.
    Manifest { info_hash: String },
    /// List chunk hashes held for `info_hash`.
    AvailableChunks { info_hash: String },
    /// Send one chunk's bytes.
    Chunk { info_hash: String, chunk_hash: String },
}

impl Request {
    pub fn info_hash(&self) -> &str {
        match self {
            Request::Manifest { info_hash }
            | Request::AvailableChunks { info_hash }
            | Request::Chunk { info_hash, .. } => info_hash,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::Manifest { .. } => "manifest",
            Request::AvailableChunks { .. } => "available_chunks",
            Request::Chunk { .. } => "chunk",
        }
    }
}

/// Responses, one variant per request kind. `None` means the responder does not hold it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Manifest(Option<FileManifest>),
    AvailableChunks(Vec<String>),
    Chunk(Option<Vec<u8>>),
}

impl Response {
    /// True if this response is the right kind for `req`.
    pub fn answers(&self, req: &Request) -> bool {
        matches!(
            (req, self),
            (Request::Manifest { .. }, Response::Manifest(_))
                | (Request::AvailableChunks { .. }, Response::AvailableChunks(_))
                | (Request::Chunk { .. }, Response::Chunk(_))
        )
    }
}
