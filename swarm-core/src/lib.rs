//! Swarm engine core: content-addressed chunk storage, manifests, peer wire protocol
//! and fetch scheduling. No sockets; the node drives I/O.

pub mod builder;
pub mod catalog;
pub mod chunk;
pub mod identity;
pub mod integrity;
pub mod manifest;
pub mod peers;
pub mod progress;
pub mod protocol;
pub mod scheduler;
pub mod store;
pub mod wire;

pub use builder::{BuildError, ManifestBuilder};
pub use catalog::{CatalogError, ManifestCatalog};
pub use identity::{NodeIdentity, PeerId};
pub use manifest::{FileManifest, ManifestError, ManifestInfo};
pub use peers::{PeerCache, PeerRecord};
pub use progress::ProgressEvent;
pub use protocol::{Request, Response, PROTOCOL_VERSION};
pub use scheduler::FetchState;
pub use store::{ContentStore, StoreError};
pub use wire::{encode_frame, FrameDecodeError, FrameEncodeError, MAX_CHUNK_LENGTH};
