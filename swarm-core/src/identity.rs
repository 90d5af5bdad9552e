//! Node identity: peer id plus the address announced to the tracker.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::peers::PeerRecord;

/// Opaque peer id sent on every announce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Random UUIDv4 id.
    pub fn generate() -> Self {
        PeerId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who this node is and where peers can reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub peer_id: PeerId,
    pub ip: String,
    pub port: u16,
}

impl NodeIdentity {
    pub fn new(peer_id: PeerId, ip: impl Into<String>, port: u16) -> Self {
        Self {
            peer_id,
            ip: ip.into(),
            port,
        }
    }

    /// This node as it appears in tracker peer lists.
    pub fn as_peer(&self) -> PeerRecord {
        PeerRecord::new(self.ip.clone(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn identity_as_peer_record() {
        let id = NodeIdentity::new(PeerId::from("node-1".to_string()), "10.1.1.1", 7001);
        assert_eq!(id.as_peer(), PeerRecord::new("10.1.1.1", 7001));
    }
}
