//! Peer records and the node's session peer cache.

use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Deserializer, Serialize};

/// A peer's advertised address. Extra tracker fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerRecord {
    pub ip: String,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,
}

impl PeerRecord {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    /// `ip:port` form accepted by socket connect (IPv6 literals are bracketed).
    pub fn addr(&self) -> String {
        if self.ip.contains(':') && !self.ip.starts_with('[') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }
}

impl fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr())
    }
}

// Trackers are not consistent about the port's JSON type.
fn port_from_number_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Num(u16),
        Str(String),
    }
    match Port::deserialize(d)? {
        Port::Num(p) => Ok(p),
        Port::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Peers seen during this node's lifetime. Append/dedup only, in discovery order.
#[derive(Debug, Default)]
pub struct PeerCache {
    peers: RwLock<Vec<PeerRecord>>,
}

impl PeerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add peers not already known. Returns how many were new.
    pub fn merge(&self, incoming: &[PeerRecord]) -> usize {
        let mut peers = match self.peers.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut added = 0;
        for p in incoming {
            if !peers.contains(p) {
                peers.push(p.clone());
                added += 1;
            }
        }
        added
    }

    pub fn snapshot(&self) -> Vec<PeerRecord> {
        match self.peers.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn merge_dedups_and_keeps_order() {
        let cache = PeerCache::new();
        let a = PeerRecord::new("10.0.0.1", 7000);
        let b = PeerRecord::new("10.0.0.2", 7000);
        assert_eq!(cache.merge(&[a.clone(), b.clone(), a.clone()]), 2);
        assert_eq!(cache.merge(&[b.clone()]), 0);
        assert_eq!(cache.snapshot(), vec![a, b]);
    }

    #[test]
    fn tracker_json_with_extra_fields_and_string_port() {
        let peers: Vec<PeerRecord> = serde_json::from_str(
            r#"[{"ip":"1.2.3.4","port":"6881","peer_id":"x"},{"ip":"::1","port":7000}]"#,
        )
        .unwrap();
        assert_eq!(peers[0], PeerRecord::new("1.2.3.4", 6881));
        assert_eq!(peers[1].addr(), "[::1]:7000");
    }

    #[test]
    fn concurrent_merges_do_not_duplicate() {
        let cache = Arc::new(PeerCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    let batch: Vec<PeerRecord> =
                        (0..20).map(|i| PeerRecord::new("10.0.0.1", 7000 + i)).collect();
                    cache.merge(&batch)
                })
            })
            .collect();
        let added: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(added, 20);
        assert_eq!(cache.snapshot().len(), 20);
    }
}
