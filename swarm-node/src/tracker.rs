//! Tracker HTTP client: announce (register + discover peers) and scrape (catalog listing).
//! Both calls are best-effort: failures are logged and degrade to cached or empty data.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use swarm_core::{NodeIdentity, PeerCache, PeerRecord};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    Started,
    Stopped,
    Completed,
    /// Regular announce with no lifecycle change.
    Empty,
}

impl AnnounceEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnounceEvent::Started => "started",
            AnnounceEvent::Stopped => "stopped",
            AnnounceEvent::Completed => "completed",
            AnnounceEvent::Empty => "",
        }
    }
}

/// One file in the tracker's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScrapeEntry {
    pub name: String,
    pub info_hash: String,
    #[serde(default)]
    pub peers: Vec<PeerRecord>,
}

impl ScrapeEntry {
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[derive(Debug, thiserror::Error)]
enum TrackerError {
    #[error("tracker unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("tracker answered {0}")]
    Status(reqwest::StatusCode),
}

pub struct TrackerClient {
    http: reqwest::Client,
    base_url: String,
    identity: NodeIdentity,
    cache: Arc<PeerCache>,
}

impl TrackerClient {
    pub fn new(
        base_url: &str,
        identity: NodeIdentity,
        cache: Arc<PeerCache>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            identity,
            cache,
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn announce_url(&self) -> String {
        format!("{}/", self.base_url)
    }

    /// Announce `event` for a file. Returns the tracker's peer list for it, merging new peers
    /// into the cache. If the tracker cannot be reached, returns the cached list instead.
    pub async fn announce(&self, info_hash: &str, name: &str, event: AnnounceEvent) -> Vec<PeerRecord> {
        match self.try_announce(info_hash, name, event).await {
            Ok(peers) => {
                let added = self.cache.merge(&peers);
                debug!(info_hash, event = event.as_str(), peers = peers.len(), added, "announced");
                peers
            }
            Err(e) => {
                warn!(info_hash, event = event.as_str(), error = %e, "announce failed, using cached peers");
                self.cache.snapshot()
            }
        }
    }

    async fn try_announce(
        &self,
        info_hash: &str,
        name: &str,
        event: AnnounceEvent,
    ) -> Result<Vec<PeerRecord>, TrackerError> {
        let port = self.identity.port.to_string();
        let res = self
            .http
            .get(format!("{}/announce", self.base_url))
            .query(&[
                ("name", name),
                ("info_hash", info_hash),
                ("peer_id", self.identity.peer_id.as_str()),
                ("ip", self.identity.ip.as_str()),
                ("port", port.as_str()),
                ("downloaded", "0"),
                ("uploaded", "0"),
                ("left", "0"),
                ("event", event.as_str()),
            ])
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(TrackerError::Status(res.status()));
        }
        Ok(res.json().await?)
    }

    /// Every file the tracker knows and who holds it. Empty on any failure.
    pub async fn scrape(&self) -> Vec<ScrapeEntry> {
        match self.try_scrape().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "scrape failed");
                Vec::new()
            }
        }
    }

    async fn try_scrape(&self) -> Result<Vec<ScrapeEntry>, TrackerError> {
        let res = self
            .http
            .get(format!("{}/scrape/all", self.base_url))
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(TrackerError::Status(res.status()));
        }
        Ok(res.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dead_address, MockTracker};
    use swarm_core::PeerId;

    fn client(base: &str, cache: Arc<PeerCache>) -> TrackerClient {
        let id = NodeIdentity::new(PeerId::from("me".to_string()), "127.0.0.1", 7777);
        TrackerClient::new(base, id, cache, Duration::from_millis(500)).unwrap()
    }

    #[tokio::test]
    async fn announce_sends_identity_and_merges_peers() {
        let tracker = MockTracker::start(
            r#"[{"ip":"10.0.0.1","port":7001},{"ip":"10.0.0.2","port":"7002"}]"#,
            "[]",
        )
        .await;
        let cache = Arc::new(PeerCache::new());
        let c = client(&tracker.base_url(), cache.clone());

        let peers = c.announce("abc", "f.bin", AnnounceEvent::Started).await;
        assert_eq!(peers.len(), 2);
        assert_eq!(cache.snapshot().len(), 2);

        let req = tracker.requests().await.remove(0);
        assert!(req.starts_with("/announce?"));
        for part in ["info_hash=abc", "name=f.bin", "peer_id=me", "ip=127.0.0.1", "port=7777", "event=started"] {
            assert!(req.contains(part), "{req} lacks {part}");
        }

        c.announce("abc", "f.bin", AnnounceEvent::Empty).await;
        assert_eq!(cache.snapshot().len(), 2);
        assert!(tracker.requests().await[1].ends_with("event="));
    }

    #[tokio::test]
    async fn unreachable_tracker_returns_cached_peers() {
        let cache = Arc::new(PeerCache::new());
        let known = vec![PeerRecord::new("10.9.9.9", 6000)];
        cache.merge(&known);
        let c = client(&format!("http://{}", dead_address().await), cache.clone());

        let peers = c.announce("abc", "f.bin", AnnounceEvent::Started).await;
        assert_eq!(peers, known);
        assert_eq!(cache.snapshot(), known);
    }

    #[tokio::test]
    async fn unreachable_tracker_with_empty_cache_means_no_peers() {
        let c = client(&format!("http://{}", dead_address().await), Arc::new(PeerCache::new()));
        assert!(c.announce("abc", "f", AnnounceEvent::Started).await.is_empty());
        assert!(c.scrape().await.is_empty());
    }

    #[tokio::test]
    async fn scrape_lists_catalog() {
        let tracker = MockTracker::start(
            "[]",
            r#"[{"name":"a.txt","info_hash":"h1","peers":[{"ip":"1.1.1.1","port":1}]},{"name":"b","info_hash":"h2","peers":[]}]"#,
        )
        .await;
        let c = client(&tracker.base_url(), Arc::new(PeerCache::new()));
        let entries = c.scrape().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].peer_count(), 1);
        assert_eq!(entries[1].name, "b");
        assert_eq!(tracker.requests().await, vec!["/scrape/all".to_string()]);
    }

    #[tokio::test]
    async fn non_json_answer_falls_back() {
        let tracker = MockTracker::start("not json", "not json").await;
        let cache = Arc::new(PeerCache::new());
        cache.merge(&[PeerRecord::new("10.0.0.3", 1)]);
        let c = client(&tracker.base_url(), cache);
        assert_eq!(c.announce("x", "y", AnnounceEvent::Empty).await.len(), 1);
        assert!(c.scrape().await.is_empty());
    }
}
