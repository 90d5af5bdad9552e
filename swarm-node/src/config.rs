//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use swarm_core::chunk::DEFAULT_CHUNK_LENGTH;
use swarm_core::MAX_CHUNK_LENGTH;

/// Node configuration. File: ~/.config/swarm/config.toml or /etc/swarm/config.toml.
/// Env overrides: SWARM_TRACKER_URL, SWARM_LISTEN_PORT, SWARM_ADVERTISE_IP, SWARM_DATA_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Tracker base URL (default http://127.0.0.1:5000/).
    #[serde(default = "default_tracker_url")]
    pub tracker_url: String,
    /// Peer server bind address (default 0.0.0.0).
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    /// Peer server port; 0 picks a free one (default 0).
    #[serde(default)]
    pub listen_port: u16,
    /// Address announced to the tracker (default 127.0.0.1).
    #[serde(default = "default_advertise_ip")]
    pub advertise_ip: String,
    /// Root for torrents/, chunks/ and downloads/ (default ./swarm-data).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Chunk length for newly published files.
    #[serde(default = "default_chunk_length")]
    pub chunk_length: u64,
    #[serde(default = "default_tracker_timeout_ms")]
    pub tracker_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Fixed peer id; generated per run when absent.
    #[serde(default)]
    pub peer_id: Option<String>,
}

fn default_tracker_url() -> String {
    "http://127.0.0.1:5000/".to_string()
}
fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_advertise_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("swarm-data")
}
fn default_chunk_length() -> u64 {
    DEFAULT_CHUNK_LENGTH
}
fn default_tracker_timeout_ms() -> u64 {
    500
}
fn default_connect_timeout_ms() -> u64 {
    2_000
}
fn default_io_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker_url: default_tracker_url(),
            listen_ip: default_listen_ip(),
            listen_port: 0,
            advertise_ip: default_advertise_ip(),
            data_dir: default_data_dir(),
            chunk_length: default_chunk_length(),
            tracker_timeout_ms: default_tracker_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            peer_id: None,
        }
    }
}

impl Config {
    pub fn torrents_dir(&self) -> PathBuf {
        self.data_dir.join("torrents")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.data_dir.join("chunks")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_millis(self.tracker_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Reject values no peer could act on.
    fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_length > MAX_CHUNK_LENGTH {
            anyhow::bail!(
                "chunk_length {} exceeds the largest transferable chunk ({MAX_CHUNK_LENGTH})",
                self.chunk_length
            );
        }
        Ok(())
    }

    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(s) = get("SWARM_TRACKER_URL") {
            self.tracker_url = s;
        }
        if let Some(s) = get("SWARM_LISTEN_PORT") {
            if let Ok(p) = s.parse::<u16>() {
                self.listen_port = p;
            }
        }
        if let Some(s) = get("SWARM_ADVERTISE_IP") {
            self.advertise_ip = s;
        }
        if let Some(s) = get("SWARM_DATA_DIR") {
            self.data_dir = PathBuf::from(s);
        }
    }
}

/// Load config: merge default, then config file (explicit path, else first found), then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => parse_file(p)?,
        None => load_file().unwrap_or_default(),
    };
    c.apply_env(|k| std::env::var(k).ok());
    c.validate()?;
    Ok(c)
}

fn parse_file(path: &Path) -> anyhow::Result<Config> {
    use anyhow::Context;
    let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", path.display()))
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/swarm/config.toml"));
    }
    out.push(PathBuf::from("/etc/swarm/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match parse_file(&p) {
                Ok(c) => return Some(c),
                Err(e) => tracing::warn!(error = %e, "ignoring config file"),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let c: Config = toml::from_str("listen_port = 7000\ntracker_url = \"http://t:1/\"").unwrap();
        assert_eq!(c.listen_port, 7000);
        assert_eq!(c.tracker_url, "http://t:1/");
        assert_eq!(c.tracker_timeout(), Duration::from_millis(500));
        assert_eq!(c.chunk_length, DEFAULT_CHUNK_LENGTH);
        assert_eq!(c.chunks_dir(), PathBuf::from("swarm-data/chunks"));
    }

    #[test]
    fn oversized_chunk_length_rejected() {
        let c: Config = toml::from_str(&format!("chunk_length = {}", MAX_CHUNK_LENGTH + 1)).unwrap();
        assert!(c.validate().is_err());
        let c: Config = toml::from_str(&format!("chunk_length = {MAX_CHUNK_LENGTH}")).unwrap();
        assert!(c.validate().is_ok());
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("bogus = 1").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut c = Config::default();
        c.apply_env(|k| match k {
            "SWARM_LISTEN_PORT" => Some("9001".into()),
            "SWARM_DATA_DIR" => Some("/tmp/x".into()),
            "SWARM_ADVERTISE_IP" => Some("not-a-port-but-fine".into()),
            _ => None,
        });
        assert_eq!(c.listen_port, 9001);
        assert_eq!(c.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(c.advertise_ip, "not-a-port-but-fine");
    }

    #[test]
    fn bad_port_env_ignored() {
        let mut c = Config::default();
        c.apply_env(|k| (k == "SWARM_LISTEN_PORT").then(|| "nope".to_string()));
        assert_eq!(c.listen_port, 0);
    }

    #[test]
    fn explicit_file_errors_surface() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("c.toml");
        std::fs::write(&p, "listen_port = \"x\"").unwrap();
        assert!(load(Some(&p)).is_err());
    }
}
