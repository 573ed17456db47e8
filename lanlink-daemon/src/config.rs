//! Load config from file and environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Daemon configuration. File: ~/.config/lanlink/config.toml or
/// /etc/lanlink/config.toml.
/// Env overrides: LANLINK_DISCOVERY_PORT, LANLINK_TRANSPORT_PORT,
/// LANLINK_USERNAME, LANLINK_DOWNLOAD_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port (default 8080).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Transport TCP port (default 8081).
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,
    /// Display name announced to peers. Defaults to the machine hostname.
    #[serde(default)]
    pub username: Option<String>,
    /// Where completed transfers are written. Defaults to ~/Downloads/LanLink.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Seconds of announcement silence before a peer is evicted.
    #[serde(default = "default_peer_ttl_secs")]
    pub peer_ttl_secs: u64,
}

fn default_discovery_port() -> u16 {
    8080
}
fn default_transport_port() -> u16 {
    8081
}
fn default_peer_ttl_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            transport_port: default_transport_port(),
            username: None,
            download_dir: None,
            peer_ttl_secs: default_peer_ttl_secs(),
        }
    }
}

impl Config {
    pub fn peer_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_ttl_secs)
    }

    pub fn resolved_username(&self) -> String {
        if let Some(name) = &self.username {
            return name.clone();
        }
        std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "lanlink".to_string())
    }

    pub fn resolved_download_dir(&self) -> PathBuf {
        if let Some(dir) = &self.download_dir {
            return dir.clone();
        }
        dirs::download_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("LanLink")
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("LANLINK_DISCOVERY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.discovery_port = p;
        }
    }
    if let Ok(s) = std::env::var("LANLINK_TRANSPORT_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.transport_port = p;
        }
    }
    if let Ok(s) = std::env::var("LANLINK_USERNAME") {
        if !s.is_empty() {
            c.username = Some(s);
        }
    }
    if let Ok(s) = std::env::var("LANLINK_DOWNLOAD_DIR") {
        if !s.is_empty() {
            c.download_dir = Some(PathBuf::from(s));
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(base) = dirs::config_dir() {
        out.push(base.join("lanlink/config.toml"));
    }
    out.push(PathBuf::from("/etc/lanlink/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
