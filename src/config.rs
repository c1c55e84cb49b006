use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An initial cluster seed: the gossip address of an already-running node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedNode {
    pub host: String,
    pub port: u16,
}

/// Replication parameters. `strict_write` pins the write-quorum rule: false
/// keeps the lenient "at least one ack" behavior, true demands `w` acks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_n")]
    pub n: usize,
    #[serde(default = "default_r")]
    pub r: usize,
    #[serde(default = "default_w")]
    pub w: usize,
    #[serde(default)]
    pub strict_write: bool,
}

fn default_n() -> usize {
    3
}
fn default_r() -> usize {
    2
}
fn default_w() -> usize {
    2
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            n: default_n(),
            r: default_r(),
            w: default_w(),
            strict_write: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Stable node name; a fresh UUID when the file doesn't set one.
    pub name: String,
    /// Gossip port. The data (router) port is `port + 1`.
    pub port: u16,
    /// Client-facing HTTP port.
    pub httpport: u16,
    /// Database directory.
    pub root: String,
    pub nodes: Vec<SeedNode>,
    pub replication: ReplicationConfig,
}

/// The on-disk shape: every key optional, `[[Node]]` tables for seeds.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    name: Option<String>,
    port: Option<u16>,
    httpport: Option<u16>,
    root: Option<String>,
    #[serde(rename = "Node", default)]
    node: Vec<SeedNode>,
    #[serde(default)]
    replication: Option<ReplicationConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("couldn't read config file {}: {}", path.display(), e))?;
        let raw: RawConfig = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("couldn't decode config file {}: {}", path.display(), e))?;
        Ok(Self::resolve(raw))
    }

    /// `$HOME/mec/config.conf`, the conventional location.
    pub fn default_path() -> PathBuf {
        PathBuf::from(home_dir()).join("mec").join("config.conf")
    }

    fn resolve(raw: RawConfig) -> Self {
        let name = raw
            .name
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let root = raw
            .root
            .unwrap_or_else(|| format!("{}/mec/{}", home_dir(), name));
        Self {
            name,
            port: raw.port.unwrap_or(7946),
            httpport: raw.httpport.unwrap_or(3000),
            root,
            nodes: raw.node,
            replication: raw.replication.unwrap_or_default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::resolve(RawConfig::default())
    }
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let text = r#"
            name = "node-1"
            port = 8000
            httpport = 3100
            root = "/tmp/mec/node-1"

            [[Node]]
            host = "10.0.0.2"
            port = 8000

            [[Node]]
            host = "10.0.0.3"
            port = 8000

            [replication]
            n = 5
            r = 3
            w = 3
            strict_write = true
        "#;
        let raw: RawConfig = toml::from_str(text).unwrap();
        let config = Config::resolve(raw);
        assert_eq!(config.name, "node-1");
        assert_eq!(config.port, 8000);
        assert_eq!(config.httpport, 3100);
        assert_eq!(config.root, "/tmp/mec/node-1");
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1].host, "10.0.0.3");
        assert_eq!(config.replication.w, 3);
        assert!(config.replication.strict_write);
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(toml::from_str("").unwrap());
        // A fresh UUID name, not empty.
        assert_eq!(config.name.len(), 36);
        assert_eq!(config.port, 7946);
        assert_eq!(config.httpport, 3000);
        assert!(config.root.ends_with(&format!("mec/{}", config.name)));
        assert!(config.nodes.is_empty());
        assert_eq!(config.replication.n, 3);
        assert_eq!(config.replication.r, 2);
        assert_eq!(config.replication.w, 2);
        assert!(!config.replication.strict_write);
    }

    #[test]
    fn test_partial_replication_table() {
        let config = Config::resolve(toml::from_str("[replication]\nw = 1\n").unwrap());
        assert_eq!(config.replication.w, 1);
        assert_eq!(config.replication.r, 2);
    }
}
