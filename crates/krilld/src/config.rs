//! TOML configuration for the Krill daemon.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node identity and addresses.
    pub node: NodeSection,
    /// Ring overlay tuning.
    pub ring: RingSection,
    /// Chunk storage settings.
    pub storage: StorageSection,
    /// Backup behavior.
    pub backup: BackupSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Address this peer advertises and listens on for peer traffic.
    pub listen_addr: String,
    /// Address of the local control socket.
    pub control_addr: String,
    /// Directory for chunk data and restore staging.
    pub data_dir: PathBuf,
    /// Shared secret all ring members must agree on.
    ///
    /// If not set (empty), a development default is used and a warning
    /// is logged at startup.
    pub secret: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".krill"))
            .unwrap_or_else(|| PathBuf::from(".krill"));
        Self {
            listen_addr: "0.0.0.0:4700".to_string(),
            control_addr: "127.0.0.1:4701".to_string(),
            data_dir,
            secret: String::new(),
        }
    }
}

/// `[ring]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RingSection {
    /// Ring id width in bits.
    pub bits: Option<u32>,
    /// Routing hop bound.
    pub max_hops: Option<u32>,
    /// Stabilization period in milliseconds.
    pub stabilize_ms: Option<u64>,
}

/// `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Backend type: `"file"` (default) or `"memory"`.
    pub backend: String,
    /// Storage limit in bytes. Omit for unlimited.
    pub max_bytes: Option<u64>,
    /// Concurrent inbound connection workers.
    pub workers: Option<usize>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            max_bytes: None,
            workers: None,
        }
    }
}

/// `[backup]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    /// Chunk size in bytes.
    pub chunk_size: Option<usize>,
    /// Largest file accepted for backup, in bytes.
    pub max_file_size: Option<u64>,
    /// Owner-resolution attempts per replica slot.
    pub placement_attempts: Option<u32>,
    /// Base backoff between attempts, in milliseconds.
    pub placement_backoff_ms: Option<u64>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective ring id width.
    pub fn bits(&self) -> u32 {
        self.ring.bits.unwrap_or(32)
    }

    /// Effective routing hop bound.
    pub fn max_hops(&self) -> u32 {
        self.ring.max_hops.unwrap_or(32)
    }

    /// Effective stabilization period.
    pub fn stabilize_period(&self) -> Duration {
        Duration::from_millis(self.ring.stabilize_ms.unwrap_or(1000))
    }

    /// Effective backup chunk size (64 KB default).
    pub fn chunk_size(&self) -> usize {
        self.backup.chunk_size.unwrap_or(64 * 1024)
    }

    /// Effective file size limit (1 GB default).
    pub fn max_file_size(&self) -> u64 {
        self.backup.max_file_size.unwrap_or(1024 * 1024 * 1024)
    }

    /// Effective owner-resolution attempts.
    pub fn placement_attempts(&self) -> u32 {
        self.backup.placement_attempts.unwrap_or(3)
    }

    /// Effective base backoff between placement attempts.
    pub fn placement_backoff(&self) -> Duration {
        Duration::from_millis(self.backup.placement_backoff_ms.unwrap_or(250))
    }

    /// Effective inbound worker count.
    pub fn workers(&self) -> usize {
        self.storage.workers.unwrap_or(32)
    }

    /// Parsed peer listen address.
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.node
            .listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("bad listen_addr {:?}: {e}", self.node.listen_addr))
    }

    /// Parsed control socket address.
    pub fn control_addr(&self) -> anyhow::Result<SocketAddr> {
        self.node
            .control_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("bad control_addr {:?}: {e}", self.node.control_addr))
    }
}
