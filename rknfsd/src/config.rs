use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::optimizer::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // ip:port the QUIC endpoint binds to
    #[serde(default = "default_addr")]
    pub addr: String,
    // every exported object lives under this directory
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub flush: FlushConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlushConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_addr() -> String {
    "0.0.0.0:50051".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from("/tmp/nfs_server")
}

fn default_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL.as_millis() as u64
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            root: default_root(),
            flush: FlushConfig::default(),
        }
    }
}

impl FlushConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.addr
            .parse()
            .with_context(|| format!("Invalid listen address {}", self.addr))
    }

    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        ensure!(self.flush.interval_ms > 0, "flush.interval_ms must be positive");
        ensure!(self.flush.batch_size > 0, "flush.batch_size must be positive");
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    cfg.validate()?;
    Ok(cfg)
}
