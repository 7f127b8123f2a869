//! Process configuration, read from the environment with defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub snapshot_dir: PathBuf,
    pub snapshot_interval: Duration,
    /// `None` keeps every snapshot.
    pub snapshot_retention: Option<usize>,
    pub max_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            snapshot_dir: PathBuf::from("snapshots"),
            snapshot_interval: Duration::from_secs(3600),
            snapshot_retention: None,
            max_page_size: 100,
        }
    }
}

impl Config {
    /// `KEY=value` lines, as printed by `docspace config show`.
    pub fn describe(&self) -> Vec<String> {
        vec![
            format!("DOCSPACE_ADDR={}", self.addr),
            format!("DOCSPACE_SNAPSHOT_DIR={}", self.snapshot_dir.display()),
            format!(
                "DOCSPACE_SNAPSHOT_INTERVAL_SECS={}",
                self.snapshot_interval.as_secs()
            ),
            format!(
                "DOCSPACE_SNAPSHOT_RETENTION={}",
                self.snapshot_retention
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "all".to_string())
            ),
            format!("DOCSPACE_MAX_PAGE_SIZE={}", self.max_page_size),
        ]
    }
}

pub fn load_config() -> Result<Config> {
    load_from(|key| std::env::var(key).ok())
}

/// Build a config from any variable source; unset keys keep their defaults.
pub fn load_from(var: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(addr) = var("DOCSPACE_ADDR") {
        config.addr = addr
            .parse()
            .with_context(|| format!("DOCSPACE_ADDR={:?} is not a socket address", addr))?;
    }
    if let Some(dir) = var("DOCSPACE_SNAPSHOT_DIR") {
        config.snapshot_dir = PathBuf::from(dir);
    }
    if let Some(secs) = var("DOCSPACE_SNAPSHOT_INTERVAL_SECS") {
        let secs: u64 = parse_number("DOCSPACE_SNAPSHOT_INTERVAL_SECS", &secs)?;
        if secs == 0 {
            bail!("DOCSPACE_SNAPSHOT_INTERVAL_SECS must be positive");
        }
        config.snapshot_interval = Duration::from_secs(secs);
    }
    if let Some(keep) = var("DOCSPACE_SNAPSHOT_RETENTION") {
        config.snapshot_retention = Some(parse_number("DOCSPACE_SNAPSHOT_RETENTION", &keep)?);
    }
    if let Some(max) = var("DOCSPACE_MAX_PAGE_SIZE") {
        config.max_page_size = parse_number("DOCSPACE_MAX_PAGE_SIZE", &max)?;
        if config.max_page_size == 0 {
            bail!("DOCSPACE_MAX_PAGE_SIZE must be positive");
        }
    }
    Ok(config)
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{}={:?} is not a number", key, raw))
}
