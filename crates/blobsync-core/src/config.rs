use directories::{BaseDirs, ProjectDirs};
use eyre::{eyre, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.toml";
const WORKERS_ENV: &str = "BLOBSYNC_CONCURRENT_TRANSFERS";

/// Resolve the configuration directory.
/// Priority: explicit override -> platform standard -> ~/.config/blobsync
pub fn config_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_dir {
        return Ok(path.to_path_buf());
    }

    if let Some(proj) = ProjectDirs::from("com", "Blobsync", "Blobsync") {
        return Ok(proj.config_dir().to_path_buf());
    }

    if let Some(base) = BaseDirs::new() {
        return Ok(base.home_dir().join(".config").join("blobsync"));
    }

    Err(eyre!(
        "unable to determine configuration directory for blobsync (no override and no platform default)"
    ))
}

/// Worker and batching knobs shared by both transfer queues.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransferConfig {
    pub concurrent_transfers: usize,
    pub batch_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrent_transfers: num_cpus::get().clamp(1, 8),
            batch_size: 100,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub transfer: TransferConfig,
    /// Named remotes: name -> location.
    pub remotes: BTreeMap<String, String>,
}

impl Config {
    /// Load `config.toml` from `dir`. A missing file yields the defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))?
        } else {
            log::debug!("no config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(raw)?;
        config.transfer.concurrent_transfers = config.transfer.concurrent_transfers.max(1);
        config.transfer.batch_size = config.transfer.batch_size.max(1);
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var(WORKERS_ENV) {
            let workers: usize = value
                .trim()
                .parse()
                .with_context(|| format!("{WORKERS_ENV} must be a positive integer"))?;
            self.transfer.concurrent_transfers = workers.max(1);
        }
        Ok(())
    }

    pub fn remote(&self, name: &str) -> Option<&str> {
        self.remotes.get(name).map(String::as_str)
    }
}
