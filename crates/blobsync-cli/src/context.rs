use blobsync_core::config::{self, Config};
use eyre::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppContext {
    pub config_dir: PathBuf,
    pub config: Config,
}

impl AppContext {
    pub fn load(config_dir_override: Option<&Path>) -> Result<Self> {
        let config_dir = config::config_dir(config_dir_override)?;
        let config = Config::load(&config_dir)?;
        log::debug!("loaded configuration from {}", config_dir.display());
        Ok(Self { config_dir, config })
    }
}
