use anyhow::Result;
use std::path::PathBuf;
use tixgate_common::AppConfig;
use tracing::info;

/// Default location of the config file when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "config/tixgate.yaml";

/// Resolved configuration together with the file it came from.
pub struct GatewayConfig {
    pub config: AppConfig,
    pub config_path: PathBuf,
}

impl GatewayConfig {
    pub fn load(path: &str) -> Result<Self> {
        info!(path = path, "loading configuration");
        let config = AppConfig::load(path)?;
        Ok(Self {
            config,
            config_path: PathBuf::from(path),
        })
    }

    /// Pick the config path from the process arguments.
    pub fn path_from_args<I: Iterator<Item = String>>(mut args: I) -> String {
        args.nth(1)
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }
}
