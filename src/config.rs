use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::CantoError;

pub const DEFAULT_API_BASE_URL: &str = "https://xeno-canto.org/api/2";
pub const CONFIG_FILE_NAME: &str = "canto.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub dataset_root: Option<String>,
    #[serde(default)]
    pub asset_extension: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub asset_retries: Option<usize>,
    #[serde(default)]
    pub parallel_downloads: Option<usize>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub api_base_url: String,
    pub dataset_root: Utf8PathBuf,
    pub asset_extension: String,
    pub timeout: Duration,
    pub asset_retries: usize,
    pub parallel_downloads: usize,
    pub user_agent: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config(Config::default())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path first, then `canto.json` in the working directory, then the
    /// per-user config directory. Missing implicit files fall back to defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CantoError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::implicit_path(),
        };

        let Some(config_path) = config_path else {
            return Ok(Self::resolve_config(Config::default()));
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CantoError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CantoError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        let api_base_url = config
            .api_base_url
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let asset_extension = config
            .asset_extension
            .map(|ext| ext.trim_start_matches('.').to_string())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| "mp3".to_string());

        ResolvedConfig {
            api_base_url,
            dataset_root: Utf8PathBuf::from(config.dataset_root.unwrap_or_else(|| "dataset".to_string())),
            asset_extension,
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(60)),
            asset_retries: config.asset_retries.unwrap_or(2),
            parallel_downloads: config.parallel_downloads.unwrap_or(1).max(1),
            user_agent: config
                .user_agent
                .unwrap_or_else(|| format!("canto-sync/{}", env!("CARGO_PKG_VERSION"))),
        }
    }

    fn implicit_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("org", "canto", "canto-sync")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .filter(|path| path.exists())
    }
}
