// Persistent settings (config.json under the user config directory)

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::downloader::backend::{DEFAULT_INFO_TIMEOUT_SECS, DEFAULT_SOCKET_TIMEOUT_SECS};
use crate::downloader::cookies::COOKIE_FILE_NAME;
use crate::downloader::orchestrator::DEFAULT_CONTAINER;
use crate::downloader::proxy::PROXY_LIST_FILE_NAME;

pub const APP_DIR_NAME: &str = "yt-fetch";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// `<config dir>/yt-fetch`, or `./yt-fetch` when the platform has none
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output_dir: PathBuf,
    pub cookies_file: PathBuf,
    pub proxy_list_file: PathBuf,
    /// Used when no proxy is given on the command line
    pub default_proxy: Option<String>,
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub container: String,
    pub socket_timeout_secs: u32,
    pub info_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let dir = config_dir();
        Self {
            output_dir: default_output_dir(),
            cookies_file: dir.join(COOKIE_FILE_NAME),
            proxy_list_file: dir.join(PROXY_LIST_FILE_NAME),
            default_proxy: None,
            ytdlp_path: None,
            ffmpeg_path: None,
            container: DEFAULT_CONTAINER.to_string(),
            socket_timeout_secs: DEFAULT_SOCKET_TIMEOUT_SECS,
            info_timeout_secs: DEFAULT_INFO_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        config_dir().join(CONFIG_FILE_NAME)
    }

    /// Missing file means defaults; a broken file is an error
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!("[Config] {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
        debug!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
