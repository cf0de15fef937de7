use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::utils::run_output_with_timeout;

const UPDATE_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    /// Environment variable that overrides discovery
    pub fn env_var(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "YT_FETCH_YTDLP",
            ToolType::Ffmpeg => "YT_FETCH_FFMPEG",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version", // ffmpeg uses a single dash
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
    pub is_available: bool,
}

/// Locates the external binaries this crate drives
#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    ytdlp_override: Option<PathBuf>,
    ffmpeg_override: Option<PathBuf>,
}

impl ToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a tool to a configured path
    pub fn with_override(mut self, tool: ToolType, path: Option<PathBuf>) -> Self {
        match tool {
            ToolType::YtDlp => self.ytdlp_override = path,
            ToolType::Ffmpeg => self.ffmpeg_override = path,
        }
        self
    }

    /// Resolution order: environment, configured path, common install paths, PATH
    pub fn locate(&self, tool: ToolType) -> Option<PathBuf> {
        let from_env = std::env::var_os(tool.env_var())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let configured = match tool {
            ToolType::YtDlp => self.ytdlp_override.clone(),
            ToolType::Ffmpeg => self.ffmpeg_override.clone(),
        };

        for candidate in from_env.into_iter().chain(configured) {
            if candidate.is_file() {
                return Some(candidate);
            }
            warn!(
                "[Tools] Configured {} path {} does not exist, falling back to discovery",
                tool.as_str(),
                candidate.display()
            );
        }

        let binary_name = tool.as_str();
        let common_paths = [
            format!("/opt/homebrew/bin/{}", binary_name), // Homebrew on Apple Silicon
            format!("/usr/local/bin/{}", binary_name),
            format!("/usr/bin/{}", binary_name),
        ];
        if let Some(found) = common_paths.iter().map(PathBuf::from).find(|p| p.is_file()) {
            return Some(found);
        }

        match which::which(binary_name) {
            Ok(path) => Some(path),
            Err(e) => {
                debug!("[Tools] {} not on PATH: {}", binary_name, e);
                None
            }
        }
    }

    pub fn get_tool_info(&self, tool_type: ToolType) -> ToolInfo {
        let path = self.locate(tool_type);
        let version = path.as_deref().and_then(|p| Self::get_version(p, tool_type));

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            is_available: path.is_some(),
            version,
            path,
        }
    }

    pub fn get_all_tools(&self) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolType::YtDlp),
            self.get_tool_info(ToolType::Ffmpeg),
        ]
    }

    fn get_version(path: &Path, tool_type: ToolType) -> Option<String> {
        match Command::new(path).arg(tool_type.version_arg()).output() {
            Ok(output) if output.status.success() => {
                let out = String::from_utf8_lossy(&output.stdout);
                // ffmpeg prints a banner, the first line carries the version
                out.lines().next().map(|l| l.trim().to_string())
            }
            _ => None,
        }
    }

    /// Update yt-dlp through whichever channel installed it
    pub async fn update_ytdlp(&self) -> Result<String, DownloadError> {
        let path = self.locate(ToolType::YtDlp).ok_or_else(|| {
            DownloadError::ToolNotFound("yt-dlp is not installed, install it first".to_string())
        })?;

        let (program, args): (PathBuf, Vec<String>) = if path.starts_with("/opt/homebrew")
            || path.starts_with("/usr/local/Cellar")
        {
            (
                PathBuf::from("brew"),
                vec!["upgrade".to_string(), "yt-dlp".to_string()],
            )
        } else {
            (path.clone(), vec!["-U".to_string()])
        };

        info!("[Tools] Updating yt-dlp with {} {}", program.display(), args.join(" "));
        let output = run_output_with_timeout(&program, &args, UPDATE_TIMEOUT_SECS).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        // pip installs refuse self-update and point at pip instead
        if stdout.contains("pip") || stderr.contains("pip") {
            let args = vec![
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "-U".to_string(),
                "yt-dlp".to_string(),
            ];
            info!("[Tools] yt-dlp was installed with pip, updating through pip");
            let output =
                run_output_with_timeout(Path::new("python3"), &args, UPDATE_TIMEOUT_SECS).await?;
            if !output.status.success() {
                return Err(DownloadError::ExtractionFailed(format!(
                    "pip update failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        if output.status.success() {
            Ok(stdout.trim().to_string())
        } else {
            Err(DownloadError::ExtractionFailed(format!(
                "Update failed: {}",
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("ffmpeg");
        std::fs::write(&fake, b"").unwrap();

        let manager = ToolManager::new().with_override(ToolType::Ffmpeg, Some(fake.clone()));
        assert_eq!(manager.locate(ToolType::Ffmpeg), Some(fake));
    }

    #[test]
    fn test_tool_names() {
        assert_eq!(ToolType::YtDlp.as_str(), "yt-dlp");
        assert_eq!(ToolType::Ffmpeg.env_var(), "YT_FETCH_FFMPEG");
        assert_eq!(
            serde_json::to_string(&ToolType::YtDlp).unwrap(),
            "\"yt-dlp\""
        );
    }
}
