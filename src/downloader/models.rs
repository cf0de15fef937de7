// Common data models for the downloader

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DownloadError;

/// Requested video quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Best,
    Worst,
    /// Cap on the video height in pixels (e.g. 720)
    MaxHeight(u32),
}

impl FromStr for Quality {
    type Err = DownloadError;

    /// Accepts `best`, `worst`, `720` or `720p`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "best" => Ok(Self::Best),
            "worst" => Ok(Self::Worst),
            other => {
                let digits = other.strip_suffix('p').unwrap_or(other);
                match digits.parse::<u32>() {
                    Ok(h) if h > 0 => Ok(Self::MaxHeight(h)),
                    _ => Err(DownloadError::InvalidInput(format!(
                        "unknown quality '{}': use best, worst or a height like 720",
                        s
                    ))),
                }
            }
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => write!(f, "best"),
            Self::Worst => write!(f, "worst"),
            Self::MaxHeight(h) => write!(f, "{}p", h),
        }
    }
}

/// Target codec for audio extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    M4a,
    Wav,
    Opus,
    Flac,
    Aac,
    Vorbis,
}

impl AudioFormat {
    /// Name passed to `--audio-format`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Wav => "wav",
            Self::Opus => "opus",
            Self::Flac => "flac",
            Self::Aac => "aac",
            Self::Vorbis => "vorbis",
        }
    }

    /// Extension of the file yt-dlp leaves behind
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Vorbis => "ogg",
            Self::Aac => "m4a",
            other => other.as_str(),
        }
    }
}

impl FromStr for AudioFormat {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "m4a" => Ok(Self::M4a),
            "wav" => Ok(Self::Wav),
            "opus" => Ok(Self::Opus),
            "flac" => Ok(Self::Flac),
            "aac" => Ok(Self::Aac),
            "vorbis" | "ogg" => Ok(Self::Vorbis),
            other => Err(DownloadError::InvalidInput(format!(
                "unsupported audio format '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to fetch for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSelection {
    Video { quality: Quality, container: String },
    Audio { format: AudioFormat },
}

/// One download operation, fixed for its whole duration
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub selection: MediaSelection,
    pub output_dir: PathBuf,
    pub proxy: Option<String>,
    pub cookies: Option<PathBuf>,
}

impl DownloadRequest {
    pub fn options(&self) -> InvocationOptions {
        InvocationOptions {
            proxy: self.proxy.clone(),
            cookies: self.cookies.clone(),
        }
    }
}

/// Per-invocation options shared by every yt-dlp call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationOptions {
    pub proxy: Option<String>,
    pub cookies: Option<PathBuf>,
}

/// Video information snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration_secs: u64,
    pub view_count: u64,
    pub description: String,
    pub thumbnail: String,
    pub webpage_url: String,
    pub age_restricted: bool,
}

impl VideoInfo {
    /// `m:ss` or `h:mm:ss`
    pub fn duration_label(&self) -> String {
        format_duration(self.duration_secs)
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub id: String,
    pub title: String,
    pub url: String,
    pub channel: String,
    pub duration_secs: Option<u64>,
    pub view_count: Option<u64>,
}

/// Search hits wrapped so they flatten into an `OperationReport`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub videos: Vec<SearchEntry>,
}

/// Result of a finished download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub title: String,
    pub file_path: PathBuf,
    pub duration_secs: Option<u64>,
    pub uploader: Option<String>,
}

/// Stage of the current operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Starting,
    Downloading,
    Merging,
    Converting,
    PostProcessing,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Downloading => "downloading",
            Self::Merging => "merging",
            Self::Converting => "converting",
            Self::PostProcessing => "post-processing",
            Self::Finished => "finished",
        };
        f.write_str(label)
    }
}

/// Download progress information
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub percent: f32,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    /// Bytes per second
    pub speed_bps: Option<f64>,
    pub eta_secs: Option<u64>,
    pub phase: Phase,
}

/// Serialisable success/error mapping for the programmatic surface
#[derive(Debug, Serialize)]
pub struct OperationReport<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<super::errors::ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remedy: Option<String>,
}

impl<T: Serialize> From<Result<T, DownloadError>> for OperationReport<T> {
    fn from(result: Result<T, DownloadError>) -> Self {
        match result {
            Ok(value) => Self {
                success: true,
                result: Some(value),
                error: None,
                error_kind: None,
                remedy: None,
            },
            Err(e) => Self {
                success: false,
                result: None,
                error: Some(e.to_string()),
                error_kind: Some(e.kind()),
                remedy: e.remedy().map(str::to_string),
            },
        }
    }
}

pub fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Human-readable byte count (binary units, as yt-dlp prints them)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_parsing() {
        assert_eq!("best".parse::<Quality>().unwrap(), Quality::Best);
        assert_eq!("Worst".parse::<Quality>().unwrap(), Quality::Worst);
        assert_eq!("720".parse::<Quality>().unwrap(), Quality::MaxHeight(720));
        assert_eq!("1080p".parse::<Quality>().unwrap(), Quality::MaxHeight(1080));
        assert!("0".parse::<Quality>().is_err());
        assert!("hd".parse::<Quality>().is_err());
    }

    #[test]
    fn test_audio_format_extension() {
        assert_eq!("MP3".parse::<AudioFormat>().unwrap().extension(), "mp3");
        assert_eq!("vorbis".parse::<AudioFormat>().unwrap().extension(), "ogg");
        assert_eq!(AudioFormat::Aac.as_str(), "aac");
        assert_eq!(AudioFormat::Aac.extension(), "m4a");
        assert!("mp4".parse::<AudioFormat>().is_err());
    }

    #[test]
    fn test_durations_and_sizes() {
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(754), "12:34");
        assert_eq!(format_duration(3723), "1:02:03");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
    }

    #[test]
    fn test_report_success_flag() {
        let ok: OperationReport<SearchEntry> = Ok(SearchEntry {
            id: "a".into(),
            title: "t".into(),
            url: "u".into(),
            channel: "c".into(),
            duration_secs: None,
            view_count: None,
        })
        .into();
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["title"], "t");
        assert!(json.get("error").is_none());

        let err: OperationReport<SearchEntry> =
            Err(DownloadError::InvalidInput("empty query".into())).into();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "invalid_input");
        assert!(json["error"].as_str().unwrap().contains("empty query"));
    }
}
