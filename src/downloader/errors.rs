// Error types for the downloader facade

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use super::diagnostics::{diagnose, summarize, FailureReason};

/// Coarse error taxonomy surfaced to the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    GeoRestricted,
    Extraction,
    Network,
    TranscoderMissing,
    ToolMissing,
    InvalidInput,
    Io,
    Parse,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    /// The site wants a logged-in session (age gate, bot check, private video)
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// Cookies were requested but no exported cookie file is in place
    #[error("Cookie file not found at {}", .0.display())]
    CookiesMissing(PathBuf),

    #[error("Not available in your region: {0}")]
    GeoRestricted(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Network error: {0}")]
    NetworkFailed(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// ffmpeg is required for audio extraction and was not found
    #[error("FFmpeg not found: audio extraction requires a transcoder on PATH")]
    TranscoderMissing,

    /// yt-dlp itself is missing or could not be started
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid proxy '{proxy}': {reason}")]
    InvalidProxy { proxy: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthenticationRequired(_) | Self::CookiesMissing(_) => ErrorKind::Authentication,
            Self::GeoRestricted(_) => ErrorKind::GeoRestricted,
            Self::ExtractionFailed(_) => ErrorKind::Extraction,
            Self::NetworkFailed(_) | Self::Timeout(_) => ErrorKind::Network,
            Self::TranscoderMissing => ErrorKind::TranscoderMissing,
            Self::ToolNotFound(_) => ErrorKind::ToolMissing,
            Self::InvalidProxy { .. } | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Io(_) => ErrorKind::Io,
            Self::ParseError(_) => ErrorKind::Parse,
        }
    }

    /// Manual remedy to show next to the message
    pub fn remedy(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::Authentication => Some(
                "Export cookies.txt from a logged-in browser and import it:\n\
                 yt-fetch cookies guide, then yt-fetch cookies import <file>.\n\
                 If it worked before, the cookies have expired: re-export them.",
            ),
            ErrorKind::GeoRestricted => Some(
                "Use a VPN or a proxy located in a region where the video is available\n\
                 (--proxy socks5://host:port or --pick-proxy N).",
            ),
            ErrorKind::Extraction => Some(
                "Update the extraction library (yt-fetch tools update) and check the URL.",
            ),
            ErrorKind::Network => Some(
                "Check your internet connection. If you use a proxy, try another one\n\
                 or run without it.",
            ),
            ErrorKind::TranscoderMissing => Some(
                "Install FFmpeg and make sure `ffmpeg` is on PATH\n\
                 (or set YT_FETCH_FFMPEG to its location).",
            ),
            ErrorKind::ToolMissing => Some(
                "Install yt-dlp (pip install -U yt-dlp) or set YT_FETCH_YTDLP to its location.",
            ),
            ErrorKind::InvalidInput | ErrorKind::Io | ErrorKind::Parse => None,
        }
    }

    /// Classify a failed yt-dlp run from its stderr.
    ///
    /// The message keeps yt-dlp's own `ERROR:` lines verbatim.
    pub fn from_stderr(stderr: &str) -> Self {
        let message = summarize(stderr);

        match diagnose(stderr) {
            Some(FailureReason::AgeRestricted) | Some(FailureReason::LoginRequired) => {
                Self::AuthenticationRequired(message)
            }
            Some(FailureReason::GeoBlocked) => Self::GeoRestricted(message),
            Some(FailureReason::TranscoderMissing) => Self::TranscoderMissing,
            Some(
                FailureReason::RateLimited
                | FailureReason::Forbidden
                | FailureReason::ProxyFailed
                | FailureReason::NetworkFailure,
            ) => Self::NetworkFailed(message),
            Some(
                FailureReason::DrmProtected
                | FailureReason::VideoUnavailable
                | FailureReason::UnsupportedUrl
                | FailureReason::ExtractorOutdated,
            )
            | None => Self::ExtractionFailed(message),
        }
    }
}

impl From<serde_json::Error> for DownloadError {
    fn from(e: serde_json::Error) -> Self {
        Self::ParseError(format!("Invalid JSON from yt-dlp: {}", e))
    }
}
