// FormatSelector - maps a MediaSelection onto yt-dlp format arguments
//
// Handles:
// - Quality caps (best / worst / max height)
// - Container preference for merged video+audio
// - Single-file fallback when no transcoder is available for merging
// - Audio extraction arguments

use super::models::{AudioFormat, MediaSelection, Quality};

/// Bitrate handed to `--audio-quality`
pub const AUDIO_QUALITY: &str = "192K";

pub struct FormatSelector;

impl FormatSelector {
    /// yt-dlp `-f` expression for a video download.
    ///
    /// Without a transcoder yt-dlp cannot merge separate video and audio
    /// streams, so only single-file formats are requested.
    pub fn video_format(quality: Quality, container: &str, can_merge: bool) -> String {
        match (quality, can_merge) {
            (Quality::Best, true) => format!(
                "bestvideo[ext={c}]+bestaudio[ext=m4a]/best[ext={c}]/best",
                c = container
            ),
            (Quality::Best, false) => format!("best[ext={}]/best", container),
            (Quality::Worst, _) => "worst".to_string(),
            (Quality::MaxHeight(h), true) => {
                format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]", h = h)
            }
            (Quality::MaxHeight(h), false) => format!("best[height<={}]", h),
        }
    }

    pub fn audio_format() -> &'static str {
        "bestaudio/best"
    }

    /// Number of streams the first alternative of `format` downloads
    pub fn expected_streams(format: &str) -> u32 {
        let primary = format.split('/').next().unwrap_or(format);
        primary.matches('+').count() as u32 + 1
    }

    /// Full argument list for a selection
    pub fn selection_args(selection: &MediaSelection, can_merge: bool) -> Vec<String> {
        match selection {
            MediaSelection::Video { quality, container } => {
                let format = Self::video_format(*quality, container, can_merge);
                let merges = Self::expected_streams(&format) > 1;
                let mut args = vec!["-f".to_string(), format];
                if merges {
                    args.push("--merge-output-format".to_string());
                    args.push(container.clone());
                }
                args
            }
            MediaSelection::Audio { format } => Self::audio_args(*format),
        }
    }

    fn audio_args(format: AudioFormat) -> Vec<String> {
        vec![
            "-f".to_string(),
            Self::audio_format().to_string(),
            "-x".to_string(),
            "--audio-format".to_string(),
            format.as_str().to_string(),
            "--audio-quality".to_string(),
            AUDIO_QUALITY.to_string(),
        ]
    }
}
