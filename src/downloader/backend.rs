// yt-dlp backend - drives the native `yt-dlp` binary
//
// Every call is a separate process. Info and search collect stdout as JSON
// under a timeout; downloads stream stdout/stderr line by line into the
// progress relay and pick the final path from a `--print` marker.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use super::diagnostics::diagnose;
use super::errors::DownloadError;
use super::format_selector::FormatSelector;
use super::models::{DownloadOutcome, DownloadRequest, InvocationOptions, SearchEntry, VideoInfo};
use super::progress::{self, ProgressLine, ProgressTracker, FILE_MARKER, TITLE_MARKER};
use super::tools::{ToolManager, ToolType};
use super::traits::{ExtractorBackend, ProgressEmitter};
use super::utils::{run_output_with_timeout, run_streaming, Stream};

pub const DEFAULT_SOCKET_TIMEOUT_SECS: u32 = 30;
pub const DEFAULT_INFO_TIMEOUT_SECS: u64 = 60;

/// Output name inside the target directory
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

pub struct YtDlpBackend {
    ytdlp: PathBuf,
    ffmpeg: Option<PathBuf>,
    socket_timeout_secs: u32,
    info_timeout_secs: u64,
}

impl YtDlpBackend {
    pub fn new(ytdlp: impl Into<PathBuf>, ffmpeg: Option<PathBuf>) -> Self {
        Self {
            ytdlp: ytdlp.into(),
            ffmpeg,
            socket_timeout_secs: DEFAULT_SOCKET_TIMEOUT_SECS,
            info_timeout_secs: DEFAULT_INFO_TIMEOUT_SECS,
        }
    }

    /// Locate both binaries; only yt-dlp is mandatory
    pub fn discover(tools: &ToolManager) -> Result<Self, DownloadError> {
        let ytdlp = tools.locate(ToolType::YtDlp).ok_or_else(|| {
            DownloadError::ToolNotFound("yt-dlp was not found on this system".to_string())
        })?;
        let ffmpeg = tools.locate(ToolType::Ffmpeg);
        if ffmpeg.is_none() {
            warn!("[YtDlp] ffmpeg not found: no merging, no audio extraction");
        }
        debug!("[YtDlp] Using {} (ffmpeg: {:?})", ytdlp.display(), ffmpeg);
        Ok(Self::new(ytdlp, ffmpeg))
    }

    pub fn with_socket_timeout(mut self, secs: u32) -> Self {
        self.socket_timeout_secs = secs;
        self
    }

    pub fn with_info_timeout(mut self, secs: u64) -> Self {
        self.info_timeout_secs = secs;
        self
    }

    /// Options shared by every invocation
    fn common_args(&self, options: &InvocationOptions) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-check-certificates".to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout_secs.to_string(),
        ];

        if let Some(path) = &options.cookies {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().into_owned());
        }

        if let Some(proxy) = &options.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args
    }

    fn info_args(&self, url: &str, options: &InvocationOptions) -> Vec<String> {
        let mut args = vec!["--dump-json".to_string(), "--no-warnings".to_string()];
        args.extend(self.common_args(options));
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    fn search_args(&self, query: &str, max_results: usize, options: &InvocationOptions) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--flat-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.common_args(options));
        args.push("--".to_string());
        args.push(format!("ytsearch{}:{}", max_results, query));
        args
    }

    fn download_args(&self, request: &DownloadRequest) -> Vec<String> {
        let mut args = FormatSelector::selection_args(&request.selection, self.ffmpeg.is_some());
        args.extend(self.common_args(&request.options()));
        args.extend([
            "-P".to_string(),
            request.output_dir.to_string_lossy().into_owned(),
            "-o".to_string(),
            OUTPUT_TEMPLATE.to_string(),
            // --print implies --quiet, progress has to be asked for again
            "--newline".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            progress::download_template(),
            "--progress-template".to_string(),
            progress::postprocess_template(),
            "--print".to_string(),
            format!("before_dl:{}%(title)s", TITLE_MARKER),
            "--print".to_string(),
            progress::meta_template(),
            "--print".to_string(),
            format!("after_move:{}%(filepath)s", FILE_MARKER),
        ]);

        if let Some(ffmpeg) = &self.ffmpeg {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }

        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }

    fn expected_streams(&self, request: &DownloadRequest) -> u32 {
        let args = FormatSelector::selection_args(&request.selection, self.ffmpeg.is_some());
        args.iter()
            .position(|a| a == "-f")
            .and_then(|i| args.get(i + 1))
            .map_or(1, |format| FormatSelector::expected_streams(format))
    }

    async fn run_json(&self, args: &[String]) -> Result<String, DownloadError> {
        debug!("[YtDlp] Running: {} {}", self.ytdlp.display(), args.join(" "));
        let output = run_output_with_timeout(&self.ytdlp, args, self.info_timeout_secs).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            log_failure(output.status, &stderr);
            return Err(DownloadError::from_stderr(&stderr));
        }
        if !stderr.trim().is_empty() {
            trace!("[YtDlp] stderr: {}", stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Log what went wrong and whether anything on our side could help
fn log_failure(status: std::process::ExitStatus, stderr: &str) {
    match diagnose(stderr) {
        Some(reason) => {
            let hint = if reason.is_permanent() {
                "no workaround"
            } else if reason.cookies_might_help() {
                "fresh cookies may help"
            } else if reason.proxy_might_help() {
                "another proxy or VPN may help"
            } else {
                "see the message"
            };
            warn!("[YtDlp] Exit {}: {} ({})", status, reason.description(), hint);
        }
        None => warn!("[YtDlp] Exit {}: unclassified failure", status),
    }
    debug!("[YtDlp] stderr: {}", stderr.trim());
}

fn str_field(json: &serde_json::Value, key: &str) -> Option<String> {
    json[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// yt-dlp reports durations as floats
fn secs_field(json: &serde_json::Value, key: &str) -> Option<u64> {
    json[key].as_f64().filter(|d| *d >= 0.0).map(|d| d.round() as u64)
}

pub(crate) fn parse_video_info(stdout: &str) -> Result<VideoInfo, DownloadError> {
    let json: serde_json::Value = serde_json::from_str(stdout.trim())?;
    if !json.is_object() {
        return Err(DownloadError::ParseError("expected a JSON object".to_string()));
    }

    let id = str_field(&json, "id").unwrap_or_default();
    let webpage_url = str_field(&json, "webpage_url")
        .or_else(|| str_field(&json, "original_url"))
        .unwrap_or_default();

    Ok(VideoInfo {
        title: str_field(&json, "title").unwrap_or_else(|| "Unknown".to_string()),
        uploader: str_field(&json, "uploader")
            .or_else(|| str_field(&json, "channel"))
            .unwrap_or_else(|| "Unknown".to_string()),
        duration_secs: secs_field(&json, "duration").unwrap_or(0),
        view_count: json["view_count"].as_u64().unwrap_or(0),
        description: str_field(&json, "description").unwrap_or_default(),
        thumbnail: str_field(&json, "thumbnail").unwrap_or_default(),
        age_restricted: json["age_limit"].as_u64().unwrap_or(0) > 0,
        id,
        webpage_url,
    })
}

/// One JSON object per line; unparsable lines are skipped
pub(crate) fn parse_search_entries(stdout: &str) -> Vec<SearchEntry> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|line| match serde_json::from_str::<serde_json::Value>(line) {
            Ok(json) => Some(json),
            Err(e) => {
                debug!("[YtDlp] Skipping search line: {}", e);
                None
            }
        })
        .map(|json| {
            let id = str_field(&json, "id").unwrap_or_default();
            let url = str_field(&json, "url")
                .filter(|u| u.starts_with("http"))
                .or_else(|| str_field(&json, "webpage_url"))
                .or_else(|| {
                    (!id.is_empty()).then(|| format!("https://www.youtube.com/watch?v={}", id))
                })
                .unwrap_or_default();

            SearchEntry {
                title: str_field(&json, "title").unwrap_or_default(),
                channel: str_field(&json, "channel")
                    .or_else(|| str_field(&json, "uploader"))
                    .unwrap_or_default(),
                duration_secs: secs_field(&json, "duration"),
                view_count: json["view_count"].as_u64(),
                id,
                url,
            }
        })
        .collect()
}

#[async_trait]
impl ExtractorBackend for YtDlpBackend {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn transcoder(&self) -> Option<&Path> {
        self.ffmpeg.as_deref()
    }

    async fn fetch_info(
        &self,
        url: &str,
        options: &InvocationOptions,
    ) -> Result<VideoInfo, DownloadError> {
        let stdout = self.run_json(&self.info_args(url, options)).await?;
        parse_video_info(&stdout)
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        options: &InvocationOptions,
    ) -> Result<Vec<SearchEntry>, DownloadError> {
        let stdout = self
            .run_json(&self.search_args(query, max_results, options))
            .await?;
        Ok(parse_search_entries(&stdout))
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: &ProgressEmitter,
    ) -> Result<DownloadOutcome, DownloadError> {
        let args = self.download_args(request);
        info!("[YtDlp] Downloading {}", request.url);
        debug!("[YtDlp] Running: {} {}", self.ytdlp.display(), args.join(" "));

        let mut tracker = ProgressTracker::new(progress.clone(), self.expected_streams(request));
        tracker.begin();

        let mut title: Option<String> = None;
        let mut duration_secs: Option<u64> = None;
        let mut uploader: Option<String> = None;
        let mut final_path: Option<PathBuf> = None;

        let exit = run_streaming(&self.ytdlp, &args, |stream, line| {
            match progress::parse_line(line) {
                Some(ProgressLine::Title(t)) => title = Some(t),
                Some(ProgressLine::Meta {
                    duration_secs: d,
                    uploader: u,
                }) => {
                    duration_secs = d;
                    uploader = u;
                }
                Some(ProgressLine::FinalPath(p)) => {
                    debug!("[YtDlp] Final file: {}", p.display());
                    final_path = Some(p);
                }
                Some(parsed) => tracker.apply(&parsed),
                None if stream == Stream::Stderr => debug!("[yt-dlp] {}", line),
                None => trace!("[yt-dlp] {}", line),
            }
        })
        .await?;

        if !exit.status.success() {
            log_failure(exit.status, &exit.stderr);
            return Err(DownloadError::from_stderr(&exit.stderr));
        }

        let file_path = final_path.ok_or_else(|| {
            DownloadError::ParseError("yt-dlp finished without reporting the output file".to_string())
        })?;

        tracker.finish();

        let title = title
            .filter(|t| !t.is_empty() && t != "NA")
            .or_else(|| {
                file_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_default();

        info!("[YtDlp] Saved {}", file_path.display());
        Ok(DownloadOutcome {
            title,
            file_path,
            duration_secs,
            uploader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{AudioFormat, MediaSelection, Quality};

    fn request(selection: MediaSelection) -> DownloadRequest {
        DownloadRequest {
            url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            selection,
            output_dir: PathBuf::from("/tmp/out"),
            proxy: Some("socks5://127.0.0.1:1080".to_string()),
            cookies: Some(PathBuf::from("/cfg/cookies.txt")),
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_common_args_carry_cookies_and_proxy() {
        let backend = YtDlpBackend::new("/usr/bin/yt-dlp", None).with_socket_timeout(15);
        let args = backend.info_args("https://example.com/v", &InvocationOptions::default());
        assert!(args.contains(&"--no-playlist".to_string()));
        assert_eq!(value_after(&args, "--socket-timeout"), Some("15"));
        assert!(!args.contains(&"--cookies".to_string()));
        assert!(!args.contains(&"--proxy".to_string()));
        assert_eq!(args.last().unwrap(), "https://example.com/v");

        let req = request(MediaSelection::Audio {
            format: AudioFormat::Mp3,
        });
        let args = backend.info_args(&req.url, &req.options());
        assert_eq!(value_after(&args, "--cookies"), Some("/cfg/cookies.txt"));
        assert_eq!(value_after(&args, "--proxy"), Some("socks5://127.0.0.1:1080"));
    }

    #[test]
    fn test_download_args() {
        let backend = YtDlpBackend::new("/usr/bin/yt-dlp", Some(PathBuf::from("/usr/bin/ffmpeg")));
        let req = request(MediaSelection::Video {
            quality: Quality::MaxHeight(720),
            container: "mp4".to_string(),
        });
        let args = backend.download_args(&req);

        assert_eq!(
            value_after(&args, "-f"),
            Some("bestvideo[height<=720]+bestaudio/best[height<=720]")
        );
        assert_eq!(value_after(&args, "-P"), Some("/tmp/out"));
        assert_eq!(value_after(&args, "-o"), Some(OUTPUT_TEMPLATE));
        assert_eq!(value_after(&args, "--ffmpeg-location"), Some("/usr/bin/ffmpeg"));
        assert!(args.contains(&"--newline".to_string()));
        assert!(args.iter().any(|a| a == "after_move:__file__:%(filepath)s"));
        assert!(args.iter().any(|a| a == "before_dl:__meta__:%(duration)s\t%(uploader)s"));
        assert_eq!(backend.expected_streams(&req), 2);
        assert_eq!(args.last().unwrap(), &req.url);
    }

    #[test]
    fn test_no_ffmpeg_means_single_stream() {
        let backend = YtDlpBackend::new("/usr/bin/yt-dlp", None);
        let req = request(MediaSelection::Video {
            quality: Quality::Best,
            container: "mp4".to_string(),
        });
        let args = backend.download_args(&req);
        assert_eq!(value_after(&args, "-f"), Some("best[ext=mp4]/best"));
        assert!(!args.contains(&"--ffmpeg-location".to_string()));
        assert_eq!(backend.expected_streams(&req), 1);
    }

    #[test]
    fn test_search_args() {
        let backend = YtDlpBackend::new("yt-dlp", None);
        let args = backend.search_args("lofi beats", 5, &InvocationOptions::default());
        assert!(args.contains(&"--flat-playlist".to_string()));
        assert_eq!(args.last().unwrap(), "ytsearch5:lofi beats");
    }

    #[test]
    fn test_parse_video_info() {
        let json = r#"{"id":"abc","title":"Clip","uploader":"Chan","duration":212.4,
            "view_count":1500,"description":"d","thumbnail":"https://i/t.jpg",
            "webpage_url":"https://www.youtube.com/watch?v=abc","age_limit":18}"#;
        let info = parse_video_info(json).unwrap();
        assert_eq!(info.id, "abc");
        assert_eq!(info.duration_secs, 212);
        assert_eq!(info.view_count, 1500);
        assert!(info.age_restricted);

        let info = parse_video_info(r#"{"id":"x","age_limit":0}"#).unwrap();
        assert_eq!(info.title, "Unknown");
        assert!(!info.age_restricted);

        assert!(matches!(
            parse_video_info("not json"),
            Err(DownloadError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_search_entries() {
        let stdout = concat!(
            r#"{"id":"a1","title":"First","url":"https://www.youtube.com/watch?v=a1","channel":"C","duration":61.0}"#,
            "\n",
            r#"{"id":"b2","title":"Second","uploader":"U"}"#,
            "\n",
            "WARNING: noise\n",
        );
        let entries = parse_search_entries(stdout);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].duration_secs, Some(61));
        assert_eq!(entries[1].url, "https://www.youtube.com/watch?v=b2");
        assert_eq!(entries[1].channel, "U");
    }
}
