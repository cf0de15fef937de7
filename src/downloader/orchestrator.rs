// Downloader facade - validates a request, resolves cookies and proxy,
// then hands it to the extractor backend
//
// One operation at a time per call; nothing is retried. A failed step is
// returned to the caller with its classified error.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::backend::{YtDlpBackend, DEFAULT_INFO_TIMEOUT_SECS, DEFAULT_SOCKET_TIMEOUT_SECS};
use super::cookies::{CookieStore, COOKIE_FILE_NAME};
use super::errors::DownloadError;
use super::models::{
    AudioFormat, DownloadOutcome, DownloadRequest, InvocationOptions, MediaSelection, Quality,
    SearchEntry, VideoInfo,
};
use super::proxy::normalize_proxy;
use super::tools::{ToolManager, ToolType};
use super::traits::{ExtractorBackend, ProgressEmitter};
use crate::config::{self, AppConfig};

pub const DEFAULT_CONTAINER: &str = "mp4";

pub struct Downloader {
    backend: Arc<dyn ExtractorBackend>,
    cookies: CookieStore,
    output_dir: PathBuf,
    container: String,
}

/// Collects construction options before any tool lookup happens
pub struct DownloaderBuilder {
    output_dir: PathBuf,
    tools: ToolManager,
    cookies: Option<CookieStore>,
    socket_timeout_secs: u32,
    info_timeout_secs: u64,
    container: String,
    backend: Option<Arc<dyn ExtractorBackend>>,
}

impl DownloaderBuilder {
    pub fn ytdlp_path(mut self, path: Option<PathBuf>) -> Self {
        self.tools = self.tools.with_override(ToolType::YtDlp, path);
        self
    }

    pub fn ffmpeg_path(mut self, path: Option<PathBuf>) -> Self {
        self.tools = self.tools.with_override(ToolType::Ffmpeg, path);
        self
    }

    pub fn cookie_store(mut self, store: CookieStore) -> Self {
        self.cookies = Some(store);
        self
    }

    pub fn socket_timeout(mut self, secs: u32) -> Self {
        self.socket_timeout_secs = secs;
        self
    }

    pub fn info_timeout(mut self, secs: u64) -> Self {
        self.info_timeout_secs = secs;
        self
    }

    /// Container for merged video downloads
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    /// Use a ready backend instead of discovering yt-dlp
    pub fn backend(mut self, backend: Arc<dyn ExtractorBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<Downloader, DownloadError> {
        if !self.output_dir.exists() {
            debug!("[Downloader] Creating {}", self.output_dir.display());
            fs::create_dir_all(&self.output_dir)?;
        } else if !self.output_dir.is_dir() {
            return Err(DownloadError::InvalidInput(format!(
                "output path {} is not a directory",
                self.output_dir.display()
            )));
        }

        let backend: Arc<dyn ExtractorBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(
                YtDlpBackend::discover(&self.tools)?
                    .with_socket_timeout(self.socket_timeout_secs)
                    .with_info_timeout(self.info_timeout_secs),
            ),
        };

        let cookies = self
            .cookies
            .unwrap_or_else(|| CookieStore::new(config::config_dir().join(COOKIE_FILE_NAME)));

        info!(
            "[Downloader] Backend {} ready, output to {}",
            backend.name(),
            self.output_dir.display()
        );

        Ok(Downloader {
            backend,
            cookies,
            output_dir: self.output_dir,
            container: self.container,
        })
    }
}

impl Downloader {
    /// Downloader with discovered tools, creating `output_dir` when missing
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, DownloadError> {
        Self::builder(output_dir).build()
    }

    pub fn builder(output_dir: impl Into<PathBuf>) -> DownloaderBuilder {
        DownloaderBuilder {
            output_dir: output_dir.into(),
            tools: ToolManager::new(),
            cookies: None,
            socket_timeout_secs: DEFAULT_SOCKET_TIMEOUT_SECS,
            info_timeout_secs: DEFAULT_INFO_TIMEOUT_SECS,
            container: DEFAULT_CONTAINER.to_string(),
            backend: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, DownloadError> {
        Self::builder(&config.output_dir)
            .ytdlp_path(config.ytdlp_path.clone())
            .ffmpeg_path(config.ffmpeg_path.clone())
            .cookie_store(CookieStore::new(&config.cookies_file))
            .socket_timeout(config.socket_timeout_secs)
            .info_timeout(config.info_timeout_secs)
            .container(config.container.clone())
            .build()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn cookie_store(&self) -> &CookieStore {
        &self.cookies
    }

    pub fn has_transcoder(&self) -> bool {
        self.backend.transcoder().is_some()
    }

    fn validate_url(url: &str) -> Result<String, DownloadError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DownloadError::InvalidInput("URL is empty".to_string()));
        }
        if url.chars().any(char::is_whitespace) {
            return Err(DownloadError::InvalidInput(format!(
                "'{}' is not a single URL",
                url
            )));
        }
        Ok(url.to_string())
    }

    /// Cookies and proxy are settled before anything is spawned
    fn invocation_options(
        &self,
        use_cookies: bool,
        proxy: Option<&str>,
    ) -> Result<InvocationOptions, DownloadError> {
        let proxy = normalize_proxy(proxy)?;
        let cookies = self.cookies.resolve(use_cookies)?;
        if let Some(p) = &proxy {
            debug!("[Downloader] Using proxy {}", p);
        }
        Ok(InvocationOptions { proxy, cookies })
    }

    pub async fn get_video_info(
        &self,
        url: &str,
        use_cookies: bool,
        proxy: Option<&str>,
    ) -> Result<VideoInfo, DownloadError> {
        let url = Self::validate_url(url)?;
        let options = self.invocation_options(use_cookies, proxy)?;

        info!("[Downloader] Fetching info for {}", url);
        let info = self.backend.fetch_info(&url, &options).await?;
        if info.age_restricted && options.cookies.is_none() {
            warn!("[Downloader] '{}' is age restricted, a download will need cookies", info.title);
        }
        Ok(info)
    }

    pub async fn download_video(
        &self,
        url: &str,
        quality: Quality,
        use_cookies: bool,
        proxy: Option<&str>,
        progress: &ProgressEmitter,
    ) -> Result<DownloadOutcome, DownloadError> {
        if !self.has_transcoder() {
            warn!("[Downloader] No ffmpeg: falling back to single-file formats, quality may be lower");
        }
        let selection = MediaSelection::Video {
            quality,
            container: self.container.clone(),
        };
        self.download(url, selection, use_cookies, proxy, progress).await
    }

    pub async fn download_audio_only(
        &self,
        url: &str,
        format: AudioFormat,
        use_cookies: bool,
        proxy: Option<&str>,
        progress: &ProgressEmitter,
    ) -> Result<DownloadOutcome, DownloadError> {
        if !self.has_transcoder() {
            return Err(DownloadError::TranscoderMissing);
        }
        let outcome = self
            .download(url, MediaSelection::Audio { format }, use_cookies, proxy, progress)
            .await?;

        let ext_matches = outcome
            .file_path
            .extension()
            .map_or(false, |e| e.eq_ignore_ascii_case(format.extension()));
        if !ext_matches {
            warn!(
                "[Downloader] Expected a .{} file, got {}",
                format.extension(),
                outcome.file_path.display()
            );
        }
        Ok(outcome)
    }

    async fn download(
        &self,
        url: &str,
        selection: MediaSelection,
        use_cookies: bool,
        proxy: Option<&str>,
        progress: &ProgressEmitter,
    ) -> Result<DownloadOutcome, DownloadError> {
        let url = Self::validate_url(url)?;
        let options = self.invocation_options(use_cookies, proxy)?;

        let request = DownloadRequest {
            url,
            selection,
            output_dir: self.output_dir.clone(),
            proxy: options.proxy,
            cookies: options.cookies,
        };

        match self.backend.download(&request, progress).await {
            Ok(outcome) => {
                info!("[Downloader] ✓ {} -> {}", outcome.title, outcome.file_path.display());
                Ok(outcome)
            }
            Err(e) => {
                warn!("[Downloader] ✗ {} failed: {}", request.url, e);
                Err(e)
            }
        }
    }

    /// Search the default site; at most `max_results` complete entries
    pub async fn search_videos(
        &self,
        query: &str,
        max_results: usize,
        proxy: Option<&str>,
    ) -> Result<Vec<SearchEntry>, DownloadError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DownloadError::InvalidInput("search query is empty".to_string()));
        }
        if query.starts_with("http://") || query.starts_with("https://") {
            return Err(DownloadError::InvalidInput(
                "search query looks like a URL, use `info` or a download command".to_string(),
            ));
        }
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let options = self.invocation_options(false, proxy)?;
        info!("[Downloader] Searching '{}' (max {})", query, max_results);

        let mut entries: Vec<SearchEntry> = self
            .backend
            .search(query, max_results, &options)
            .await?
            .into_iter()
            .filter(|e| !e.title.trim().is_empty() && !e.url.trim().is_empty())
            .collect();
        entries.truncate(max_results);

        debug!("[Downloader] {} results", entries.len());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        transcoder: Option<PathBuf>,
        calls: Mutex<Vec<String>>,
        last_options: Mutex<Option<InvocationOptions>>,
    }

    impl FakeBackend {
        fn with_ffmpeg() -> Self {
            Self {
                transcoder: Some(PathBuf::from("/usr/bin/ffmpeg")),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn entry(id: &str, title: &str) -> SearchEntry {
        SearchEntry {
            id: id.to_string(),
            title: title.to_string(),
            url: if id.is_empty() {
                String::new()
            } else {
                format!("https://www.youtube.com/watch?v={}", id)
            },
            channel: "chan".to_string(),
            duration_secs: Some(60),
            view_count: None,
        }
    }

    #[async_trait]
    impl ExtractorBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn transcoder(&self) -> Option<&Path> {
            self.transcoder.as_deref()
        }

        async fn fetch_info(
            &self,
            url: &str,
            options: &InvocationOptions,
        ) -> Result<VideoInfo, DownloadError> {
            self.calls.lock().unwrap().push(format!("info {}", url));
            *self.last_options.lock().unwrap() = Some(options.clone());
            Ok(VideoInfo {
                id: "abc".into(),
                title: "Clip".into(),
                uploader: "Chan".into(),
                duration_secs: 10,
                view_count: 1,
                description: String::new(),
                thumbnail: String::new(),
                webpage_url: url.to_string(),
                age_restricted: false,
            })
        }

        async fn search(
            &self,
            query: &str,
            max_results: usize,
            _options: &InvocationOptions,
        ) -> Result<Vec<SearchEntry>, DownloadError> {
            self.calls.lock().unwrap().push(format!("search {} {}", query, max_results));
            // more than asked, with incomplete hits mixed in
            Ok(vec![
                entry("a", "One"),
                entry("b", ""),
                entry("", "No url"),
                entry("c", "Two"),
                entry("d", "Three"),
                entry("e", "Four"),
                entry("f", "Five"),
                entry("g", "Six"),
            ])
        }

        async fn download(
            &self,
            request: &DownloadRequest,
            progress: &ProgressEmitter,
        ) -> Result<DownloadOutcome, DownloadError> {
            self.calls.lock().unwrap().push(format!("download {}", request.url));
            *self.last_options.lock().unwrap() = Some(request.options());
            let ext = match &request.selection {
                MediaSelection::Audio { format } => format.extension().to_string(),
                MediaSelection::Video { container, .. } => container.clone(),
            };
            progress.emit(Default::default());
            Ok(DownloadOutcome {
                title: "Clip".into(),
                file_path: request.output_dir.join(format!("Clip.{}", ext)),
                duration_secs: None,
                uploader: None,
            })
        }
    }

    fn downloader(dir: &Path, backend: Arc<FakeBackend>) -> Downloader {
        Downloader::builder(dir.join("out"))
            .cookie_store(CookieStore::new(dir.join(COOKIE_FILE_NAME)))
            .backend(backend)
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), Arc::new(FakeBackend::default()));
        assert!(d.output_dir().is_dir());
    }

    #[tokio::test]
    async fn test_missing_cookies_never_reach_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::with_ffmpeg());
        let d = downloader(dir.path(), backend.clone());

        let err = d
            .get_video_info("https://www.youtube.com/watch?v=abc", true, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::downloader::ErrorKind::Authentication);

        let err = d
            .download_audio_only(
                "https://www.youtube.com/watch?v=abc",
                AudioFormat::Mp3,
                true,
                None,
                &ProgressEmitter::detached(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::CookiesMissing(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_proxy_handling() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let d = downloader(dir.path(), backend.clone());
        let url = "https://www.youtube.com/watch?v=abc";

        let err = d.get_video_info(url, false, Some("127.0.0.1:1080")).await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidProxy { .. }));
        assert!(backend.calls().is_empty());

        d.get_video_info(url, false, Some("  ")).await.unwrap();
        assert_eq!(backend.last_options.lock().unwrap().clone().unwrap().proxy, None);

        d.get_video_info(url, false, Some(" socks5://10.0.0.1:1080 ")).await.unwrap();
        assert_eq!(
            backend.last_options.lock().unwrap().clone().unwrap().proxy.as_deref(),
            Some("socks5://10.0.0.1:1080")
        );
    }

    #[tokio::test]
    async fn test_search_is_bounded_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let d = downloader(dir.path(), backend.clone());

        let results = d.search_videos("test", 5, None).await.unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|e| !e.title.is_empty() && !e.url.is_empty()));
        assert_eq!(results[1].title, "Two");

        assert!(d.search_videos("test", 0, None).await.unwrap().is_empty());
        assert!(d.search_videos("   ", 5, None).await.is_err());
        assert!(d.search_videos("https://youtu.be/abc", 5, None).await.is_err());
        assert_eq!(backend.calls(), vec!["search test 5"]);
    }

    #[tokio::test]
    async fn test_audio_needs_transcoder() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let d = downloader(dir.path(), backend.clone());

        let err = d
            .download_audio_only(
                "https://www.youtube.com/watch?v=abc",
                AudioFormat::Mp3,
                false,
                None,
                &ProgressEmitter::detached(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::TranscoderMissing));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_audio_download_with_cookies() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(COOKIE_FILE_NAME), "# Netscape HTTP Cookie File\n").unwrap();
        let backend = Arc::new(FakeBackend::with_ffmpeg());
        let d = downloader(dir.path(), backend.clone());

        let outcome = d
            .download_audio_only(
                " https://www.youtube.com/watch?v=abc ",
                AudioFormat::Mp3,
                true,
                None,
                &ProgressEmitter::detached(),
            )
            .await
            .unwrap();
        assert!(outcome.file_path.to_string_lossy().ends_with(".mp3"));
        assert!(outcome.file_path.starts_with(d.output_dir()));
        assert_eq!(backend.calls(), vec!["download https://www.youtube.com/watch?v=abc"]);
        assert_eq!(
            backend.last_options.lock().unwrap().clone().unwrap().cookies,
            Some(dir.path().join(COOKIE_FILE_NAME))
        );
    }

    #[tokio::test]
    async fn test_video_without_transcoder_still_runs() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), Arc::new(FakeBackend::default()));
        let outcome = d
            .download_video(
                "https://www.youtube.com/watch?v=abc",
                Quality::MaxHeight(720),
                false,
                None,
                &ProgressEmitter::detached(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.file_path.extension().unwrap(), "mp4");
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), Arc::new(FakeBackend::default()));
        let err = d.get_video_info("  ", false, None).await.unwrap_err();
        assert_eq!(err.kind(), crate::downloader::ErrorKind::InvalidInput);
    }
}
