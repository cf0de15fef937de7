// Downloader module - facade over yt-dlp and FFmpeg

pub mod backend;
pub mod cookies;
pub mod diagnostics;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod proxy;
pub mod tools;
pub mod traits;
pub mod utils;

pub use backend::YtDlpBackend;
pub use cookies::{CookieStatus, CookieStore};
pub use errors::{DownloadError, ErrorKind};
pub use models::{
    AudioFormat, DownloadOutcome, OperationReport, Phase, ProgressEvent, Quality, SearchEntry,
    SearchResults, VideoInfo,
};
pub use orchestrator::{Downloader, DownloaderBuilder};
pub use tools::{ToolInfo, ToolManager, ToolType};
pub use traits::{ExtractorBackend, ProgressEmitter};
