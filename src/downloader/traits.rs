// Extractor backend trait definition

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::errors::DownloadError;
use super::models::{
    DownloadOutcome, DownloadRequest, InvocationOptions, ProgressEvent, SearchEntry, VideoInfo,
};

/// Seam between the facade and the external extraction library
#[async_trait]
pub trait ExtractorBackend: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Transcoder the backend hands to the library, if one was found
    fn transcoder(&self) -> Option<&Path>;

    /// Get video information without downloading
    async fn fetch_info(
        &self,
        url: &str,
        options: &InvocationOptions,
    ) -> Result<VideoInfo, DownloadError>;

    /// Run a site search, returning raw hits in ranking order
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        options: &InvocationOptions,
    ) -> Result<Vec<SearchEntry>, DownloadError>;

    /// Download with progress updates
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: &ProgressEmitter,
    ) -> Result<DownloadOutcome, DownloadError>;
}

/// Progress emitter helper.
///
/// Backed by a watch channel: only the latest event is kept, readers never
/// see a backlog.
#[derive(Clone)]
pub struct ProgressEmitter {
    tx: Arc<watch::Sender<ProgressEvent>>,
}

impl ProgressEmitter {
    pub fn channel() -> (Self, watch::Receiver<ProgressEvent>) {
        let (tx, rx) = watch::channel(ProgressEvent::default());
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Emitter nobody listens to
    pub fn detached() -> Self {
        Self::channel().0
    }

    pub fn emit(&self, progress: ProgressEvent) {
        self.tx.send_replace(progress);
    }
}
