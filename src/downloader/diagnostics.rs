// Failure diagnostics - classifies yt-dlp stderr into the error taxonomy
//
// yt-dlp reports every failure as free text on stderr. The patterns below
// map that text onto a small set of reasons that the facade turns into
// `DownloadError` variants with a matching remedy.

use serde::Serialize;

/// Why the extraction library gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// Age gate, needs a logged-in session
    AgeRestricted,

    /// Bot check, private or members-only video: session cookies required
    LoginRequired,

    /// Not available from the caller's region
    GeoBlocked,

    /// DRM-protected or paid content, no workaround exists
    DrmProtected,

    /// Deleted, removed or otherwise gone
    VideoUnavailable,

    /// No extractor handles this URL
    UnsupportedUrl,

    /// Extractor broke against the site, usually fixed by updating yt-dlp
    ExtractorOutdated,

    /// ffmpeg/ffprobe missing for a post-processing step
    TranscoderMissing,

    /// HTTP 429 or similar throttling
    RateLimited,

    /// HTTP 403 on the media request
    Forbidden,

    /// The configured proxy refused or failed the tunnel
    ProxyFailed,

    /// Timeouts, DNS failures, refused connections
    NetworkFailure,
}

impl FailureReason {
    /// Short human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::AgeRestricted => "Age-restricted content",
            Self::LoginRequired => "Sign-in required",
            Self::GeoBlocked => "Blocked in your region",
            Self::DrmProtected => "DRM-protected content",
            Self::VideoUnavailable => "Video unavailable",
            Self::UnsupportedUrl => "Unsupported URL",
            Self::ExtractorOutdated => "Extractor failed against the site",
            Self::TranscoderMissing => "FFmpeg not found",
            Self::RateLimited => "Rate limited",
            Self::Forbidden => "Access denied (HTTP 403)",
            Self::ProxyFailed => "Proxy connection failed",
            Self::NetworkFailure => "Network failure",
        }
    }

    /// Whether fresh session cookies could change the outcome
    pub fn cookies_might_help(&self) -> bool {
        matches!(
            self,
            Self::AgeRestricted | Self::LoginRequired | Self::Forbidden
        )
    }

    /// Whether routing through another proxy/VPN could change the outcome
    pub fn proxy_might_help(&self) -> bool {
        matches!(
            self,
            Self::GeoBlocked | Self::RateLimited | Self::Forbidden | Self::ProxyFailed
        )
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::DrmProtected | Self::VideoUnavailable)
    }
}

/// Analyze stderr output and return the most specific reason found
pub fn diagnose(stderr: &str) -> Option<FailureReason> {
    let lower = stderr.to_lowercase();

    if lower.contains("ffmpeg not found")
        || lower.contains("ffprobe and ffmpeg not found")
        || lower.contains("ffmpeg is not installed")
        || lower.contains("ffprobe not found")
    {
        return Some(FailureReason::TranscoderMissing);
    }

    if lower.contains("drm")
        || lower.contains("widevine")
        || lower.contains("requires purchase")
        || lower.contains("this video requires payment")
    {
        return Some(FailureReason::DrmProtected);
    }

    if lower.contains("age-restricted")
        || lower.contains("sign in to confirm your age")
        || lower.contains("inappropriate for some users")
    {
        return Some(FailureReason::AgeRestricted);
    }

    if lower.contains("confirm you're not a bot")
        || lower.contains("confirm you\u{2019}re not a bot")
        || lower.contains("private video")
        || lower.contains("members only")
        || lower.contains("members-only")
        || lower.contains("use --cookies")
        || lower.contains("login required")
        || lower.contains("sign in if you've been granted access")
    {
        return Some(FailureReason::LoginRequired);
    }

    if lower.contains("available in your country")
        || lower.contains("blocked it in your country")
        || lower.contains("geo restricted")
        || lower.contains("geo-restricted")
        || lower.contains("geo restriction")
    {
        return Some(FailureReason::GeoBlocked);
    }

    if lower.contains("video unavailable")
        || lower.contains("video has been removed")
        || lower.contains("no longer available")
    {
        return Some(FailureReason::VideoUnavailable);
    }

    if lower.contains("unsupported url") || lower.contains("is not a valid url") {
        return Some(FailureReason::UnsupportedUrl);
    }

    if lower.contains("http error 429") || lower.contains("too many requests") {
        return Some(FailureReason::RateLimited);
    }

    if lower.contains("proxyerror")
        || lower.contains("tunnel connection failed")
        || lower.contains("socks")
    {
        return Some(FailureReason::ProxyFailed);
    }

    if lower.contains("http error 403") || lower.contains("forbidden") {
        return Some(FailureReason::Forbidden);
    }

    if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection refused")
        || lower.contains("network is unreachable")
        || lower.contains("name or service not known")
        || lower.contains("getaddrinfo failed")
        || lower.contains("temporary failure in name resolution")
        || lower.contains("unable to download webpage")
    {
        return Some(FailureReason::NetworkFailure);
    }

    if lower.contains("unable to extract")
        || lower.contains("nsig extraction failed")
        || lower.contains("please report this issue")
    {
        return Some(FailureReason::ExtractorOutdated);
    }

    None
}

/// Condense stderr to the lines worth showing the user.
///
/// `ERROR:` lines are kept verbatim; otherwise the last non-empty line is used.
pub fn summarize(stderr: &str) -> String {
    let important: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:"))
        .take(3)
        .collect();

    if !important.is_empty() {
        return important.join(" | ");
    }

    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("yt-dlp exited without an error message")
        .to_string()
}
