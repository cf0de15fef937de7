// Proxy selector - user-maintained endpoint list and validation
//
// Proxies are forwarded to yt-dlp verbatim (trimmed). There is no rotation
// or automatic health checking; `check_proxy` is an on-demand diagnostic.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::errors::DownloadError;

pub const PROXY_LIST_FILE_NAME: &str = "proxy_list.txt";

const SUPPORTED_SCHEMES: [&str; 6] = ["http", "https", "socks4", "socks4a", "socks5", "socks5h"];

/// Check that `proxy` is a usable endpoint URL
pub fn validate_proxy(proxy: &str) -> Result<(), DownloadError> {
    let invalid = |reason: String| DownloadError::InvalidProxy {
        proxy: proxy.to_string(),
        reason,
    };

    let url = Url::parse(proxy).map_err(|e| invalid(e.to_string()))?;

    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(invalid(format!(
            "unsupported scheme '{}', expected one of {}",
            url.scheme(),
            SUPPORTED_SCHEMES.join(", ")
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

/// Empty means "no proxy"; anything else must validate and is passed on as typed
pub fn normalize_proxy(raw: Option<&str>) -> Result<Option<String>, DownloadError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(proxy) => {
            validate_proxy(proxy)?;
            Ok(Some(proxy.to_string()))
        }
    }
}

/// One endpoint per line; blank lines and `#` comments are skipped
pub fn parse_proxy_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| match validate_proxy(line) {
            Ok(()) => true,
            Err(e) => {
                debug!("[Proxy] Skipping list entry: {}", e);
                false
            }
        })
        .map(str::to_string)
        .collect()
}

pub fn load_proxy_list(path: &Path) -> Result<Vec<String>, DownloadError> {
    let content = fs::read_to_string(path)?;
    let proxies = parse_proxy_list(&content);
    if proxies.is_empty() {
        warn!("[Proxy] No usable entries in {}", path.display());
    }
    Ok(proxies)
}

/// Pick entry `index` (1-based, as listed to the user)
pub fn pick_proxy(proxies: &[String], index: usize) -> Result<String, DownloadError> {
    index
        .checked_sub(1)
        .and_then(|i| proxies.get(i))
        .cloned()
        .ok_or_else(|| {
            DownloadError::InvalidInput(format!(
                "proxy #{} does not exist, the list has {} entries",
                index,
                proxies.len()
            ))
        })
}

/// Outcome of routing a request through a proxy
#[derive(Debug, Clone, Serialize)]
pub struct ProxyCheck {
    pub proxy: Option<String>,
    pub external_ip: String,
    pub country: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    ip: Option<String>,
    country: Option<String>,
}

/// Fetch the external IP as seen through `proxy` (direct when `None`)
pub async fn check_proxy(proxy: Option<&str>, timeout: Duration) -> Result<ProxyCheck, DownloadError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(p) = proxy {
        validate_proxy(p)?;
        let proxy_cfg = reqwest::Proxy::all(p).map_err(|e| DownloadError::InvalidProxy {
            proxy: p.to_string(),
            reason: e.to_string(),
        })?;
        builder = builder.proxy(proxy_cfg);
    }
    let client = builder
        .build()
        .map_err(|e| DownloadError::NetworkFailed(format!("cannot build HTTP client: {}", e)))?;

    let services = [
        "https://ipinfo.io/json",
        "https://api.ipify.org?format=json",
    ];

    let mut last_error = String::from("no service answered");
    for service in services {
        debug!("[Proxy] Trying service: {}", service);
        let started = Instant::now();
        let response = match client.get(service).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("[Proxy] Service {} failed: {}", service, e);
                last_error = e.to_string();
                continue;
            }
        };
        match response.json::<IpInfoResponse>().await {
            Ok(IpInfoResponse {
                ip: Some(ip),
                country,
            }) => {
                return Ok(ProxyCheck {
                    proxy: proxy.map(str::to_string),
                    external_ip: ip,
                    country,
                    latency_ms: started.elapsed().as_millis() as u64,
                });
            }
            Ok(_) => last_error = format!("{} returned no IP", service),
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(DownloadError::NetworkFailed(last_error))
}
