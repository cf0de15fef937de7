// Cookie provider - locates and imports a browser-exported cookies.txt
//
// The file is opaque to us: it is handed to yt-dlp via `--cookies` and
// only its presence and metadata are inspected. Live browser cookie
// databases are never read, the browser keeps them locked while running.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::errors::DownloadError;

pub const COOKIE_FILE_NAME: &str = "cookies.txt";

/// Exports older than this usually carry an expired session
pub const STALE_AFTER_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct CookieStatus {
    pub path: PathBuf,
    pub present: bool,
    pub size_bytes: Option<u64>,
    /// RFC 3339 modification time
    pub modified: Option<String>,
    pub age_days: Option<i64>,
}

impl CookieStatus {
    pub fn is_stale(&self) -> bool {
        self.age_days.map_or(false, |d| d > STALE_AFTER_DAYS)
    }
}

#[derive(Debug, Clone)]
pub struct CookieStore {
    path: PathBuf,
}

impl CookieStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn status(&self) -> CookieStatus {
        let metadata = fs::metadata(&self.path).ok().filter(|m| m.is_file());
        let modified = metadata
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(OffsetDateTime::from);

        CookieStatus {
            path: self.path.clone(),
            present: metadata.is_some(),
            size_bytes: metadata.as_ref().map(|m| m.len()),
            modified: modified.and_then(|t| t.format(&Rfc3339).ok()),
            age_days: modified.map(|t| (OffsetDateTime::now_utc() - t).whole_days()),
        }
    }

    /// Cookie file to pass for one operation.
    ///
    /// Asking for cookies when none were imported is an authentication
    /// failure, not a silent downgrade to anonymous access.
    pub fn resolve(&self, use_cookies: bool) -> Result<Option<PathBuf>, DownloadError> {
        if !use_cookies {
            return Ok(None);
        }
        if self.exists() {
            debug!("[Cookies] Using {}", self.path.display());
            Ok(Some(self.path.clone()))
        } else {
            Err(DownloadError::CookiesMissing(self.path.clone()))
        }
    }

    /// Copy a user-exported file into place, replacing any previous export
    pub fn import(&self, source: &Path) -> Result<CookieStatus, DownloadError> {
        let metadata = fs::metadata(source).map_err(|e| {
            DownloadError::InvalidInput(format!("cannot read {}: {}", source.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(DownloadError::InvalidInput(format!(
                "{} is not a file",
                source.display()
            )));
        }
        if metadata.len() == 0 {
            return Err(DownloadError::InvalidInput(format!(
                "{} is empty, export the cookies again",
                source.display()
            )));
        }

        let same_file = match (fs::canonicalize(source), fs::canonicalize(&self.path)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same_file {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::copy(source, &self.path)?;
        }

        info!("[Cookies] Imported {} -> {}", source.display(), self.path.display());
        Ok(self.status())
    }
}

/// Manual export instructions
pub fn cookie_export_guide(target: &Path) -> String {
    format!(
        "Age-restricted and sign-in-only videos need your logged-in session.\n\
         \n\
         1. Install a cookies.txt exporter extension:\n\
         \x20  Chrome/Edge: \"Get cookies.txt LOCALLY\"\n\
         \x20  https://chrome.google.com/webstore/detail/get-cookiestxt-locally/cclelndahbckbenkjhflpdbgdldlbecc\n\
         \x20  Firefox: \"cookies.txt\"\n\
         \x20  https://addons.mozilla.org/firefox/addon/cookies-txt/\n\
         2. Log into the video site in that browser.\n\
         3. Open any page of the site and export cookies with the extension.\n\
         4. Import the exported file:\n\
         \x20  yt-fetch cookies import <path/to/cookies.txt>\n\
         \n\
         The file will be stored at: {}\n\
         When downloads start failing with sign-in errors again, the session\n\
         has expired: export and import a fresh file.",
        target.display()
    )
}
