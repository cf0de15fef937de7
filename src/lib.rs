pub mod config;
pub mod downloader;

mod cli;
mod logging;

use std::process::ExitCode;

/// Entry point of the `yt-fetch` binary
pub async fn run() -> ExitCode {
    cli::run().await
}
