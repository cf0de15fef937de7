// Command-line shell around the downloader facade

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::downloader::cookies::cookie_export_guide;
use crate::downloader::models::{format_bytes, format_duration};
use crate::downloader::proxy::{check_proxy, load_proxy_list, pick_proxy};
use crate::downloader::{
    AudioFormat, CookieStore, DownloadError, DownloadOutcome, Downloader, OperationReport, Phase,
    ProgressEmitter, ProgressEvent, Quality, SearchResults, ToolManager, ToolType, VideoInfo,
};
use crate::logging;

const PROXY_CHECK_TIMEOUT: Duration = Duration::from_secs(15);
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "yt-fetch", author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: <config dir>/yt-fetch/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory downloads are saved to
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// -v for debug logs, -vv for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON with a success flag
    #[arg(long, global = true)]
    json: bool,

    /// Require the imported cookie file
    #[arg(long, global = true, conflicts_with = "no_cookies")]
    cookies: bool,

    /// Never send cookies
    #[arg(long, global = true)]
    no_cookies: bool,

    /// Proxy URL, e.g. socks5://127.0.0.1:1080
    #[arg(long, global = true, conflicts_with = "pick_proxy")]
    proxy: Option<String>,

    /// Use entry N (1-based) of the proxy list
    #[arg(long, global = true, value_name = "N")]
    pick_proxy: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show video information without downloading
    Info { url: String },
    /// Download a video
    Video {
        url: String,
        /// best, worst or a maximum height such as 720
        #[arg(short, long, default_value = "best")]
        quality: Quality,
    },
    /// Download audio only (needs ffmpeg)
    Audio {
        url: String,
        /// mp3, m4a, wav, opus, flac, aac or vorbis
        #[arg(short, long, default_value = "mp3")]
        format: AudioFormat,
    },
    /// Search videos
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        #[arg(short = 'n', long, default_value_t = 5)]
        max_results: usize,
    },
    /// Manage the exported cookie file
    Cookies {
        #[command(subcommand)]
        action: CookiesCommand,
    },
    /// Inspect the proxy list
    Proxy {
        #[command(subcommand)]
        action: ProxyCommand,
    },
    /// Check or update yt-dlp and ffmpeg
    Tools {
        #[command(subcommand)]
        action: ToolsCommand,
    },
    /// Show or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CookiesCommand {
    Status,
    /// Copy an exported cookies.txt into place
    Import { file: PathBuf },
    /// How to export cookies from a browser
    Guide,
}

#[derive(Subcommand, Debug)]
enum ProxyCommand {
    List,
    /// Show the external IP seen through a proxy (or directly)
    Check { proxy: Option<String> },
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    Status,
    /// Update yt-dlp
    Update,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Show,
    /// Write the default config
    Init {
        #[arg(long)]
        force: bool,
    },
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[derive(Serialize)]
struct UpdateOutput {
    output: String,
}

/// Settings resolved from config file and global flags
struct Session {
    config: AppConfig,
    config_path: PathBuf,
    json: bool,
    cookies_flag: Option<bool>,
    proxy: Option<String>,
}

impl Session {
    fn load(cli: &Cli) -> anyhow::Result<Self> {
        let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
        let mut config = AppConfig::load(&config_path)?;
        if let Some(output) = &cli.output {
            config.output_dir = output.clone();
        }

        let proxy = match (&cli.proxy, cli.pick_proxy) {
            (Some(p), _) => Some(p.clone()),
            (None, Some(n)) => {
                let list = load_proxy_list(&config.proxy_list_file).with_context(|| {
                    format!("cannot read proxy list {}", config.proxy_list_file.display())
                })?;
                Some(pick_proxy(&list, n)?)
            }
            (None, None) => config.default_proxy.clone(),
        };

        let cookies_flag = if cli.cookies {
            Some(true)
        } else if cli.no_cookies {
            Some(false)
        } else {
            None
        };

        Ok(Self {
            config,
            config_path,
            json: cli.json,
            cookies_flag,
            proxy,
        })
    }

    fn cookie_store(&self) -> CookieStore {
        CookieStore::new(&self.config.cookies_file)
    }

    /// Explicit flag wins; otherwise cookies are used whenever the file exists
    fn use_cookies(&self) -> bool {
        self.cookies_flag.unwrap_or_else(|| self.cookie_store().exists())
    }

    fn tools(&self) -> ToolManager {
        ToolManager::new()
            .with_override(ToolType::YtDlp, self.config.ytdlp_path.clone())
            .with_override(ToolType::Ffmpeg, self.config.ffmpeg_path.clone())
    }
}

async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let session = Session::load(&cli)?;

    match cli.command {
        Command::Info { url } => {
            let downloader = Downloader::from_config(&session.config)?;
            let fut = downloader.get_video_info(&url, session.use_cookies(), session.proxy.as_deref());
            match interruptible(fut).await {
                Some(result) => Ok(report(session.json, result, print_info)),
                None => Ok(ExitCode::from(EXIT_INTERRUPTED)),
            }
        }
        Command::Video { url, quality } => {
            let downloader = Downloader::from_config(&session.config)?;
            let (emitter, renderer) = start_progress(session.json);
            let fut = downloader.download_video(
                &url,
                quality,
                session.use_cookies(),
                session.proxy.as_deref(),
                &emitter,
            );
            let result = interruptible(fut).await;
            finish_download(session.json, result, emitter, renderer).await
        }
        Command::Audio { url, format } => {
            let downloader = Downloader::from_config(&session.config)?;
            let (emitter, renderer) = start_progress(session.json);
            let fut = downloader.download_audio_only(
                &url,
                format,
                session.use_cookies(),
                session.proxy.as_deref(),
                &emitter,
            );
            let result = interruptible(fut).await;
            finish_download(session.json, result, emitter, renderer).await
        }
        Command::Search { query, max_results } => {
            let downloader = Downloader::from_config(&session.config)?;
            let query = query.join(" ");
            let fut = downloader.search_videos(&query, max_results, session.proxy.as_deref());
            match interruptible(fut).await {
                Some(result) => {
                    let result = result.map(|videos| SearchResults { videos });
                    Ok(report(session.json, result, print_search))
                }
                None => Ok(ExitCode::from(EXIT_INTERRUPTED)),
            }
        }
        Command::Cookies { action } => cookies_command(&session, action),
        Command::Proxy { action } => proxy_command(&session, action).await,
        Command::Tools { action } => tools_command(&session, action).await,
        Command::Config { action } => config_command(&session, action),
    }
}

/// Race an operation against Ctrl-C; dropping it kills the child process
async fn interruptible<T, F>(operation: F) -> Option<Result<T, DownloadError>>
where
    F: Future<Output = Result<T, DownloadError>>,
{
    tokio::select! {
        result = operation => Some(result),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, partial files may remain in the output directory");
            None
        }
    }
}

/// Print a result in the selected mode and map it to an exit code
fn report<T: Serialize>(json: bool, result: Result<T, DownloadError>, human: fn(&T)) -> ExitCode {
    let code = if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    };

    if json {
        let report = OperationReport::from(result);
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("Error: cannot serialise result: {}", e),
        }
        return code;
    }

    match result {
        Ok(value) => human(&value),
        Err(e) => print_error(&e),
    }
    code
}

fn print_error(e: &DownloadError) {
    eprintln!("Error: {}", e);
    if let Some(remedy) = e.remedy() {
        eprintln!();
        eprintln!("{}", remedy);
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_info(info: &VideoInfo) {
    println!("Title:     {}", info.title);
    println!("Uploader:  {}", info.uploader);
    println!("Duration:  {}", info.duration_label());
    println!("Views:     {}", info.view_count);
    println!("URL:       {}", info.webpage_url);
    if info.age_restricted {
        println!("Age restricted: yes (download needs imported cookies)");
    }
    if !info.thumbnail.is_empty() {
        println!("Thumbnail: {}", info.thumbnail);
    }
}

fn print_search(results: &SearchResults) {
    if results.videos.is_empty() {
        println!("No results");
        return;
    }
    for (i, entry) in results.videos.iter().enumerate() {
        let duration = entry.duration_secs.map(format_duration).unwrap_or_default();
        println!("{:>2}. {} [{}] {}", i + 1, entry.title, duration, entry.channel);
        println!("    {}", entry.url);
    }
}

fn print_outcome(outcome: &DownloadOutcome) {
    println!("Saved: {}", outcome.file_path.display());
}

fn start_progress(json: bool) -> (ProgressEmitter, Option<JoinHandle<()>>) {
    let (emitter, rx) = ProgressEmitter::channel();
    let renderer = (!json).then(|| tokio::spawn(render_progress(rx)));
    (emitter, renderer)
}

async fn finish_download(
    json: bool,
    result: Option<Result<DownloadOutcome, DownloadError>>,
    emitter: ProgressEmitter,
    renderer: Option<JoinHandle<()>>,
) -> anyhow::Result<ExitCode> {
    // closing the channel stops the renderer
    drop(emitter);
    if let Some(handle) = renderer {
        if let Err(e) = handle.await {
            debug!("Progress renderer ended abnormally: {}", e);
        }
    }

    Ok(match result {
        Some(result) => report(json, result, print_outcome),
        None => ExitCode::from(EXIT_INTERRUPTED),
    })
}

fn progress_line(ev: &ProgressEvent) -> String {
    let mut line = format!("[{}] {:5.1}%", ev.phase, ev.percent);
    if let Some(total) = ev.total_bytes {
        line.push_str(&format!(" of {}", format_bytes(total)));
    }
    if let Some(speed) = ev.speed_bps {
        line.push_str(&format!(" at {}/s", format_bytes(speed as u64)));
    }
    if let Some(eta) = ev.eta_secs.filter(|_| ev.phase == Phase::Downloading) {
        line.push_str(&format!(" ETA {}", format_duration(eta)));
    }
    line
}

/// Spaces needed to blank out the rest of a longer previous line
fn overwrite_padding(previous: usize, line: &str) -> usize {
    previous.saturating_sub(line.len())
}

async fn render_progress(mut rx: watch::Receiver<ProgressEvent>) {
    let mut stderr = std::io::stderr();
    let mut width: usize = 0;
    while rx.changed().await.is_ok() {
        let ev = rx.borrow_and_update().clone();
        if ev.phase == Phase::Idle {
            continue;
        }
        let line = progress_line(&ev);
        let pad = overwrite_padding(width, &line);
        width = line.len();
        let _ = write!(stderr, "\r{}{}", line, " ".repeat(pad));
        let _ = stderr.flush();
    }
    if width > 0 {
        let _ = writeln!(stderr);
    }
}

fn cookies_command(session: &Session, action: CookiesCommand) -> anyhow::Result<ExitCode> {
    let store = session.cookie_store();
    match action {
        CookiesCommand::Status => {
            let status = store.status();
            if session.json {
                print_json(&status)?;
            } else if status.present {
                println!("Cookie file: {}", status.path.display());
                if let Some(size) = status.size_bytes {
                    println!("Size:        {}", format_bytes(size));
                }
                if let (Some(modified), Some(age)) = (&status.modified, status.age_days) {
                    println!("Exported:    {} ({} days ago)", modified, age);
                }
                if status.is_stale() {
                    println!("The export is old, sign-in may have expired: re-export it.");
                }
            } else {
                println!("No cookie file at {}", status.path.display());
                println!("Run `yt-fetch cookies guide` to see how to export one.");
            }
            Ok(ExitCode::SUCCESS)
        }
        CookiesCommand::Import { file } => {
            let result = store.import(&file);
            Ok(report(session.json, result, |status| {
                println!("Cookies imported to {}", status.path.display());
            }))
        }
        CookiesCommand::Guide => {
            println!("{}", cookie_export_guide(store.path()));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn proxy_command(session: &Session, action: ProxyCommand) -> anyhow::Result<ExitCode> {
    match action {
        ProxyCommand::List => {
            let path = &session.config.proxy_list_file;
            let list = match load_proxy_list(path) {
                Ok(list) => list,
                Err(DownloadError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    println!("No proxy list at {}", path.display());
                    println!("Create it with one proxy URL per line (# starts a comment).");
                    return Ok(ExitCode::SUCCESS);
                }
                Err(e) => return Err(e.into()),
            };
            if session.json {
                print_json(&list)?;
            } else {
                for (i, proxy) in list.iter().enumerate() {
                    println!("{:>2}. {}", i + 1, proxy);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        ProxyCommand::Check { proxy } => {
            let proxy = proxy.or_else(|| session.proxy.clone());
            let proxy = proxy.as_deref().map(str::trim).filter(|p| !p.is_empty());
            let fut = check_proxy(proxy, PROXY_CHECK_TIMEOUT);
            match interruptible(fut).await {
                Some(result) => Ok(report(session.json, result, |check| {
                    let via = check.proxy.as_deref().unwrap_or("direct connection");
                    let country = check.country.as_deref().unwrap_or("?");
                    println!(
                        "{} -> {} ({}) in {} ms",
                        via, check.external_ip, country, check.latency_ms
                    );
                })),
                None => Ok(ExitCode::from(EXIT_INTERRUPTED)),
            }
        }
    }
}

async fn tools_command(session: &Session, action: ToolsCommand) -> anyhow::Result<ExitCode> {
    let tools = session.tools();
    match action {
        ToolsCommand::Status => {
            let infos = tools.get_all_tools();
            if session.json {
                print_json(&infos)?;
            } else {
                for info in &infos {
                    match (&info.path, &info.version) {
                        (Some(path), version) => println!(
                            "{:<8} {} ({})",
                            info.name,
                            version.as_deref().unwrap_or("unknown version"),
                            path.display()
                        ),
                        (None, _) => println!("{:<8} not found", info.name),
                    }
                }
            }
            let ytdlp_ok = infos
                .iter()
                .any(|i| i.tool_type == ToolType::YtDlp && i.is_available);
            Ok(if ytdlp_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        ToolsCommand::Update => match interruptible(tools.update_ytdlp()).await {
            Some(result) => {
                let result = result.map(|output| UpdateOutput { output });
                Ok(report(session.json, result, |out| println!("{}", out.output)))
            }
            None => Ok(ExitCode::from(EXIT_INTERRUPTED)),
        },
    }
}

fn config_command(session: &Session, action: ConfigCommand) -> anyhow::Result<ExitCode> {
    match action {
        ConfigCommand::Show => {
            if !session.json {
                println!("# {}", session.config_path.display());
            }
            print_json(&session.config)?;
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommand::Init { force } => {
            let path = &session.config_path;
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            AppConfig::default().save(path)?;
            println!("Wrote {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_download_flags() {
        let cli = Cli::parse_from([
            "yt-fetch",
            "audio",
            "https://youtu.be/abc",
            "-f",
            "flac",
            "--no-cookies",
            "--proxy",
            "socks5://127.0.0.1:1080",
        ]);
        assert!(cli.no_cookies);
        assert_eq!(cli.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
        match cli.command {
            Command::Audio { format, .. } => assert_eq!(format, AudioFormat::Flac),
            other => panic!("unexpected {:?}", other),
        }

        let cli = Cli::parse_from(["yt-fetch", "video", "https://youtu.be/abc", "-q", "720p"]);
        match cli.command {
            Command::Video { quality, .. } => assert_eq!(quality, Quality::MaxHeight(720)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_conflicting_flags_rejected() {
        assert!(Cli::try_parse_from(["yt-fetch", "--cookies", "--no-cookies", "info", "u"]).is_err());
        assert!(Cli::try_parse_from(["yt-fetch", "video", "u", "-q", "hd"]).is_err());
        assert!(
            Cli::try_parse_from(["yt-fetch", "--proxy", "http://h:1", "--pick-proxy", "1", "info", "u"])
                .is_err()
        );
    }

    #[test]
    fn test_pick_proxy_from_list() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        let list_path = dir.path().join("proxy_list.txt");
        std::fs::write(&list_path, "# mine\nhttp://a.example:1\nsocks5://b.example:2\n").unwrap();
        AppConfig {
            proxy_list_file: list_path,
            cookies_file: dir.path().join("cookies.txt"),
            ..AppConfig::default()
        }
        .save(&config_path)
        .unwrap();

        let cli = Cli::parse_from([
            "yt-fetch",
            "--config",
            config_path.to_str().unwrap(),
            "--pick-proxy",
            "2",
            "search",
            "lofi",
        ]);
        let session = Session::load(&cli).unwrap();
        assert_eq!(session.proxy.as_deref(), Some("socks5://b.example:2"));
        assert!(!session.use_cookies());

        let cli = Cli::parse_from([
            "yt-fetch",
            "--config",
            config_path.to_str().unwrap(),
            "--pick-proxy",
            "3",
            "search",
            "lofi",
        ]);
        assert!(Session::load(&cli).is_err());
    }

    #[test]
    fn test_progress_line() {
        let ev = ProgressEvent {
            percent: 42.0,
            total_bytes: Some(10 * 1024 * 1024),
            speed_bps: Some(1024.0 * 1024.0),
            eta_secs: Some(6),
            phase: Phase::Downloading,
            ..ProgressEvent::default()
        };
        assert_eq!(
            progress_line(&ev),
            "[downloading]  42.0% of 10.00 MiB at 1.00 MiB/s ETA 0:06"
        );
    }

    #[test]
    fn test_overwrite_padding() {
        assert_eq!(overwrite_padding(0, "[downloading]  1.0%"), 0);
        assert_eq!(overwrite_padding(30, "[finished] 100.0%"), 13);
        assert_eq!(overwrite_padding(5, "[finished] 100.0%"), 0);
    }
}
