use tracing_subscriber::EnvFilter;

/// Logs go to stderr so stdout stays clean for results and `--json`
pub fn init_tracing(verbosity: u8) {
    let fallback = match verbosity {
        0 => "yt_fetch=info,yt_fetch_lib=info",
        1 => "yt_fetch=debug,yt_fetch_lib=debug",
        _ => "yt_fetch=trace,yt_fetch_lib=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity > 0)
        .try_init();
}
