#[tokio::main]
async fn main() -> std::process::ExitCode {
    yt_fetch_lib::run().await
}
