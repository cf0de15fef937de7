// Process helpers for backend implementations

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use super::errors::DownloadError;

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Exit status plus everything the child wrote to stderr
#[derive(Debug)]
pub struct StreamedExit {
    pub status: ExitStatus,
    pub stderr: String,
}

fn spawn_error(program: &Path, e: io::Error) -> DownloadError {
    if e.kind() == io::ErrorKind::NotFound {
        DownloadError::ToolNotFound(format!("{}: {}", program.display(), e))
    } else {
        DownloadError::Io(e)
    }
}

fn command(program: &Path, args: &[String]) -> TokioCommand {
    let mut cmd = TokioCommand::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Run command with timeout, collecting its whole output
pub async fn run_output_with_timeout(
    program: &Path,
    args: &[String],
    timeout_secs: u64,
) -> Result<Output, DownloadError> {
    let mut child = command(program, args)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::Io(io::Error::other("stdout was not captured")))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::Io(io::Error::other("stderr was not captured")))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status) => {
            let status = status?;
            let stdout = stdout_task.await.map_err(io::Error::other)??;
            let stderr = stderr_task.await.map_err(io::Error::other)??;
            Ok(Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::Timeout(timeout_secs))
        }
    }
}

fn pump<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, String)>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(|c| c == '\r' || c == '\n')
                        .to_string();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Run command and hand every output line to `on_line` as it arrives.
///
/// Dropping the returned future kills the child.
pub async fn run_streaming<F>(
    program: &Path,
    args: &[String],
    mut on_line: F,
) -> Result<StreamedExit, DownloadError>
where
    F: FnMut(Stream, &str) + Send,
{
    let mut child = command(program, args)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::Io(io::Error::other("stdout was not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::Io(io::Error::other("stderr was not captured")))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stdout_task = pump(stdout, Stream::Stdout, tx.clone());
    let stderr_task = pump(stderr, Stream::Stderr, tx);

    let mut stderr_text = String::new();
    while let Some((stream, line)) = rx.recv().await {
        if stream == Stream::Stderr {
            stderr_text.push_str(&line);
            stderr_text.push('\n');
        }
        on_line(stream, &line);
    }

    let _ = stdout_task.await;
    let _ = stderr_task.await;
    let status = child.wait().await?;

    Ok(StreamedExit {
        status,
        stderr: stderr_text,
    })
}
