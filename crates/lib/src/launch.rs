//! Spawning the backend process and draining its output.
//!
//! Stdout and stderr are exposed as lazy line streams that end when the pipe closes.
//! Both must be drained while the backend starts up, otherwise a chatty child can fill
//! its pipe buffer and stall before it ever answers a probe.

use crate::env::EnvMap;
use futures_util::stream::{self, Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("failed to start {}: {source}", executable.display())]
pub struct SpawnError {
    pub executable: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Lines read from one output pipe of the child, in order. Not restartable.
pub type OutputLines = Pin<Box<dyn Stream<Item = String> + Send>>;

/// A freshly spawned child with its output pipes split off.
pub struct LaunchedProcess {
    pub child: Child,
    pub stdout: OutputLines,
    pub stderr: OutputLines,
}

impl std::fmt::Debug for LaunchedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedProcess")
            .field("pid", &self.child.id())
            .finish_non_exhaustive()
    }
}

/// Spawn `executable args...` in `cwd` with exactly `env` as its environment.
/// Stdin is closed. The child is killed if its handle is dropped.
pub fn launch(
    executable: &Path,
    args: &[String],
    cwd: &Path,
    env: &EnvMap,
) -> Result<LaunchedProcess, SpawnError> {
    let mut child = Command::new(executable)
        .args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SpawnError {
            executable: executable.to_path_buf(),
            source,
        })?;
    let stdout: OutputLines = match child.stdout.take() {
        Some(out) => line_stream(out),
        None => Box::pin(stream::empty()),
    };
    let stderr: OutputLines = match child.stderr.take() {
        Some(err) => line_stream(err),
        None => Box::pin(stream::empty()),
    };
    Ok(LaunchedProcess {
        child,
        stdout,
        stderr,
    })
}

/// Split a pipe into lines. Invalid UTF-8 is replaced rather than ending the stream,
/// so the pipe keeps being drained.
fn line_stream<R>(reader: R) -> OutputLines
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Box::pin(stream::unfold(BufReader::new(reader), |mut reader| async move {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                while buf.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
                    buf.pop();
                }
                Some((String::from_utf8_lossy(&buf).into_owned(), reader))
            }
            Err(e) => {
                log::debug!("output pipe read failed: {}", e);
                None
            }
        }
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// One line of backend output, tagged for correlation across concurrent instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub instance_id: Uuid,
    pub port: u16,
    pub working_dir: PathBuf,
    pub stream: StreamKind,
    pub line: String,
}

/// Receives every output line of every instance when configured on the supervisor.
pub type OutputSink = mpsc::UnboundedSender<OutputLine>;

/// Identifies the instance an output stream belongs to.
#[derive(Debug, Clone)]
pub struct OutputTag {
    pub instance_id: Uuid,
    pub port: u16,
    pub working_dir: PathBuf,
}

/// Consume `lines` on its own task until the pipe closes: one log record per line,
/// plus an [`OutputLine`] on `sink` if given. A closed sink is ignored.
pub fn drain_output(
    mut lines: OutputLines,
    stream: StreamKind,
    tag: OutputTag,
    sink: Option<OutputSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = lines.next().await {
            match stream {
                StreamKind::Stdout => log::info!(
                    target: "backend",
                    "[{} {}] {}",
                    tag.port,
                    tag.working_dir.display(),
                    line
                ),
                StreamKind::Stderr => log::warn!(
                    target: "backend",
                    "[{} {}] {}",
                    tag.port,
                    tag.working_dir.display(),
                    line
                ),
            }
            if let Some(ref sink) = sink {
                let _ = sink.send(OutputLine {
                    instance_id: tag.instance_id,
                    port: tag.port,
                    working_dir: tag.working_dir.clone(),
                    stream,
                    line,
                });
            }
        }
        log::debug!(
            "backend {} on port {} closed {}",
            tag.instance_id,
            tag.port,
            stream.as_str()
        );
    })
}
