//! Process spawning and lifecycle management.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use super::io::{EngineChannel, EngineReader, EngineWriter, StderrCollector};
use crate::config::ClientConfig;
use crate::protocol::{frame_open_command, EXIT_COMMAND};
use crate::{Error, Result};

/// A running `cqp -c` process and its three pipes.
///
/// # Shutdown
///
/// [`close`](EngineChannel::close) sends `exit`, closes stdin, stdout and
/// stderr, and only then waits for the process. Waiting first can deadlock
/// on a full pipe. Dropping an unclosed `EngineProcess` closes the pipes and
/// kills the process.
pub struct EngineProcess {
    child: Child,
    writer: Option<EngineWriter>,
    reader: Option<EngineReader>,
    stderr: Option<StderrCollector>,
    closed: bool,
}

impl EngineProcess {
    /// Spawn the engine in child mode.
    ///
    /// Fails if the registry directory cannot be listed or the executable
    /// cannot be started. No handshake is performed here.
    pub fn spawn(config: &ClientConfig) -> Result<Self> {
        std::fs::read_dir(&config.registry).map_err(|source| Error::RegistryUnreadable {
            path: config.registry.clone(),
            source,
        })?;

        let mut cmd = build_command(config);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::EngineNotFound {
                    searched: config.cqp_command().to_string(),
                }
            } else {
                Error::ProcessSpawn(e)
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ProcessSpawn(std::io::Error::other("cqp stdin unavailable")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ProcessSpawn(std::io::Error::other("cqp stdout unavailable")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::ProcessSpawn(std::io::Error::other("cqp stderr unavailable")))?;
        let stderr = StderrCollector::new(stderr)?;

        tracing::info!(
            cqp = %config.cqp_command(),
            registry = %config.registry.display(),
            pid = ?child.id(),
            "spawned cqp"
        );

        Ok(Self {
            child,
            writer: Some(EngineWriter::new(stdin)),
            reader: Some(EngineReader::new(stdout)),
            stderr: Some(stderr),
            closed: false,
        })
    }

    /// Get the process ID of the running engine.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the process is still running.
    pub fn is_running(&self) -> bool {
        self.child.id().is_some()
    }

    /// Check whether [`close`](EngineChannel::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn release_pipes(&mut self) {
        self.writer = None;
        self.reader = None;
        self.stderr = None;
    }
}

impl EngineChannel for EngineProcess {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::SessionClosed)?;
        writer.write_all(bytes).await
    }

    async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let reader = self.reader.as_mut().ok_or(Error::SessionClosed)?;
        reader.read_line().await
    }

    async fn drain_errors(&mut self, max_lines: usize, wait: Duration) -> Vec<Vec<u8>> {
        match self.stderr.as_mut() {
            Some(stderr) => stderr.drain(max_lines, wait).await,
            None => Vec::new(),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.write_all(&frame_open_command(EXIT_COMMAND.as_bytes())).await {
                tracing::debug!(error = %e, "could not send exit to cqp");
            }
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "could not close cqp stdin");
            }
        }
        self.release_pipes();

        let status = self.child.wait().await.map_err(Error::io)?;
        tracing::info!(%status, "cqp exited");
        Ok(())
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        if !self.closed {
            self.release_pipes();
            let _ = self.child.start_kill();
        }
    }
}

/// Build a tokio Command from the config.
fn build_command(config: &ClientConfig) -> Command {
    let mut cmd = Command::new(config.cqp_command());

    if let Some(ref dir) = config.working_directory {
        cmd.current_dir(dir);
    }

    if !config.inherit_env {
        cmd.env_clear();
    }
    for (key, value) in &config.env_vars {
        cmd.env(key, value);
    }

    cmd.args(config.build_args());
    cmd.kill_on_drop(true);
    cmd
}
