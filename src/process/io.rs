//! I/O primitives for the three engine pipes.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};

use crate::protocol::strip_eol;
use crate::{Error, Result};

/// Byte-level transport to an engine.
///
/// [`EngineProcess`](super::EngineProcess) implements this over real pipes;
/// tests substitute scripted engines. Lines are raw bytes in the corpus
/// charset, with their terminators.
pub trait EngineChannel: Send {
    /// Write bytes to the engine's stdin and flush.
    fn send(&mut self, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Read one stdout line. `Ok(None)` means stdout is closed.
    fn read_line(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Collect stderr lines that are already available, without blocking.
    ///
    /// If nothing is available, waits up to `wait` for a first line. At most
    /// `max_lines` are returned; any excess is discarded.
    fn drain_errors(
        &mut self,
        max_lines: usize,
        wait: Duration,
    ) -> impl Future<Output = Vec<Vec<u8>>> + Send;

    /// Shut the engine down. Must be idempotent.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Reads lines from the engine's stdout.
pub struct EngineReader {
    reader: BufReader<ChildStdout>,
}

impl EngineReader {
    /// Create a new reader from a child process stdout.
    pub fn new(stdout: ChildStdout) -> Self {
        Self {
            reader: BufReader::new(stdout),
        }
    }

    /// Read the next line including its terminator; `Ok(None)` at EOF.
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::with_capacity(128);
        let bytes = self
            .reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(Error::io)?;
        if bytes == 0 {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }
}

/// Writes statements to the engine's stdin.
pub struct EngineWriter {
    stdin: ChildStdin,
}

impl EngineWriter {
    /// Create a new writer from a child process stdin.
    pub fn new(stdin: ChildStdin) -> Self {
        Self { stdin }
    }

    /// Write and flush.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.stdin.write_all(bytes).await.map_err(Error::io)?;
        self.stdin.flush().await.map_err(Error::io)?;
        Ok(())
    }

    /// Close stdin, signalling end of input to the engine.
    pub async fn shutdown(mut self) -> Result<()> {
        self.stdin.shutdown().await.map_err(Error::io)
    }
}

/// Buffers raw stderr bytes and hands them out as non-blank lines.
#[derive(Debug, Default)]
struct ErrorLines {
    partial: Vec<u8>,
}

impl ErrorLines {
    fn push(&mut self, bytes: &[u8]) {
        self.partial.extend_from_slice(bytes);
    }

    /// Take every buffered line. A trailing fragment without its newline
    /// counts as a line: the engine has finished the command by now.
    fn take(&mut self) -> Vec<Vec<u8>> {
        let buffered = std::mem::take(&mut self.partial);
        buffered
            .split_inclusive(|b| *b == b'\n')
            .map(strip_eol)
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .map(<[u8]>::to_vec)
            .collect()
    }
}

fn cap_lines(mut lines: Vec<Vec<u8>>, max_lines: usize) -> Vec<Vec<u8>> {
    if lines.len() > max_lines {
        tracing::debug!(
            discarded = lines.len() - max_lines,
            "dropped stderr lines over the collection cap"
        );
        lines.truncate(max_lines);
    }
    lines
}

/// Reads engine stderr on demand.
///
/// The engine writes its error messages before the end-of-reply marker, so
/// once the marker has been read they are already sitting in the pipe. A
/// drain reads the pipe directly with a non-blocking `read(2)` until it
/// would block, which sees those bytes regardless of whether the reactor
/// has been told about them yet.
#[cfg(unix)]
pub struct StderrCollector {
    pipe: tokio::net::unix::pipe::Receiver,
    direct: std::fs::File,
    lines: ErrorLines,
    eof: bool,
}

#[cfg(unix)]
impl StderrCollector {
    /// Take over a child process stderr.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(stderr: ChildStderr) -> Result<Self> {
        use std::os::fd::AsFd;

        let fd = stderr.into_owned_fd().map_err(Error::io)?;
        // Switches the pipe to non-blocking mode; the duplicate shares it.
        let pipe = tokio::net::unix::pipe::Receiver::from_owned_fd(fd).map_err(Error::io)?;
        let direct = pipe.as_fd().try_clone_to_owned().map_err(Error::io)?;
        Ok(Self {
            pipe,
            direct: std::fs::File::from(direct),
            lines: ErrorLines::default(),
            eof: false,
        })
    }

    /// Take the stderr lines the engine has written so far.
    ///
    /// If there are none, waits up to `wait` for the first to arrive.
    pub async fn drain(&mut self, max_lines: usize, wait: Duration) -> Vec<Vec<u8>> {
        self.read_available();
        let mut lines = self.lines.take();
        if lines.is_empty() && !wait.is_zero() && !self.eof {
            self.wait_for_data(wait).await;
            self.read_available();
            lines = self.lines.take();
        }
        cap_lines(lines, max_lines)
    }

    fn read_available(&mut self) {
        use std::io::{ErrorKind, Read};

        let mut buf = [0u8; 4096];
        while !self.eof {
            match (&self.direct).read(&mut buf) {
                Ok(0) => self.eof = true,
                Ok(n) => self.lines.push(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!(error = %e, "could not read engine stderr");
                    self.eof = true;
                }
            }
        }
    }

    async fn wait_for_data(&mut self, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        let mut buf = [0u8; 4096];
        loop {
            match tokio::time::timeout_at(deadline, self.pipe.readable()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "engine stderr not pollable");
                    return;
                }
                Err(_) => return,
            }
            // try_read clears stale readiness, so a spurious wakeup loops
            // back to waiting instead of spinning.
            match self.pipe.try_read(&mut buf) {
                Ok(0) => {
                    self.eof = true;
                    return;
                }
                Ok(n) => {
                    self.lines.push(&buf[..n]);
                    return;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    tracing::debug!(error = %e, "could not read engine stderr");
                    return;
                }
            }
        }
    }
}

/// Collects engine stderr in a background task.
///
/// Without non-blocking pipe reads, lines are forwarded over a channel so
/// that checking for errors never blocks on the pipe.
#[cfg(not(unix))]
pub struct StderrCollector {
    rx: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
    task: tokio::task::JoinHandle<()>,
}

#[cfg(not(unix))]
impl StderrCollector {
    /// Start collecting from a child process stderr.
    pub fn new(stderr: ChildStderr) -> Result<Self> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            loop {
                let mut line = Vec::new();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(Self { rx, task })
    }

    /// Take whatever stderr lines have arrived.
    pub async fn drain(&mut self, max_lines: usize, wait: Duration) -> Vec<Vec<u8>> {
        tokio::task::yield_now().await;

        let mut lines = ErrorLines::default();
        while let Ok(line) = self.rx.try_recv() {
            lines.push(&line);
        }
        let mut taken = lines.take();
        if taken.is_empty() && !wait.is_zero() {
            if let Ok(Some(line)) = tokio::time::timeout(wait, self.rx.recv()).await {
                lines.push(&line);
                while let Ok(line) = self.rx.try_recv() {
                    lines.push(&line);
                }
                taken = lines.take();
            }
        }
        cap_lines(taken, max_lines)
    }
}

#[cfg(not(unix))]
impl Drop for StderrCollector {
    fn drop(&mut self) {
        self.task.abort();
    }
}
