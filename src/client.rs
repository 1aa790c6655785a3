//! High-level CQP client.
//!
//! This module provides [`CqpClient`], the main entry point for driving a
//! CQP engine.
//!
//! # Example
//!
//! ```ignore
//! use libcqp::{ClientConfig, CqpClient, CqpOption, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ClientConfig::builder().registry("/corpora/registry").build()?;
//!     let mut cqp = CqpClient::connect(config).await?;
//!
//!     cqp.set_corpus("DICKENS").await?;
//!     let lines = cqp.query(r#"Last = [lemma="fog"]"#).await?;
//!     let hits = cqp.size("Last").await?;
//!     println!("{hits} hits");
//!
//!     cqp.set_option(CqpOption::Context, libcqp::OptionValue::Context("1 s".into()))
//!         .await?;
//!     cqp.shutdown().await
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use uuid::Uuid;

use crate::charset::Charset;
use crate::config::{ClientConfig, CqpOption, OptionValue};
use crate::error::{ErrorRecord, QueryLockFailure};
use crate::observer::{EngineObserver, LoggingObserver};
use crate::process::{EngineChannel, EngineProcess};
use crate::protocol::{
    classify, encode_data_line, format_triple, frame_command, frame_open_command,
    normalize_command, parse_corpus_info, parse_option_line, strip_eol, CorpusInfo,
    EngineVersion, LineKind, ProgressUpdate,
};
use crate::stream::ResponseLines;
use crate::{Error, Result};

/// A client bound to one running CQP engine.
///
/// Every operation takes `&mut self`: the pipe protocol has no multiplexing,
/// so one client serves one caller at a time. Wrap it in a
/// [`SharedEngine`](crate::SharedEngine) to share it between tasks.
///
/// # Errors
///
/// Engine-reported failures are returned as [`Error::Engine`] and also
/// prepended to the [`ErrorRecord`]. A fatal error (closed stdout, timeout,
/// broken pipe) poisons the client; every later call returns
/// [`Error::SessionPoisoned`].
///
/// # Type parameter
///
/// `C` is the transport. It defaults to a spawned [`EngineProcess`]; tests
/// plug in scripted engines through [`handshake`](Self::handshake).
pub struct CqpClient<C: EngineChannel = EngineProcess> {
    channel: C,
    config: ClientConfig,
    version: EngineVersion,
    corpus: Option<CorpusInfo>,
    charset: Charset,
    /// A sent command's reply has not been read up to the end marker.
    pending: bool,
    /// A raw command is waiting for more input before the end marker is requested.
    open_frame: bool,
    poisoned: bool,
    closed: bool,
    errors: ErrorRecord,
    observer: Arc<dyn EngineObserver>,
    progress: Option<Arc<dyn EngineObserver>>,
}

impl CqpClient<EngineProcess> {
    /// Spawn `cqp -c` and perform the startup handshake.
    ///
    /// # Errors
    ///
    /// Fails if the registry cannot be read, the executable cannot be
    /// started, or the first line is not a version banner. No client is
    /// returned in any of these cases.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let process = EngineProcess::spawn(&config)?;
        Self::handshake(process, config).await
    }

    /// Process ID of the engine.
    pub fn pid(&self) -> Option<u32> {
        self.channel.pid()
    }
}

impl<C: EngineChannel> CqpClient<C> {
    /// Complete the startup handshake over an already established channel.
    ///
    /// Reads the version banner, warns if the engine is older than the
    /// configured minimum, and switches off pretty printing and the progress
    /// bar. On failure the channel is closed.
    pub async fn handshake(mut channel: C, config: ClientConfig) -> Result<Self> {
        let version = match read_banner(&mut channel, &config).await {
            Ok(version) => version,
            Err(e) => {
                if let Err(close_err) = channel.close().await {
                    tracing::debug!(error = %close_err, "close after failed handshake");
                }
                return Err(e);
            }
        };

        tracing::info!(version = %version, raw = %version.raw, "cqp handshake complete");
        if !version.at_least(config.min_version) {
            tracing::warn!(
                version = %version,
                minimum = %format_triple(config.min_version),
                "cqp is older than the supported minimum"
            );
        }

        let observer = config
            .observer
            .clone()
            .unwrap_or_else(|| Arc::new(LoggingObserver::new()));

        let mut client = Self {
            channel,
            config,
            version,
            corpus: None,
            charset: Charset::Utf8,
            pending: false,
            open_frame: false,
            poisoned: false,
            closed: false,
            errors: ErrorRecord::default(),
            observer,
            progress: None,
        };

        for option in [CqpOption::PrettyPrint, CqpOption::ProgressBar] {
            if let Err(e) = client.set_option(option, false).await {
                if let Err(close_err) = client.shutdown().await {
                    tracing::debug!(error = %close_err, "close after failed handshake");
                }
                return Err(e);
            }
        }

        Ok(client)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Engine version parsed from the startup banner.
    pub fn version(&self) -> &EngineVersion {
        &self.version
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The transport.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Charset of the active corpus.
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Error status and messages accumulated since the last clear.
    pub fn error_record(&self) -> &ErrorRecord {
        &self.errors
    }

    /// Reset the error record.
    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// True after a fatal error.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// True if a reply has not yet been read up to its end marker.
    pub fn has_pending_output(&self) -> bool {
        self.pending
    }

    /// True while a raw frame opened with `wait_for_more` is not yet closed.
    pub fn has_open_frame(&self) -> bool {
        self.open_frame
    }

    /// True if [`shutdown`](Self::shutdown) has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Compare the engine version against `min`.
    pub fn check_version(&self, min: (u32, u32, u32)) -> bool {
        self.version.at_least(min)
    }

    /// Fail with [`Error::VersionTooOld`] unless the engine is at least `min`.
    pub fn require_version(&self, feature: &'static str, min: (u32, u32, u32)) -> Result<()> {
        if self.check_version(min) {
            Ok(())
        } else {
            Err(Error::VersionTooOld {
                feature,
                required: format_triple(min),
                found: self.version.to_string(),
            })
        }
    }

    /// Transcode application text into the corpus charset.
    pub fn filter_input(&self, text: &str) -> Result<Vec<u8>> {
        self.charset.filter_input(text).map(|bytes| bytes.into_owned())
    }

    /// Transcode an engine line into UTF-8.
    pub fn filter_output(&self, bytes: &[u8]) -> String {
        self.charset.filter_output(bytes)
    }

    /// Register or remove the progress observer.
    ///
    /// The engine's ProgressBar option is switched on while an observer is
    /// registered and off otherwise.
    pub async fn set_progress_observer(
        &mut self,
        observer: Option<Arc<dyn EngineObserver>>,
    ) -> Result<()> {
        self.set_option(CqpOption::ProgressBar, observer.is_some())
            .await?;
        self.progress = observer;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Framed commands
    // -------------------------------------------------------------------------

    /// Run one command and collect its reply lines.
    ///
    /// Whitespace in `command` is collapsed and a trailing `;` is removed.
    /// Progress lines and the end marker never appear in the result.
    pub async fn execute(&mut self, command: &str) -> Result<Vec<String>> {
        let result = self.run(command).await;
        self.track(result)
    }

    /// Run one command and return its reply as a lazy line sequence.
    pub async fn execute_lines(&mut self, command: &str) -> Result<ResponseLines<'_, C>> {
        let started = self.start_command(command).await;
        self.track(started)?;
        Ok(ResponseLines::new(self))
    }

    /// Run one command, handing each reply line to `handler` instead of
    /// collecting them.
    pub async fn execute_with<F>(&mut self, command: &str, handler: F) -> Result<()>
    where
        F: FnMut(String),
    {
        self.execute_lines(command).await?.for_each_line(handler).await
    }

    /// Run untrusted query text under an engine-side query lock.
    ///
    /// The lock stops the text from running anything but a query. The
    /// unlock is always sent once a lock has been requested, even if the
    /// query failed; if the lock itself was refused the query is skipped.
    /// All step failures are returned together as [`Error::LockedQuery`].
    pub async fn query(&mut self, command: &str) -> Result<Vec<String>> {
        let key = lock_key();
        let mut failure = QueryLockFailure::default();
        let mut lines = Vec::new();

        match self.run(&format!("set QueryLock {key}")).await {
            Ok(_) => match self.run(command).await {
                Ok(reply) => lines = reply,
                Err(e) => failure.query = Some(e),
            },
            Err(e) => failure.lock = Some(e),
        }

        if let Err(e) = self.run(&format!("unlock {key}")).await {
            failure.unlock = Some(e);
        }

        if failure.is_empty() {
            Ok(lines)
        } else {
            self.track(Err(Error::LockedQuery(Box::new(failure))))
        }
    }

    // -------------------------------------------------------------------------
    // Raw channel
    // -------------------------------------------------------------------------

    /// Send a command without buffering its reply.
    ///
    /// With `wait_for_more` false the command is framed and its reply is read
    /// with [`raw_read`](Self::raw_read). With `wait_for_more` true no end
    /// marker is requested: the caller follows up with
    /// [`raw_write`](Self::raw_write) and closes the frame with a final
    /// `raw_execute("", false)`.
    pub async fn raw_execute(&mut self, command: &str, wait_for_more: bool) -> Result<()> {
        let result = self.raw_execute_inner(command, wait_for_more).await;
        self.track(result)
    }

    /// Write one data line into an open raw frame.
    pub async fn raw_write(&mut self, line: &str) -> Result<()> {
        let result = self.raw_write_inner(line).await;
        self.track(result)
    }

    /// Read the next reply line of a raw command.
    ///
    /// Returns `Ok(None)` once the end marker has been consumed, and without
    /// touching the pipe if no reply is pending.
    pub async fn raw_read(&mut self) -> Result<Option<String>> {
        let result = self.raw_read_inner().await;
        self.track(result)
    }

    /// Read and drop the rest of the pending reply.
    pub async fn raw_discard(&mut self) -> Result<()> {
        let result = self.sync().await;
        self.track(result)
    }

    /// The pending raw reply as a [`futures::Stream`].
    pub fn raw_lines(&mut self) -> impl Stream<Item = Result<String>> + Send + '_ {
        futures::stream::unfold(Some(self), |state| async move {
            let client = state?;
            match client.raw_read().await {
                Ok(Some(line)) => Some((Ok(line), Some(client))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    // -------------------------------------------------------------------------
    // Options
    // -------------------------------------------------------------------------

    /// Read an option from the engine.
    ///
    /// Options are never cached; each call re-reads the engine's settings.
    /// Returns `None` if the option is not listed or its value is unset.
    pub async fn get_option(&mut self, option: CqpOption) -> Result<Option<OptionValue>> {
        let lines = self.execute("set").await?;
        Ok(lines
            .iter()
            .find_map(|line| parse_option_line(line, option.name()))
            .and_then(|raw| option.decode(raw)))
    }

    /// Read an option by name. Unknown names yield `None`.
    pub async fn get_option_named(&mut self, name: &str) -> Result<Option<OptionValue>> {
        match CqpOption::from_name(name) {
            Some(option) => self.get_option(option).await,
            None => {
                tracing::debug!(option = name, "unknown option requested");
                Ok(None)
            }
        }
    }

    /// Set an option, validating the value against the option's type first.
    pub async fn set_option(
        &mut self,
        option: CqpOption,
        value: impl Into<OptionValue>,
    ) -> Result<()> {
        let command = option.set_command(&value.into());
        let command = self.track(command)?;
        self.execute(&command).await.map(|_| ())
    }

    /// Set an option by name.
    pub async fn set_option_named(&mut self, name: &str, value: OptionValue) -> Result<()> {
        let option = CqpOption::from_name(name).ok_or_else(|| Error::InvalidOption {
            option: name.to_string(),
            reason: "unknown option".to_string(),
        });
        let option = self.track(option)?;
        self.set_option(option, value).await
    }

    // -------------------------------------------------------------------------
    // Corpora and named results
    // -------------------------------------------------------------------------

    /// Names of all corpora in the registry.
    pub async fn list_corpora(&mut self) -> Result<Vec<String>> {
        let lines = self.execute("show corpora").await?;
        Ok(non_blank(lines))
    }

    /// Activate a corpus (or a named subcorpus `CORPUS:Name`) and re-read
    /// its properties.
    pub async fn set_corpus(&mut self, name: &str) -> Result<&CorpusInfo> {
        let checked = crate::bulk::validate_name(name);
        self.track(checked)?;
        self.execute(name).await?;
        self.refresh_corpus().await
    }

    /// Properties of the active corpus, as of the last activation.
    pub fn get_corpus(&self) -> Option<&CorpusInfo> {
        self.corpus.as_ref()
    }

    /// Re-read name, size and charset of the active corpus from `info`.
    pub async fn refresh_corpus(&mut self) -> Result<&CorpusInfo> {
        let lines = self.execute("info").await?;
        let parsed = parse_corpus_info(&lines).ok_or_else(|| Error::MalformedReply {
            line: lines.first().cloned().unwrap_or_default(),
        });
        let info = self.track(parsed)?;

        if info.charset != self.charset {
            tracing::debug!(from = %self.charset, to = %info.charset, "corpus charset changed");
        }
        self.charset = info.charset;
        Ok(self.corpus.insert(info))
    }

    /// Named query results and subcorpora of the active corpus.
    pub async fn list_named(&mut self) -> Result<Vec<String>> {
        let lines = self.execute("show named").await?;
        Ok(non_blank(lines))
    }

    /// Number of matches in a named query result.
    pub async fn size(&mut self, scope: &str) -> Result<u64> {
        let checked = crate::bulk::validate_name(scope);
        self.track(checked)?;
        let lines = self.execute(&format!("size {scope}")).await?;
        let first = lines.first().map(|l| l.trim()).unwrap_or_default();
        let parsed = first.parse::<u64>().map_err(|_| Error::MalformedReply {
            line: first.to_string(),
        });
        self.track(parsed)
    }

    /// Drop a named query result from engine memory.
    pub async fn discard(&mut self, scope: &str) -> Result<()> {
        let checked = crate::bulk::validate_name(scope);
        self.track(checked)?;
        self.execute(&format!("discard {scope}")).await.map(|_| ())
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Send `exit`, close the pipes and wait for the engine. Idempotent.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending = false;
        self.open_frame = false;
        self.channel.close().await
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Record a failure in the error record and pass the result through.
    ///
    /// This is the one place the observer hears about engine errors, so a
    /// public call reports at most once however many commands it ran.
    pub(crate) fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            let messages = e.messages();
            if e.is_engine_error() {
                self.observer.on_engine_error(&messages);
            }
            self.errors.record(messages);
        }
        result
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.closed {
            Err(Error::SessionClosed)
        } else if self.poisoned {
            Err(Error::SessionPoisoned)
        } else {
            Ok(())
        }
    }

    fn poison(&mut self, err: Error) -> Error {
        if err.is_fatal() && !self.poisoned {
            tracing::warn!(error = %err, "cqp session poisoned");
            self.poisoned = true;
            self.pending = false;
            self.open_frame = false;
        }
        err
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match self.channel.send(bytes).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.poison(e)),
        }
    }

    async fn read_raw_line(&mut self) -> Result<Vec<u8>> {
        let read = match self.config.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.channel.read_line())
                .await
                .unwrap_or(Err(Error::Timeout(limit))),
            None => self.channel.read_line().await,
        };
        match read {
            Ok(Some(line)) => {
                tracing::trace!(line = %String::from_utf8_lossy(strip_eol(&line)), "cqp <");
                Ok(line)
            }
            Ok(None) => Err(self.poison(Error::StreamClosed)),
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Collect stderr; any content means the last command failed.
    async fn engine_errors(&mut self, wait: Duration) -> Result<()> {
        let raw = self
            .channel
            .drain_errors(self.config.max_error_lines, wait)
            .await;
        if raw.is_empty() {
            return Ok(());
        }
        let messages = raw.iter().map(|l| self.filter_output(l)).collect();
        Err(Error::Engine { messages })
    }

    fn report_progress(&self, line: &[u8]) {
        let text = self.filter_output(line);
        match ProgressUpdate::parse(&text) {
            Some(update) => {
                let sink = self.progress.as_deref().unwrap_or(&*self.observer);
                sink.on_progress(&update);
            }
            None => tracing::trace!(line = %text, "unparsable progress line"),
        }
    }

    /// Discard whatever remains of the previous reply.
    async fn sync(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.open_frame {
            return Err(Error::FrameState(
                "cannot discard output while a raw frame is open",
            ));
        }
        let mut discarded = 0usize;
        while self.next_reply_line().await?.is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "discarded unread cqp output");
        }
        Ok(())
    }

    /// Send a framed command and check for an immediate error.
    async fn start_command(&mut self, command: &str) -> Result<()> {
        self.ensure_usable()?;
        if self.open_frame {
            return Err(Error::FrameState(
                "a raw frame is open; close it before sending a new command",
            ));
        }
        self.sync().await?;

        let command = normalize_command(command);
        if command.is_empty() {
            return Err(Error::EmptyCommand);
        }
        let bytes = self.filter_input(&command)?;

        tracing::debug!(command = %command, "cqp >");
        self.send(&frame_command(&bytes)).await?;
        self.pending = true;
        self.engine_errors(Duration::ZERO).await
    }

    /// Next payload line of the pending reply; `None` at the end marker.
    pub(crate) async fn next_reply_line(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.pending {
            return Ok(None);
        }
        self.ensure_usable()?;
        if self.open_frame {
            return Err(Error::FrameState(
                "the reply cannot be read before the raw frame is closed",
            ));
        }
        loop {
            let line = self.read_raw_line().await?;
            match classify(&line) {
                LineKind::EndOfReply => {
                    self.pending = false;
                    return Ok(None);
                }
                LineKind::Progress(body) => self.report_progress(body),
                LineKind::Data(body) => return Ok(Some(body.to_vec())),
            }
        }
    }

    /// Errors the engine reported while producing the reply.
    pub(crate) async fn check_trailing_errors(&mut self) -> Result<()> {
        self.engine_errors(self.config.error_grace).await
    }

    /// Untracked framed round trip.
    pub(crate) async fn run(&mut self, command: &str) -> Result<Vec<String>> {
        self.start_command(command).await?;
        let mut lines = Vec::new();
        while let Some(bytes) = self.next_reply_line().await? {
            lines.push(self.filter_output(&bytes));
        }
        self.check_trailing_errors().await?;
        Ok(lines)
    }

    async fn raw_execute_inner(&mut self, command: &str, wait_for_more: bool) -> Result<()> {
        self.ensure_usable()?;
        if !self.open_frame {
            self.sync().await?;
        }

        let command = command.replace(['\r', '\n'], " ");
        if command.trim().is_empty() && (wait_for_more || !self.open_frame) {
            return Err(Error::EmptyCommand);
        }
        let bytes = self.filter_input(&command)?;

        let framed = if wait_for_more {
            frame_open_command(&bytes)
        } else {
            frame_command(&bytes)
        };
        tracing::debug!(command = %command, wait_for_more, "cqp raw >");
        self.send(&framed).await?;
        self.pending = true;
        self.open_frame = wait_for_more;
        self.engine_errors(Duration::ZERO).await
    }

    async fn raw_write_inner(&mut self, line: &str) -> Result<()> {
        self.ensure_usable()?;
        if !self.open_frame {
            return Err(Error::FrameState("raw_write needs an open raw frame"));
        }
        let bytes = self.filter_input(line)?;
        self.send(&encode_data_line(&bytes)).await
    }

    async fn raw_read_inner(&mut self) -> Result<Option<String>> {
        if !self.pending {
            return Ok(None);
        }
        match self.next_reply_line().await? {
            Some(bytes) => Ok(Some(self.filter_output(&bytes))),
            None => {
                self.check_trailing_errors().await?;
                Ok(None)
            }
        }
    }
}

impl<C: EngineChannel> std::fmt::Debug for CqpClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqpClient")
            .field("version", &self.version.to_string())
            .field("corpus", &self.corpus)
            .field("charset", &self.charset)
            .field("pending", &self.pending)
            .field("open_frame", &self.open_frame)
            .field("poisoned", &self.poisoned)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Read the startup banner and parse the engine version.
async fn read_banner<C: EngineChannel>(
    channel: &mut C,
    config: &ClientConfig,
) -> Result<EngineVersion> {
    let read = match config.read_timeout {
        Some(limit) => tokio::time::timeout(limit, channel.read_line())
            .await
            .unwrap_or(Err(Error::Timeout(limit))),
        None => channel.read_line().await,
    };

    let Some(line) = read? else {
        let raw = channel
            .drain_errors(config.max_error_lines, config.error_grace)
            .await;
        if raw.is_empty() {
            return Err(Error::Handshake {
                banner: String::new(),
            });
        }
        return Err(Error::Engine {
            messages: raw
                .iter()
                .map(|l| String::from_utf8_lossy(l).into_owned())
                .collect(),
        });
    };

    let banner = String::from_utf8_lossy(strip_eol(&line)).into_owned();
    EngineVersion::parse(&banner).ok_or(Error::Handshake { banner })
}

/// Random key for `set QueryLock`; the engine takes a positive integer.
fn lock_key() -> u64 {
    Uuid::new_v4().as_u64_pair().0 >> 33
}

fn non_blank(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
