use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when driving a CQP engine.
///
/// Errors are organized by category:
/// - Configuration errors: detected at `build()` or `connect()` time
/// - Spawn and handshake errors: the engine could not be started
/// - Framing errors: the pipe protocol lost synchronization (fatal to the session)
/// - Engine errors: the engine reported a failure on stderr (recoverable)
/// - Validation errors: rejected before anything is sent to the engine
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    // -------------------------------------------------------------------------
    // Configuration errors
    // -------------------------------------------------------------------------
    /// Invalid configuration provided to builder.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The registry directory does not exist or cannot be listed.
    #[error("registry directory {path} is not readable: {source}")]
    RegistryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Spawn and handshake errors
    // -------------------------------------------------------------------------
    /// CQP binary not found.
    #[error("cqp executable not found (searched: {searched})")]
    EngineNotFound { searched: String },

    /// Failed to spawn the cqp subprocess.
    #[error("failed to spawn cqp process: {0}")]
    ProcessSpawn(#[source] std::io::Error),

    /// The first line printed by the engine was not a version banner.
    #[error("engine handshake failed: unrecognised version banner {banner:?}")]
    Handshake { banner: String },

    /// The engine is older than a feature requires.
    #[error("{feature} requires CQP {required} or newer (running {found})")]
    VersionTooOld {
        feature: &'static str,
        required: String,
        found: String,
    },

    // -------------------------------------------------------------------------
    // IO errors
    // -------------------------------------------------------------------------
    /// IO error communicating with the cqp subprocess.
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),

    // -------------------------------------------------------------------------
    // Framing errors (fatal to the session)
    // -------------------------------------------------------------------------
    /// The engine closed stdout before the end-of-reply marker was seen.
    #[error("engine output closed before end-of-reply marker")]
    StreamClosed,

    /// A read from the engine exceeded the configured timeout.
    #[error("engine read timed out after {0:?}")]
    Timeout(Duration),

    /// The session hit a framing error earlier and can no longer be trusted.
    #[error("engine session is unusable after an earlier framing error")]
    SessionPoisoned,

    /// The client was shut down.
    #[error("engine session has been shut down")]
    SessionClosed,

    // -------------------------------------------------------------------------
    // Protocol misuse and malformed replies
    // -------------------------------------------------------------------------
    /// A raw command frame was used out of order.
    #[error("raw command frame misuse: {0}")]
    FrameState(&'static str),

    /// A reply line could not be interpreted.
    #[error("malformed engine reply: {line:?}")]
    MalformedReply { line: String },

    // -------------------------------------------------------------------------
    // Engine-reported errors (recoverable)
    // -------------------------------------------------------------------------
    /// The engine wrote to stderr while processing a command.
    #[error("CQP error: {}", messages.join(" / "))]
    Engine { messages: Vec<String> },

    /// One or more steps of a locked query failed.
    #[error("locked query failed: {0}")]
    LockedQuery(Box<QueryLockFailure>),

    // -------------------------------------------------------------------------
    // Validation errors (nothing was sent)
    // -------------------------------------------------------------------------
    /// An empty command was submitted.
    #[error("empty command")]
    EmptyCommand,

    /// Option value does not match the option's declared type or pattern.
    #[error("invalid value for option {option}: {reason}")]
    InvalidOption { option: String, reason: String },

    /// Bulk rows are not of a single supported width.
    #[error("invalid bulk row width: {0}")]
    InvalidRowWidth(String),

    /// An `anchor.attribute` specifier failed validation.
    #[error("invalid attribute specifier {0:?}")]
    InvalidSpecifier(String),

    /// A corpus or subcorpus name failed validation.
    #[error("invalid corpus or subcorpus name {0:?}")]
    InvalidName(String),

    /// A path cannot be embedded in an engine command.
    #[error("path cannot be passed to the engine: {0}")]
    InvalidPath(PathBuf),

    /// The string contains characters the corpus charset cannot represent.
    #[error("text is not representable in charset {charset}")]
    Unencodable { charset: &'static str },

    /// An interchange file operation was attempted in the wrong state.
    #[error("interchange file is {state}, cannot {operation}")]
    InterchangeState {
        state: &'static str,
        operation: &'static str,
    },
}

/// A specialized Result type for libcqp operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an IO error.
    pub fn io(source: std::io::Error) -> Self {
        Self::Io(source)
    }

    /// Check whether this error leaves the pipe protocol in an unknown state.
    ///
    /// Fatal errors poison the client; the only recovery is a new engine.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::StreamClosed | Error::Timeout(_) | Error::Io(_) | Error::SessionPoisoned
        )
    }

    /// Check if this error was reported by the engine itself.
    pub fn is_engine_error(&self) -> bool {
        matches!(self, Error::Engine { .. } | Error::LockedQuery(_))
    }

    /// Engine message lines carried by this error, merged for aggregates.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Error::Engine { messages } => messages.clone(),
            Error::LockedQuery(failure) => failure.messages(),
            other => vec![other.to_string()],
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// Outcome of the most recent failing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Ok,
    Error,
}

/// Accumulated error state of a client.
///
/// Every failed operation prepends its messages; nothing is removed until
/// [`clear`](Self::clear) is called.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorRecord {
    status: Status,
    messages: Vec<String>,
}

impl ErrorRecord {
    /// Current status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// True if no failure has been recorded since the last clear.
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Recorded messages, newest batch first.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Record a failure.
    pub fn record(&mut self, lines: Vec<String>) {
        self.status = Status::Error;
        self.messages.splice(0..0, lines);
    }

    /// Reset to `Ok` with no messages.
    pub fn clear(&mut self) {
        self.status = Status::Ok;
        self.messages.clear();
    }
}

/// Per-step outcome of a locked query.
///
/// Each of the three steps (acquire, run, release) keeps its own error so that
/// a successful release never hides a failed acquire or query.
#[derive(Debug, Default)]
pub struct QueryLockFailure {
    pub lock: Option<Error>,
    pub query: Option<Error>,
    pub unlock: Option<Error>,
}

impl QueryLockFailure {
    /// True if no step failed.
    pub fn is_empty(&self) -> bool {
        self.lock.is_none() && self.query.is_none() && self.unlock.is_none()
    }

    /// All captured messages, in step order.
    pub fn messages(&self) -> Vec<String> {
        [&self.lock, &self.query, &self.unlock]
            .into_iter()
            .flatten()
            .flat_map(Error::messages)
            .collect()
    }
}

impl fmt::Display for QueryLockFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps = [
            ("lock", &self.lock),
            ("query", &self.query),
            ("unlock", &self.unlock),
        ];
        let mut first = true;
        for (step, err) in steps {
            if let Some(err) = err {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{step}: {err}")?;
                first = false;
            }
        }
        Ok(())
    }
}
