//! Client configuration and builder.
//!
//! # Example
//!
//! ```ignore
//! use libcqp::config::{ClientConfig, UndumpStrategy};
//!
//! let config = ClientConfig::builder()
//!     .cqp_path("/usr/local/bin/cqp")
//!     .registry("/corpora/registry")
//!     .undump_strategy(UndumpStrategy::File)
//!     .build()?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::observer::EngineObserver;
use crate::protocol::MIN_ENGINE_VERSION;
use crate::{Error, Result};

/// Environment variable naming the cqp executable.
pub const ENV_CQP_PATH: &str = "CQP_PATH";

/// Environment variable naming the corpus registry directory.
pub const ENV_REGISTRY: &str = "CORPUS_REGISTRY";

/// Default cap on stderr lines collected for one failed command.
pub const DEFAULT_MAX_ERROR_LINES: usize = 256;

/// How `undump` moves rows into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndumpStrategy {
    /// Stream the row count and rows over the command pipe.
    #[default]
    Pipe,
    /// Write a gzip interchange file and have the engine read it through
    /// a decompression pipe.
    File,
}

/// Configuration for a CQP client.
///
/// Use [`ClientConfig::builder()`] to create a new configuration.
#[derive(Clone)]
pub struct ClientConfig {
    // Process options
    pub(crate) cqp_path: Option<PathBuf>,
    pub(crate) registry: PathBuf,
    pub(crate) data_directory: Option<PathBuf>,
    pub(crate) extra_args: Vec<String>,
    pub(crate) working_directory: Option<PathBuf>,
    pub(crate) env_vars: HashMap<String, String>,
    pub(crate) inherit_env: bool,

    // Protocol options
    pub(crate) min_version: (u32, u32, u32),
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) error_grace: Duration,
    pub(crate) max_error_lines: usize,

    // Bulk transfer
    pub(crate) undump_strategy: UndumpStrategy,
    pub(crate) temp_dir: Option<PathBuf>,

    pub(crate) observer: Option<Arc<dyn EngineObserver>>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("cqp_path", &self.cqp_path)
            .field("registry", &self.registry)
            .field("data_directory", &self.data_directory)
            .field("extra_args", &self.extra_args)
            .field("working_directory", &self.working_directory)
            .field("inherit_env", &self.inherit_env)
            .field("min_version", &self.min_version)
            .field("read_timeout", &self.read_timeout)
            .field("error_grace", &self.error_grace)
            .field("max_error_lines", &self.max_error_lines)
            .field("undump_strategy", &self.undump_strategy)
            .field("temp_dir", &self.temp_dir)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl ClientConfig {
    /// Create a new builder for ClientConfig.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Get the registry directory.
    pub fn registry(&self) -> &PathBuf {
        &self.registry
    }

    /// Get the minimum engine version.
    pub fn min_version(&self) -> (u32, u32, u32) {
        self.min_version
    }

    /// Get the read timeout if set.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Get the undump strategy.
    pub fn undump_strategy(&self) -> UndumpStrategy {
        self.undump_strategy
    }

    /// Get the registered observer, if any.
    pub fn observer(&self) -> Option<&Arc<dyn EngineObserver>> {
        self.observer.as_ref()
    }

    /// Directory for interchange files.
    pub(crate) fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Get the cqp path, or default to "cqp".
    pub(crate) fn cqp_command(&self) -> &str {
        self.cqp_path
            .as_ref()
            .and_then(|p| p.to_str())
            .unwrap_or("cqp")
    }

    /// Arguments for child mode.
    pub(crate) fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            "-r".to_string(),
            self.registry.display().to_string(),
        ];
        if let Some(ref dir) = self.data_directory {
            args.push("-l".to_string());
            args.push(dir.display().to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Builder for [`ClientConfig`].
#[derive(Clone, Default)]
pub struct ClientConfigBuilder {
    cqp_path: Option<PathBuf>,
    registry: Option<PathBuf>,
    data_directory: Option<PathBuf>,
    extra_args: Vec<String>,
    working_directory: Option<PathBuf>,
    env_vars: HashMap<String, String>,
    inherit_env: Option<bool>,
    min_version: Option<(u32, u32, u32)>,
    read_timeout: Option<Duration>,
    error_grace: Option<Duration>,
    max_error_lines: Option<usize>,
    undump_strategy: UndumpStrategy,
    temp_dir: Option<PathBuf>,
    observer: Option<Arc<dyn EngineObserver>>,
}

impl fmt::Debug for ClientConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfigBuilder")
            .field("cqp_path", &self.cqp_path)
            .field("registry", &self.registry)
            .field("min_version", &self.min_version)
            .field("read_timeout", &self.read_timeout)
            .field("undump_strategy", &self.undump_strategy)
            .finish_non_exhaustive()
    }
}

impl ClientConfigBuilder {
    /// Fill the cqp path and registry from `CQP_PATH` and `CORPUS_REGISTRY`.
    ///
    /// Setters called afterwards override what was read here.
    pub fn from_env(mut self) -> Self {
        if let Ok(path) = std::env::var(ENV_CQP_PATH) {
            self.cqp_path = Some(path.into());
        }
        if let Ok(registry) = std::env::var(ENV_REGISTRY) {
            self.registry = Some(registry.into());
        }
        self
    }

    // -------------------------------------------------------------------------
    // Process options
    // -------------------------------------------------------------------------

    /// Path to the cqp binary (default: search PATH for "cqp").
    pub fn cqp_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cqp_path = Some(path.into());
        self
    }

    /// Corpus registry directory (required).
    pub fn registry(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry = Some(path.into());
        self
    }

    /// Directory where the engine keeps saved subcorpora.
    pub fn data_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_directory = Some(path.into());
        self
    }

    /// Extra command-line arguments for the engine.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Working directory for the engine process.
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(path.into());
        self
    }

    /// Add/override environment variable for the subprocess.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Don't inherit parent environment (default: inherit).
    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = Some(inherit);
        self
    }

    // -------------------------------------------------------------------------
    // Protocol options
    // -------------------------------------------------------------------------

    /// Minimum engine version; older engines log a warning at startup.
    pub fn min_version(mut self, major: u32, minor: u32, revision: u32) -> Self {
        self.min_version = Some((major, minor, revision));
        self
    }

    /// Give up on a reply line after this long.
    ///
    /// An expired read is fatal to the session. Default: wait forever.
    pub fn read_timeout(mut self, duration: Duration) -> Self {
        self.read_timeout = Some(duration);
        self
    }

    /// How long to wait for stderr after a reply has been fully read.
    ///
    /// Default: zero (poll only what has already arrived).
    pub fn error_grace(mut self, duration: Duration) -> Self {
        self.error_grace = Some(duration);
        self
    }

    /// Cap on stderr lines collected for one failed command.
    pub fn max_error_lines(mut self, max: usize) -> Self {
        self.max_error_lines = Some(max);
        self
    }

    // -------------------------------------------------------------------------
    // Bulk transfer
    // -------------------------------------------------------------------------

    /// How `undump` transfers rows.
    pub fn undump_strategy(mut self, strategy: UndumpStrategy) -> Self {
        self.undump_strategy = strategy;
        self
    }

    /// Directory for interchange files (default: OS temp dir).
    pub fn temp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(path.into());
        self
    }

    // -------------------------------------------------------------------------
    // Observer
    // -------------------------------------------------------------------------

    /// Observer for engine errors and progress.
    pub fn observer(mut self, observer: Arc<dyn EngineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    // -------------------------------------------------------------------------
    // Build
    // -------------------------------------------------------------------------

    /// Build the configuration.
    ///
    /// This validates:
    /// - A registry directory is configured
    /// - The working directory exists if set
    /// - The read timeout and error cap are non-zero
    ///
    /// The registry's readability and the executable are checked at connect
    /// time.
    pub fn build(self) -> Result<ClientConfig> {
        let registry = self
            .registry
            .ok_or_else(|| Error::InvalidConfig("registry directory is required".into()))?;

        if let Some(ref dir) = self.working_directory {
            if !dir.exists() {
                return Err(Error::InvalidConfig(format!(
                    "working directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        if self.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidConfig("read_timeout must be non-zero".into()));
        }

        let max_error_lines = self.max_error_lines.unwrap_or(DEFAULT_MAX_ERROR_LINES);
        if max_error_lines == 0 {
            return Err(Error::InvalidConfig("max_error_lines must be positive".into()));
        }

        Ok(ClientConfig {
            cqp_path: self.cqp_path,
            registry,
            data_directory: self.data_directory,
            extra_args: self.extra_args,
            working_directory: self.working_directory,
            env_vars: self.env_vars,
            inherit_env: self.inherit_env.unwrap_or(true),
            min_version: self.min_version.unwrap_or(MIN_ENGINE_VERSION),
            read_timeout: self.read_timeout,
            error_grace: self.error_grace.unwrap_or(Duration::ZERO),
            max_error_lines,
            undump_strategy: self.undump_strategy,
            temp_dir: self.temp_dir,
            observer: self.observer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ClientConfigBuilder {
        ClientConfigBuilder::default().registry("/corpora/registry")
    }

    #[test]
    fn registry_is_required() {
        let result = ClientConfigBuilder::default().build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn defaults() {
        let config = base().build().unwrap();
        assert_eq!(config.cqp_command(), "cqp");
        assert!(config.inherit_env);
        assert_eq!(config.min_version(), MIN_ENGINE_VERSION);
        assert_eq!(config.read_timeout(), None);
        assert_eq!(config.error_grace, Duration::ZERO);
        assert_eq!(config.max_error_lines, DEFAULT_MAX_ERROR_LINES);
        assert_eq!(config.undump_strategy(), UndumpStrategy::Pipe);
        assert_eq!(config.temp_dir(), std::env::temp_dir());
    }

    #[test]
    fn child_mode_args() {
        let config = base()
            .data_directory("/corpora/data")
            .extra_args(["-D", "BNC"])
            .build()
            .unwrap();

        assert_eq!(
            config.build_args(),
            vec!["-c", "-r", "/corpora/registry", "-l", "/corpora/data", "-D", "BNC"]
        );
    }

    #[test]
    fn custom_cqp_path() {
        let config = base().cqp_path("/usr/local/bin/cqp").build().unwrap();
        assert_eq!(config.cqp_command(), "/usr/local/bin/cqp");
    }

    #[test]
    fn invalid_working_directory() {
        let result = base()
            .working_directory("/nonexistent/path/that/does/not/exist")
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_timeout_rejected() {
        let result = base().read_timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_error_cap_rejected() {
        let result = base().max_error_lines(0).build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn min_version_override() {
        let config = base().min_version(3, 4, 10).build().unwrap();
        assert_eq!(config.min_version(), (3, 4, 10));
    }

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClientConfig>();
        assert_send_sync::<ClientConfigBuilder>();
    }
}
