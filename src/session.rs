//! One engine shared between tasks.
//!
//! A [`CqpClient`] admits one command at a time. [`SharedEngine`] puts it
//! behind an async mutex so several tasks can take turns, each command
//! holding the lock until its reply has been read to the end marker.
//!
//! # Example
//!
//! ```ignore
//! use libcqp::{ClientConfig, SharedEngine};
//!
//! let engine = SharedEngine::connect(config).await?;
//!
//! let a = engine.clone();
//! let task = tokio::spawn(async move { a.query("A = [word=\"fog\"]").await });
//! let corpora = engine.execute("show corpora").await?;
//! task.await??;
//!
//! // Several commands without interleaving
//! let mut cqp = engine.lock().await;
//! cqp.set_corpus("DICKENS").await?;
//! let hits = cqp.size("A").await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::client::CqpClient;
use crate::config::{ClientConfig, CqpOption, OptionValue};
use crate::process::{EngineChannel, EngineProcess};
use crate::Result;

/// A cloneable handle to one engine.
///
/// # Thread Safety
///
/// `SharedEngine` is `Send + Sync`. Commands issued through it are
/// serialized; a caller holding [`lock`](Self::lock) keeps every other
/// caller waiting until the guard is dropped.
pub struct SharedEngine<C: EngineChannel = EngineProcess> {
    inner: Arc<Shared<C>>,
}

struct Shared<C: EngineChannel> {
    client: Mutex<CqpClient<C>>,
    /// Commands sent through this handle and its clones.
    commands: AtomicU64,
}

impl SharedEngine<EngineProcess> {
    /// Spawn an engine and wrap it.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Ok(Self::new(CqpClient::connect(config).await?))
    }
}

impl<C: EngineChannel> SharedEngine<C> {
    pub fn new(client: CqpClient<C>) -> Self {
        Self {
            inner: Arc::new(Shared {
                client: Mutex::new(client),
                commands: AtomicU64::new(0),
            }),
        }
    }

    /// Take exclusive use of the client.
    pub async fn lock(&self) -> MutexGuard<'_, CqpClient<C>> {
        self.inner.client.lock().await
    }

    /// Number of commands issued through [`execute`](Self::execute),
    /// [`query`](Self::query) and the option helpers.
    pub fn command_count(&self) -> u64 {
        self.inner.commands.load(Ordering::Relaxed)
    }

    fn count(&self) {
        self.inner.commands.fetch_add(1, Ordering::Relaxed);
    }

    /// See [`CqpClient::execute`].
    pub async fn execute(&self, command: &str) -> Result<Vec<String>> {
        let mut client = self.lock().await;
        self.count();
        client.execute(command).await
    }

    /// See [`CqpClient::query`].
    pub async fn query(&self, command: &str) -> Result<Vec<String>> {
        let mut client = self.lock().await;
        self.count();
        client.query(command).await
    }

    /// See [`CqpClient::get_option`].
    pub async fn get_option(&self, option: CqpOption) -> Result<Option<OptionValue>> {
        let mut client = self.lock().await;
        self.count();
        client.get_option(option).await
    }

    /// See [`CqpClient::set_option`].
    pub async fn set_option(&self, option: CqpOption, value: OptionValue) -> Result<()> {
        let mut client = self.lock().await;
        self.count();
        client.set_option(option, value).await
    }

    /// Shut the engine down. Later calls through any clone fail with
    /// [`Error::SessionClosed`](crate::Error::SessionClosed).
    pub async fn shutdown(&self) -> Result<()> {
        self.lock().await.shutdown().await
    }
}

impl<C: EngineChannel> Clone for SharedEngine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: EngineChannel> std::fmt::Debug for SharedEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEngine")
            .field("commands", &self.command_count())
            .field("handles", &Arc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}
