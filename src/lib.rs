//! # libcqp
//!
//! Async Rust client for the CQP corpus query engine.
//!
//! The engine runs as a long-lived `cqp -c` child process. This library
//! drives it over its three pipes and provides:
//! - Framed commands whose replies end exactly at an end-of-reply marker
//! - Locked execution of untrusted query text
//! - Unbuffered raw reads for very large replies
//! - Typed engine options
//! - Bulk row transfer (dump, undump, group, count)
//! - Transcoding between UTF-8 and legacy corpus charsets
//!
//! ## Quick Start
//!
//! ```ignore
//! use libcqp::{ClientConfig, CqpClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ClientConfig::builder().from_env().build()?;
//!     let mut cqp = CqpClient::connect(config).await?;
//!
//!     for corpus in cqp.list_corpora().await? {
//!         println!("{corpus}");
//!     }
//!     cqp.shutdown().await
//! }
//! ```
//!
//! ## Untrusted queries
//!
//! ```ignore
//! cqp.set_corpus("DICKENS").await?;
//! cqp.query(&format!("Hits = {user_query}")).await?;
//! let rows = cqp.dump("Hits", Some((0, 99))).await?;
//! ```
//!
//! ## Large replies
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let mut rows = cqp.dump_stream("Hits", None).await?;
//! while let Some(row) = rows.next().await {
//!     let row = row?;
//!     // ...
//! }
//! ```
//!
//! ## Errors
//!
//! Engine messages arrive on stderr and are returned as
//! [`Error::Engine`]; they also accumulate in
//! [`CqpClient::error_record`] until cleared. Framing failures are fatal and
//! poison the client.

pub mod bulk;
pub mod charset;
mod client;
pub mod config;
pub mod diagnostics;
mod error;
pub mod interchange;
pub mod observer;
pub mod process;
pub mod protocol;
mod session;
pub mod stream;

pub use error::{Error, ErrorRecord, QueryLockFailure, Result, Status};

// Re-export the main client types at crate root
pub use client::CqpClient;
pub use session::SharedEngine;

// Re-export commonly used config types at crate root
pub use config::{
    ClientConfig, ClientConfigBuilder, CqpOption, OptionKind, OptionValue, UndumpStrategy,
};

pub use bulk::{AttributeSpec, BulkRow, RowWidth};
pub use charset::Charset;
pub use diagnostics::{DiagnosticOptions, DiagnosticReport};
pub use interchange::{InterchangeFile, InterchangeState};
pub use observer::{EngineObserver, LogLevel, LoggingObserver};
pub use process::{EngineChannel, EngineProcess};
pub use protocol::{CorpusInfo, EngineVersion, ProgressUpdate};
pub use stream::ResponseLines;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}
    fn assert_send<T: Send>() {}

    /// Public types must be Send + Sync for use across async tasks.
    #[test]
    fn public_types_are_send_sync() {
        assert_send_sync::<SharedEngine>();

        // Configuration types
        assert_send_sync::<ClientConfig>();
        assert_send_sync::<ClientConfigBuilder>();
        assert_send_sync::<CqpOption>();
        assert_send_sync::<OptionValue>();

        // Protocol and data types
        assert_send_sync::<EngineVersion>();
        assert_send_sync::<CorpusInfo>();
        assert_send_sync::<ProgressUpdate>();
        assert_send_sync::<Charset>();
        assert_send_sync::<AttributeSpec>();
        assert_send_sync::<DiagnosticReport>();
        assert_send_sync::<ErrorRecord>();

        // Error type
        assert_send_sync::<Error>();
    }

    /// The client and the interchange file own pipes or file handles and are
    /// Send only.
    #[test]
    fn owning_types_are_send() {
        assert_send::<CqpClient>();
        assert_send::<EngineProcess>();
        assert_send::<InterchangeFile>();
    }
}
