//! Observation of engine errors and progress.
//!
//! The engine reports failures out of band on stderr and, when the
//! ProgressBar option is on, interleaves progress lines with query output.
//! Neither belongs in a command's result, so both are routed to an
//! [`EngineObserver`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use libcqp::{CqpClient, EngineObserver, ProgressUpdate};
//!
//! struct Percent;
//!
//! impl EngineObserver for Percent {
//!     fn on_progress(&self, update: &ProgressUpdate) {
//!         if let Some(p) = update.percent {
//!             println!("pass {}/{}: {}%", update.pass, update.total, p);
//!         }
//!     }
//! }
//!
//! client.set_progress_observer(Some(Arc::new(Percent))).await?;
//! ```

mod logging;

pub use logging::{EngineObserver, LogLevel, LoggingObserver};
