//! Process management for the CQP engine.
//!
//! One long-lived `cqp -c` process serves every command of a client. The
//! client talks to it through three pipes:
//!
//! ```text
//! libcqp                              cqp -c -r <registry>
//! ┌──────────────┐                   ┌──────────────┐
//! │ EngineProcess│──stdin (stmts)───▶│              │
//! │              │◀─stdout (reply)───│              │
//! │              │◀─stderr (errors)──│              │
//! └──────────────┘                   └──────────────┘
//! ```
//!
//! The transport is abstracted by [`EngineChannel`] so the protocol layer can
//! be exercised against scripted engines.

mod io;
mod spawn;

pub use io::{EngineChannel, EngineReader, EngineWriter, StderrCollector};
pub use spawn::EngineProcess;
