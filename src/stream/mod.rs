//! Sentinel-terminated reply sequences.
//!
//! Every framed command yields a [`ResponseLines`]: a one-shot sequence of
//! decoded reply lines that ends exactly at the engine's end-of-reply marker.
//! Progress lines never appear in it, and the marker itself is consumed by
//! the sequence, so callers cannot read past the end of their own reply.
//!
//! # Example
//!
//! ```ignore
//! let mut lines = client.execute_lines("cat Last").await?;
//! while let Some(line) = lines.next().await {
//!     println!("{}", line?);
//! }
//! ```
//!
//! # Early drop
//!
//! Dropping a [`ResponseLines`] before it is exhausted leaves the rest of the
//! reply in the pipe; the client discards it before the next command.

mod lines;

pub use lines::ResponseLines;
