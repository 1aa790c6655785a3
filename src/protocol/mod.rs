//! The CQP child-mode line protocol.
//!
//! CQP started with `-c` reads `;`-terminated statements from stdin and writes
//! plain text lines to stdout. Replies carry no length prefix, so every
//! command is followed by a second statement, `.EOL.`, that makes the engine
//! print a fixed marker line once the first statement has finished:
//!
//! ```text
//! client                             cqp -c
//! ┌──────────┐  "show corpora;\n"    ┌──────────┐
//! │          │  ".EOL.;\n"     ─────▶│          │
//! │          │◀──── "BNC"            │          │
//! │          │◀──── "DICKENS"        │          │
//! │          │◀──── "-::-EOL-::-"    │          │
//! │          │◀─ stderr: errors ─────│          │
//! └──────────┘                       └──────────┘
//! ```
//!
//! Errors are never framed; they arrive out of band on stderr.

mod frame;
mod progress;
mod reply;
mod version;

pub use frame::{encode_data_line, frame_command, frame_open_command, normalize_command};
pub use progress::ProgressUpdate;
pub use reply::{parse_corpus_info, parse_option_line, split_row, CorpusInfo};
pub(crate) use version::format_triple;
pub use version::{EngineVersion, MIN_ENGINE_VERSION};

/// Statement that asks the engine to print [`END_OF_REPLY`].
pub const EMIT_END_OF_REPLY: &str = ".EOL.";

/// Marker line printed by the engine in response to [`EMIT_END_OF_REPLY`].
pub const END_OF_REPLY: &str = "-::-EOL-::-";

/// Prefix of progress-bar lines in child mode.
pub const PROGRESS_PREFIX: &str = "-::-PROGRESS-::-";

/// Line terminator used on the command pipe.
pub const EOL: &str = "\n";

/// Statement that terminates the engine.
pub const EXIT_COMMAND: &str = "exit";

/// Classification of one stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// The end-of-reply marker.
    EndOfReply,
    /// A progress-bar line.
    Progress(&'a [u8]),
    /// A payload line.
    Data(&'a [u8]),
}

/// Strip the line terminator and classify a raw stdout line.
pub fn classify(line: &[u8]) -> LineKind<'_> {
    let line = strip_eol(line);
    if line == END_OF_REPLY.as_bytes() {
        LineKind::EndOfReply
    } else if line.starts_with(PROGRESS_PREFIX.as_bytes()) {
        LineKind::Progress(line)
    } else {
        LineKind::Data(line)
    }
}

/// Remove a trailing `\n` or `\r\n`.
pub fn strip_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
