//! Command normalization and framing.

use super::{EMIT_END_OF_REPLY, EOL};

/// Collapse a command onto one line.
///
/// Runs of whitespace become single spaces, and trailing `;` separators are
/// removed; the framing adds exactly one back.
pub fn normalize_command(command: &str) -> String {
    let collapsed = command.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

/// Frame an already-encoded command so the engine terminates its reply.
///
/// Produces `<command>;\n.EOL.;\n`. An empty command yields only the
/// end-of-reply request, which closes a frame left open by a raw command.
pub fn frame_command(command: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(command.len() + 16);
    if !command.is_empty() {
        framed.extend_from_slice(command);
        framed.push(b';');
        framed.extend_from_slice(EOL.as_bytes());
    }
    framed.extend_from_slice(EMIT_END_OF_REPLY.as_bytes());
    framed.push(b';');
    framed.extend_from_slice(EOL.as_bytes());
    framed
}

/// Frame a command without the end-of-reply request.
pub fn frame_open_command(command: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(command.len() + 2);
    framed.extend_from_slice(command);
    framed.push(b';');
    framed.extend_from_slice(EOL.as_bytes());
    framed
}

/// A bare data line (no statement terminator), as read by `undump`.
pub fn encode_data_line(line: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(line.len() + 1);
    framed.extend_from_slice(line);
    framed.extend_from_slice(EOL.as_bytes());
    framed
}
