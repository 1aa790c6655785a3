//! Parsers for structured replies: option dumps, `info`, tab-separated rows.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::charset::Charset;

/// Corpus properties recovered from `info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusInfo {
    pub name: String,
    /// Size in tokens, if reported.
    pub size: Option<u64>,
    pub charset: Charset,
}

/// Option dump lines: `  NAME = VALUE` or `[ NAME = VALUE`.
fn option_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:\s+|\[\s*)([A-Za-z][A-Za-z0-9]*)\s*=\s*(.*?)\s*\]?\s*$").unwrap()
    })
}

/// If `line` is the dump line for `name`, return its value.
pub fn parse_option_line<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let caps = option_line_pattern().captures(line)?;
    if !caps[1].eq_ignore_ascii_case(name) {
        return None;
    }
    caps.get(2).map(|m| m.as_str())
}

fn leading_number(s: &str) -> Option<u64> {
    let digits: String = s
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| *c != ',')
        .collect();
    digits.parse().ok()
}

/// Parse `info` output (`Corpus:`, `Size:`, `Charset:` lines).
///
/// Returns `None` if no `Corpus:` line is present. A missing `Charset:` line
/// means UTF-8.
pub fn parse_corpus_info<S: AsRef<str>>(lines: &[S]) -> Option<CorpusInfo> {
    let mut name = None;
    let mut size = None;
    let mut charset = Charset::Utf8;

    for line in lines {
        let line = line.as_ref().trim();
        if let Some(rest) = line.strip_prefix("Corpus:") {
            name = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("Size:") {
            size = leading_number(rest);
        } else if let Some(rest) = line.strip_prefix("Charset:") {
            charset = Charset::from_label(rest.trim());
        }
    }

    name.map(|name| CorpusInfo {
        name,
        size,
        charset,
    })
}

/// Split a tab-separated reply line into fields.
pub fn split_row(line: &str) -> Vec<&str> {
    line.split('\t').collect()
}
