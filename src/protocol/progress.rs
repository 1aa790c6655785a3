//! Progress-bar lines.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::PROGRESS_PREFIX;

/// One progress report from the engine.
///
/// Lines look like `-::-PROGRESS-::-\t<pass>\t<total>\t<message>`, where the
/// message may embed `NN% complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub pass: u32,
    pub total: u32,
    pub message: String,
    pub percent: Option<u8>,
}

fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{1,3})% complete").unwrap())
}

impl ProgressUpdate {
    /// Parse a progress line (terminator already stripped).
    ///
    /// Returns `None` if the line does not carry the progress prefix. Missing
    /// or non-numeric counters read as zero.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split('\t');
        if fields.next()? != PROGRESS_PREFIX {
            return None;
        }
        let pass = fields.next().and_then(|f| f.trim().parse().ok()).unwrap_or(0);
        let total = fields.next().and_then(|f| f.trim().parse().ok()).unwrap_or(0);
        let message = fields.collect::<Vec<_>>().join("\t");
        let percent = percent_pattern()
            .captures(&message)
            .and_then(|c| c[1].parse::<u8>().ok())
            .filter(|p| *p <= 100);

        Some(Self {
            pass,
            total,
            message,
            percent,
        })
    }
}
