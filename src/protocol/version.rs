//! Version banner parsing and comparison.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Minimum engine version expected by this client.
pub const MIN_ENGINE_VERSION: (u32, u32, u32) = (3, 0, 0);

/// Engine version, parsed once from the startup banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
    pub beta: bool,
    /// Anything after the version number, usually the compile date.
    pub compile_date: Option<String>,
    /// The banner line as printed.
    pub raw: String,
}

/// `NAME (word)* MAJOR.MINOR[.[b]REVISION] (rest)?`
fn banner_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\S+(?:\s+[^\d\s]\S*)*\s+(\d+)\.(\d+)(?:\.(b?)(\d+))?(?:\s+(.*?))?\s*$")
            .unwrap()
    })
}

impl EngineVersion {
    /// Parse a version banner such as `CQP version 3.4.33`.
    pub fn parse(banner: &str) -> Option<Self> {
        let raw = banner.trim_end();
        let caps = banner_pattern().captures(raw)?;

        let major = caps[1].parse().ok()?;
        let minor = caps[2].parse().ok()?;
        let revision = match caps.get(4) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        let beta = caps.get(3).is_some_and(|m| m.as_str() == "b");
        let compile_date = caps
            .get(5)
            .map(|m| m.as_str().to_string())
            .filter(|s| !s.is_empty());

        Some(Self {
            major,
            minor,
            revision,
            beta,
            compile_date,
            raw: raw.to_string(),
        })
    }

    /// The `(major, minor, revision)` triple.
    pub fn triple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.revision)
    }

    /// True if this version is at least `min`, comparing lexicographically.
    pub fn at_least(&self, min: (u32, u32, u32)) -> bool {
        self.triple().cmp(&min) != Ordering::Less
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let beta = if self.beta { "b" } else { "" };
        write!(f, "{}.{}.{}{}", self.major, self.minor, beta, self.revision)
    }
}

/// Render a version triple for messages.
pub(crate) fn format_triple(v: (u32, u32, u32)) -> String {
    format!("{}.{}.{}", v.0, v.1, v.2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_banner_formats() {
        let v = EngineVersion::parse("CQP version 3.4.33").expect("banner");
        assert_eq!(v.triple(), (3, 4, 33));
        assert!(!v.beta);
        assert_eq!(v.compile_date, None);

        let v = EngineVersion::parse("CQP 3.0").expect("banner");
        assert_eq!(v.triple(), (3, 0, 0));

        let v = EngineVersion::parse("CQP version 3.2.b41").expect("banner");
        assert_eq!(v.triple(), (3, 2, 41));
        assert!(v.beta);
    }

    #[test]
    fn parse_banner_with_compile_date() {
        let v = EngineVersion::parse("CQP version 3.5.0 (compiled Jan 10 2023)\n")
            .expect("banner");
        assert_eq!(v.triple(), (3, 5, 0));
        assert_eq!(v.compile_date.as_deref(), Some("(compiled Jan 10 2023)"));
        assert_eq!(v.raw, "CQP version 3.5.0 (compiled Jan 10 2023)");
    }

    #[test]
    fn reject_non_banners() {
        assert!(EngineVersion::parse("").is_none());
        assert!(EngineVersion::parse("CQP").is_none());
        assert!(EngineVersion::parse("3.4.33").is_none());
        assert!(EngineVersion::parse("CQP Error: no such corpus").is_none());
    }

    #[test]
    fn version_comparison() {
        let v = EngineVersion::parse("CQP version 3.4.10").unwrap();
        assert!(v.at_least((3, 4, 10)));
        assert!(v.at_least((3, 4, 9)));
        assert!(v.at_least((2, 99, 99)));
        assert!(!v.at_least((3, 4, 11)));
        assert!(!v.at_least((3, 5, 0)));
        assert!(!v.at_least((4, 0, 0)));
    }

    #[test]
    fn display_keeps_beta_marker() {
        assert_eq!(
            EngineVersion::parse("CQP version 3.2.b41").unwrap().to_string(),
            "3.2.b41"
        );
        assert_eq!(format_triple((3, 0, 0)), "3.0.0");
    }
}
