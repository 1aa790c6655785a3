//! Type-safe registry of engine options.
//!
//! Option values are never cached client-side: every read goes back to the
//! engine, so the registry only records each option's name and value type.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Value reported for string options that are unset.
pub const NO_VALUE: &str = "<no value>";

/// Value reported for string options left at the built-in default.
pub const DEFAULT_VALUE: &str = "<default>";

/// What `<default>` stands for: the attribute separator printed between
/// token attributes.
pub const DEFAULT_ATTRIBUTE_SEPARATOR: &str = "/";

/// Declared value type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Bool,
    Int,
    String,
    Enum,
    Context,
}

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Enum(String),
    /// Context width, e.g. `20 words` or `s`.
    Context(String),
}

impl OptionValue {
    /// The kind this value is valid for.
    pub fn kind(&self) -> OptionKind {
        match self {
            OptionValue::Bool(_) => OptionKind::Bool,
            OptionValue::Int(_) => OptionKind::Int,
            OptionValue::Str(_) => OptionKind::String,
            OptionValue::Enum(_) => OptionKind::Enum,
            OptionValue::Context(_) => OptionKind::Context,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        OptionValue::Bool(b)
    }
}

impl From<i64> for OptionValue {
    fn from(n: i64) -> Self {
        OptionValue::Int(n)
    }
}

/// The closed set of engine options this client can get and set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CqpOption {
    AutoShow,
    AutoSubquery,
    Context,
    LeftContext,
    RightContext,
    DataDirectory,
    Registry,
    ExternalSort,
    ExternalSortCommand,
    HardBoundary,
    HardCut,
    LeftKwicDelim,
    RightKwicDelim,
    MatchingStrategy,
    Optimize,
    PrettyPrint,
    PrintMode,
    PrintOptions,
    PrintStructures,
    ProgressBar,
    ShowTagAttributes,
    StrictRegions,
    SubCorpusDirectory,
    Timing,
}

impl CqpOption {
    /// Every registered option.
    pub const ALL: [CqpOption; 24] = [
        CqpOption::AutoShow,
        CqpOption::AutoSubquery,
        CqpOption::Context,
        CqpOption::LeftContext,
        CqpOption::RightContext,
        CqpOption::DataDirectory,
        CqpOption::Registry,
        CqpOption::ExternalSort,
        CqpOption::ExternalSortCommand,
        CqpOption::HardBoundary,
        CqpOption::HardCut,
        CqpOption::LeftKwicDelim,
        CqpOption::RightKwicDelim,
        CqpOption::MatchingStrategy,
        CqpOption::Optimize,
        CqpOption::PrettyPrint,
        CqpOption::PrintMode,
        CqpOption::PrintOptions,
        CqpOption::PrintStructures,
        CqpOption::ProgressBar,
        CqpOption::ShowTagAttributes,
        CqpOption::StrictRegions,
        CqpOption::SubCorpusDirectory,
        CqpOption::Timing,
    ];

    /// The option's name as the engine spells it.
    pub fn name(self) -> &'static str {
        match self {
            CqpOption::AutoShow => "AutoShow",
            CqpOption::AutoSubquery => "AutoSubquery",
            CqpOption::Context => "Context",
            CqpOption::LeftContext => "LeftContext",
            CqpOption::RightContext => "RightContext",
            CqpOption::DataDirectory => "DataDirectory",
            CqpOption::Registry => "Registry",
            CqpOption::ExternalSort => "ExternalSort",
            CqpOption::ExternalSortCommand => "ExternalSortCommand",
            CqpOption::HardBoundary => "HardBoundary",
            CqpOption::HardCut => "HardCut",
            CqpOption::LeftKwicDelim => "LeftKWICDelim",
            CqpOption::RightKwicDelim => "RightKWICDelim",
            CqpOption::MatchingStrategy => "MatchingStrategy",
            CqpOption::Optimize => "Optimize",
            CqpOption::PrettyPrint => "PrettyPrint",
            CqpOption::PrintMode => "PrintMode",
            CqpOption::PrintOptions => "PrintOptions",
            CqpOption::PrintStructures => "PrintStructures",
            CqpOption::ProgressBar => "ProgressBar",
            CqpOption::ShowTagAttributes => "ShowTagAttributes",
            CqpOption::StrictRegions => "StrictRegions",
            CqpOption::SubCorpusDirectory => "SubCorpusDirectory",
            CqpOption::Timing => "Timing",
        }
    }

    /// Declared value type.
    pub fn kind(self) -> OptionKind {
        match self {
            CqpOption::AutoShow
            | CqpOption::AutoSubquery
            | CqpOption::ExternalSort
            | CqpOption::Optimize
            | CqpOption::PrettyPrint
            | CqpOption::ProgressBar
            | CqpOption::ShowTagAttributes
            | CqpOption::StrictRegions
            | CqpOption::Timing => OptionKind::Bool,
            CqpOption::HardBoundary | CqpOption::HardCut => OptionKind::Int,
            CqpOption::Context | CqpOption::LeftContext | CqpOption::RightContext => {
                OptionKind::Context
            }
            CqpOption::MatchingStrategy | CqpOption::PrintMode => OptionKind::Enum,
            CqpOption::DataDirectory
            | CqpOption::Registry
            | CqpOption::ExternalSortCommand
            | CqpOption::LeftKwicDelim
            | CqpOption::RightKwicDelim
            | CqpOption::PrintOptions
            | CqpOption::PrintStructures
            | CqpOption::SubCorpusDirectory => OptionKind::String,
        }
    }

    /// Pattern an enum value must match after lower-casing.
    fn enum_pattern(self) -> Option<&'static Regex> {
        static MATCHING: OnceLock<Regex> = OnceLock::new();
        static PRINT_MODE: OnceLock<Regex> = OnceLock::new();
        match self {
            CqpOption::MatchingStrategy => Some(MATCHING.get_or_init(|| {
                Regex::new(r"^(traditional|shortest|standard|longest)$").unwrap()
            })),
            CqpOption::PrintMode => Some(
                PRINT_MODE.get_or_init(|| Regex::new(r"^(ascii|sgml|html|latex)$").unwrap()),
            ),
            _ => None,
        }
    }

    /// Look up an option by name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|opt| opt.name().eq_ignore_ascii_case(name))
    }

    fn invalid(self, reason: impl Into<String>) -> Error {
        Error::InvalidOption {
            option: self.name().to_string(),
            reason: reason.into(),
        }
    }

    /// Render the `set` statement for `value`, validating it first.
    pub fn set_command(self, value: &OptionValue) -> Result<String> {
        if value.kind() != self.kind() {
            return Err(self.invalid(format!(
                "expected {:?} value, got {:?}",
                self.kind(),
                value.kind()
            )));
        }

        let rendered = match value {
            OptionValue::Bool(b) => (if *b { "on" } else { "off" }).to_string(),
            OptionValue::Int(n) => n.to_string(),
            OptionValue::Enum(v) => {
                let v = v.to_lowercase();
                let valid = self.enum_pattern().is_some_and(|p| p.is_match(&v));
                if !valid {
                    return Err(self.invalid(format!("{v:?} is not an accepted value")));
                }
                v
            }
            OptionValue::Str(s) | OptionValue::Context(s) => quote_literal(s),
        };

        Ok(format!("set {} {}", self.name(), rendered))
    }

    /// Decode the value printed in the engine's option dump.
    ///
    /// Returns `None` for values that cannot be read as this option's type,
    /// and for unset string options.
    pub fn decode(self, raw: &str) -> Option<OptionValue> {
        let raw = raw.trim();
        match self.kind() {
            OptionKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "yes" | "on" => Some(OptionValue::Bool(true)),
                "no" | "off" => Some(OptionValue::Bool(false)),
                _ => None,
            },
            OptionKind::Int => raw.parse().ok().map(OptionValue::Int),
            OptionKind::Enum => Some(OptionValue::Enum(raw.to_string())),
            OptionKind::String | OptionKind::Context => {
                let text = match raw {
                    NO_VALUE => return None,
                    DEFAULT_VALUE => DEFAULT_ATTRIBUTE_SEPARATOR.to_string(),
                    other => other.to_string(),
                };
                Some(match self.kind() {
                    OptionKind::Context => OptionValue::Context(text),
                    _ => OptionValue::Str(text),
                })
            }
        }
    }
}

impl fmt::Display for CqpOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Double-quote a string literal, backslash-escaping quotes and backslashes.
pub fn quote_literal(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
