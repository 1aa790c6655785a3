//! Structured multi-row exchanges: dump, undump, group, count.
//!
//! Rows are tab-separated integer corpus positions:
//!
//! ```text
//! match   matchend   [target   [keyword]]
//! 1042    1044       1043
//! ```
//!
//! Undefined positions are `-1`. Every row of one transfer has the same
//! width.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use futures::{Stream, StreamExt};
use regex::Regex;

use crate::client::CqpClient;
use crate::config::UndumpStrategy;
use crate::interchange::InterchangeFile;
use crate::process::EngineChannel;
use crate::protocol::split_row;
use crate::{Error, Result};

/// Engine version that accepts `with target keyword` in `undump`.
pub const KEYWORD_UNDUMP_VERSION: (u32, u32, u32) = (3, 4, 0);

/// Engine version that supports piping `dump` output into a shell command.
pub const PIPE_REDIRECT_VERSION: (u32, u32, u32) = (3, 0, 0);

/// A row of corpus positions.
pub type BulkRow = Vec<i64>;

/// Number of columns in a bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowWidth {
    /// `match matchend`
    Two,
    /// `match matchend target`
    Three,
    /// `match matchend target keyword`
    Four,
}

impl RowWidth {
    pub fn columns(self) -> usize {
        match self {
            RowWidth::Two => 2,
            RowWidth::Three => 3,
            RowWidth::Four => 4,
        }
    }

    pub fn from_columns(columns: usize) -> Option<Self> {
        match columns {
            2 => Some(RowWidth::Two),
            3 => Some(RowWidth::Three),
            4 => Some(RowWidth::Four),
            _ => None,
        }
    }

    /// Check that all rows share one supported width.
    ///
    /// An empty row set counts as two columns.
    pub fn of_rows<R: AsRef<[i64]>>(rows: &[R]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Ok(RowWidth::Two);
        };
        let columns = first.as_ref().len();
        let width = Self::from_columns(columns).ok_or_else(|| {
            Error::InvalidRowWidth(format!("rows must have 2 to 4 columns, got {columns}"))
        })?;
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.as_ref().len() != columns)
        {
            return Err(Error::InvalidRowWidth(format!(
                "row {index} has {} columns, expected {columns}",
                row.as_ref().len()
            )));
        }
        Ok(width)
    }

    fn undump_suffix(self) -> &'static str {
        match self {
            RowWidth::Two => "",
            RowWidth::Three => " with target",
            RowWidth::Four => " with target keyword",
        }
    }
}

/// A validated `anchor.attribute` specifier, e.g. `matchend.lemma`.
///
/// Anchors are `match`, `matchend`, `keyword`, `target` and `target0` to
/// `target9`; attribute names are word characters and hyphens. Nothing else
/// can reach the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    anchor: String,
    attribute: String,
}

fn specifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(match|matchend|target[0-9]?|keyword)\.([A-Za-z0-9_\-]+)$").unwrap()
    })
}

impl AttributeSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let caps = specifier_pattern()
            .captures(spec)
            .ok_or_else(|| Error::InvalidSpecifier(spec.to_string()))?;
        Ok(Self {
            anchor: caps[1].to_string(),
            attribute: caps[2].to_string(),
        })
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }
}

impl fmt::Display for AttributeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.anchor, self.attribute)
    }
}

impl std::str::FromStr for AttributeSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_\-]*:)?[A-Za-z_][A-Za-z0-9_\-]*$").unwrap()
    })
}

/// Check a corpus, subcorpus or `CORPUS:Name` identifier.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// Render a path for use inside a double-quoted engine string.
fn command_path(path: &Path) -> Result<&str> {
    path.to_str()
        .filter(|p| !p.is_empty() && !p.contains(['"', '\'', '\n', '\r']))
        .ok_or_else(|| Error::InvalidPath(path.to_path_buf()))
}

fn join_row(row: &[i64]) -> String {
    row.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join("\t")
}

fn parse_row(line: &str) -> Result<BulkRow> {
    split_row(line)
        .into_iter()
        .map(|field| field.trim().parse::<i64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::MalformedReply {
            line: line.to_string(),
        })
}

fn dump_command(scope: &str, range: Option<(u64, u64)>) -> String {
    match range {
        Some((from, to)) => format!("dump {scope} {from} {to}"),
        None => format!("dump {scope}"),
    }
}

/// Shell redirect that decompresses a gzip file for the engine.
fn gunzip_source(path: &str) -> String {
    format!("\"gzip -cd '{path}' |\"")
}

impl<C: EngineChannel> CqpClient<C> {
    /// Read rows of a named result, optionally limited to `from..=to`.
    pub async fn dump(&mut self, scope: &str, range: Option<(u64, u64)>) -> Result<Vec<BulkRow>> {
        let checked = validate_name(scope);
        self.track(checked)?;
        let lines = self.execute(&dump_command(scope, range)).await?;
        let rows = lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| parse_row(line))
            .collect();
        self.track(rows)
    }

    /// Stream rows of a named result without collecting them.
    pub async fn dump_stream(
        &mut self,
        scope: &str,
        range: Option<(u64, u64)>,
    ) -> Result<impl Stream<Item = Result<BulkRow>> + Send + '_> {
        let checked = validate_name(scope);
        self.track(checked)?;
        let lines = self.execute_lines(&dump_command(scope, range)).await?;
        Ok(lines
            .into_stream()
            .filter(|line| {
                let keep = !matches!(line, Ok(l) if l.trim().is_empty());
                async move { keep }
            })
            .map(|line| line.and_then(|l| parse_row(&l))))
    }

    /// Have the engine write rows straight to `path`.
    pub async fn dump_file(
        &mut self,
        scope: &str,
        path: &Path,
        range: Option<(u64, u64)>,
    ) -> Result<()> {
        let checked = validate_name(scope).and_then(|()| command_path(path));
        let target = self.track(checked)?;
        let command = format!("{} > \"{target}\"", dump_command(scope, range));
        self.execute(&command).await.map(|_| ())
    }

    /// Create or replace a named result from rows.
    ///
    /// The transfer strategy follows
    /// [`ClientConfig::undump_strategy`](crate::ClientConfig::undump_strategy).
    pub async fn undump<R>(&mut self, scope: &str, rows: &[R]) -> Result<()>
    where
        R: AsRef<[i64]> + Sync,
    {
        let checked = validate_name(scope).and_then(|()| RowWidth::of_rows(rows));
        let width = self.track(checked)?;
        if width == RowWidth::Four {
            let supported = self.require_version("undump with keyword", KEYWORD_UNDUMP_VERSION);
            self.track(supported)?;
        }

        match self.config().undump_strategy() {
            UndumpStrategy::Pipe => self.undump_pipe(scope, width, rows).await,
            UndumpStrategy::File => self.undump_via_file(scope, width, rows).await,
        }
    }

    async fn undump_pipe<R: AsRef<[i64]>>(
        &mut self,
        scope: &str,
        width: RowWidth,
        rows: &[R],
    ) -> Result<()> {
        let streamed = self.stream_rows(scope, width, rows).await;
        if streamed.is_err() && self.has_open_frame() && !self.is_poisoned() {
            // Close the frame so the engine and the client agree again.
            match self.raw_execute("", false).await {
                Ok(()) => {
                    if let Err(e) = self.raw_discard().await {
                        tracing::debug!(error = %e, "could not discard reply of aborted undump");
                    }
                }
                Err(e) => tracing::debug!(error = %e, "could not close aborted undump frame"),
            }
        }
        streamed?;

        while self.raw_read().await?.is_some() {}
        Ok(())
    }

    async fn stream_rows<R: AsRef<[i64]>>(
        &mut self,
        scope: &str,
        width: RowWidth,
        rows: &[R],
    ) -> Result<()> {
        self.raw_execute(&format!("undump {scope}{} ", width.undump_suffix()), true)
            .await?;
        self.raw_write(&rows.len().to_string()).await?;
        for row in rows {
            self.raw_write(&join_row(row.as_ref())).await?;
        }
        self.raw_execute("", false).await
    }

    async fn undump_via_file<R: AsRef<[i64]>>(
        &mut self,
        scope: &str,
        width: RowWidth,
        rows: &[R],
    ) -> Result<()> {
        let written = self.write_interchange(rows);
        let mut file = self.track(written)?;
        let source = command_path(file.path()).map(gunzip_source);
        let source = self.track(source)?;

        self.execute(&format!("undump {scope}{} < {source}", width.undump_suffix()))
            .await?;
        let closed = file.close();
        self.track(closed)
    }

    fn write_interchange<R: AsRef<[i64]>>(&self, rows: &[R]) -> Result<InterchangeFile> {
        let mut file = InterchangeFile::create(&self.config().temp_dir(), true)?;
        file.write_line(&rows.len().to_string())?;
        for row in rows {
            file.write_line(&join_row(row.as_ref()))?;
        }
        file.finish()?;
        Ok(file)
    }

    /// Create or replace a named result from an existing row file.
    ///
    /// The file holds the row count on its first line. Files ending in `.gz`
    /// are decompressed through a shell redirect.
    pub async fn undump_file(&mut self, scope: &str, path: &Path, width: RowWidth) -> Result<()> {
        let checked = validate_name(scope).and_then(|()| command_path(path));
        let target = self.track(checked)?;
        if width == RowWidth::Four {
            let supported = self.require_version("undump with keyword", KEYWORD_UNDUMP_VERSION);
            self.track(supported)?;
        }

        let source = if target.ends_with(".gz") {
            gunzip_source(target)
        } else {
            format!("\"{target}\"")
        };
        self.execute(&format!("undump {scope}{} < {source}", width.undump_suffix()))
            .await
            .map(|_| ())
    }

    /// Frequency table of one attribute, or of a pair of attributes.
    ///
    /// Sends `group Q anchor attr [by anchor attr]`. Each returned row holds
    /// the tab-separated fields of one reply line.
    pub async fn group(
        &mut self,
        scope: &str,
        spec: &str,
        by: Option<&str>,
    ) -> Result<Vec<Vec<String>>> {
        let checked = validate_name(scope).and_then(|()| {
            let target = AttributeSpec::parse(spec)?;
            let by = by.map(AttributeSpec::parse).transpose()?;
            Ok((target, by))
        });
        let (target, by) = self.track(checked)?;

        let mut command = format!("group {scope} {} {}", target.anchor, target.attribute);
        if let Some(by) = by {
            command.push_str(&format!(" by {} {}", by.anchor, by.attribute));
        }
        let lines = self.execute(&command).await?;
        Ok(split_lines(lines))
    }

    /// Frequency of attribute values at an anchor.
    ///
    /// Sends `count Q by attr on anchor`.
    pub async fn count(&mut self, scope: &str, spec: &str) -> Result<Vec<Vec<String>>> {
        let checked = validate_name(scope).and_then(|()| AttributeSpec::parse(spec));
        let spec = self.track(checked)?;

        let command = format!("count {scope} by {} on {}", spec.attribute, spec.anchor);
        let lines = self.execute(&command).await?;
        Ok(split_lines(lines))
    }

    /// Longest match (`matchend - match + 1`) in a named result.
    ///
    /// The reduction runs in a shell pipeline on the engine side, so no rows
    /// are transferred. An empty result gives 0.
    pub async fn max_range(&mut self, scope: &str) -> Result<u64> {
        let checked = validate_name(scope)
            .and_then(|()| self.require_version("max_range", PIPE_REDIRECT_VERSION));
        self.track(checked)?;

        let command =
            format!("dump {scope} > \"| awk '{{ print $2 - $1 + 1 }}' | sort -nr | head -1\"");
        let lines = self.execute(&command).await?;
        let Some(first) = lines.iter().map(|l| l.trim()).find(|l| !l.is_empty()) else {
            return Ok(0);
        };
        let parsed = first.parse::<u64>().map_err(|_| Error::MalformedReply {
            line: first.to_string(),
        });
        self.track(parsed)
    }
}

fn split_lines(lines: Vec<String>) -> Vec<Vec<String>> {
    lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| split_row(line).into_iter().map(str::to_string).collect())
        .collect()
}
