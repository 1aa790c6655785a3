//! Preflight checks for operators.
//!
//! [`run`] starts the engine, performs one round trip and shuts it down
//! again, checking every step on the way. It talks to the process through
//! `tokio::process` directly rather than through
//! [`EngineProcess`](crate::process::EngineProcess), so a broken client
//! layer cannot hide a working engine or the other way round.
//!
//! The first failed check stops the run. Cleanup (send `exit`, close the
//! pipes, reap the process) happens whatever failed.
//!
//! ```ignore
//! let report = libcqp::diagnostics::run(DiagnosticOptions::new("/corpora/registry")).await;
//! println!("{report}");
//! if !report.passed() {
//!     std::process::exit(1);
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::protocol::{
    frame_command, frame_open_command, strip_eol, EngineVersion, END_OF_REPLY, EXIT_COMMAND,
    MIN_ENGINE_VERSION,
};

/// What to check.
#[derive(Debug, Clone)]
pub struct DiagnosticOptions {
    /// Executable name or path. Bare names are looked up on `PATH`.
    pub cqp_path: PathBuf,
    pub registry: PathBuf,
    pub min_version: (u32, u32, u32),
    /// Command used for the round trip.
    pub command: String,
    /// Limit for every single read.
    pub read_timeout: Duration,
}

impl DiagnosticOptions {
    pub fn new(registry: impl Into<PathBuf>) -> Self {
        Self {
            cqp_path: PathBuf::from("cqp"),
            registry: registry.into(),
            min_version: MIN_ENGINE_VERSION,
            command: "show corpora".to_string(),
            read_timeout: Duration::from_secs(10),
        }
    }

    pub fn cqp_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cqp_path = path.into();
        self
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub check: String,
    pub passed: bool,
    pub detail: String,
}

/// All checks that ran, in order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticReport {
    pub checks: Vec<CheckResult>,
    /// Engine banner, if one was read.
    pub banner: Option<String>,
}

impl DiagnosticReport {
    /// True if every check that ran passed.
    pub fn passed(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|c| c.passed)
    }

    /// The failed check, if any.
    pub fn failure(&self) -> Option<&CheckResult> {
        self.checks.iter().find(|c| !c.passed)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn pass(&mut self, check: &str, detail: impl Into<String>) {
        self.checks.push(CheckResult {
            check: check.to_string(),
            passed: true,
            detail: detail.into(),
        });
    }

    fn fail(&mut self, check: &str, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!(check, detail = %detail, "cqp diagnostic failed");
        self.checks.push(CheckResult {
            check: check.to_string(),
            passed: false,
            detail,
        });
    }

    /// Record a check; `Err` carries the failure detail.
    fn record(&mut self, check: &str, outcome: Result<String, String>) -> bool {
        match outcome {
            Ok(detail) => {
                self.pass(check, detail);
                true
            }
            Err(detail) => {
                self.fail(check, detail);
                false
            }
        }
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let mark = if check.passed { "ok" } else { "FAILED" };
            writeln!(f, "[{mark}] {}: {}", check.check, check.detail)?;
        }
        Ok(())
    }
}

/// Pipes that were actually created; cleanup closes whatever is here.
#[derive(Default)]
struct Resources {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<BufReader<ChildStderr>>,
}

/// Run every check, then clean up.
pub async fn run(options: DiagnosticOptions) -> DiagnosticReport {
    let mut report = DiagnosticReport::default();
    let mut resources = Resources::default();

    run_checks(&options, &mut report, &mut resources).await;
    cleanup(&options, &mut report, resources).await;

    tracing::info!(
        passed = report.passed(),
        checks = report.checks.len(),
        "cqp diagnostics finished"
    );
    report
}

async fn run_checks(
    options: &DiagnosticOptions,
    report: &mut DiagnosticReport,
    res: &mut Resources,
) {
    let Some(executable) = resolve_executable(&options.cqp_path) else {
        report.fail(
            "executable exists",
            format!("{} not found", options.cqp_path.display()),
        );
        return;
    };
    if !report.record("executable exists", Ok(executable.display().to_string()))
        || !report.record("executable is readable", check_readable_file(&executable))
        || !report.record("executable is executable", check_executable(&executable))
    {
        return;
    }

    let registry = &options.registry;
    if !report.record("registry exists", check_directory(registry))
        || !report.record("registry is readable", check_listable(registry))
        || !report.record("registry is searchable", check_executable(registry))
    {
        return;
    }

    let mut cmd = Command::new(&executable);
    cmd.arg("-c")
        .arg("-r")
        .arg(registry)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            report.fail("process started", e.to_string());
            return;
        }
    };
    let pid = child.id();
    res.stdin = child.stdin.take();
    res.stdout = child.stdout.take().map(BufReader::new);
    res.stderr = child.stderr.take().map(BufReader::new);
    res.child = Some(child);
    report.pass("process started", format!("pid {pid:?}"));

    let pipes = [res.stdin.is_some(), res.stdout.is_some(), res.stderr.is_some()];
    if pipes != [true; 3] {
        report.fail(
            "three pipes open",
            format!("stdin/stdout/stderr present: {pipes:?}"),
        );
        return;
    }
    report.pass("three pipes open", "stdin, stdout, stderr");

    let Some(stdout) = res.stdout.as_mut() else {
        return;
    };
    let banner = match read_line(stdout, options.read_timeout).await {
        Ok(Some(line)) => line,
        Ok(None) => {
            let errors = read_available_stderr(res.stderr.as_mut()).await;
            report.fail("banner readable", format!("stdout closed; stderr: {errors:?}"));
            return;
        }
        Err(detail) => {
            report.fail("banner readable", detail);
            return;
        }
    };
    report.pass("banner readable", banner.clone());
    report.banner = Some(banner.clone());

    let Some(version) = EngineVersion::parse(&banner) else {
        report.fail("version parses", format!("unrecognised banner {banner:?}"));
        return;
    };
    report.pass("version parses", version.to_string());
    let minimum = crate::protocol::format_triple(options.min_version);
    if !report.record(
        "version meets minimum",
        if version.at_least(options.min_version) {
            Ok(format!("{version} >= {minimum}"))
        } else {
            Err(format!("{version} < {minimum}"))
        },
    ) {
        return;
    }

    let Some(stdin) = res.stdin.as_mut() else {
        return;
    };
    let framed = frame_command(options.command.as_bytes());
    if let Err(e) = write_all(stdin, &framed).await {
        report.fail("command written", e.to_string());
        return;
    }
    report.pass("command written", options.command.clone());

    let mut lines = 0usize;
    loop {
        match read_line(stdout, options.read_timeout).await {
            Ok(Some(line)) if line == END_OF_REPLY => break,
            Ok(Some(_)) => lines += 1,
            Ok(None) => {
                report.fail("round trip", "stdout closed before end-of-reply marker");
                return;
            }
            Err(detail) => {
                report.fail("round trip", detail);
                return;
            }
        }
    }
    report.pass("round trip", format!("{lines} reply lines"));
}

async fn cleanup(
    options: &DiagnosticOptions,
    report: &mut DiagnosticReport,
    mut res: Resources,
) {
    if let Some(mut stdin) = res.stdin.take() {
        let exit = frame_open_command(EXIT_COMMAND.as_bytes());
        if let Err(e) = write_all(&mut stdin, &exit).await {
            tracing::debug!(error = %e, "could not send exit during diagnostics cleanup");
        }
        let _ = stdin.shutdown().await;
    }
    drop(res.stdout.take());
    drop(res.stderr.take());

    let Some(mut child) = res.child.take() else {
        return;
    };
    match tokio::time::timeout(options.read_timeout, child.wait()).await {
        Ok(Ok(status)) => report.pass("process exited", status.to_string()),
        Ok(Err(e)) => report.fail("process exited", e.to_string()),
        Err(_) => {
            let _ = child.kill().await;
            report.fail("process exited", "did not exit after `exit`; killed");
        }
    }
}

async fn write_all(stdin: &mut ChildStdin, bytes: &[u8]) -> std::io::Result<()> {
    stdin.write_all(bytes).await?;
    stdin.flush().await
}

async fn read_line(
    reader: &mut BufReader<ChildStdout>,
    limit: Duration,
) -> Result<Option<String>, String> {
    let mut line = Vec::new();
    match tokio::time::timeout(limit, reader.read_until(b'\n', &mut line)).await {
        Ok(Ok(0)) => Ok(None),
        Ok(Ok(_)) => Ok(Some(String::from_utf8_lossy(strip_eol(&line)).into_owned())),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no output within {limit:?}")),
    }
}

async fn read_available_stderr(stderr: Option<&mut BufReader<ChildStderr>>) -> Vec<String> {
    let mut lines = Vec::new();
    let Some(stderr) = stderr else {
        return lines;
    };
    let mut line = String::new();
    while let Ok(Ok(n)) =
        tokio::time::timeout(Duration::from_millis(100), stderr.read_line(&mut line)).await
    {
        if n == 0 || lines.len() >= 16 {
            break;
        }
        lines.push(line.trim_end().to_string());
        line.clear();
    }
    lines
}

fn resolve_executable(path: &Path) -> Option<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.is_file())
}

fn check_readable_file(path: &Path) -> Result<String, String> {
    std::fs::File::open(path)
        .map(|_| "readable".to_string())
        .map_err(|e| e.to_string())
}

fn check_directory(path: &Path) -> Result<String, String> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(path.display().to_string()),
        Ok(_) => Err(format!("{} is not a directory", path.display())),
        Err(e) => Err(format!("{}: {e}", path.display())),
    }
}

fn check_listable(path: &Path) -> Result<String, String> {
    std::fs::read_dir(path)
        .map(|entries| format!("{} entries", entries.count()))
        .map_err(|e| e.to_string())
}

#[cfg(unix)]
fn check_executable(path: &Path) -> Result<String, String> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)
        .map_err(|e| e.to_string())?
        .permissions()
        .mode();
    if mode & 0o111 != 0 {
        Ok(format!("mode {:o}", mode & 0o7777))
    } else {
        Err(format!("no execute permission (mode {:o})", mode & 0o7777))
    }
}

#[cfg(not(unix))]
fn check_executable(path: &Path) -> Result<String, String> {
    std::fs::metadata(path)
        .map(|_| "not checked on this platform".to_string())
        .map_err(|e| e.to_string())
}
