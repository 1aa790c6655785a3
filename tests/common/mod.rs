//! Test utilities for libcqp integration tests.
//!
//! [`FakeEngine`] is an in-memory stand-in for `cqp -c`. It parses the
//! statements the client writes, keeps a small amount of engine state
//! (options, query lock, active corpus, named results) and answers with the
//! same framing the real engine uses.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use libcqp::config::{ClientConfig, CqpOption, OptionKind};
use libcqp::protocol::{END_OF_REPLY, PROGRESS_PREFIX};
use libcqp::{CqpClient, EngineChannel, Error, Result};

/// Banner printed by default.
pub const BANNER: &str = "CQP version 3.4.33";

/// One queued stdout item.
#[derive(Debug, Clone)]
enum Out {
    Line(Vec<u8>),
    /// Moved to stderr when reached, so the error shows up mid-reply.
    Stderr(Vec<u8>),
    /// The engine dies here.
    Hangup,
    /// The engine stops answering but keeps its pipes open.
    Stall,
}

/// Scripted answer to one statement.
#[derive(Debug, Clone, Default)]
struct Reply {
    lines: Vec<Vec<u8>>,
    /// Written to stderr as soon as the statement is received.
    errors: Vec<Vec<u8>>,
    /// Written to stderr after the reply lines.
    late_errors: Vec<Vec<u8>>,
    /// Named result created by the statement.
    defines: Option<(String, Vec<Vec<i64>>)>,
    hangup: bool,
    stall: bool,
}

#[derive(Debug)]
struct Undumping {
    scope: String,
    width: usize,
    expected: Option<usize>,
    rows: Vec<Vec<i64>>,
}

#[derive(Debug, Clone)]
struct Corpus {
    name: String,
    size: u64,
    charset: String,
}

#[derive(Debug, Default)]
struct State {
    input: Vec<u8>,
    sent: Vec<Vec<u8>>,
    stdout: VecDeque<Out>,
    stderr: VecDeque<Vec<u8>>,
    options: Vec<(String, String)>,
    replies: HashMap<Vec<u8>, Reply>,
    corpora: Vec<Corpus>,
    active: Option<String>,
    named: HashMap<String, Vec<Vec<i64>>>,
    lock: Option<String>,
    undumping: Option<Undumping>,
    dead: bool,
    exited: bool,
    close_calls: usize,
}

/// In-memory engine implementing [`EngineChannel`].
///
/// Clones share state, so a test can keep a handle after moving the engine
/// into a client.
#[derive(Debug, Clone)]
pub struct FakeEngine {
    state: Arc<Mutex<State>>,
}

impl FakeEngine {
    /// Engine with the default banner, two corpora and every option unset.
    pub fn new() -> Self {
        Self::with_banner(BANNER)
    }

    pub fn with_banner(banner: &str) -> Self {
        let mut state = State::default();
        state.options = CqpOption::ALL
            .iter()
            .map(|option| {
                let value = match option.kind() {
                    OptionKind::Bool => "no",
                    OptionKind::Int => "0",
                    OptionKind::Enum => match option {
                        CqpOption::MatchingStrategy => "standard",
                        _ => "ascii",
                    },
                    OptionKind::String => "<no value>",
                    OptionKind::Context => "25 characters",
                };
                (option.name().to_string(), value.to_string())
            })
            .collect();
        state.corpora = vec![
            Corpus {
                name: "DICKENS".into(),
                size: 3_407_085,
                charset: "utf8".into(),
            },
            Corpus {
                name: "GERMAN".into(),
                size: 1_000,
                charset: "latin1".into(),
            },
        ];
        if !banner.is_empty() {
            state.stdout.push_back(Out::Line(format!("{banner}\n").into_bytes()));
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Engine that exits immediately, printing `errors` on stderr.
    pub fn failing_startup(errors: &[&str]) -> Self {
        let engine = Self::with_banner("");
        {
            let mut state = engine.lock();
            state.dead = true;
            state.stderr.extend(errors.iter().map(|e| e.as_bytes().to_vec()));
        }
        engine
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake engine state poisoned")
    }

    fn script(&self, command: &[u8], update: impl FnOnce(&mut Reply)) {
        let mut state = self.lock();
        let reply = state.replies.entry(command.to_vec()).or_default();
        update(reply);
    }

    /// Answer `command` with `lines`.
    pub fn reply(self, command: &str, lines: &[&str]) -> Self {
        self.script(command.as_bytes(), |r| {
            r.lines = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
        });
        self
    }

    /// Answer `command` (raw bytes) with raw byte lines.
    pub fn reply_bytes(self, command: &[u8], lines: Vec<Vec<u8>>) -> Self {
        self.script(command, |r| r.lines = lines);
        self
    }

    /// Report `errors` on stderr when `command` is received.
    pub fn fail(self, command: &str, errors: &[&str]) -> Self {
        self.script(command.as_bytes(), |r| {
            r.errors = errors.iter().map(|e| e.as_bytes().to_vec()).collect();
        });
        self
    }

    /// Print `lines`, then report `errors`.
    pub fn fail_late(self, command: &str, lines: &[&str], errors: &[&str]) -> Self {
        self.script(command.as_bytes(), |r| {
            r.lines = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
            r.late_errors = errors.iter().map(|e| e.as_bytes().to_vec()).collect();
        });
        self
    }

    /// Make `command` create a named result.
    pub fn defines(self, command: &str, name: &str, rows: Vec<Vec<i64>>) -> Self {
        self.script(command.as_bytes(), |r| r.defines = Some((name.to_string(), rows)));
        self
    }

    /// Print `lines` and die before the end marker.
    pub fn hang_up_on(self, command: &str, lines: &[&str]) -> Self {
        self.script(command.as_bytes(), |r| {
            r.lines = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
            r.hangup = true;
        });
        self
    }

    /// Print `lines` and then never answer again.
    pub fn stall_on(self, command: &str, lines: &[&str]) -> Self {
        self.script(command.as_bytes(), |r| {
            r.lines = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
            r.stall = true;
        });
        self
    }

    /// Preload a named result.
    pub fn named(self, name: &str, rows: Vec<Vec<i64>>) -> Self {
        self.lock().named.insert(name.to_string(), rows);
        self
    }

    /// Take the query lock as another client would.
    pub fn hold_lock(&self, key: &str) {
        self.lock().lock = Some(key.to_string());
    }

    /// Every line received, terminators stripped.
    pub fn sent_lines(&self) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect()
    }

    /// Every line received, as raw bytes.
    pub fn sent_bytes(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Statements received, without `;` and without end-marker requests.
    pub fn commands(&self) -> Vec<String> {
        self.sent_lines()
            .into_iter()
            .filter_map(|l| l.strip_suffix(';').map(|s| s.trim_end().to_string()))
            .filter(|l| l != ".EOL.")
            .collect()
    }

    /// Count statements starting with `prefix`.
    pub fn count_commands(&self, prefix: &str) -> usize {
        self.commands().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn rows(&self, name: &str) -> Option<Vec<Vec<i64>>> {
        self.lock().named.get(name).cloned()
    }

    pub fn option_value(&self, name: &str) -> Option<String> {
        self.lock()
            .options
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    pub fn is_locked(&self) -> bool {
        self.lock().lock.is_some()
    }

    pub fn exited(&self) -> bool {
        self.lock().exited
    }

    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineChannel for FakeEngine {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if state.exited {
            return Err(Error::io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "fake engine has exited",
            )));
        }
        state.input.extend_from_slice(bytes);
        while let Some(pos) = state.input.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = state.input.drain(..=pos).collect();
            let line = line[..line.len() - 1].to_vec();
            state.sent.push(line.clone());
            state.receive(&line);
        }
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        {
            let mut state = self.lock();
            loop {
                match state.stdout.pop_front() {
                    Some(Out::Line(line)) => return Ok(Some(line)),
                    Some(Out::Stderr(line)) => state.stderr.push_back(line),
                    Some(Out::Hangup) => {
                        state.dead = true;
                        state.stdout.clear();
                        return Ok(None);
                    }
                    Some(Out::Stall) => {
                        state.stdout.push_front(Out::Stall);
                        break;
                    }
                    None => return Ok(None),
                }
            }
        }
        std::future::pending().await
    }

    async fn drain_errors(&mut self, max_lines: usize, _wait: Duration) -> Vec<Vec<u8>> {
        let mut state = self.lock();
        let take = state.stderr.len().min(max_lines);
        let lines: Vec<Vec<u8>> = state.stderr.drain(..take).collect();
        state.stderr.clear();
        lines
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.close_calls += 1;
        if !state.exited {
            state.sent.push(b"exit;".to_vec());
            state.exited = true;
        }
        Ok(())
    }
}

impl State {
    fn out(&mut self, line: impl Into<Vec<u8>>) {
        if self.dead {
            return;
        }
        let mut line = line.into();
        line.push(b'\n');
        self.stdout.push_back(Out::Line(line));
    }

    fn error(&mut self, message: impl Into<String>) {
        self.stderr.push_back(message.into().into_bytes());
    }

    fn receive(&mut self, line: &[u8]) {
        if self.undumping.is_some() {
            self.receive_row(line);
            return;
        }

        let end = line
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        let raw = &line[..end];
        let Some(raw_statement) = raw.strip_suffix(b";") else {
            let text = String::from_utf8_lossy(line);
            self.error(format!("CQP Syntax Error: missing ';' after {text:?}"));
            return;
        };
        let statement = String::from_utf8_lossy(raw_statement).into_owned();
        let statement = statement.as_str();

        if statement == ".EOL." {
            self.out(END_OF_REPLY);
            return;
        }
        if statement == "exit" {
            self.exited = true;
            return;
        }

        if let Some(reply) = self.replies.get(raw_statement).cloned() {
            self.play(reply);
            return;
        }

        self.interpret(statement);
    }

    fn play(&mut self, reply: Reply) {
        for error in reply.errors {
            self.stderr.push_back(error);
        }
        for line in reply.lines {
            self.out(line);
        }
        for error in reply.late_errors {
            self.stdout.push_back(Out::Stderr(error));
        }
        if let Some((name, rows)) = reply.defines {
            self.named.insert(name, rows);
        }
        if reply.hangup {
            self.stdout.push_back(Out::Hangup);
            self.dead = true;
        }
        if reply.stall {
            self.stdout.push_back(Out::Stall);
            self.dead = true;
        }
    }

    fn interpret(&mut self, statement: &str) {
        let words: Vec<&str> = statement.split_whitespace().collect();
        let Some(&head) = words.first() else {
            return;
        };

        if self.lock.is_some() && !matches!(head, "unlock") && !is_query(statement) {
            self.error("CQP Error: query lock violation attempted (unlock first)");
            return;
        }

        match head {
            "set" => self.set(statement, &words),
            "unlock" => {
                if self.lock.is_some() && self.lock.as_deref() == words.get(1).copied() {
                    self.lock = None;
                } else {
                    self.error("CQP Error: unlock: wrong key or no lock set");
                }
            }
            "show" => match words.get(1).copied() {
                Some("corpora") => {
                    let names: Vec<String> = self.corpora.iter().map(|c| c.name.clone()).collect();
                    for name in names {
                        self.out(name);
                    }
                }
                Some("named") => {
                    let mut names: Vec<String> = self.named.keys().cloned().collect();
                    names.sort();
                    for name in names {
                        self.out(format!("-d- {name}"));
                    }
                }
                _ => self.error(format!("CQP Syntax Error: {statement}")),
            },
            "info" => match self.active_corpus() {
                Some(corpus) => {
                    self.out(format!("Corpus: {}", corpus.name));
                    self.out(format!("Size: {} tokens", corpus.size));
                    self.out(format!("Charset: {}", corpus.charset));
                }
                None => self.error("CQP Error: no corpus activated"),
            },
            "size" => match words.get(1).and_then(|n| self.named.get(*n)) {
                Some(rows) => {
                    let size = rows.len();
                    self.out(size.to_string());
                }
                None => self.out("0"),
            },
            "discard" => {
                if let Some(name) = words.get(1) {
                    self.named.remove(*name);
                }
            }
            "dump" => self.dump(statement, &words),
            "undump" => self.undump(statement, &words),
            _ if self.corpora.iter().any(|c| c.name == head) && words.len() == 1 => {
                self.active = Some(head.to_string());
            }
            _ => self.error(format!("CQP Syntax Error: parse error near {head:?}")),
        }
    }

    fn active_corpus(&self) -> Option<Corpus> {
        let name = self.active.as_ref()?;
        self.corpora.iter().find(|c| &c.name == name).cloned()
    }

    fn set(&mut self, statement: &str, words: &[&str]) {
        if words.len() == 1 {
            let lines: Vec<String> = self
                .options
                .iter()
                .map(|(name, value)| format!("  {name} = {value}"))
                .collect();
            for line in lines {
                self.out(line);
            }
            return;
        }

        let name = words[1];
        if name == "QueryLock" {
            let key = words.get(2).filter(|k| k.parse::<u64>().is_ok());
            if self.lock.is_some() {
                self.error("CQP Error: query lock already set");
            } else if let Some(key) = key {
                self.lock = Some(key.to_string());
            } else {
                self.error("CQP Error: QueryLock needs an integer key");
            }
            return;
        }

        let value = statement
            .splitn(3, char::is_whitespace)
            .nth(2)
            .unwrap_or_default()
            .trim();
        let value = match value {
            "on" => "yes".to_string(),
            "off" => "no".to_string(),
            quoted if quoted.starts_with('"') => unquote(quoted),
            other => other.to_string(),
        };
        match self
            .options
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(option) => option.1 = value,
            None => self.error(format!("CQP Error: Unknown option {name:?}")),
        }
    }

    fn dump(&mut self, statement: &str, words: &[&str]) {
        let Some(rows) = words.get(1).and_then(|n| self.named.get(*n)).cloned() else {
            self.error(format!("CQP Error: no such named result {:?}", words.get(1)));
            return;
        };

        if let Some((_, target)) = statement.split_once('>') {
            let target = target.trim().trim_matches('"');
            if target.starts_with('|') && target.contains("awk") {
                if let Some(max) = rows.iter().map(|r| r[1] - r[0] + 1).max() {
                    self.out(max.to_string());
                }
            } else {
                let mut file = std::fs::File::create(target).expect("dump target");
                for row in &rows {
                    writeln!(file, "{}", join(row)).expect("dump write");
                }
            }
            return;
        }

        let range = match (words.get(2), words.get(3)) {
            (Some(from), Some(to)) => {
                let from: usize = from.parse().unwrap_or(0);
                let to: usize = to.parse().unwrap_or(0);
                from..(to + 1).min(rows.len())
            }
            _ => 0..rows.len(),
        };
        for row in rows.get(range).unwrap_or_default() {
            self.out(join(row));
        }
    }

    fn undump(&mut self, statement: &str, words: &[&str]) {
        let Some(scope) = words.get(1) else {
            self.error("CQP Syntax Error: undump needs a name");
            return;
        };
        let head = statement.split('<').next().unwrap_or_default();
        let width = if head.contains("with target keyword") {
            4
        } else if head.contains("with target") {
            3
        } else {
            2
        };

        let Some((_, source)) = statement.split_once('<') else {
            self.undumping = Some(Undumping {
                scope: scope.to_string(),
                width,
                expected: None,
                rows: Vec::new(),
            });
            return;
        };

        let source = source.trim().trim_matches('"');
        let reader: Box<dyn BufRead> = if let Some(rest) = source.strip_prefix("gzip -cd '") {
            let path = rest.split('\'').next().unwrap_or_default();
            let file = std::fs::File::open(path).expect("undump source");
            Box::new(BufReader::new(flate2::read::GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(
                std::fs::File::open(source).expect("undump source"),
            ))
        };

        let mut lines = reader.lines().map_while(std::result::Result::ok);
        let expected: usize = lines.next().and_then(|l| l.trim().parse().ok()).unwrap_or(0);
        let rows: Vec<Vec<i64>> = lines
            .take(expected)
            .map(|l| parse_row(&l, width))
            .collect();
        self.named.insert(scope.to_string(), rows);
    }

    fn receive_row(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line).into_owned();
        let Some(mut undumping) = self.undumping.take() else {
            return;
        };
        match undumping.expected {
            None => match text.trim().parse() {
                Ok(n) => undumping.expected = Some(n),
                Err(_) => {
                    self.error(format!("CQP Error: undump: bad row count {text:?}"));
                    return;
                }
            },
            Some(_) => {
                let width = undumping.width;
                undumping.rows.push(parse_row(&text, width));
            }
        }

        if undumping.expected == Some(undumping.rows.len()) {
            self.named.insert(undumping.scope, undumping.rows);
        } else {
            self.undumping = Some(undumping);
        }
    }
}

/// A progress-bar line as the engine prints it.
pub fn progress_line(pass: u32, total: u32, message: &str) -> String {
    format!("{PROGRESS_PREFIX}\t{pass}\t{total}\t{message}")
}

fn is_query(statement: &str) -> bool {
    let statement = statement.trim_start();
    statement.starts_with('[')
        || statement.starts_with('"')
        || statement
            .split_once('=')
            .is_some_and(|(name, _)| !name.trim().contains(char::is_whitespace))
}

fn unquote(quoted: &str) -> String {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(quoted);
    let mut out = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn join(row: &[i64]) -> String {
    row.iter().map(i64::to_string).collect::<Vec<_>>().join("\t")
}

fn parse_row(line: &str, width: usize) -> Vec<i64> {
    line.split('\t')
        .take(width)
        .map(|f| f.trim().parse().unwrap_or(-1))
        .collect()
}

/// Config for clients built on a fake engine.
pub fn config() -> ClientConfig {
    ClientConfig::builder()
        .registry(std::env::temp_dir())
        .build()
        .expect("test config")
}

/// Connect a client to `engine` with the default test config.
pub async fn client(engine: FakeEngine) -> CqpClient<FakeEngine> {
    CqpClient::handshake(engine, config())
        .await
        .expect("handshake with fake engine")
}

/// Connect a client and return it with a handle to the engine.
pub async fn connected(engine: FakeEngine) -> (CqpClient<FakeEngine>, FakeEngine) {
    let handle = engine.clone();
    (client(engine).await, handle)
}
