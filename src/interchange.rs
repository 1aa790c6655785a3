//! Self-deleting temporary files for bulk exchange with the engine.
//!
//! An [`InterchangeFile`] moves through `Writing → Finished → Reading` and
//! ends in `Deleted`. The file is unlinked when it is closed or dropped,
//! whichever comes first, so an early return never leaks it.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::{Error, Result};

/// Lifecycle state of an [`InterchangeFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterchangeState {
    Writing,
    Finished,
    Reading,
    /// Terminal.
    Deleted,
}

impl InterchangeState {
    fn name(self) -> &'static str {
        match self {
            InterchangeState::Writing => "writing",
            InterchangeState::Finished => "finished",
            InterchangeState::Reading => "reading",
            InterchangeState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for InterchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Writer {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Writer {
    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Writer::Plain(w) => w.write_all(bytes),
            Writer::Gzip(w) => w.write_all(bytes),
        }
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            Writer::Plain(mut w) => w.flush(),
            Writer::Gzip(w) => w.finish()?.flush(),
        }
    }
}

/// A temporary file used as a side channel for bulk data.
pub struct InterchangeFile {
    path: PathBuf,
    compressed: bool,
    state: InterchangeState,
    writer: Option<Writer>,
    reader: Option<Box<dyn BufRead + Send>>,
}

impl InterchangeFile {
    /// Create a new, empty interchange file in `dir`, open for writing.
    ///
    /// With `compressed`, lines are written gzip-compressed and transparently
    /// decompressed by [`read_line`](Self::read_line).
    pub fn create(dir: &Path, compressed: bool) -> Result<Self> {
        let suffix = if compressed { ".gz" } else { ".txt" };
        let (file, path) = tempfile::Builder::new()
            .prefix("cqp-interchange-")
            .suffix(suffix)
            .tempfile_in(dir)?
            .keep()
            .map_err(|e| Error::io(e.error))?;

        let buffered = BufWriter::new(file);
        let writer = if compressed {
            Writer::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            Writer::Plain(buffered)
        };

        tracing::trace!(path = %path.display(), compressed, "created interchange file");

        Ok(Self {
            path,
            compressed,
            state: InterchangeState::Writing,
            writer: Some(writer),
            reader: None,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InterchangeState {
        self.state
    }

    /// Whether the file content is gzip-compressed.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    fn wrong_state(&self, operation: &'static str) -> Error {
        Error::InterchangeState {
            state: self.state.name(),
            operation,
        }
    }

    /// Append one line. Only legal while writing.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        if self.state != InterchangeState::Writing {
            return Err(self.wrong_state("write"));
        }
        let writer = self.writer.as_mut().ok_or_else(|| Error::InterchangeState {
            state: "writing",
            operation: "write",
        })?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Close the write handle.
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            InterchangeState::Writing => {
                if let Some(writer) = self.writer.take() {
                    writer.finish()?;
                }
                self.state = InterchangeState::Finished;
                Ok(())
            }
            InterchangeState::Finished | InterchangeState::Reading => Ok(()),
            InterchangeState::Deleted => Err(self.wrong_state("finish")),
        }
    }

    fn open_reader(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        self.reader = Some(if self.compressed {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        });
        self.state = InterchangeState::Reading;
        Ok(())
    }

    /// Read the next line, finishing the write phase first if needed.
    ///
    /// Returns `Ok(None)` at end of data.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        match self.state {
            InterchangeState::Deleted => return Err(self.wrong_state("read")),
            InterchangeState::Writing => {
                self.finish()?;
                self.open_reader()?;
            }
            InterchangeState::Finished => self.open_reader()?,
            InterchangeState::Reading => {}
        }

        let Some(reader) = self.reader.as_mut() else {
            return Err(self.wrong_state("read"));
        };
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }

    /// Start reading again from the first line.
    pub fn rewind(&mut self) -> Result<()> {
        match self.state {
            InterchangeState::Reading | InterchangeState::Finished => {
                self.reader = None;
                self.open_reader()
            }
            _ => Err(self.wrong_state("rewind")),
        }
    }

    /// Close all handles and delete the file. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.state == InterchangeState::Deleted {
            return Ok(());
        }
        self.reader = None;
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                tracing::debug!(error = %e, "discarding unfinished interchange data");
            }
        }
        self.state = InterchangeState::Deleted;

        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::trace!(path = %self.path.display(), "deleted interchange file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e)),
        }
    }
}

impl fmt::Debug for InterchangeFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterchangeFile")
            .field("path", &self.path)
            .field("compressed", &self.compressed)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for InterchangeFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to delete interchange file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_finish_read_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = InterchangeFile::create(dir.path(), false).unwrap();
        let path = file.path().to_path_buf();

        file.write_line("first").unwrap();
        file.write_line("second").unwrap();
        file.finish().unwrap();
        assert_eq!(file.state(), InterchangeState::Finished);

        assert_eq!(file.read_line().unwrap().as_deref(), Some("first"));
        assert_eq!(file.read_line().unwrap().as_deref(), Some("second"));
        assert_eq!(file.read_line().unwrap(), None);

        file.close().unwrap();
        assert!(!path.exists());
        assert!(matches!(
            file.write_line("late"),
            Err(Error::InterchangeState {
                state: "deleted",
                operation: "write"
            })
        ));
    }

    #[test]
    fn read_auto_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = InterchangeFile::create(dir.path(), false).unwrap();
        file.write_line("only").unwrap();

        assert_eq!(file.read_line().unwrap().as_deref(), Some("only"));
        assert_eq!(file.state(), InterchangeState::Reading);
        assert!(file.write_line("more").is_err());
    }

    #[test]
    fn rewind_restarts_reading() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = InterchangeFile::create(dir.path(), true).unwrap();
        assert!(file.rewind().is_err(), "rewind is illegal while writing");

        file.write_line("a").unwrap();
        file.write_line("b").unwrap();
        assert_eq!(file.read_line().unwrap().as_deref(), Some("a"));
        file.rewind().unwrap();
        assert_eq!(file.read_line().unwrap().as_deref(), Some("a"));
        assert_eq!(file.read_line().unwrap().as_deref(), Some("b"));
        assert_eq!(file.read_line().unwrap(), None);
    }

    #[test]
    fn compressed_file_is_gzip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = InterchangeFile::create(dir.path(), true).unwrap();
        file.write_line("0\t0").unwrap();
        file.finish().unwrap();

        let raw = std::fs::read(file.path()).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);
        assert!(file.path().to_string_lossy().ends_with(".gz"));
    }

    #[test]
    fn drop_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut file = InterchangeFile::create(dir.path(), false).unwrap();
            file.write_line("leak?").unwrap();
            file.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = InterchangeFile::create(dir.path(), false).unwrap();
        file.close().unwrap();
        file.close().unwrap();
        assert_eq!(file.state(), InterchangeState::Deleted);
        assert!(file.read_line().is_err());
        assert!(file.rewind().is_err());
    }
}
