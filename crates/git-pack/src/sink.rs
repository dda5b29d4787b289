//! Byte sinks for the pack stream: an in-memory buffer, a file (published
//! atomically via rename-on-commit), and a generic writer adapter for
//! network transports.

use std::io::Write;
use std::path::{Path, PathBuf};

use git_utils::lockfile::LockFile;

use crate::PackError;

/// Anything the pack writer can stream bytes into.
///
/// The core treats any `Err` from [`Sink::write`] as a hard failure and
/// aborts the write; sinks that buffer internally should surface flush
/// failures from [`Sink::finish`], not silently swallow them.
pub trait Sink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), PackError>;

    /// Called once after the trailer has been written. Default no-op; file
    /// sinks use this to perform the atomic publish.
    fn finish(&mut self) -> Result<(), PackError> {
        Ok(())
    }
}

/// Accumulates the pack stream in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    buffer: Vec<u8>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl Sink for BufferSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), PackError> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }
}

/// Writes the pack stream to a staging path, publishing it atomically via
/// rename on success; a failed or dropped-without-finish write leaves the
/// target path untouched.
pub struct FileSink {
    lock: Option<LockFile>,
}

impl FileSink {
    pub fn create(target: impl AsRef<Path>) -> Result<Self, PackError> {
        let lock = LockFile::acquire(target.as_ref().to_path_buf())
            .map_err(|e| PackError::Io(std::io::Error::other(e)))?;
        Ok(Self { lock: Some(lock) })
    }

    pub fn target_path(&self) -> Option<&Path> {
        self.lock.as_ref().map(LockFile::path)
    }
}

impl Sink for FileSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), PackError> {
        let lock = self
            .lock
            .as_mut()
            .ok_or_else(|| PackError::Invariant("file sink used after finish".into()))?;
        lock.write_all(bytes)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PackError> {
        if let Some(lock) = self.lock.take() {
            lock.commit()
                .map_err(|e| PackError::Io(std::io::Error::other(e)))?;
        }
        Ok(())
    }
}

/// Adapts any [`std::io::Write`] (a network socket, a pipe, ...) into a
/// [`Sink`]. Buffering and framing for the underlying transport are the
/// caller's responsibility.
pub struct WriterSink<W> {
    inner: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Sink for WriterSink<W> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), PackError> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PackError> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Directory-relative staging path used by [`FileSink::create`] when the
/// caller wants the staging file colocated with the target, matching the
/// lock-file protocol's `<path>.lock` convention.
pub fn staging_path_for(target: &Path) -> PathBuf {
    let mut s = target.as_os_str().to_owned();
    s.push(".lock");
    PathBuf::from(s)
}
