//! Output capture and the cache-or-record helpers built on it.
//!
//! A page render either replays a cached blob or records what it writes:
//!
//! ```no_run
//! # use spcms_cache::{CacheOutcome, CacheStore, OutputBuffer};
//! # fn render(_out: &mut OutputBuffer) {}
//! # let cache = CacheStore::new();
//! let mut out = OutputBuffer::new(Vec::new());
//! if cache.echo_or_record(&mut out, "/index", Some("pages"), None)? == CacheOutcome::Recording {
//!     render(&mut out);
//!     cache.record_output(&mut out, "/index", Some("pages"), None)?;
//! }
//! # Ok::<(), spcms_core::AppError>(())
//! ```

use std::io::{self, Write};

use serde_json::Value;
use tracing::debug;

use spcms_core::{AppError, AppResult};

use crate::store::{CacheStore, Ttl};

/// Something output can be written to and captured from.
pub trait OutputSink {
    /// Starts a capture. Captures nest: the innermost one receives output.
    fn start_capture(&mut self);

    /// Ends the innermost capture and returns what it collected.
    fn stop_capture(&mut self) -> Option<Vec<u8>>;

    /// Writes bytes to the innermost capture, or through to the output.
    fn emit(&mut self, bytes: &[u8]) -> AppResult<()>;
}

/// An `OutputSink` over any writer, with a stack of in-memory captures.
#[derive(Debug, Default)]
pub struct OutputBuffer<W = Vec<u8>> {
    inner: W,
    captures: Vec<Vec<u8>>,
}

impl<W: Write> OutputBuffer<W> {
    /// Wraps a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            captures: Vec::new(),
        }
    }

    /// Number of open captures.
    pub fn depth(&self) -> usize {
        self.captures.len()
    }

    /// The wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Unwraps the writer. Open captures are discarded.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> OutputSink for OutputBuffer<W> {
    fn start_capture(&mut self) {
        self.captures.push(Vec::new());
    }

    fn stop_capture(&mut self) -> Option<Vec<u8>> {
        self.captures.pop()
    }

    fn emit(&mut self, bytes: &[u8]) -> AppResult<()> {
        match self.captures.last_mut() {
            Some(capture) => capture.extend_from_slice(bytes),
            None => self.inner.write_all(bytes)?,
        }
        Ok(())
    }
}

impl<W: Write> Write for OutputBuffer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.captures.last_mut() {
            Some(capture) => {
                capture.extend_from_slice(buf);
                Ok(buf.len())
            }
            None => self.inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// What [`CacheStore::echo_or_record`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// A cached blob was written to the sink.
    Emitted,
    /// Nothing usable was cached; a capture has been started.
    Recording,
}

impl CacheStore {
    /// Emits the cached string blob for `name`, or starts recording.
    ///
    /// Cached values that are not strings are treated as misses.
    pub fn echo_or_record(
        &self,
        out: &mut dyn OutputSink,
        name: &str,
        namespace: Option<&str>,
        max_age: Option<Ttl>,
    ) -> AppResult<CacheOutcome> {
        if let Some(Value::String(blob)) = self.get(name, namespace, max_age, None)? {
            out.emit(blob.as_bytes())?;
            return Ok(CacheOutcome::Emitted);
        }

        debug!(name, "Recording output");
        self.save_output(out);
        Ok(CacheOutcome::Recording)
    }

    /// Starts capturing output.
    pub fn save_output(&self, out: &mut dyn OutputSink) {
        out.start_capture();
    }

    /// Ends the capture, stores it under `name` and emits it.
    ///
    /// Output is kept as text: invalid UTF-8 is replaced with U+FFFD before
    /// it is both stored and emitted, so a later replay matches this one.
    /// The output is emitted even when storing it fails. Returns whether it
    /// was stored.
    pub fn record_output(
        &self,
        out: &mut dyn OutputSink,
        name: &str,
        namespace: Option<&str>,
        ttl: Option<Ttl>,
    ) -> AppResult<bool> {
        let bytes = out
            .stop_capture()
            .ok_or_else(|| AppError::cache("No output capture in progress"))?;

        let text = String::from_utf8_lossy(&bytes).into_owned();
        let stored = self.put(&Value::String(text.clone()), name, namespace, ttl);
        out.emit(text.as_bytes())?;
        stored
    }
}
