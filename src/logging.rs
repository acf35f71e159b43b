//! Tracing setup and the per-run logfile sink.
//!
//! [`init`] installs a global subscriber with two fmt layers: the console (filtered by
//! `RUST_LOG`, falling back to the given level) and a [`LogSink`]. The sink starts
//! unbound and discards everything; a session binds it to `<output_dir>/<name>.log`
//! with [`LogSink::set_logfile`], or explicitly unbinds it with `None`.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

use crate::error::{AppResult, SmurfError};

#[derive(Debug)]
struct BoundFile {
    path: PathBuf,
    file: File,
}

/// Rebindable file destination for log records.
///
/// Cloning is cheap; all clones share the same binding.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    inner: Arc<Mutex<Option<BoundFile>>>,
}

impl LogSink {
    /// A sink bound to nothing.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<BoundFile>> {
        // a panicking writer leaves the binding itself intact
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Redirect log records to `path` (appending), or stop writing to any file.
    pub fn set_logfile(&self, path: Option<&Path>) -> AppResult<()> {
        let bound = match path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| SmurfError::filesystem(path, e))?;
                Some(BoundFile {
                    path: path.to_path_buf(),
                    file,
                })
            }
            None => None,
        };
        *self.lock() = bound;
        Ok(())
    }

    /// Path of the currently bound logfile.
    pub fn logfile(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|b| b.path.clone())
    }
}

/// Writer handed out per log record.
pub struct SinkWriter {
    sink: LogSink,
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.sink.lock().as_mut() {
            Some(bound) => bound.file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink.lock().as_mut() {
            Some(bound) => bound.file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter { sink: self.clone() }
    }
}

/// Install the global subscriber and return the sink sessions bind logfiles to.
pub fn init(default_level: &str) -> Result<LogSink, TryInitError> {
    let sink = LogSink::new();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(sink.clone()),
        )
        .try_init()?;

    Ok(sink)
}
