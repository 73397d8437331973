//! Logging initialization.
//!
//! Structured JSONL goes to `<base>/logs/pipeline.jsonl`, one flushed line
//! per event, with an optional compact stderr layer for foreground use.

use crate::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Append-only log file writer, flushed after every write.
#[derive(Clone)]
pub struct LogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl LogWriter {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`.
///
/// ```ignore
/// init_logging("info", &paths.log_file(), true)?;
/// tracing::info!("Pipeline started");
/// ```
pub fn init_logging(level: &str, log_path: &Path, also_stderr: bool) -> CoreResult<()> {
    let writer = LogWriter::open(log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_target(true)
        .with_writer(writer)
        .with_filter(env_filter(level));

    let stderr_layer = also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(io::stderr)
            .with_filter(env_filter(level))
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| CoreError::Config(format!("failed to install subscriber: {}", e)))?;

    tracing::info!(log_path = %log_path.display(), level, "Logging initialized");
    Ok(())
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(level).as_str().to_ascii_lowercase()))
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
