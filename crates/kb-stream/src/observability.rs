//! Process-wide `tracing` subscriber setup.
//!
//! The library only emits events; a binary decides where they go by passing
//! [`LogSettings`] to [`init_logging`].

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::errors::ClientError;

static INSTALLED: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "kb-stream.logs.jsonl";

/// Destination of log records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LogSink {
    /// Compact lines on stderr; stdout stays free for rendered output.
    #[default]
    Console,
    /// JSON lines appended to a file.
    JsonFile(PathBuf),
    /// Nothing is installed.
    Disabled,
}

/// Filter and sink for [`init_logging`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directives such as `info` or `kb_stream=debug`. `None`
    /// falls back to `RUST_LOG`, then `info`.
    pub filter: Option<String>,
    pub sink: LogSink,
}

impl LogSettings {
    pub fn filter(mut self, directives: impl Into<String>) -> Self {
        self.filter = Some(directives.into());
        self
    }

    pub fn sink(mut self, sink: LogSink) -> Self {
        self.sink = sink;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, ClientError> {
        match self.filter.as_deref().map(str::trim) {
            Some(directives) if !directives.is_empty() => EnvFilter::try_new(directives)
                .map_err(|e| ClientError::Config(format!("invalid log filter `{directives}`: {e}"))),
            _ => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
        }
    }
}

/// Installs the global subscriber described by `settings`.
///
/// The filter is validated on every call; only the first successful call
/// installs anything, later calls return `Ok(())` without effect.
pub fn init_logging(settings: &LogSettings) -> Result<(), ClientError> {
    let filter = settings.env_filter()?;
    INSTALLED
        .get_or_try_init(|| install(filter, &settings.sink))
        .map(|_| ())
}

fn install(filter: EnvFilter, sink: &LogSink) -> Result<(), ClientError> {
    match sink {
        LogSink::Disabled => {}
        LogSink::Console => {
            let console = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .try_init();
        }
        LogSink::JsonFile(path) => {
            let (dir, file_name) = split_log_path(path);
            std::fs::create_dir_all(dir).map_err(|e| {
                ClientError::Config(format!("cannot create log dir {}: {e}", dir.display()))
            })?;
            let json = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(tracing_appender::rolling::never(dir, file_name));
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(json)
                .try_init();
        }
    }
    Ok(())
}

fn split_log_path(path: &Path) -> (&Path, &str) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    (dir, file_name)
}
