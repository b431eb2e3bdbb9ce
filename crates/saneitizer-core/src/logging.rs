//! Logging setup for saneitize runs.
//!
//! Everything logs through `tracing`. [`init_logging`] installs one stderr
//! layer in the `[log]` format and, when `[log] file` is set, a second layer
//! appending the same events to that file. stdout is never written to, so it
//! stays free for jobs and reports.
//!
//! Fields used across spans and events: `cluster`, `page`, `doc`,
//! `index_suffix`, `from_id`, `to_id`.

use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub use crate::config::LogFormat;

/// `[log]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter level. `RUST_LOG` replaces it entirely when set.
    pub level: LogLevel,
    pub format: LogFormat,
    /// Append a copy of every event here. Created 0600 on unix.
    pub file: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("cannot open log file: {0}")]
    File(#[from] io::Error),

    #[error("cannot install subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config.level));
    let file = config.file.as_deref().map(open_log_file).transpose()?;
    let json = config.format == LogFormat::Json;

    let (text_file, json_file) = match file {
        Some(file) if json => (None, Some(json_layer().with_writer(file))),
        Some(file) => (Some(fmt::layer().with_ansi(false).with_writer(file)), None),
        None => (None, None),
    };
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with((!json).then(|| fmt::layer().with_writer(io::stderr)))
        .with(json.then(|| json_layer().with_writer(io::stderr)))
        .with(text_file)
        .with(json_file);
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::debug!(
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "logging initialized"
    );
    Ok(())
}

fn default_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::new(level.as_str())
}

/// One flattened JSON object per event, with the current span attached.
fn json_layer<S>() -> fmt::Layer<S, JsonFields, Format<Json, SystemTime>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .json()
        .with_timer(SystemTime)
        .with_current_span(true)
        .with_span_list(false)
        .flatten_event(true)
}

fn open_log_file(path: &Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut options = std::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options.open(path)?;
    // `mode` only applies on creation; tighten files left by older runs too.
    #[cfg(unix)]
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

/// Span for one unit of work, tagged with its correlation fields.
///
/// ```ignore
/// let span = saneitizer_core::saneitizer_span!("saneitize_run", from_id = 1, to_id = 100);
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! saneitizer_span {
    ($name:expr $(, $field:ident = $value:expr)* $(,)?) => {
        tracing::info_span!($name $(, $field = $value)*)
    };
}

/// Emit a tracing event at a [`LogLevel`] chosen at runtime.
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            $crate::logging::LogLevel::Trace => tracing::trace!($($arg)+),
            $crate::logging::LogLevel::Debug => tracing::debug!($($arg)+),
            $crate::logging::LogLevel::Info => tracing::info!($($arg)+),
            $crate::logging::LogLevel::Warn => tracing::warn!($($arg)+),
            $crate::logging::LogLevel::Error => tracing::error!($($arg)+),
        }
    };
}
pub(crate) use log_at;

/// Severity used for the `[log]` filter and for log-only remediation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = s.trim().to_lowercase();
        [Self::Trace, Self::Debug, Self::Info, Self::Warn, Self::Error]
            .into_iter()
            .find(|l| l.as_str() == level || (level == "warning" && *l == Self::Warn))
            .ok_or_else(|| {
                format!("unknown log level: {s}. Expected trace, debug, info, warn or error")
            })
    }
}
