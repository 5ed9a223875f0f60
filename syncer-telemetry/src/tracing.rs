//! Tracing setup for the sync binary and its tests.

use std::path::PathBuf;
use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Directory log files are written to when none is configured.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to install the log bridge: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to create the log file appender: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("failed to install the global subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Output options chosen on the command line.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Filter used when `RUST_LOG` is not set.
    pub default_level: String,
    /// Writes a daily rolling log file in this directory, `None` logs to stdout only.
    pub log_dir: Option<PathBuf>,
}

impl LoggingOptions {
    /// Picks the default filter from the verbosity flags. `trace` wins over `debug`.
    pub fn from_flags(verbose: bool, debug_logging: bool, logging_off: bool) -> Self {
        let default_level = if debug_logging {
            "trace"
        } else if verbose {
            "debug"
        } else {
            "info"
        };

        Self {
            default_level: default_level.to_string(),
            log_dir: (!logging_off).then(|| PathBuf::from(DEFAULT_LOG_DIR)),
        }
    }
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self::from_flags(false, false, false)
    }
}

/// Flushes buffered log lines when dropped. Keep it alive for the lifetime of `main`.
#[must_use]
#[derive(Debug)]
pub struct LogFlusher {
    _guard: Option<WorkerGuard>,
}

/// Installs the global subscriber for `app_name`.
///
/// `RUST_LOG` overrides the default level. Lines go to stdout and, when a log directory is
/// configured, to `{log_dir}/{app_name}.log.YYYY-MM-DD`.
pub fn init_tracing(app_name: &str, options: &LoggingOptions) -> Result<LogFlusher, TracingError> {
    tracing_log::LogTracer::init()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_level));
    let stdout_layer = fmt::layer().with_target(false);

    let (file_layer, guard) = match &options.log_dir {
        Some(log_dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(app_name)
                .filename_suffix("log")
                .build(log_dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LogFlusher { _guard: guard })
}

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a subscriber that writes through the test harness, once per process.
///
/// Honors `RUST_LOG`; stays silent above `info` otherwise.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // Another subscriber may already be installed by the test binary.
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
