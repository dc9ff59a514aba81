use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "fetch.log";
const DEFAULT_FILTER: &str = "kpi_ingest=info,warn";

/// Console output on stderr plus a daily-rotated JSON log under `log_dir`.
///
/// The returned guard flushes the file writer on drop; hold it until exit.
/// `RUST_LOG` overrides the default filter.
pub fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let file = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            Some(tracing_appender::non_blocking(appender))
        }
        Err(e) => {
            eprintln!("cannot create log directory {}: {e}; logging to console only", log_dir.display());
            None
        }
    };
    let (file_writer, guard) = match file {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let file_layer = file_writer.map(|writer| fmt::layer().json().with_writer(writer));
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    guard
}
