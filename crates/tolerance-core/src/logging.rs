use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "tolerance_core=info,tolerance_cli=info";

pub fn init_logging(service_name: &str, log_file: Option<&Path>) -> bool {
    init_logging_with_filter(service_name, DEFAULT_LOG_FILTER, log_file)
}

/// Install the global subscriber: compact stderr output filtered by
/// `RUST_LOG` (or `default_filter`), plus a debug-level file log when
/// `log_file` is given.
///
/// Returns `false` if a subscriber was already installed; the existing one
/// is left in place.
pub fn init_logging_with_filter(
    service_name: &str,
    default_filter: &str,
    log_file: Option<&Path>,
) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter);

    let mut file_error = None;
    let file_layer = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG),
            ),
            Err(e) => {
                file_error = Some(e);
                None
            }
        }
    });

    let installed = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = service_name, "logging initialised");
    }
    if let (Some(path), Some(e)) = (log_file, file_error) {
        tracing::warn!(path = %path.display(), error = %e, "could not open log file");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("core.log");
        // Another test may already have installed a subscriber, so only the
        // second call's result is deterministic.
        let _ = init_logging("test", Some(&log));
        assert!(!init_logging("test", None));
    }
}
