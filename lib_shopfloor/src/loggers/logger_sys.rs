use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Failures while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The log directory could not be created or listed.
    #[error("log directory {path}: {source}")]
    Io {
        /// Directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The level string is not a valid filter directive.
    #[error("invalid log level '{0}'")]
    Level(String),

    /// A global subscriber is already installed.
    #[error("logging already initialised: {0}")]
    AlreadyInitialised(String),
}

/// # Setup Logging
///
/// Installs the global subscriber:
/// - filter from `RUST_LOG` when set, otherwise `log_level`;
/// - a console layer with targets;
/// - a non-blocking file layer writing `<app_name>_<timestamp>.log` in
///   `log_dir`, after older files of the same app have been removed.
///
/// `log` records from library code are forwarded into the subscriber.
///
/// # Returns
/// The appender's [`WorkerGuard`]. Keep it alive for the life of the process;
/// dropping it flushes and stops the file writer.
pub fn setup_logging(log_dir: &Path, log_level: &str, app_name: &str) -> Result<WorkerGuard, LoggerError> {
    fs::create_dir_all(log_dir).map_err(|source| LoggerError::Io {
        path: log_dir.to_path_buf(),
        source,
    })?;

    // Keep the previous run's file, drop the rest
    let removed = cleanup_old_logs(log_dir, app_name, 1)?;

    let file_name = format!("{}_{}.log", app_name, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let (writer, guard) = non_blocking(rolling::never(log_dir, &file_name));

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level).map_err(|_| LoggerError::Level(log_level.to_string()))?,
    };

    let console_layer = fmt::layer().with_target(true);
    let file_layer = fmt::layer().with_ansi(false).with_target(true).with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::AlreadyInitialised(e.to_string()))?;

    log::info!(
        "Logging initialised at '{}' into {} ({} old file(s) removed)",
        log_level,
        log_dir.join(&file_name).display(),
        removed
    );
    Ok(guard)
}

/// Deletes all but the `keep` newest `<app_name>_*.log` files in `log_dir`.
///
/// Returns how many files were removed. Files that cannot be deleted are
/// reported on stderr and skipped, since logging is not up yet.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> Result<usize, LoggerError> {
    let entries = fs::read_dir(log_dir).map_err(|source| LoggerError::Io {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let prefix = format!("{}_", app_name);
    let mut logs: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|res| res.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .map(|p| {
            let modified = fs::metadata(&p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, p)
        })
        .collect();

    // Newest first; names carry the timestamp, so they break ties
    logs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut removed = 0;
    for (_, path) in logs.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn keeps_only_the_newest_files_of_the_app() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "monitor_live_2026-01-01_00-00-00.log",
            "monitor_live_2026-01-02_00-00-00.log",
            "monitor_live_2026-01-03_00-00-00.log",
            "other_app_2026-01-01_00-00-00.log",
            "monitor_live.txt",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let removed = cleanup_old_logs(dir.path(), "monitor_live", 1).unwrap();
        assert_eq!(removed, 2);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(left.len(), 3);
        assert!(left.contains(&"other_app_2026-01-01_00-00-00.log".to_string()));
        assert!(left.contains(&"monitor_live.txt".to_string()));
    }

    #[test]
    fn apps_sharing_a_name_prefix_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "monitor_2026-01-01_00-00-00.log",
            "monitor_2026-01-02_00-00-00.log",
            "monitor_live_2026-01-01_00-00-00.log",
            "monitor_live_2026-01-02_00-00-00.log",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let removed = cleanup_old_logs(dir.path(), "monitor", 0).unwrap();
        assert_eq!(removed, 2);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "monitor_live_2026-01-01_00-00-00.log".to_string(),
                "monitor_live_2026-01-02_00-00-00.log".to_string(),
            ]
        );
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = cleanup_old_logs(&dir.path().join("nope"), "x", 1).unwrap_err();
        assert!(matches!(err, LoggerError::Io { .. }));
    }
}
