//! Console and rolling-file logging for the plate solver binary

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log files older than this are deleted
const RETENTION: Duration = Duration::from_secs(3 * 24 * 60 * 60);
const SWEEP_EVERY: Duration = Duration::from_secs(60 * 60);

/// Flushes buffered file output when dropped; hold it for the life of `main`
pub struct LogGuard {
    _file_writer: WorkerGuard,
}

/// Lower-cased level name, or `None` when it is not a tracing level
pub fn parse_level(level: &str) -> Option<&'static str> {
    ["trace", "debug", "info", "warn", "error"]
        .into_iter()
        .find(|known| known.eq_ignore_ascii_case(level.trim()))
}

/// `RUST_LOG` when set and valid, otherwise the configured level
fn filter_for(level: &'static str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install stdout and daily `<prefix>.<date>.log` output under `log_dir`
///
/// Spawns the retention sweep, so call it inside the tokio runtime.
pub fn init_logging(log_dir: impl AsRef<Path>, prefix: &str, level: &str) -> anyhow::Result<LogGuard> {
    let log_dir = log_dir.as_ref().to_path_buf();
    let resolved = parse_level(level);
    let effective = resolved.unwrap_or("info");

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(&log_dir)
        .with_context(|| format!("Cannot open log directory {:?}", log_dir))?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(filter_for(effective)),
        )
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_filter(filter_for(effective)),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    if resolved.is_none() {
        tracing::warn!("Unknown log level {:?}, logging at info", level);
    }
    tracing::debug!("Writing logs to {:?}", log_dir);

    spawn_retention_sweep(log_dir, prefix.to_string());

    Ok(LogGuard {
        _file_writer: file_guard,
    })
}

fn spawn_retention_sweep(log_dir: PathBuf, prefix: String) {
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(SWEEP_EVERY);
        loop {
            sweep.tick().await;
            let expired = match expired_logs(&log_dir, &prefix, SystemTime::now(), RETENTION) {
                Ok(paths) => paths,
                Err(e) => {
                    tracing::warn!("Cannot scan {:?} for old logs: {}", log_dir, e);
                    continue;
                }
            };
            for path in expired {
                match fs::remove_file(&path) {
                    Ok(()) => tracing::info!("Removed old log {:?}", path),
                    Err(e) => tracing::warn!("Cannot remove old log {:?}: {}", path, e),
                }
            }
        }
    });
}

/// `<prefix>*.log` files in `log_dir` last modified more than `retention` before `now`
fn expired_logs(
    log_dir: &Path,
    prefix: &str,
    now: SystemTime,
    retention: Duration,
) -> std::io::Result<Vec<PathBuf>> {
    let mut expired = Vec::new();

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !(name.starts_with(prefix) && name.ends_with(".log")) {
            continue;
        }

        let age = now
            .duration_since(entry.metadata()?.modified()?)
            .unwrap_or_default();
        if age > retention {
            expired.push(entry.path());
        }
    }

    expired.sort();
    Ok(expired)
}
