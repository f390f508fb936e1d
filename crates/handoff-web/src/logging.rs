use std::path::{Path, PathBuf};
use std::sync::Mutex;

use jiff::Timestamp;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "handoff_web=debug,handoff_core=debug,tower_http=info";

/// Installs the global subscriber: colored output on stdout plus a plain-text
/// copy in a fresh `<log_dir>/<timestamp>.txt`. Returns the log file path.
pub fn init(log_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(format!("{}.txt", file_stamp(Timestamp::now())));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();

    Ok(path)
}

/// UTC ISO-8601 timestamp safe for use in file names (`:` replaced by `-`).
fn file_stamp(now: Timestamp) -> String {
    format!(
        "{}.{:03}Z",
        now.strftime("%Y-%m-%dT%H-%M-%S"),
        now.subsec_millisecond()
    )
}
