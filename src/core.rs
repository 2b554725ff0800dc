use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use dirs::data_dir;
use once_cell::sync::Lazy;
use rusqlite::Connection;

use crate::config::paths::DATA_DIR_NAME;

// ----------------------------------------------------------------------------
// Constants and paths
// ----------------------------------------------------------------------------

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(dir) = std::env::var("CUE_WORKER_DATA_DIR") {
        return PathBuf::from(dir);
    }
    let base = data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(DATA_DIR_NAME)
});

// ----------------------------------------------------------------------------
// Shared helpers
// ----------------------------------------------------------------------------

/// Install the fmt subscriber. Output goes to stderr so stdout stays free for
/// protocol frames when running as a child process.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    tracing::debug!(target: "cue_worker", "tracing initialized");
}

pub fn configure_sqlite(conn: &Connection) -> anyhow::Result<()> {
    conn.busy_timeout(Duration::from_millis(5_000))
        .context("sqlite busy_timeout 5s")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("sqlite journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("sqlite synchronous=NORMAL")?;
    Ok(())
}
