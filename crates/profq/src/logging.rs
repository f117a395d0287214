use crate::error::Result;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

fn filter(configured: Option<&str>, default: &str) -> EnvFilter {
    configured
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

/// Daemon logging: append to the session log, no colors.
pub fn init_daemon(log_path: &Path, configured: Option<&str>) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(configured, "info"))
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .try_init();
    Ok(())
}

/// Client logging: warnings and errors to stderr.
pub fn init_client(configured: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(configured, "warn"))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}
