//! Tracing setup: env-filtered stdout plus a non-blocking file layer under
//! the output directory.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the subscriber once per process.
///
/// `RUST_LOG` controls filtering (default `info`). Files rotate daily under
/// `<out_dir>/logs/`; the terminal gets a compact layer without module paths.
pub fn init<P: AsRef<Path>>(out_dir: P) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = out_dir.as_ref().join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::daily(&log_dir, "metacrawl.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    // The guard must outlive the process or buffered lines are lost.
    Box::leak(Box::new(file_guard));

    tracing::debug!(dir = %log_dir.display(), "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    #[test]
    fn test_log_dir_creation() {
        let dir = TempDir::new().unwrap();
        // The subscriber can only be installed once per process, so only the
        // directory side effect is testable here.
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        assert!(dir.path().join("logs").exists());
    }
}
