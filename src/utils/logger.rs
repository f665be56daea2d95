use crate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initialize logging; returns the file writer guard when logging to a directory
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_dir) = &config.directory {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!("Failed to create log directory {}: {}", log_dir.display(), e);
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "convertd.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let _ = tracing_subscriber::fmt()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_env_filter(filter)
            .try_init();

        tracing::info!("Logging to {}", log_dir.display());
        Some(guard)
    } else {
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init();
        None
    }
}
