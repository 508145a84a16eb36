use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tracing_appender::rolling;

pub const LOG_FILE_NAME: &str = "gixy_gate.log";

pub fn init_logger() {
    let base_dir = crate::config::base_dir();

    let file_appender = rolling::never(&base_dir, LOG_FILE_NAME);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Filter from environment or default to INFO
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout belongs to command output (`strip` writes the dump there)
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!("gixy-gate logger initialized. Log file: {}", base_dir.join(LOG_FILE_NAME).display());

    // leaked guard is intentional to keep logging alive for the process duration
    std::mem::forget(_guard);
}
