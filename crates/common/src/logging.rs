//! Tracing setup.
//!
//! The filter honors `RUST_LOG` when set; otherwise the configured level
//! applies. Output goes to stderr so recordings and device listings keep
//! stdout to themselves, or to the configured log file with ANSI stripped.

use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use crate::config::LoggingConfig;
use crate::error::TethercapResult;

/// Initialize the global tracing subscriber from `config`.
pub fn init_logging(config: &LoggingConfig) -> TethercapResult<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let builder = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(Arc::new(file))
                .with_ansi(false);
            if config.json {
                tracing::subscriber::set_global_default(builder.json().finish()).ok();
            } else {
                tracing::subscriber::set_global_default(builder.finish()).ok();
            }
        }
        None => {
            let builder = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(io::stderr);
            if config.json {
                tracing::subscriber::set_global_default(builder.json().finish()).ok();
            } else {
                tracing::subscriber::set_global_default(builder.finish()).ok();
            }
        }
    }
    Ok(())
}

/// Initialize logging with defaults (useful for tests and quick scripts).
pub fn init_default_logging() {
    let _ = init_logging(&LoggingConfig::default());
}
