//! Logging setup.
//!
//! One call in `main` after the config is loaded: [`init`] picks the filter
//! from the `-v` flags, the config, and `RUST_LOG`, and sends output to
//! stderr or the configured log file.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::Config;
use crate::error::AppError;

/// Initialise the global tracing subscriber from resolved config.
///
/// `verbosity` is the `-v` count: 1 forces `debug`, 2+ forces `trace`, both
/// overriding config and `RUST_LOG`. At 0 the configured level applies, with
/// `RUST_LOG` taking precedence when set.
pub fn init(config: &Config, verbosity: u8) -> Result<(), AppError> {
    let filter = match cli_level(verbosity) {
        Some(forced) => EnvFilter::new(forced),
        None => {
            // Strict check first — EnvFilter would accept any bare ident as
            // a target directive instead of rejecting a typo'd level.
            let configured = config
                .log_level
                .parse::<LevelFilter>()
                .map_err(|_| {
                    AppError::Logger(format!("unrecognised log level '{}'", config.log_level))
                })?;
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(configured.to_string()))
        }
    };

    let writer = match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    AppError::Logger(format!("cannot open log file {}: {e}", path.display()))
                })?;
            BoxMakeWriter::new(file)
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .try_init()
        .map_err(|e| AppError::Logger(format!("subscriber already set: {e}")))?;

    Ok(())
}

fn cli_level(verbosity: u8) -> Option<&'static str> {
    match verbosity {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    }
}
