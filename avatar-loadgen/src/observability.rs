//! Logging setup for the load generator binary.

use std::env;
use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

use crate::config::{Config, LogFormat};

/// Installs the global `tracing` subscriber, writing to stderr.
pub fn initialize_tracing(config: &Config) {
    let (level, env_filter) = parse_rust_log(config);

    let format = match config.logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .flatten_event(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .compact()
            .boxed(),
        LogFormat::Simplified | LogFormat::Auto => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(level))
        .with(env_filter)
        .init();
}

/// Determines the effective log level and the filter for third-party crates.
///
/// `RUST_LOG` wins if it is set. A plain level applies to our crates only; anything else is used
/// literally as an [`EnvFilter`]. Without `RUST_LOG`, `verbose` raises the configured level to
/// `DEBUG`, which shows every upload and download.
pub fn parse_rust_log(config: &Config) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) if config.verbose => config.logging.level.max(LevelFilter::DEBUG),
        Err(_) => config.logging.level,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        avatar_client=TRACE,\
        avatar_loadgen=TRACE,\
        avatar_load=TRACE,\
        ",
    );

    (level, env_filter)
}
