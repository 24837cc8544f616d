use std::env;
use std::io::{self, IsTerminal};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{LogFormat, Logging};

/// Installs the global subscriber. All logs go to stderr.
///
/// `debug` raises the configured level to at least `DEBUG`.
pub fn initialize_tracing(logging: &Logging, debug: bool) {
    let (level, env_filter) = parse_rust_log();
    let mut level = level.unwrap_or(logging.level);
    if debug {
        level = level.max(LevelFilter::DEBUG);
    }

    let format = match logging.format {
        LogFormat::Auto if io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    };

    let layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_thread_names(true)
            .boxed(),
        LogFormat::Auto | LogFormat::Simplified => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(io::stderr)
            .with_thread_names(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(level))
        .with(env_filter)
        .init();
}

/// Reads `RUST_LOG`, which overrides the configured level.
///
/// A plain level such as `debug` replaces the configured level and keeps the default per-crate
/// filters. Anything else is used literally as filter directives.
pub fn parse_rust_log() -> (Option<LevelFilter>, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => Some(level),
            Err(_) => return (Some(LevelFilter::TRACE), EnvFilter::new(value)),
        },
        Err(_) => None,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "WARN,\
        swiftbench=TRACE,\
        swiftbench_client=TRACE,\
        ",
    );

    (level, env_filter)
}
