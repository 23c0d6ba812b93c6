//! Structured logging setup.
//!
//! The subscriber is built from the loaded [`Config`] and returned as a
//! [`Dispatch`] value, so the caller decides whether it becomes the process
//! default (`main`) or is only scoped to a block (tests).
//!
//! - `production`: JSON lines, `info` and above, no ANSI colors.
//! - any other profile: human readable text with colors, `debug` and above.
//!
//! `RUST_LOG` takes precedence over the profile's default level.

use crate::config::Config;
use tracing::{dispatcher::SetGlobalDefaultError, Dispatch};
use tracing_subscriber::{fmt::MakeWriter, EnvFilter};

pub const PRODUCTION_LEVEL: &str = "info";
pub const DEVELOPMENT_LEVEL: &str = "debug";

pub fn default_level(config: &Config) -> &'static str {
    if config.is_production() {
        PRODUCTION_LEVEL
    } else {
        DEVELOPMENT_LEVEL
    }
}

/// Builds the subscriber for `config`, writing to stdout.
pub fn dispatch(config: &Config) -> Dispatch {
    dispatch_with_writer(config, std::io::stdout)
}

pub fn dispatch_with_writer<W>(config: &Config, writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(config)));

    if config.is_production() {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_ansi(false)
            .with_env_filter(filter)
            .with_writer(writer)
            .finish();
        Dispatch::new(subscriber)
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_target(false)
            .with_ansi(true)
            .with_env_filter(filter)
            .with_writer(writer)
            .finish();
        Dispatch::new(subscriber)
    }
}

/// Installs the subscriber for `config` as the process-wide default.
pub fn init(config: &Config) -> Result<(), SetGlobalDefaultError> {
    tracing::dispatcher::set_global_default(dispatch(config))
}
