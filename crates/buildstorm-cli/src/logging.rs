//! Logging setup.
//!
//! `RUST_LOG` wins when set; otherwise the level follows `-v`/`-q`.
//! Log lines go to stderr so stdout carries only the report.

use crate::commands::LogFormatArg;
use crate::config::Verbosity;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Build the level filter for a run
#[must_use]
pub fn env_filter(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(verbosity: Verbosity, format: LogFormatArg, color: bool) {
    let filter = env_filter(verbosity);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormatArg::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormatArg::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(color)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
