//! Buildstorm CLI Library
//!
//! Command-line interface for the Buildstorm engine.

#![warn(missing_docs)]

mod commands;
mod config;
mod error;
pub mod handlers;
pub mod logging;

pub use commands::{
    Cli, ColorArg, Commands, ConnectionArgs, LogFormatArg, RangeArgs, RunArgs, ScopeArg,
    StressArgs, WatchArgs,
};
pub use config::{
    plan_session, resolve_range, ColorChoice, CommitRequest, GitHubProfile, Profile,
    SessionPlan, StimulusProfile, Verbosity, WatchProfile, DEFAULT_REPO,
};
pub use error::{CliError, CliResult};
