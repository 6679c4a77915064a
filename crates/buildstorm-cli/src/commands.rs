//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Buildstorm: push commits and forced rebuilds at a Drone CI server, then
/// watch it until every build has finished
#[derive(Parser, Debug)]
#[command(name = "buildstorm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Log line format
    #[arg(long, default_value = "pretty", global = true)]
    pub log_format: LogFormatArg,

    /// YAML profile with server, timing and branch defaults
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server and repository connection
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Commit, rebuild and watch the server drain, once
    Run(RunArgs),

    /// Commit once, then rebuild and watch in a loop
    ///
    /// Loops until a round fails, `--rounds` is reached or Ctrl-C is
    /// pressed. With `--start-build` and `--last-build` no commits are made
    /// and the given range is rebuilt instead.
    Stress(StressArgs),
}

/// Connection flags shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Drone server address
    #[arg(short, long, env = "DRONE_SERVER", global = true)]
    pub server: Option<String>,

    /// Drone API token
    #[arg(short, long, env = "DRONE_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Repository to test, as org/name [default: drone-dev-test/junk]
    #[arg(short, long, env = "REPO", global = true)]
    pub repo: Option<String>,

    /// GitHub API base URL
    #[arg(long = "github-baseurl", env = "GITHUB_BASEURL", global = true)]
    pub github_baseurl: Option<String>,

    /// GitHub API token
    #[arg(long, env = "GITHUB_TOKEN", global = true, hide_env_values = true)]
    pub github_token: Option<String>,

    /// Name of the generated commits' author [default: John Doe]
    #[arg(long, env = "GITHUB_AUTHOR_NAME", global = true)]
    pub github_author_name: Option<String>,

    /// Email of the generated commits' author [default: johndoe@gmail.com]
    #[arg(long, env = "GITHUB_AUTHOR_EMAIL", global = true)]
    pub github_author_email: Option<String>,
}

/// Explicit build range instead of fresh commits
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct RangeArgs {
    /// Rebuild builds after this number (requires --last-build)
    #[arg(long)]
    pub start_build: Option<u64>,

    /// Last build number to rebuild (requires --start-build)
    #[arg(long)]
    pub last_build: Option<u64>,
}

/// Completion watcher tuning
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct WatchArgs {
    /// Sleep between polls, in milliseconds [default: 2000]
    #[arg(long, value_name = "MS")]
    pub poll_interval: Option<u64>,

    /// Minimum spacing between log reads, in milliseconds [default: 250]
    #[arg(long, value_name = "MS")]
    pub log_spacing: Option<u64>,

    /// Give up on a log read after this many seconds [default: 30]
    #[arg(long, value_name = "SECS")]
    pub log_timeout: Option<u64>,

    /// Fail a round that has not drained after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Fail a round after this many polls
    #[arg(long)]
    pub max_polls: Option<u32>,

    /// Builds the watcher polls: the whole server or only the repository
    #[arg(long)]
    pub scope: Option<ScopeArg>,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Number of commits to create
    #[arg(long, default_value = "1")]
    pub commits: u32,

    /// Seconds to wait after each commit
    #[arg(long, default_value = "20", value_name = "SECS")]
    pub commit_wait: u64,

    /// Explicit range
    #[command(flatten)]
    pub range: RangeArgs,

    /// Watcher tuning
    #[command(flatten)]
    pub watch: WatchArgs,

    /// Write the JSON report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the stress command
#[derive(Parser, Debug)]
pub struct StressArgs {
    /// Number of commits to create
    #[arg(short, long, default_value = "50")]
    pub commits: u32,

    /// Seconds to wait after each commit
    #[arg(long, default_value = "5", value_name = "SECS")]
    pub commit_wait: u64,

    /// Explicit range
    #[command(flatten)]
    pub range: RangeArgs,

    /// Stop after this many rounds (default: until failure or Ctrl-C)
    #[arg(long)]
    pub rounds: Option<u32>,

    /// Seconds to pause between rounds [default: 0]
    #[arg(long, value_name = "SECS")]
    pub round_pause: Option<u64>,

    /// Watcher tuning
    #[command(flatten)]
    pub watch: WatchArgs,

    /// Write the JSON report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Color argument for CLI
#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Log line format
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormatArg {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Watch scope argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeArg {
    /// Every build on the server
    Server,
    /// Only the target repository
    Repo,
}

impl From<ScopeArg> for buildstorm::WatchScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Server => Self::Server,
            ScopeArg::Repo => Self::Repo,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    mod run_tests {
        use super::*;

        #[test]
        fn test_run_defaults() {
            let cli = parse(&["buildstorm", "run"]);
            match cli.command {
                Commands::Run(args) => {
                    assert_eq!(args.commits, 1);
                    assert_eq!(args.commit_wait, 20);
                    assert!(args.range.start_build.is_none());
                    assert!(args.output.is_none());
                }
                Commands::Stress(_) => panic!("expected run"),
            }
        }

        #[test]
        fn test_run_with_watch_flags() {
            let cli = parse(&[
                "buildstorm",
                "run",
                "--poll-interval",
                "500",
                "--deadline",
                "600",
                "--scope",
                "repo",
            ]);
            let Commands::Run(args) = cli.command else {
                panic!("expected run");
            };
            assert_eq!(args.watch.poll_interval, Some(500));
            assert_eq!(args.watch.deadline, Some(600));
            assert_eq!(args.watch.scope, Some(ScopeArg::Repo));
        }
    }

    mod stress_tests {
        use super::*;

        #[test]
        fn test_stress_defaults() {
            let cli = parse(&["buildstorm", "stress"]);
            let Commands::Stress(args) = cli.command else {
                panic!("expected stress");
            };
            assert_eq!(args.commits, 50);
            assert_eq!(args.commit_wait, 5);
            assert!(args.rounds.is_none());
        }

        #[test]
        fn test_stress_range() {
            let cli = parse(&[
                "buildstorm",
                "stress",
                "--start-build",
                "100",
                "--last-build",
                "150",
                "-c",
                "3",
            ]);
            let Commands::Stress(args) = cli.command else {
                panic!("expected stress");
            };
            assert_eq!(args.range.start_build, Some(100));
            assert_eq!(args.range.last_build, Some(150));
            assert_eq!(args.commits, 3);
        }
    }

    #[test]
    fn test_global_connection_flags_after_subcommand() {
        let cli = parse(&[
            "buildstorm",
            "run",
            "--server",
            "http://drone.local",
            "--token",
            "abc",
            "--repo",
            "org/name",
        ]);
        assert_eq!(cli.connection.server.as_deref(), Some("http://drone.local"));
        assert_eq!(cli.connection.token.as_deref(), Some("abc"));
        assert_eq!(cli.connection.repo.as_deref(), Some("org/name"));
    }

    #[test]
    fn test_verbosity_flags() {
        let cli = parse(&["buildstorm", "-vv", "run"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
        assert_eq!(cli.log_format, LogFormatArg::Pretty);
    }
}
