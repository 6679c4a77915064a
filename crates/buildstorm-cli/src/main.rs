//! Buildstorm CLI: stress a Drone CI server
//!
//! ## Usage
//!
//! ```bash
//! buildstorm run -s https://drone.local -t $TOKEN           # 1 commit, watch once
//! buildstorm stress -c 50 --commit-wait 5                    # commits, then loop
//! buildstorm stress --start-build 100 --last-build 150       # loop over a range
//! buildstorm --config storm.yaml stress --rounds 10 -o report.json
//! ```

use buildstorm_cli::{handlers, logging, Cli, CliError, CliResult, ColorChoice, Commands, Profile, Verbosity};
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let verbosity = Verbosity::from_flags(cli.verbose, cli.quiet);
    let color = ColorChoice::from(cli.color).should_color();
    console::set_colors_enabled(color);
    logging::init(verbosity, cli.log_format, color);

    let profile = match &cli.config {
        Some(path) => Profile::load(path)?,
        None => Profile::default(),
    };

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::config(format!("Failed to create async runtime: {e}")))?;

    match &cli.command {
        Commands::Run(args) => runtime.block_on(handlers::execute_run(
            &cli.connection,
            &profile,
            args,
            verbosity,
        )),
        Commands::Stress(args) => runtime.block_on(handlers::execute_stress(
            &cli.connection,
            &profile,
            args,
            verbosity,
        )),
    }
}
