//! Command handlers - extracted from main.rs for testability
//!
//! `run` and `stress` share one execution path: assemble the session from a
//! [`SessionPlan`](crate::config::SessionPlan), hook Ctrl-C to its
//! cancellation token, print the report and optionally save it as JSON.

pub mod run;
pub mod stress;

pub use run::execute_run;
pub use stress::execute_stress;

use crate::config::{SessionPlan, Verbosity};
use crate::error::{CliError, CliResult};
use buildstorm::{
    render_run_json, render_run_report, GitHubClient, Rounds, RunReport, StressSession,
};
use console::style;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run a planned session to completion and report it
pub async fn execute_session(
    plan: SessionPlan,
    rounds: Rounds,
    output: Option<&Path>,
    verbosity: Verbosity,
) -> CliResult<()> {
    if !verbosity.is_quiet() {
        println!(
            "{} {}",
            style("Stress testing").bold(),
            style(&plan.config.ci.server).cyan()
        );
        if let Some(github) = &plan.github {
            println!("Using github API url {}", github.base_url);
        }
    }

    let mut session = StressSession::connect(plan.config);
    if let Some(github) = plan.github {
        session = session.with_mutator(Arc::new(GitHubClient::new(github)));
    }

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let mut report = RunReport::new(
        session.config().ci.server.clone(),
        session.config().repo.clone(),
    );
    let result = session
        .run_into(&plan.workload, rounds, &mut report, &cancel)
        .await;
    interrupt.abort();

    println!("{}", render_run_report(&report));
    if let Some(path) = output {
        save_report(path, &report)?;
        if !verbosity.is_quiet() {
            println!("Report written to {}", style(path.display()).green());
        }
    }

    result.map_err(CliError::from)
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("interrupted, stopping");
        cancel.cancel();
    }
}

/// Write the JSON report to `path`
pub fn save_report(path: &Path, report: &RunReport) -> CliResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_run_json(report))
        .map_err(|e| CliError::report(format!("{}: {e}", path.display())))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use buildstorm::{RepoSlug, RunOutcome};
    use tempfile::TempDir;

    #[test]
    fn test_save_report_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("run.json");
        let mut report = RunReport::new("http://ci", RepoSlug::new("o", "r"));
        report.outcome = RunOutcome::Cancelled;

        save_report(&path, &report).unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["outcome"]["kind"], "cancelled");
        assert_eq!(saved["repo"], "o/r");
    }
}
