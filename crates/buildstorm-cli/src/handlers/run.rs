//! Handler for `buildstorm run`.

use crate::commands::{ConnectionArgs, RunArgs};
use crate::config::{plan_session, CommitRequest, Profile, Verbosity};
use crate::error::CliResult;
use buildstorm::Rounds;
use std::time::Duration;

/// Commit (or take the range), rebuild and watch, exactly once
pub async fn execute_run(
    connection: &ConnectionArgs,
    profile: &Profile,
    args: &RunArgs,
    verbosity: Verbosity,
) -> CliResult<()> {
    let plan = plan_session(
        connection,
        profile,
        &args.watch,
        &args.range,
        commit_request(args),
        None,
    )?;
    super::execute_session(plan, Rounds::Limited(1), args.output.as_deref(), verbosity).await
}

fn commit_request(args: &RunArgs) -> CommitRequest {
    CommitRequest {
        commits: args.commits,
        commit_wait: Duration::from_secs(args.commit_wait),
    }
}
