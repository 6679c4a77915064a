//! Handler for `buildstorm stress`.

use crate::commands::{ConnectionArgs, StressArgs};
use crate::config::{plan_session, CommitRequest, Profile, Verbosity};
use crate::error::{CliError, CliResult};
use buildstorm::Rounds;
use std::time::Duration;

/// Commit once (or take the range), then rebuild and watch in a loop
pub async fn execute_stress(
    connection: &ConnectionArgs,
    profile: &Profile,
    args: &StressArgs,
    verbosity: Verbosity,
) -> CliResult<()> {
    let rounds = rounds(args.rounds)?;
    let plan = plan_session(
        connection,
        profile,
        &args.watch,
        &args.range,
        CommitRequest {
            commits: args.commits,
            commit_wait: Duration::from_secs(args.commit_wait),
        },
        args.round_pause,
    )?;
    super::execute_session(plan, rounds, args.output.as_deref(), verbosity).await
}

fn rounds(limit: Option<u32>) -> CliResult<Rounds> {
    match limit {
        None => Ok(Rounds::Forever),
        Some(0) => Err(CliError::invalid_argument("--rounds must be at least 1")),
        Some(n) => Ok(Rounds::Limited(n)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_default_forever() {
        assert_eq!(rounds(None).unwrap(), Rounds::Forever);
        assert_eq!(rounds(Some(3)).unwrap(), Rounds::Limited(3));
    }

    #[test]
    fn test_zero_rounds_rejected() {
        assert!(matches!(
            rounds(Some(0)),
            Err(CliError::InvalidArgument { .. })
        ));
    }
}
