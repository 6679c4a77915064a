//! Forced rebuilds over a build-number range.

use crate::client::BuildRestarter;
use crate::config::RepoSlug;
use crate::result::{StressError, StressResult};

/// Restart builds `start+1 ..= start+count` of `repo`, in order.
///
/// Fails fast: the first failing request aborts the trigger. Requests
/// already issued stay issued, and duplicate restarts are not guarded
/// against. Every number the server accepted is appended to `restarted`,
/// including those issued before a failure.
pub async fn trigger_rebuilds(
    restarter: &dyn BuildRestarter,
    repo: &RepoSlug,
    start: u64,
    count: u64,
    restarted: &mut Vec<u64>,
) -> StressResult<()> {
    let last = start
        .checked_add(count)
        .ok_or(StressError::InvalidRange {
            start,
            last: u64::MAX,
        })?;
    for number in (start + 1)..=last {
        tracing::info!(number, "restarting build");
        if let Err(e) = restarter.restart_build(repo, number).await {
            tracing::error!(number, error = %e, "restart failed, aborting trigger");
            return Err(e);
        }
        restarted.push(number);
    }
    Ok(())
}
