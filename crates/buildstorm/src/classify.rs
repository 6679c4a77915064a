//! Status classification of a build snapshot.

use crate::build::{BuildRecord, BuildStatus};
use serde::Serialize;

/// A snapshot partitioned by status.
///
/// Each bucket keeps the relative order of the snapshot it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classified {
    /// Builds currently executing
    pub running: Vec<BuildRecord>,
    /// Builds waiting for a runner
    pub pending: Vec<BuildRecord>,
    /// Builds in any terminal status
    pub terminal: Vec<BuildRecord>,
}

impl Classified {
    /// Nothing running and nothing queued
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.running.is_empty() && self.pending.is_empty()
    }

    /// Queued work exists but no runner is picking it up
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.running.is_empty() && !self.pending.is_empty()
    }
}

/// Partition `population` into running, pending and terminal builds.
///
/// Stable filter: no sorting, no duplication.
#[must_use]
pub fn classify(population: &[BuildRecord]) -> Classified {
    let mut classified = Classified::default();
    for record in population {
        match record.status {
            BuildStatus::Running => classified.running.push(record.clone()),
            BuildStatus::Pending => classified.pending.push(record.clone()),
            _ => classified.terminal.push(record.clone()),
        }
    }
    classified
}

/// The most recently created build, ordered by descending `id`.
///
/// `number` is only unique per repository, so whole-server snapshots must
/// be ordered by the global `id`.
#[must_use]
pub fn latest_build(population: &[BuildRecord]) -> Option<&BuildRecord> {
    population.iter().max_by_key(|record| record.id)
}
