//! Job lifecycle statuses and the monotonic merge rule.
//!
//! Status updates for one job arrive from two unsynchronized channels
//! (the realtime change feed and the poll loop).  [`should_apply`] is
//! the single decision point that makes those channels commutative and
//! duplicate-tolerant: whichever channel observes a transition first
//! wins, and the other channel's copy of the same transition becomes an
//! idempotent no-op.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Lifecycle status of a generation job.
///
/// Transitions are monotonic along `Queued -> Processing ->
/// {Completed | Failed}`, with `Queued -> Failed` also permitted for
/// dispatch-time failures.  `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Position in the lifecycle order.  The two terminal states share
    /// a rank: neither supersedes the other.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Whether this status permits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Decide whether an incoming status observation may be applied over
/// the locally held one.
///
/// - A terminal local status only admits the *same* terminal status
///   (re-applying it is how refined fields, e.g. a late result URL,
///   reach the view).  The first terminal status observed wins.
/// - Otherwise an update applies iff it is not earlier in the lifecycle
///   than the local status.  Same-status re-application is allowed.
///
/// Stale updates are never an error; the caller drops them silently.
pub fn should_apply(current: JobStatus, incoming: JobStatus) -> bool {
    if current.is_terminal() {
        incoming == current
    } else {
        incoming.rank() >= current.rank()
    }
}

/// Status of one item in a batch submission.
///
/// Extends [`JobStatus`] with the two client-local pre-dispatch states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum BatchItemStatus {
    /// Selected, pipeline not started.  Removable.
    Pending,
    /// Upload pipeline in flight.
    Uploading,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl From<JobStatus> for BatchItemStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => BatchItemStatus::Queued,
            JobStatus::Processing => BatchItemStatus::Processing,
            JobStatus::Completed => BatchItemStatus::Completed,
            JobStatus::Failed => BatchItemStatus::Failed,
        }
    }
}
