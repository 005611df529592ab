//! Planner error types.

use super::queue::{QueueError, QueueKind};
use thiserror::Error;

/// Conditions that abort a planning run.
///
/// Per-disk and per-host failures are not errors: they move records to the
/// failed queue and the run continues.
#[derive(Debug, Error)]
pub(crate) enum PlannerError {
    #[error("empty disk list")]
    EmptyDisklist,

    #[error("cannot fit anything on tape: {0}")]
    Unfittable(String),

    #[error("queue consistency violated: {0}")]
    Consistency(#[from] QueueError),

    #[error("record {record} expected on {expected} queue")]
    WrongQueue { record: usize, expected: QueueKind },

    #[error("cannot write schedule: {0}")]
    Output(#[from] std::io::Error),

    #[error("history store error: {0}")]
    History(#[from] anyhow::Error),
}

pub(crate) type PlannerResult<T> = Result<T, PlannerError>;
