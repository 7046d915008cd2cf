use crate::errors::JobStateError;
use crate::models::{Job, JobAction, JobStatus};

/// What a legal action does to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The job moves to the given status.
    To(JobStatus),
    /// A new job is started from the same source; the original is left as is.
    Respawn,
}

/// Decide whether `action` may be applied to `job` in its current status.
pub fn check(job: &Job, action: JobAction) -> Result<Transition, JobStateError> {
    use JobStatus::*;

    let rejection = match (action, job.status) {
        (JobAction::Pause, InProgress) => return Ok(Transition::To(Paused)),
        (JobAction::Pause, Paused) => "job is already paused",
        (JobAction::Pause, Completed) => "cannot pause a completed job",
        (JobAction::Pause, Failed) => "cannot pause a failed job",
        (JobAction::Pause, Pending) => "cannot pause a pending job",

        (JobAction::Resume, Paused) => return Ok(Transition::To(InProgress)),
        (JobAction::Resume, _) => "can only resume paused jobs",

        (JobAction::Stop, Completed) => "job is already completed",
        (JobAction::Stop, Failed) => "job is already stopped",
        (JobAction::Stop, _) => return Ok(Transition::To(Failed)),

        (JobAction::Retry, Failed) => return Ok(Transition::Respawn),
        (JobAction::Retry, _) => "job is not in failed state",

        (JobAction::Start, _) => "start creates a new job and cannot be applied to an existing one",
    };

    Err(JobStateError {
        job_id: job.id.clone(),
        current_status: job.status,
        action,
        reason: rejection.to_string(),
    })
}
