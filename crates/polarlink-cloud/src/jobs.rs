// SPDX-License-Identifier: MIT
//
// Cloud-job lifecycle tracking. Watches the mapped printer state for a
// terminal transition and turns it into exactly one completion notice. The
// job record is cleared before the notice is handed back, so a send failure
// never causes a duplicate on the next cycle.

use tracing::info;

use polarlink_core::types::PrinterState;
use polarlink_printhost::client::MoonrakerClient;
use polarlink_printhost::types::JobProgress;

use crate::protocol::{JobNotice, PrinterStatusSnapshot};
use crate::session::{CloudJob, SharedState};

/// How a tracked cloud job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Canceled,
}

impl JobOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }
}

/// Terminal detection against the mapped state for this tick.
///
/// Postprocessing counts as completion: a tracked cloud job maps the
/// engine's `complete` state to Postprocessing, and waiting for Idle
/// instead would report the job as canceled. A job still preparing is
/// never terminal, whatever the engine shows from its previous print.
pub fn detect_terminal(job: &CloudJob, status: PrinterState) -> Option<JobOutcome> {
    if job.preparing {
        return None;
    }
    match status {
        PrinterState::Complete | PrinterState::Postprocessing => Some(JobOutcome::Completed),
        PrinterState::Idle | PrinterState::Error => Some(JobOutcome::Canceled),
        _ => None,
    }
}

/// Per-cycle check. Returns the notice to transmit, if the tracked job just
/// reached a terminal state.
pub async fn check_completion(
    client: &MoonrakerClient,
    shared: &SharedState,
    snapshot: &PrinterStatusSnapshot,
) -> Option<JobNotice> {
    let job = shared.job()?;
    let outcome = detect_terminal(&job, snapshot.status)?;

    let progress = client.job_progress().await;
    shared.take_job();

    let serial = shared.serial_number()?;
    info!(job_id = %job.job_id, outcome = outcome.as_str(), "cloud job reached terminal state");
    Some(completion_notice(
        serial,
        job.job_id,
        outcome,
        snapshot.print_seconds,
        Some(progress),
    ))
}

/// Build a completion notice, omitting zero-valued metrics.
pub fn completion_notice(
    serial_number: String,
    job_id: String,
    outcome: JobOutcome,
    print_seconds: u64,
    progress: Option<JobProgress>,
) -> JobNotice {
    let progress = progress.unwrap_or_default();
    JobNotice {
        serial_number,
        job_id,
        state: outcome.as_str().into(),
        print_seconds: nonzero(print_seconds),
        filament_used: nonzero(progress.filament_used),
        bytes_read: nonzero(progress.bytes_read),
        file_size: nonzero(progress.file_size),
    }
}

fn nonzero(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_job() -> CloudJob {
        let mut job = CloudJob::new("J1".into(), None, None);
        job.preparing = false;
        job
    }

    #[test]
    fn postprocessing_and_complete_both_mean_completed() {
        let job = started_job();
        assert_eq!(
            detect_terminal(&job, PrinterState::Postprocessing),
            Some(JobOutcome::Completed)
        );
        assert_eq!(
            detect_terminal(&job, PrinterState::Complete),
            Some(JobOutcome::Completed)
        );
    }

    #[test]
    fn idle_or_error_while_tracked_means_canceled() {
        let job = started_job();
        assert_eq!(
            detect_terminal(&job, PrinterState::Idle),
            Some(JobOutcome::Canceled)
        );
        assert_eq!(
            detect_terminal(&job, PrinterState::Error),
            Some(JobOutcome::Canceled)
        );
    }

    #[test]
    fn running_states_are_not_terminal() {
        let job = started_job();
        for state in [
            PrinterState::Printing,
            PrinterState::Paused,
            PrinterState::Cancelling,
            PrinterState::Preparing,
        ] {
            assert_eq!(detect_terminal(&job, state), None, "state {state:?}");
        }
    }

    #[test]
    fn preparing_job_ignores_stale_engine_state() {
        let job = CloudJob::new("J1".into(), None, None);
        assert_eq!(detect_terminal(&job, PrinterState::Complete), None);
        assert_eq!(detect_terminal(&job, PrinterState::Idle), None);
    }

    #[test]
    fn notice_omits_zero_metrics() {
        let notice = completion_notice(
            "SN1".into(),
            "J1".into(),
            JobOutcome::Canceled,
            0,
            Some(JobProgress::default()),
        );
        assert_eq!(notice.state, "canceled");
        assert!(notice.print_seconds.is_none());
        assert!(notice.filament_used.is_none());
        assert!(notice.bytes_read.is_none());
        assert!(notice.file_size.is_none());
    }

    #[test]
    fn notice_carries_nonzero_metrics() {
        let notice = completion_notice(
            "SN1".into(),
            "J1".into(),
            JobOutcome::Completed,
            3600,
            Some(JobProgress {
                file_size: 8192,
                bytes_read: 8192,
                filament_used: 420,
            }),
        );
        assert_eq!(notice.state, "completed");
        assert_eq!(notice.print_seconds, Some(3600));
        assert_eq!(notice.file_size, Some(8192));
    }
}
