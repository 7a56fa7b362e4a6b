// SPDX-License-Identifier: MIT
//
// Status snapshot construction. Building the snapshot is a pure function of
// engine readings plus session state, so the mapping rules are testable
// without a running print host.

use chrono::SecondsFormat;
use tracing::warn;

use polarlink_core::types::PrinterState;
use polarlink_printhost::client::MoonrakerClient;
use polarlink_printhost::types::{HeaterReadings, PrintStats};

use crate::protocol::PrinterStatusSnapshot;
use crate::session::{CloudJob, SharedState};

/// Query the engine and build the status snapshot for this tick. Engine
/// failures degrade to an Error snapshot rather than skipping the tick.
pub async fn collect_snapshot(
    client: &MoonrakerClient,
    shared: &SharedState,
) -> PrinterStatusSnapshot {
    let serial = shared.serial_number().unwrap_or_default();

    if let Some(state) = shared.status_override() {
        return override_snapshot(serial, state);
    }

    let stats = match client.print_stats().await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(error = %e, "print stats query failed");
            return error_snapshot(serial);
        }
    };
    let heaters = match client.heaters().await {
        Ok(heaters) => heaters,
        Err(e) => {
            warn!(error = %e, "heater query failed");
            return error_snapshot(serial);
        }
    };

    build_snapshot(serial, shared.job(), &stats, &heaters)
}

/// Map engine readings and the cloud-job record onto the reported state.
///
/// Precedence: a preparing cloud job wins over whatever the engine claims,
/// because the engine may still show the previous job while the download and
/// spool-up run.
pub fn build_snapshot(
    serial_number: String,
    job: Option<CloudJob>,
    stats: &PrintStats,
    heaters: &HeaterReadings,
) -> PrinterStatusSnapshot {
    let mut snapshot = base_snapshot(serial_number);

    snapshot.tool0 = round_tenth(heaters.extruder.temperature);
    snapshot.target_tool0 = heaters.extruder.target as i64;
    snapshot.tool1 = heaters
        .extruder1
        .as_ref()
        .map(|h| round_tenth(h.temperature))
        .unwrap_or(0.0);
    snapshot.bed = round_tenth(heaters.heater_bed.temperature);

    let cloud_job = job.as_ref();
    if let Some(job) = cloud_job.filter(|j| j.preparing) {
        snapshot.status = PrinterState::Preparing;
        snapshot.progress = "Preparing to print a job".into();
        snapshot.progress_detail = format!("Downloading file for job: {}", job.job_id);
        snapshot.start_time = Some(rfc3339(job));
    } else {
        match stats.state.as_str() {
            "printing" => {
                snapshot.status = match cloud_job {
                    Some(job) if job.cancelling => PrinterState::Cancelling,
                    Some(_) => PrinterState::Printing,
                    None => PrinterState::Serial,
                };
                snapshot.progress = if snapshot.status == PrinterState::Cancelling {
                    "Killing Job".into()
                } else {
                    "Job Printing".into()
                };
                apply_print_metrics(&mut snapshot, stats);
                snapshot.progress_detail = printing_detail(cloud_job, stats);
            }
            "paused" => {
                snapshot.status = PrinterState::Paused;
                snapshot.progress = "Job Paused".into();
                apply_print_metrics(&mut snapshot, stats);
                snapshot.progress_detail = printing_detail(cloud_job, stats);
            }
            "complete" => {
                if cloud_job.is_some() {
                    snapshot.status = PrinterState::Postprocessing;
                    snapshot.progress = "Post processing job".into();
                } else {
                    snapshot.status = PrinterState::Complete;
                    snapshot.progress = "Complete".into();
                }
                apply_print_metrics(&mut snapshot, stats);
                // A finished print may report no file position; fall back to
                // the full file size so consumers see 100%.
                if stats.file_position == 0 {
                    snapshot.bytes_read = nonzero(stats.file_size);
                }
                snapshot.progress_detail =
                    format!("{} Percent Complete: 100.0%", printing_label(cloud_job, stats));
            }
            "error" => {
                snapshot.status = PrinterState::Error;
                snapshot.progress = "Error".into();
                snapshot.progress_detail = "Error".into();
            }
            _ => {}
        }
    }

    if let Some(job) = cloud_job {
        snapshot.job_id = Some(job.job_id.clone());
        snapshot.stl_file = job.stl_file.clone();
        snapshot.config_file = job.config_file.clone();
    }

    snapshot
}

/// Whether this tick's snapshot goes out. Active states always transmit so
/// progress keeps flowing; everything else dedups against the last
/// transmitted snapshot.
pub fn should_transmit(
    snapshot: &PrinterStatusSnapshot,
    last: Option<&PrinterStatusSnapshot>,
) -> bool {
    snapshot.status.is_active() || last != Some(snapshot)
}

fn base_snapshot(serial_number: String) -> PrinterStatusSnapshot {
    PrinterStatusSnapshot {
        serial_number,
        status: PrinterState::Idle,
        progress: "Idle".into(),
        progress_detail: "Idle".into(),
        estimated_time: "0".into(),
        print_seconds: 0,
        tool0: 0.0,
        tool1: 0.0,
        bed: 0.0,
        target_tool0: 0,
        filament_used: None,
        start_time: None,
        bytes_read: None,
        file_size: None,
        job_id: None,
        stl_file: None,
        config_file: None,
    }
}

fn override_snapshot(serial_number: String, state: PrinterState) -> PrinterStatusSnapshot {
    let mut snapshot = base_snapshot(serial_number);
    snapshot.status = state;
    snapshot.progress = if state == PrinterState::Updating {
        "Updating".into()
    } else {
        "Override".into()
    };
    snapshot.progress_detail = "Software update in progress...".into();
    snapshot
}

fn error_snapshot(serial_number: String) -> PrinterStatusSnapshot {
    let mut snapshot = base_snapshot(serial_number);
    snapshot.status = PrinterState::Error;
    snapshot.progress = "Error".into();
    snapshot.progress_detail = "Error".into();
    snapshot
}

fn apply_print_metrics(snapshot: &mut PrinterStatusSnapshot, stats: &PrintStats) {
    snapshot.print_seconds = stats.print_duration as u64;
    snapshot.estimated_time = (stats.total_duration as u64).to_string();
    snapshot.bytes_read = nonzero(stats.file_position);
    snapshot.file_size = nonzero(stats.file_size);
    let filament = stats.filament_used as u64;
    if filament > 0 {
        snapshot.filament_used = Some(filament.to_string());
    }
    if let Some(start) = stats.print_start_time {
        snapshot.start_time = chrono::DateTime::from_timestamp(start as i64, 0)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
}

fn printing_label(job: Option<&CloudJob>, stats: &PrintStats) -> String {
    match job {
        Some(job) => format!("Printing Job: {}", job.job_id),
        None => format!("Printing Job: {}", stats.filename_tail()),
    }
}

fn printing_detail(job: Option<&CloudJob>, stats: &PrintStats) -> String {
    let label = printing_label(job, stats);
    if stats.total_duration > 0.0 && stats.print_duration > 0.0 {
        let pct = stats.print_duration / stats.total_duration * 100.0;
        format!("{label} Percent Complete: {pct:.1}%")
    } else {
        label
    }
}

fn rfc3339(job: &CloudJob) -> String {
    job.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn nonzero(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}
