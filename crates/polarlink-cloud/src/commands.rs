// SPDX-License-Identifier: MIT
//
// Remote command execution. Every handler absorbs its own failures; a bad
// command from the cloud must never take the session down.

use std::path::Path;
use std::time::Duration;

use tracing::{error, info, warn};

use polarlink_core::config::BridgeConfig;
use polarlink_core::error::{PolarlinkError, Result};
use polarlink_core::types::PrinterState;
use polarlink_printhost::client::MoonrakerClient;

use crate::connection::Outbound;
use crate::jobs::{self, JobOutcome};
use crate::protocol::{ClientMessage, PrintRequest, TemperatureRequest};
use crate::session::{CloudJob, SharedState};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const UPDATE_HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// Executes inbound cloud commands against the local print host.
pub struct CommandDispatcher {
    http: reqwest::Client,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Start a cloud print. A second print command while a job is tracked
    /// replaces the job record; the engine restart is the cloud's call to
    /// make.
    pub async fn print(
        &self,
        client: &MoonrakerClient,
        shared: &SharedState,
        config: &BridgeConfig,
        request: PrintRequest,
    ) {
        let Some(gcode_url) = request.gcode_file.clone() else {
            if request.stl_file.is_some() {
                info!(job_id = %request.job_id, "STL print requests are not supported");
            } else {
                warn!(job_id = %request.job_id, "print command carried no printable file");
            }
            return;
        };

        info!(job_id = %request.job_id, "starting cloud print");
        shared.begin_job(CloudJob::new(
            request.job_id.clone(),
            request.stl_file,
            request.config_file,
        ));

        if let Err(e) = self
            .download_and_start(client, config, &request.job_id, &gcode_url)
            .await
        {
            error!(job_id = %request.job_id, error = %e, "cloud print failed to start");
            shared.record_error(format!("print {} failed to start: {e}", request.job_id));
            // Leave the job tracked but no longer preparing, so the
            // lifecycle tracker reports it canceled on the next cycle.
            shared.set_job_preparing(false);
            return;
        }

        shared.set_job_preparing(false);
        info!(job_id = %request.job_id, "cloud print running");
    }

    async fn download_and_start(
        &self,
        client: &MoonrakerClient,
        config: &BridgeConfig,
        job_id: &str,
        gcode_url: &str,
    ) -> Result<()> {
        let response = self
            .http
            .get(gcode_url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| PolarlinkError::Transport(format!("G-code download failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PolarlinkError::Transport(format!(
                "G-code download rejected with HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PolarlinkError::Transport(format!("G-code download failed: {e}")))?;

        let filename = gcode_filename(&config.paths.gcode_dir, job_id);
        client.upload_gcode(&filename, bytes.to_vec()).await?;
        client.start_print(&filename).await?;
        Ok(())
    }

    /// Cancel whatever is printing. A tracked cloud job gets its "canceled"
    /// notice immediately rather than waiting for the tracker to observe
    /// the engine going idle.
    pub async fn cancel(
        &self,
        client: &MoonrakerClient,
        shared: &SharedState,
        outbound: &Outbound,
    ) {
        shared.set_job_cancelling(true);

        match client.cancel_print().await {
            Ok(()) => {
                info!("print cancelled");
                if let (Some(job), Some(serial)) = (shared.take_job(), shared.serial_number()) {
                    let notice = jobs::completion_notice(
                        serial,
                        job.job_id,
                        JobOutcome::Canceled,
                        0,
                        None,
                    );
                    if outbound.send(ClientMessage::Job(notice)).is_err() {
                        warn!("outbound channel closed, cancel notice dropped");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "cancel failed");
                shared.set_job_cancelling(false);
            }
        }
    }

    pub async fn pause(&self, client: &MoonrakerClient) {
        match client.pause_print().await {
            Ok(()) => info!("print paused"),
            Err(e) => error!(error = %e, "pause failed"),
        }
    }

    pub async fn resume(&self, client: &MoonrakerClient) {
        match client.resume_print().await {
            Ok(()) => info!("print resumed"),
            Err(e) => error!(error = %e, "resume failed"),
        }
    }

    pub async fn temperature(&self, client: &MoonrakerClient, request: TemperatureRequest) {
        if let Some(target) = request.tool0 {
            match client.set_heater_temperature("extruder", target).await {
                Ok(()) => info!(target, "extruder target set"),
                Err(e) => error!(error = %e, "extruder target failed"),
            }
        }
        if let Some(target) = request.bed {
            match client.set_heater_temperature("heater_bed", target).await {
                Ok(()) => info!(target, "bed target set"),
                Err(e) => error!(error = %e, "bed target failed"),
            }
        }
    }

    /// Remove the cloud registration: cancel any running print, drop the
    /// persisted serial number, and forget all cloud-issued state. The
    /// caller closes the connection afterwards so the next session walks
    /// the registration path again.
    pub async fn delete(
        &self,
        client: &MoonrakerClient,
        shared: &SharedState,
        config: &mut BridgeConfig,
        config_path: &Path,
        outbound: &Outbound,
    ) {
        self.cancel(client, shared, outbound).await;

        config.serial_number = None;
        if let Err(e) = config.save(config_path) {
            error!(error = %e, "failed to persist the cleared serial number");
        }
        shared.clear_registration();
        info!("printer reset to unregistered state");
    }

    /// Run the configured update hook with the Updating override active.
    /// The spawned task owns the override lifetime, so the session keeps
    /// ticking while the hook runs.
    pub fn update(&self, shared: &SharedState, config: &BridgeConfig) {
        let Some(hook) = config.update_hook.clone() else {
            info!("update command received but no update hook is configured");
            return;
        };

        let shared = shared.clone();
        tokio::spawn(async move {
            shared.set_status_override(Some(PrinterState::Updating));
            info!(%hook, "running update hook");

            let run = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&hook)
                .output();
            match tokio::time::timeout(UPDATE_HOOK_TIMEOUT, run).await {
                Ok(Ok(output)) if output.status.success() => {
                    info!("update hook finished");
                }
                Ok(Ok(output)) => {
                    error!(status = %output.status, "update hook failed");
                }
                Ok(Err(e)) => {
                    error!(error = %e, "update hook could not be started");
                }
                Err(_) => {
                    error!("update hook timed out");
                }
            }

            shared.set_status_override(None);
        });
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Relative path for a downloaded cloud job under the print host's G-code
/// root.
fn gcode_filename(gcode_dir: &str, job_id: &str) -> String {
    let name = format!("polarlink_{job_id}.gcode");
    let dir = gcode_dir.trim_matches('/');
    if dir.is_empty() {
        name
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcode_filename_respects_the_configured_subdirectory() {
        assert_eq!(gcode_filename("", "J1"), "polarlink_J1.gcode");
        assert_eq!(gcode_filename("cloud", "J1"), "cloud/polarlink_J1.gcode");
        assert_eq!(gcode_filename("/cloud/", "J1"), "cloud/polarlink_J1.gcode");
    }
}
