// SPDX-License-Identifier: MIT
//
// Moonraker HTTP client. All calls carry short timeouts: queries 5 s,
// commands 10 s, file uploads 30 s. A stuck Moonraker must never stall the
// bridge's status cycle.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use polarlink_core::error::{PolarlinkError, Result};

use crate::types::{HeaterReadings, JobProgress, PrintStats, SdcardStatus};

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the local Moonraker API.
#[derive(Debug, Clone)]
pub struct MoonrakerClient {
    base_url: String,
    client: reqwest::Client,
}

impl MoonrakerClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -- Status queries -------------------------------------------------------

    /// Current `print_stats` object. Missing object resolves to defaults.
    pub async fn print_stats(&self) -> Result<PrintStats> {
        self.query_object("print_stats", "print_stats").await
    }

    /// Extruder and bed temperatures.
    pub async fn heaters(&self) -> Result<HeaterReadings> {
        let value = self
            .get_json(&format!(
                "{}/printer/objects/query?heater_bed&extruder&extruder1",
                self.base_url
            ))
            .await?;
        match query_container(&value) {
            Some(container) if container.is_object() => {
                serde_json::from_value(container.clone())
                    .map_err(|e| PolarlinkError::PrintHost(e.to_string()))
            }
            _ => Ok(HeaterReadings::default()),
        }
    }

    /// Byte-level progress from `virtual_sdcard`.
    pub async fn virtual_sdcard(&self) -> Result<SdcardStatus> {
        self.query_object("virtual_sdcard", "virtual_sdcard").await
    }

    /// Progress metrics for job completion notices. Query failures collapse
    /// to zeroed metrics: absence of data, not an error.
    pub async fn job_progress(&self) -> JobProgress {
        let sdcard = self.virtual_sdcard().await.unwrap_or_default();
        let stats = self.print_stats().await.unwrap_or_default();
        JobProgress {
            file_size: sdcard.file_size.max(stats.file_size),
            bytes_read: sdcard.file_position.max(stats.file_position),
            filament_used: stats.filament_used as u64,
        }
    }

    // -- Job control ----------------------------------------------------------

    pub async fn start_print(&self, filename: &str) -> Result<()> {
        self.post_json(
            "printer/print/start",
            &serde_json::json!({ "filename": filename }),
        )
        .await
    }

    pub async fn pause_print(&self) -> Result<()> {
        self.post_empty("printer/print/pause").await
    }

    pub async fn resume_print(&self) -> Result<()> {
        self.post_empty("printer/print/resume").await
    }

    pub async fn cancel_print(&self) -> Result<()> {
        self.post_empty("printer/print/cancel").await
    }

    /// Set a heater target via G-code. `heater` is the Klipper heater name
    /// (`extruder`, `heater_bed`).
    pub async fn set_heater_temperature(&self, heater: &str, target: f64) -> Result<()> {
        let script = format!("SET_HEATER_TEMPERATURE HEATER={heater} TARGET={target}");
        self.post_json("printer/gcode/script", &serde_json::json!({ "script": script }))
            .await
    }

    /// Push a downloaded cloud G-code file into the printer's gcodes root.
    pub async fn upload_gcode(&self, filename: &str, bytes: Vec<u8>) -> Result<()> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("text/x-gcode")
            .map_err(|e| PolarlinkError::PrintHost(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("root", "gcodes")
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/server/files/upload", self.base_url))
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| PolarlinkError::PrintHost(format!("gcode upload: {e}")))?;

        if response.status().is_success() {
            debug!(filename, "gcode file uploaded to print host");
            Ok(())
        } else {
            Err(PolarlinkError::PrintHost(format!(
                "gcode upload returned HTTP {}",
                response.status()
            )))
        }
    }

    // -- Plumbing -------------------------------------------------------------

    async fn query_object<T: DeserializeOwned + Default>(
        &self,
        query: &str,
        key: &str,
    ) -> Result<T> {
        let value = self
            .get_json(&format!(
                "{}/printer/objects/query?{query}",
                self.base_url
            ))
            .await?;
        match query_container(&value).and_then(|c| c.get(key)) {
            Some(object) => serde_json::from_value(object.clone())
                .map_err(|e| PolarlinkError::PrintHost(e.to_string())),
            None => Ok(T::default()),
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(url)
            .timeout(QUERY_TIMEOUT)
            .send()
            .await
            .map_err(|e| PolarlinkError::PrintHost(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PolarlinkError::PrintHost(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| PolarlinkError::PrintHost(e.to_string()))
    }

    async fn post_empty(&self, endpoint: &str) -> Result<()> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(COMMAND_TIMEOUT)
            .send()
            .await
            .map_err(|e| PolarlinkError::PrintHost(e.to_string()))?;
        self.check_command_response(endpoint, response).await
    }

    async fn post_json(&self, endpoint: &str, body: &serde_json::Value) -> Result<()> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(COMMAND_TIMEOUT)
            .send()
            .await
            .map_err(|e| PolarlinkError::PrintHost(e.to_string()))?;
        self.check_command_response(endpoint, response).await
    }

    async fn check_command_response(
        &self,
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint, %status, "print host command failed");
            Err(PolarlinkError::PrintHost(format!(
                "{endpoint} returned HTTP {status}: {body}"
            )))
        }
    }
}

/// Stock Moonraker nests queried objects under `result.status`; some
/// deployments flatten them directly under `result`. Accept both shapes.
fn query_container(value: &serde_json::Value) -> Option<&serde_json::Value> {
    let result = value.get("result")?;
    match result.get("status") {
        Some(status) if status.is_object() => Some(status),
        _ => Some(result),
    }
}
