// SPDX-License-Identifier: MIT
//
// Snapshot upload pipeline. Uploads go through presigned POST URLs handed
// out by the cloud per channel. A slot is requested when missing or about to
// expire, and the upload itself happens on a later tick once the slot has
// arrived, so the status cycle never blocks waiting on the cloud.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use polarlink_camera::settings::WebcamSettingsSource;
use polarlink_camera::snapshot::prepare_snapshot;
use polarlink_camera::webcam::WebcamClient;
use polarlink_core::config::BridgeConfig;
use polarlink_core::error::{PolarlinkError, Result};
use polarlink_core::types::{PrinterState, UploadKind};

use crate::connection::Outbound;
use crate::protocol::{ClientMessage, GetUrlRequest, GetUrlResponse};
use crate::session::SharedState;

/// Presigned URLs expire server-side; stop using one this many seconds
/// before its declared lifetime runs out.
const EXPIRY_MARGIN_SECS: u64 = 30;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for a requested upload URL to arrive within the same tick.
const SLOT_WAIT: Duration = Duration::from_secs(1);

/// A presigned upload destination for one channel.
#[derive(Debug, Clone)]
pub struct UploadSlot {
    pub url: String,
    pub fields: HashMap<String, String>,
    /// Declared lifetime in seconds. Zero means the cloud sent no expiry.
    pub expires_secs: u64,
    pub max_size: Option<u64>,
    pub content_type: Option<String>,
    received_at: Instant,
}

impl UploadSlot {
    pub fn new(
        url: String,
        fields: HashMap<String, String>,
        expires_secs: u64,
        max_size: Option<u64>,
        content_type: Option<String>,
    ) -> Self {
        Self {
            url,
            fields,
            expires_secs,
            max_size,
            content_type,
            received_at: Instant::now(),
        }
    }

    /// Accept a getUrlResponse. Returns the channel it applies to.
    pub fn from_response(response: GetUrlResponse) -> Option<(UploadKind, UploadSlot)> {
        if response.status != "SUCCESS" {
            return None;
        }
        let kind = response.kind?;
        let url = response.url?;
        Some((
            kind,
            UploadSlot::new(
                url,
                response.fields,
                response.expires.unwrap_or(0),
                response.max_size,
                response.content_type,
            ),
        ))
    }

    pub fn is_stale(&self) -> bool {
        self.stale_after(self.received_at.elapsed())
    }

    fn stale_after(&self, elapsed: Duration) -> bool {
        self.expires_secs > 0
            && elapsed.as_secs() >= self.expires_secs.saturating_sub(EXPIRY_MARGIN_SECS)
    }
}

/// Pick the upload channel for the current printer state. The printing
/// channel is used only for an actively printing cloud job; everything else
/// goes to the slow idle channel.
pub fn choose_channel(
    status: PrinterState,
    cloud_job_id: Option<&str>,
) -> (UploadKind, Option<String>) {
    match cloud_job_id {
        Some(job_id) if status == PrinterState::Printing => {
            (UploadKind::Printing, Some(job_id.to_string()))
        }
        _ => (UploadKind::Idle, None),
    }
}

pub fn interval_for(kind: UploadKind, config: &BridgeConfig) -> Duration {
    let secs = match kind {
        UploadKind::Printing => config.webcam.printing_interval_secs,
        _ => config.webcam.idle_interval_secs,
    };
    Duration::from_secs(secs)
}

fn upload_due(last: Option<Instant>, interval: Duration) -> bool {
    last.map_or(true, |at| at.elapsed() >= interval)
}

/// Drives capture, transform and upload for both channels.
pub struct UploadPipeline {
    http: reqwest::Client,
    webcam: WebcamClient,
    settings: WebcamSettingsSource,
}

impl UploadPipeline {
    pub fn new(moonraker_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            webcam: WebcamClient::new(moonraker_url),
            settings: WebcamSettingsSource::new(moonraker_url),
        }
    }

    /// One pass of the upload cycle. Failures are logged and absorbed; the
    /// next tick retries from scratch.
    pub async fn tick(
        &self,
        config: &BridgeConfig,
        shared: &SharedState,
        status: PrinterState,
        outbound: &Outbound,
    ) {
        if !config.webcam.enabled {
            return;
        }

        let job_id = shared.job().map(|j| j.job_id);
        let (kind, job_id) = choose_channel(status, job_id.as_deref());

        if !upload_due(shared.last_upload(kind), interval_for(kind, config)) {
            return;
        }

        let raw = match self.webcam.capture_snapshot().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "snapshot capture failed");
                return;
            }
        };

        let slot = match self.usable_slot(shared, kind) {
            Some(slot) => slot,
            None => {
                // Ask for a fresh URL and give the response a moment to
                // land; if it misses the window this cycle is skipped and
                // the next one uploads.
                self.request_slot(shared, kind, job_id, outbound);
                tokio::time::sleep(SLOT_WAIT).await;
                match self.usable_slot(shared, kind) {
                    Some(slot) => slot,
                    None => {
                        debug!(channel = %kind, "no upload URL available this cycle");
                        return;
                    }
                }
            }
        };

        let orientation = self.settings.orientation(&config.webcam).await;
        let image = match prepare_snapshot(&raw, &orientation, config.max_image_size) {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, "snapshot preparation failed");
                return;
            }
        };

        match self.upload(&slot, image).await {
            Ok(bytes) => {
                debug!(channel = %kind, bytes, "snapshot uploaded");
                shared.note_upload(kind, Instant::now());
            }
            Err(e) => {
                warn!(channel = %kind, error = %e, "snapshot upload failed");
            }
        }
    }

    fn usable_slot(&self, shared: &SharedState, kind: UploadKind) -> Option<UploadSlot> {
        match shared.slot(kind) {
            Some(slot) if !slot.is_stale() => Some(slot),
            Some(_) => {
                debug!(channel = %kind, "upload URL expired");
                shared.drop_slot(kind);
                None
            }
            None => None,
        }
    }

    fn request_slot(
        &self,
        shared: &SharedState,
        kind: UploadKind,
        job_id: Option<String>,
        outbound: &Outbound,
    ) {
        let Some(serial_number) = shared.serial_number() else {
            return;
        };
        let request = ClientMessage::GetUrl(GetUrlRequest {
            serial_number,
            method: "post".into(),
            kind,
            job_id: job_id.filter(|_| kind != UploadKind::Idle),
        });
        if outbound.send(request).is_err() {
            debug!(channel = %kind, "outbound channel closed, upload URL request dropped");
        }
    }

    /// Presigned POST: the cloud-provided form fields go first, the file
    /// part last. 200 and 204 both count as accepted.
    async fn upload(&self, slot: &UploadSlot, image: Vec<u8>) -> Result<usize> {
        let bytes = image.len();
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in &slot.fields {
            form = form.text(name.clone(), value.clone());
        }
        let part = reqwest::multipart::Part::bytes(image)
            .file_name("image.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| PolarlinkError::Upload(format!("invalid snapshot mime type: {e}")))?;
        form = form.part("file", part);

        let response = self
            .http
            .post(&slot.url)
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| PolarlinkError::Upload(format!("snapshot POST failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 200 || status.as_u16() == 204 {
            Ok(bytes)
        } else {
            Err(PolarlinkError::Upload(format!(
                "upload rejected with HTTP {status}"
            )))
        }
    }
}
