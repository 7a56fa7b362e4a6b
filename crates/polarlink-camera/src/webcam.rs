// SPDX-License-Identifier: MIT
//
// Webcam snapshot capture. A printer without a webcam is a perfectly normal
// configuration: capture failures resolve to `None` and the upload cycle
// silently skips.

use std::time::Duration;

use tracing::{debug, warn};

use polarlink_core::error::Result;

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);
const FALLBACK_SNAPSHOT_URL: &str = "http://localhost:8080/?action=snapshot";

/// Fetches JPEG frames from the local webcam streamer.
#[derive(Debug, Clone)]
pub struct WebcamClient {
    moonraker_url: String,
    client: reqwest::Client,
}

impl WebcamClient {
    pub fn new(moonraker_url: &str) -> Self {
        Self {
            moonraker_url: moonraker_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Grab one frame. Tries the Moonraker-proxied webcam first, then the
    /// conventional mjpg-streamer port. `Ok(None)` means no webcam.
    pub async fn capture_snapshot(&self) -> Result<Option<Vec<u8>>> {
        let primary = format!("{}/webcam/?action=snapshot", self.moonraker_url);
        if let Some(frame) = self.try_capture(&primary).await {
            return Ok(Some(frame));
        }
        if let Some(frame) = self.try_capture(FALLBACK_SNAPSHOT_URL).await {
            return Ok(Some(frame));
        }
        debug!("no webcam available for snapshot");
        Ok(None)
    }

    async fn try_capture(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self
            .client
            .get(url)
            .timeout(CAPTURE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => {
                debug!(url, "webcam not reachable");
                return None;
            }
            Err(e) => {
                warn!(url, error = %e, "unexpected error capturing webcam image");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(url, status = %response.status(), "webcam returned non-success");
            return None;
        }

        match response.bytes().await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes.to_vec()),
            _ => None,
        }
    }
}
