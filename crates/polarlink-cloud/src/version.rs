// SPDX-License-Identifier: MIT
//
// Version reporting. The cloud shows operators which bridge release a
// printer runs and whether a newer one exists. Release lookup and the
// setVersion report run on their own cadences inside the periodic cycle.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use polarlink_core::config::BridgeConfig;
use polarlink_core::error::{PolarlinkError, Result};

use crate::connection::Outbound;
use crate::protocol::{ClientMessage, VersionReport};
use crate::session::SharedState;

pub const RUNNING_VERSION: &str = env!("CARGO_PKG_VERSION");

const CHECK_INTERVAL: Duration = Duration::from_secs(3600);
const REPORT_INTERVAL: Duration = Duration::from_secs(600);
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct VersionReporter {
    http: reqwest::Client,
}

impl VersionReporter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// One cycle step. Sends setVersion at most every ten minutes and asks
    /// the release endpoint at most hourly. Lookup failures only cost the
    /// latestVersion field.
    pub async fn tick(&self, config: &BridgeConfig, shared: &SharedState, outbound: &Outbound) {
        if !due(shared.last_version_report(), REPORT_INTERVAL) {
            return;
        }
        let Some(serial_number) = shared.serial_number() else {
            return;
        };

        if due(shared.last_version_check(), CHECK_INTERVAL) {
            shared.note_version_check(Instant::now());
            if let Some(url) = &config.update_check_url {
                match self.fetch_latest(url).await {
                    Ok(latest) => {
                        info!(running = RUNNING_VERSION, %latest, "release check done");
                        shared.set_latest_version(Some(latest));
                    }
                    Err(e) => warn!(error = %e, "release check failed"),
                }
            }
        }

        let report = ClientMessage::SetVersion(VersionReport {
            serial_number,
            running_version: RUNNING_VERSION.to_string(),
            latest_version: shared.latest_version(),
        });
        if outbound.send(report).is_ok() {
            shared.note_version_report(Instant::now());
            debug!(running = RUNNING_VERSION, "version report sent");
        }
    }

    /// GitHub releases/latest lookup. The API requires a User-Agent.
    async fn fetch_latest(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .header("User-Agent", format!("polarlink/{RUNNING_VERSION}"))
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await
            .map_err(|e| PolarlinkError::Transport(format!("release lookup failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PolarlinkError::Transport(format!(
                "release lookup rejected with HTTP {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PolarlinkError::Transport(format!("release lookup failed: {e}")))?;
        let tag = body
            .get("tag_name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| PolarlinkError::Protocol("release response missing tag_name".into()))?;
        Ok(normalize_tag(tag))
    }
}

impl Default for VersionReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn due(last: Option<Instant>, interval: Duration) -> bool {
    last.map_or(true, |at| at.elapsed() >= interval)
}

/// Release tags carry a `v` prefix; reported versions do not. Only a `v`
/// directly followed by a digit counts as a prefix.
fn normalize_tag(tag: &str) -> String {
    match tag.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest.to_string(),
        _ => tag.to_string(),
    }
}
