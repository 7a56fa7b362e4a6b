// SPDX-License-Identifier: MIT
//
// Camera orientation lookup. Priority order: manual config override, then
// the Moonraker `webcams` database namespace, then the fluidd camera list,
// then no correction. Frontend lookups failing is normal (fresh installs
// have neither namespace) and only worth a debug log.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use polarlink_core::config::WebcamConfig;
use polarlink_core::types::CameraOrientation;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// The manual override applies when *any* of the three orientation fields is
/// set in the config; unset fields fall back to "no correction".
pub fn manual_override(config: &WebcamConfig) -> Option<CameraOrientation> {
    if config.flip_horizontal.is_none()
        && config.flip_vertical.is_none()
        && config.rotation.is_none()
    {
        return None;
    }
    Some(CameraOrientation::new(
        config.flip_horizontal.unwrap_or(false),
        config.flip_vertical.unwrap_or(false),
        config.rotation.unwrap_or(0),
    ))
}

/// Parse the first camera entry of the Moonraker `webcams` namespace.
pub fn from_webcams_namespace(value: &Value) -> Option<CameraOrientation> {
    let cameras = value.get("result")?.get("value")?.as_object()?;
    let camera = cameras.values().next()?;
    Some(orientation_from_entry(camera))
}

/// Parse the first entry of the fluidd `cameras` database key.
pub fn from_fluidd_cameras(value: &Value) -> Option<CameraOrientation> {
    let cameras = value.get("result")?.get("value")?.as_array()?;
    let camera = cameras.first()?;
    Some(orientation_from_entry(camera))
}

/// Frontends disagree on field names; accept the common spellings.
fn orientation_from_entry(camera: &Value) -> CameraOrientation {
    let flip_h = bool_field(camera, &["flipX", "flip_horizontal"]);
    let flip_v = bool_field(camera, &["flipY", "flip_vertical"]);
    let rotation = camera
        .get("rotation")
        .or_else(|| camera.get("rotate"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    CameraOrientation::new(flip_h, flip_v, rotation)
}

fn bool_field(camera: &Value, names: &[&str]) -> bool {
    names
        .iter()
        .find_map(|name| camera.get(*name).and_then(Value::as_bool))
        .unwrap_or(false)
}

/// Resolves the effective orientation from config and frontend databases.
#[derive(Debug, Clone)]
pub struct WebcamSettingsSource {
    moonraker_url: String,
    client: reqwest::Client,
}

impl WebcamSettingsSource {
    pub fn new(moonraker_url: &str) -> Self {
        Self {
            moonraker_url: moonraker_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// The orientation uploads must be corrected with.
    pub async fn orientation(&self, config: &WebcamConfig) -> CameraOrientation {
        if let Some(manual) = manual_override(config) {
            return manual;
        }

        if let Some(found) = self
            .lookup("server/database/item?namespace=webcams", from_webcams_namespace)
            .await
        {
            return found;
        }

        if let Some(found) = self
            .lookup(
                "server/database/item?namespace=fluidd&key=cameras",
                from_fluidd_cameras,
            )
            .await
        {
            return found;
        }

        CameraOrientation::default()
    }

    async fn lookup(
        &self,
        endpoint: &str,
        parse: fn(&Value) -> Option<CameraOrientation>,
    ) -> Option<CameraOrientation> {
        let url = format!("{}/{endpoint}", self.moonraker_url);
        let response = self
            .client
            .get(&url)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(endpoint, status = %response.status(), "camera settings lookup miss");
            return None;
        }
        let value: Value = response.json().await.ok()?;
        parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_manual_fields_means_no_override() {
        assert!(manual_override(&WebcamConfig::default()).is_none());
    }

    #[test]
    fn any_manual_field_activates_the_override() {
        let config = WebcamConfig {
            rotation: Some(180),
            ..WebcamConfig::default()
        };
        let orientation = manual_override(&config).unwrap();
        assert_eq!(orientation.rotation, 180);
        assert!(!orientation.flip_horizontal);
        assert!(!orientation.flip_vertical);
    }

    #[test]
    fn webcams_namespace_first_entry_wins() {
        let payload = json!({
            "result": {
                "value": {
                    "cam0": {"flipX": true, "flipY": false, "rotate": 90},
                }
            }
        });
        let orientation = from_webcams_namespace(&payload).unwrap();
        assert!(orientation.flip_horizontal);
        assert!(!orientation.flip_vertical);
        assert_eq!(orientation.rotation, 90);
    }

    #[test]
    fn fluidd_cameras_accept_either_spelling() {
        let payload = json!({
            "result": {
                "value": [
                    {"flip_horizontal": true, "flipY": true, "rotation": 270},
                ]
            }
        });
        let orientation = from_fluidd_cameras(&payload).unwrap();
        assert!(orientation.flip_horizontal);
        assert!(orientation.flip_vertical);
        assert_eq!(orientation.rotation, 270);
    }

    #[test]
    fn empty_databases_resolve_to_nothing() {
        assert!(from_webcams_namespace(&json!({"result": {"value": {}}})).is_none());
        assert!(from_fluidd_cameras(&json!({"result": {"value": []}})).is_none());
        assert!(from_webcams_namespace(&json!({})).is_none());
    }
}
