// SPDX-License-Identifier: MIT
//
// Wire messages. One JSON object per WebSocket text frame, shaped
// `{"type": <event>, "data": <payload>}`. Event names and payload fields
// keep the cloud protocol's camelCase vocabulary.
//
// Inbound frames are parsed through one explicit dispatch function so that
// an unknown or malformed frame becomes a typed `Protocol` error at the
// boundary instead of a partially-applied state change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use polarlink_core::error::{PolarlinkError, Result};
use polarlink_core::types::{PrinterState, UploadKind};

// -- Outbound ---------------------------------------------------------------

/// Messages the device sends to the cloud.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    Register(RegisterRequest),
    Hello(HelloRequest),
    Status(PrinterStatusSnapshot),
    GetUrl(GetUrlRequest),
    Job(JobNotice),
    SetVersion(VersionReport),
}

/// First-time device onboarding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub mfg: String,
    pub email: String,
    pub pin: String,
    pub public_key: String,
    pub mfg_sn: String,
    pub my_info: RegisterInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterInfo {
    #[serde(rename = "MAC")]
    pub mac: String,
}

/// Returning-device authentication. The signature proves possession of the
/// private key over the current session's challenge.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloRequest {
    pub serial_number: String,
    pub protocol: String,
    #[serde(rename = "MAC")]
    pub mac: String,
    #[serde(rename = "localIP")]
    pub local_ip: String,
    pub signature: String,
    pub mfg_sn: String,
    pub printer_make: String,
    pub version: String,
    /// 1 when the webcam is disabled.
    pub cam_off: u8,
    /// 1 when live-view consumers must rotate the stream themselves.
    pub rotate_img: u8,
    /// 1 when live-view consumers must mirror the stream themselves.
    pub transform_img: u8,
}

/// Presigned upload URL request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUrlRequest {
    pub serial_number: String,
    pub method: String,
    #[serde(rename = "type")]
    pub kind: UploadKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Cloud-job completion notice. Zero-valued metrics are omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobNotice {
    pub serial_number: String,
    pub job_id: String,
    /// `"completed"` or `"canceled"`.
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filament_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_read: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionReport {
    pub serial_number: String,
    pub running_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

/// The periodic telemetry payload. Compared by equality against the last
/// transmitted snapshot for dedup, so optional fields must be stable for
/// identical printer states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterStatusSnapshot {
    pub serial_number: String,
    pub status: PrinterState,
    pub progress: String,
    pub progress_detail: String,
    pub estimated_time: String,
    pub print_seconds: u64,
    pub tool0: f64,
    pub tool1: f64,
    pub bed: f64,
    pub target_tool0: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filament_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_read: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stl_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
}

impl ClientMessage {
    /// Encode for the wire.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// -- Inbound ----------------------------------------------------------------

/// Messages the cloud sends to the device.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Welcome(WelcomePayload),
    RegisterResponse(ResponsePayload),
    HelloResponse(ResponsePayload),
    GetUrlResponse(GetUrlResponse),
    Print(PrintRequest),
    Cancel,
    Pause,
    Resume,
    Delete,
    Temperature(TemperatureRequest),
    Update,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WelcomePayload {
    pub challenge: String,
}

/// register/hello responses arrive either as a structured object or, from
/// older cloud versions, as a bare status string. Anything else is malformed
/// and rejected at the parse boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Structured(ResponseBody),
    Legacy(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUrlResponse {
    pub status: String,
    #[serde(rename = "type")]
    pub kind: Option<UploadKind>,
    pub url: Option<String>,
    #[serde(default)]
    pub fields: HashMap<String, String>,
    /// Declared lifetime of the presigned URL in seconds.
    pub expires: Option<u64>,
    pub max_size: Option<u64>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintRequest {
    pub job_id: String,
    #[serde(default)]
    pub gcode_file: Option<String>,
    #[serde(default)]
    pub stl_file: Option<String>,
    #[serde(default)]
    pub config_file: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TemperatureRequest {
    #[serde(default)]
    pub tool0: Option<f64>,
    #[serde(default)]
    pub bed: Option<f64>,
}

/// Parse one inbound frame. Protocol errors leave session state untouched;
/// the caller logs and drops the frame.
pub fn parse_server_message(text: &str) -> Result<ServerMessage> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| PolarlinkError::Protocol("frame missing type field".into()))?;
    let data = value.get("data").cloned().unwrap_or(Value::Null);

    let parsed = match kind {
        "welcome" => ServerMessage::Welcome(payload(kind, data)?),
        "registerResponse" => ServerMessage::RegisterResponse(payload(kind, data)?),
        "helloResponse" => ServerMessage::HelloResponse(payload(kind, data)?),
        "getUrlResponse" => ServerMessage::GetUrlResponse(payload(kind, data)?),
        "print" => ServerMessage::Print(payload(kind, data)?),
        "cancel" => ServerMessage::Cancel,
        "pause" => ServerMessage::Pause,
        "resume" => ServerMessage::Resume,
        "delete" => ServerMessage::Delete,
        "temperature" => ServerMessage::Temperature(payload(kind, data)?),
        "update" => ServerMessage::Update,
        other => {
            return Err(PolarlinkError::Protocol(format!(
                "unknown message type: {other}"
            )));
        }
    };
    Ok(parsed)
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| PolarlinkError::Protocol(format!("malformed {kind} payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn welcome_frame_carries_the_challenge() {
        let msg =
            parse_server_message(r#"{"type": "welcome", "data": {"challenge": "abc123"}}"#)
                .unwrap();
        match msg {
            ServerMessage::Welcome(payload) => assert_eq!(payload.challenge, "abc123"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn register_response_parses_structured_payload() {
        let msg = parse_server_message(
            r#"{"type": "registerResponse",
                "data": {"status": "SUCCESS", "reason": "SUCCESS", "serialNumber": "ABC123"}}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::RegisterResponse(ResponsePayload::Structured(body)) => {
                assert_eq!(body.status, "SUCCESS");
                assert_eq!(body.reason.as_deref(), Some("SUCCESS"));
                assert_eq!(body.serial_number.as_deref(), Some("ABC123"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn register_response_parses_legacy_string_payload() {
        let msg =
            parse_server_message(r#"{"type": "registerResponse", "data": "SUCCESS"}"#).unwrap();
        assert!(matches!(
            msg,
            ServerMessage::RegisterResponse(ResponsePayload::Legacy(s)) if s == "SUCCESS"
        ));
    }

    #[test]
    fn malformed_response_payload_is_a_protocol_error() {
        let err =
            parse_server_message(r#"{"type": "helloResponse", "data": 42}"#).unwrap_err();
        assert!(matches!(err, PolarlinkError::Protocol(_)));
    }

    #[test]
    fn unknown_message_type_is_a_protocol_error() {
        let err = parse_server_message(r#"{"type": "fireTheLaser", "data": {}}"#).unwrap_err();
        assert!(matches!(err, PolarlinkError::Protocol(_)));
    }

    #[test]
    fn commands_parse_with_or_without_data() {
        assert!(matches!(
            parse_server_message(r#"{"type": "cancel"}"#).unwrap(),
            ServerMessage::Cancel
        ));
        assert!(matches!(
            parse_server_message(r#"{"type": "pause", "data": {}}"#).unwrap(),
            ServerMessage::Pause
        ));
    }

    #[test]
    fn get_url_response_parses_fields_and_expiry() {
        let msg = parse_server_message(
            r#"{"type": "getUrlResponse",
                "data": {"status": "SUCCESS", "type": "idle",
                         "url": "https://uploads.example/bucket",
                         "fields": {"key": "snap.jpg", "policy": "b64"},
                         "expires": 300, "maxSize": 150000,
                         "contentType": "image/jpeg"}}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::GetUrlResponse(response) => {
                assert_eq!(response.kind, Some(UploadKind::Idle));
                assert_eq!(response.expires, Some(300));
                assert_eq!(response.fields["policy"], "b64");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn hello_frame_uses_protocol_field_names() {
        let hello = ClientMessage::Hello(HelloRequest {
            serial_number: "SN1".into(),
            protocol: "2".into(),
            mac: "AA:BB:CC:11:22:33".into(),
            local_ip: "192.168.1.50".into(),
            signature: "c2ln".into(),
            mfg_sn: "KL-AABBCC112233".into(),
            printer_make: "Cartesian".into(),
            version: "0.4.0".into(),
            cam_off: 0,
            rotate_img: 1,
            transform_img: 0,
        });

        let value: Value = serde_json::from_str(&hello.to_frame().unwrap()).unwrap();
        assert_eq!(value["type"], "hello");
        let data = &value["data"];
        assert_eq!(data["serialNumber"], "SN1");
        assert_eq!(data["MAC"], "AA:BB:CC:11:22:33");
        assert_eq!(data["localIP"], "192.168.1.50");
        assert_eq!(data["mfgSn"], "KL-AABBCC112233");
        assert_eq!(data["camOff"], 0);
        assert_eq!(data["rotateImg"], 1);
    }

    #[test]
    fn snapshot_serialises_integer_status_and_skips_absent_fields() {
        let snapshot = PrinterStatusSnapshot {
            serial_number: "SN1".into(),
            status: PrinterState::Idle,
            progress: "Idle".into(),
            progress_detail: "Idle".into(),
            estimated_time: "0".into(),
            print_seconds: 0,
            tool0: 21.5,
            tool1: 0.0,
            bed: 20.0,
            target_tool0: 0,
            filament_used: None,
            start_time: None,
            bytes_read: None,
            file_size: None,
            job_id: None,
            stl_file: None,
            config_file: None,
        };

        let value = serde_json::to_value(ClientMessage::Status(snapshot)).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["data"]["status"], 0);
        assert!(value["data"].get("jobId").is_none());
        assert!(value["data"].get("filamentUsed").is_none());
    }

    #[test]
    fn job_notice_uses_camel_case_and_skips_zero_metrics() {
        let notice = ClientMessage::Job(JobNotice {
            serial_number: "SN1".into(),
            job_id: "J1".into(),
            state: "completed".into(),
            print_seconds: Some(3600),
            filament_used: None,
            bytes_read: Some(1024),
            file_size: None,
        });

        let value = serde_json::to_value(notice).unwrap();
        assert_eq!(value["type"], "job");
        assert_eq!(value["data"]["jobId"], "J1");
        assert_eq!(value["data"]["printSeconds"], 3600);
        assert!(value["data"].get("filamentUsed").is_none());
    }
}
