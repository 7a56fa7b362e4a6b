// SPDX-License-Identifier: MIT
//
// The register/hello handshake. A welcome frame carries a per-session
// challenge; the device answers with either a registration request (no
// serial number yet) or a hello signed with its private key. Both outcomes
// are evaluated here as pure functions so the response-shape rules stay
// testable without a socket.

use polarlink_core::config::BridgeConfig;
use polarlink_core::error::{PolarlinkError, Result};
use polarlink_core::types::CameraOrientation;
use polarlink_identity::identity::DeviceIdentity;
use polarlink_identity::keys::DeviceKey;

use crate::protocol::{
    ClientMessage, HelloRequest, RegisterInfo, RegisterRequest, ResponseBody, ResponsePayload,
};

/// What to send in answer to a challenge.
#[derive(Debug, Clone)]
pub enum ChallengeAnswer {
    Register(RegisterRequest),
    Hello(HelloRequest),
    /// No serial number and no credentials to register with. The session
    /// stays connected but unauthenticated until the operator supplies
    /// username and PIN.
    NotConfigured,
}

impl ChallengeAnswer {
    pub fn into_message(self) -> Option<ClientMessage> {
        match self {
            Self::Register(request) => Some(ClientMessage::Register(request)),
            Self::Hello(request) => Some(ClientMessage::Hello(request)),
            Self::NotConfigured => None,
        }
    }
}

/// Decide and build the challenge answer.
///
/// The signature always covers the challenge from *this* session; a caller
/// holding no challenge must not get a hello built from a stale one.
pub fn answer_challenge(
    config: &BridgeConfig,
    identity: &DeviceIdentity,
    key: &DeviceKey,
    serial_number: Option<&str>,
    challenge: &str,
    running_version: &str,
    orientation: &CameraOrientation,
) -> Result<ChallengeAnswer> {
    if challenge.is_empty() {
        return Err(PolarlinkError::Authentication(
            "cannot answer an empty challenge".into(),
        ));
    }

    if let Some(serial) = serial_number {
        return Ok(ChallengeAnswer::Hello(build_hello(
            config,
            identity,
            key,
            serial,
            challenge,
            running_version,
            orientation,
        )));
    }

    if config.has_credentials() {
        Ok(ChallengeAnswer::Register(build_register(
            config, identity, key,
        )?))
    } else {
        Ok(ChallengeAnswer::NotConfigured)
    }
}

fn build_register(
    config: &BridgeConfig,
    identity: &DeviceIdentity,
    key: &DeviceKey,
) -> Result<RegisterRequest> {
    Ok(RegisterRequest {
        mfg: config.manufacturer.clone(),
        email: config.username.clone(),
        pin: config.pin.clone(),
        public_key: key.public_key_pem()?,
        mfg_sn: identity.registration_mfg_serial().to_string(),
        my_info: RegisterInfo {
            mac: identity.mac.clone(),
        },
    })
}

fn build_hello(
    config: &BridgeConfig,
    identity: &DeviceIdentity,
    key: &DeviceKey,
    serial_number: &str,
    challenge: &str,
    running_version: &str,
    orientation: &CameraOrientation,
) -> HelloRequest {
    HelloRequest {
        serial_number: serial_number.to_string(),
        protocol: "2".into(),
        mac: identity.mac.clone(),
        local_ip: identity.local_ip.clone(),
        signature: key.sign_challenge(challenge),
        mfg_sn: identity.mfg_serial(),
        printer_make: config.printer_type.clone(),
        version: running_version.to_string(),
        cam_off: u8::from(!config.webcam.enabled),
        rotate_img: u8::from(orientation.rotation != 0),
        transform_img: u8::from(orientation.has_flip()),
    }
}

/// Outcome of a registration response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Persist the serial, then deliberately disconnect: registration and
    /// authentication never share one connection.
    Registered(String),
    Failed(String),
}

pub fn evaluate_registration(payload: &ResponsePayload) -> RegistrationOutcome {
    match payload {
        ResponsePayload::Structured(ResponseBody {
            status,
            reason,
            serial_number: Some(serial),
            ..
        }) if status == "SUCCESS" && reason.as_deref() == Some("SUCCESS") && !serial.is_empty() => {
            RegistrationOutcome::Registered(serial.clone())
        }
        ResponsePayload::Structured(body) => RegistrationOutcome::Failed(format!(
            "registration failed, status: {}, reason: {}",
            body.status,
            body.reason.as_deref().unwrap_or("none")
        )),
        ResponsePayload::Legacy(text) if text.eq_ignore_ascii_case("SUCCESS") => {
            RegistrationOutcome::Failed("registration response missing serial number".into())
        }
        ResponsePayload::Legacy(text) => {
            RegistrationOutcome::Failed(format!("registration failed: {text}"))
        }
    }
}

/// Outcome of a hello response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloOutcome {
    Authenticated,
    /// Device was removed from the cloud account. Reported as a failure;
    /// the serial is kept so the operator decides whether to re-register.
    Deleted,
    Failed(String),
}

pub fn evaluate_hello(payload: &ResponsePayload) -> HelloOutcome {
    match payload {
        ResponsePayload::Structured(body) => match body.status.as_str() {
            "SUCCESS" => HelloOutcome::Authenticated,
            "DELETED" => HelloOutcome::Deleted,
            "FAILED" => HelloOutcome::Failed(
                body.message
                    .clone()
                    .unwrap_or_else(|| "no error message provided".into()),
            ),
            other => HelloOutcome::Failed(format!("unknown status: {other}")),
        },
        ResponsePayload::Legacy(text) if text.eq_ignore_ascii_case("SUCCESS") => {
            HelloOutcome::Authenticated
        }
        ResponsePayload::Legacy(text) => HelloOutcome::Failed(text.clone()),
    }
}
