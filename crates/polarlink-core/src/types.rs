// SPDX-License-Identifier: MIT
//
// Core domain types for the Polarlink cloud bridge.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Printer state as reported to the cloud.
///
/// The wire encoding is the bare integer value, which is why `Serialize`
/// and `Deserialize` are implemented by hand rather than derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrinterState {
    /// Nothing running.
    Idle = 0,
    /// Printing a locally initiated job.
    Serial = 1,
    /// Preparing a cloud job (downloading / slicing).
    Preparing = 2,
    /// Printing a cloud-originated job.
    Printing = 3,
    Paused = 4,
    /// Post-print operations for a still-tracked cloud job.
    Postprocessing = 5,
    /// Cancelling a cloud-originated job.
    Cancelling = 6,
    /// Completed a cloud-originated job.
    Complete = 7,
    /// Software update in progress.
    Updating = 8,
    ColdPaused = 9,
    ChangingFilament = 10,
    /// Printing a local job over TCP/IP.
    TcpIp = 11,
    Error = 12,
    Offline = 13,
}

impl PrinterState {
    /// States that change often enough that status dedup would hide
    /// progress. These are always transmitted.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Printing | Self::Serial | Self::Paused)
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Idle,
            1 => Self::Serial,
            2 => Self::Preparing,
            3 => Self::Printing,
            4 => Self::Paused,
            5 => Self::Postprocessing,
            6 => Self::Cancelling,
            7 => Self::Complete,
            8 => Self::Updating,
            9 => Self::ColdPaused,
            10 => Self::ChangingFilament,
            11 => Self::TcpIp,
            12 => Self::Error,
            13 => Self::Offline,
            _ => return None,
        })
    }
}

impl Serialize for PrinterState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for PrinterState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown printer state code {code}")))
    }
}

/// The upload channels recognised by the presigned-URL protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    /// Long-interval snapshots while nothing is printing.
    Idle,
    /// Short-interval snapshots during a cloud print.
    Printing,
    /// Reserved for timelapse frame uploads.
    Timelapse,
}

impl UploadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Printing => "printing",
            Self::Timelapse => "timelapse",
        }
    }
}

impl std::fmt::Display for UploadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Camera image corrections applied before upload.
///
/// Uploaded snapshots are always pre-transformed on the device, so cloud
/// viewers never need to re-orient them; the hello message only advertises
/// these flags for live-view consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraOrientation {
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// Clockwise rotation in degrees. Normalised to 0/90/180/270.
    pub rotation: u16,
}

impl CameraOrientation {
    pub fn new(flip_horizontal: bool, flip_vertical: bool, rotation: i64) -> Self {
        Self {
            flip_horizontal,
            flip_vertical,
            rotation: (rotation.rem_euclid(360) as u16) / 90 * 90,
        }
    }

    /// No correction needed at all.
    pub fn is_identity(&self) -> bool {
        !self.flip_horizontal && !self.flip_vertical && self.rotation == 0
    }

    pub fn has_flip(&self) -> bool {
        self.flip_horizontal || self.flip_vertical
    }
}

impl Default for CameraOrientation {
    fn default() -> Self {
        Self {
            flip_horizontal: false,
            flip_vertical: false,
            rotation: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printer_state_serialises_as_integer() {
        let json = serde_json::to_string(&PrinterState::Printing).unwrap();
        assert_eq!(json, "3");

        let state: PrinterState = serde_json::from_str("7").unwrap();
        assert_eq!(state, PrinterState::Complete);
    }

    #[test]
    fn unknown_state_code_is_rejected() {
        let result: Result<PrinterState, _> = serde_json::from_str("99");
        assert!(result.is_err());
    }

    #[test]
    fn active_states_are_exactly_printing_serial_paused() {
        for code in 0..=13u8 {
            let state = PrinterState::from_code(code).unwrap();
            let expected = matches!(
                state,
                PrinterState::Printing | PrinterState::Serial | PrinterState::Paused
            );
            assert_eq!(state.is_active(), expected, "state {state:?}");
        }
    }

    #[test]
    fn upload_kind_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&UploadKind::Idle).unwrap(), "\"idle\"");
        assert_eq!(UploadKind::Printing.as_str(), "printing");
    }

    #[test]
    fn orientation_normalises_rotation() {
        assert_eq!(CameraOrientation::new(false, false, 450).rotation, 90);
        assert_eq!(CameraOrientation::new(false, false, -90).rotation, 270);
        assert_eq!(CameraOrientation::new(false, false, 45).rotation, 0);
        assert!(CameraOrientation::default().is_identity());
        assert!(!CameraOrientation::new(true, false, 0).is_identity());
    }
}
