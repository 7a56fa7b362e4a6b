// SPDX-License-Identifier: MIT
//
// Response shapes for the Moonraker queries the bridge consumes. Every field
// defaults when absent: an incomplete answer is treated as "no data", never
// as an error.

use serde::Deserialize;

/// Klipper `print_stats` object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrintStats {
    /// One of `standby`, `printing`, `paused`, `complete`, `error`,
    /// `cancelled`. Anything unrecognised maps to idle.
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub filename: String,
    /// Seconds actually spent printing.
    #[serde(default)]
    pub print_duration: f64,
    /// Total seconds including pauses and heat-up.
    #[serde(default)]
    pub total_duration: f64,
    #[serde(default)]
    pub file_position: u64,
    #[serde(default)]
    pub file_size: u64,
    /// Millimetres of filament extruded.
    #[serde(default)]
    pub filament_used: f64,
    /// Unix timestamp of print start, if one is running.
    #[serde(default)]
    pub print_start_time: Option<f64>,
}

fn default_state() -> String {
    "standby".to_string()
}

impl PrintStats {
    /// Basename of the file being printed, for progress text.
    pub fn filename_tail(&self) -> &str {
        match self.filename.rsplit('/').next() {
            Some(tail) if !tail.is_empty() => tail,
            _ => "Unknown",
        }
    }
}

/// A single heater's current and target temperature.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct HeaterState {
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub target: f64,
}

/// The heaters the status report cares about.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct HeaterReadings {
    #[serde(default)]
    pub extruder: HeaterState,
    #[serde(default)]
    pub extruder1: Option<HeaterState>,
    #[serde(default)]
    pub heater_bed: HeaterState,
}

/// Klipper `virtual_sdcard` object, used for byte-level job progress.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SdcardStatus {
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_position: u64,
}

/// Job progress metrics attached to completion notices.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JobProgress {
    pub file_size: u64,
    pub bytes_read: u64,
    pub filament_used: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_stats_tolerates_missing_fields() {
        let stats: PrintStats = serde_json::from_str("{}").unwrap();
        assert_eq!(stats.state, "standby");
        assert_eq!(stats.print_duration, 0.0);
        assert!(stats.print_start_time.is_none());
    }

    #[test]
    fn filename_tail_strips_directories() {
        let stats: PrintStats =
            serde_json::from_str(r#"{"filename": "jobs/2026/benchy.gcode"}"#).unwrap();
        assert_eq!(stats.filename_tail(), "benchy.gcode");

        let empty: PrintStats = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.filename_tail(), "Unknown");
    }

    #[test]
    fn heater_readings_accept_partial_payload() {
        let readings: HeaterReadings = serde_json::from_str(
            r#"{"extruder": {"temperature": 203.42, "target": 205.0}}"#,
        )
        .unwrap();
        assert_eq!(readings.extruder.temperature, 203.42);
        assert!(readings.extruder1.is_none());
        assert_eq!(readings.heater_bed.temperature, 0.0);
    }
}
