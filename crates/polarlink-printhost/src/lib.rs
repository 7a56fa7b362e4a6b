// SPDX-License-Identifier: MIT
//
// Polarlink Printhost — client for the local Moonraker API. The bridge only
// consumes this interface: it queries print state, progress, and temperatures
// and issues job-control commands; G-code execution itself is Klipper's
// business.

pub mod client;
pub mod types;

pub use client::MoonrakerClient;
pub use types::{HeaterReadings, JobProgress, PrintStats, SdcardStatus};
