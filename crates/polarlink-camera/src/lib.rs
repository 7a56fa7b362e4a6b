// SPDX-License-Identifier: MIT
//
// Polarlink Camera — snapshot capture from the local webcam, orientation
// correction, and the deterministic resize-to-budget pipeline that keeps
// uploads under the cloud's byte limit.

pub mod settings;
pub mod snapshot;
pub mod webcam;

pub use settings::WebcamSettingsSource;
pub use webcam::WebcamClient;
