// SPDX-License-Identifier: MIT
//
// Polarlink — Core types, errors, and configuration shared across all crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::BridgeConfig;
pub use error::PolarlinkError;
pub use types::*;
