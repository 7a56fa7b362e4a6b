// SPDX-License-Identifier: MIT
//
// Polarlink Cloud — the connector session core. Owns the persistent
// WebSocket to the fleet cloud, the register/hello handshake, the periodic
// status/upload/job cycle, and the inbound remote-command dispatch.

pub mod backoff;
pub mod commands;
pub mod connection;
pub mod handshake;
pub mod jobs;
pub mod protocol;
pub mod session;
pub mod status;
pub mod upload;
pub mod version;

pub use connection::CloudService;
pub use session::{CloudJob, ConnectionState, SharedState, StatusFile};
