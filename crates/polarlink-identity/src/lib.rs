// SPDX-License-Identifier: MIT
//
// Polarlink Identity — the persistent cryptographic identity of the device
// (RSA-2048 key pair on disk) and the network identifiers (MAC, local IP,
// manufacturer serial tokens) advertised during the cloud handshake.

pub mod identity;
pub mod keys;

pub use identity::DeviceIdentity;
pub use keys::DeviceKey;
