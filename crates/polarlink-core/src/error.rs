// SPDX-License-Identifier: MIT
//
// Unified error types for Polarlink.

use thiserror::Error;

/// Top-level error type for all Polarlink operations.
#[derive(Debug, Error)]
pub enum PolarlinkError {
    // -- Cloud link errors --
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("upload failed: {0}")]
    Upload(String),

    // -- Local collaborator errors --
    #[error("print host error: {0}")]
    PrintHost(String),

    #[error("image processing failed: {0}")]
    Image(String),

    // -- Identity / persistence --
    #[error("device key error: {0}")]
    Key(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PolarlinkError>;
