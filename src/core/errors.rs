// src/core/errors.rs

//! Defines the primary error type for the entire application.

use thiserror::Error;

/// The main error enum, representing all possible failures within the
/// forwarder. Per-datagram errors (`Protocol`, `Downlink`) are logged and
/// dropped by the workers; the remaining variants surface to process exit.
#[derive(Error, Debug)]
pub enum FwdError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Concentrator error: {0}")]
    Hal(String),

    #[error("GPS error: {0}")]
    Gps(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid downlink request: {0}")]
    Downlink(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Internal error: {0}")]
    Internal(String),
}
