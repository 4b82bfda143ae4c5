//! Error types for the inspector proxy
//!
//! Flat hierarchy. Handler faults are not in here - they never escape a
//! connection.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Device already connected: {0}")]
    DuplicateDevice(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Page not found: {page_id} on device {device_id}")]
    PageNotFound { device_id: String, page_id: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
