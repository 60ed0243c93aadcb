//! Error types for WiFi adapter control

use thiserror::Error;

/// Result type for WiFi backend operations
pub type WifiResult<T> = Result<T, WifiError>;

/// Result type for facade operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors related to WiFi backend operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WifiError {
    #[error("WiFi scan failed: {0}")]
    ScanFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed for network {0}")]
    AuthenticationFailed(String),

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Adapter not found: {0}")]
    AdapterNotFound(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Failed to parse {tool} output: {message}")]
    ParseError { tool: String, message: String },

    #[error("Invalid SSID: {0}")]
    InvalidSsid(String),

    #[error("Network interface error: {0}")]
    InterfaceError(String),

    #[error("wpa_supplicant error: {0}")]
    WpaSupplicantError(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for WifiError {
    fn from(e: std::io::Error) -> Self {
        WifiError::Io(e.to_string())
    }
}

/// Errors related to facade operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Operation already in progress")]
    OperationInProgress,

    #[error("No scan results available")]
    NoScanResults,

    #[error("Timed out after {timeout_ms} ms waiting for connection to {ssid}")]
    Timeout { ssid: String, timeout_ms: u64 },

    #[error("Connection attempt on {0} was cancelled by a reset")]
    Cancelled(String),

    #[error("Backend error: {0}")]
    Backend(#[from] WifiError),
}
