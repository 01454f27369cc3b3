//! Error types for the Melt Stake sonar logger

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Sonar acquisition error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Configuration parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// JSON snapshot error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Port could not be opened or the head did not answer the handshake
    #[error("Sonar unavailable: {0}")]
    DeviceUnavailable(String),

    /// No bytes received within the request window
    #[error("Sonar did not respond within {waited_ms} ms")]
    DeviceTimeout {
        /// Time waited before giving up
        waited_ms: u64,
    },

    /// Response frame does not match the 881A layout
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Response header carries a data format this decoder does not handle
    #[error("Unsupported frame format: {0:#04x}")]
    UnsupportedFormat(u8),

    /// Head refused or did not acknowledge the switch configuration
    #[error("Sonar rejected configuration: {0}")]
    DeviceRejectedConfig(String),

    /// Stepping requested before a successful `configure()`
    #[error("Sonar not configured")]
    NotConfigured,

    /// Scan gave up after repeated request failures
    #[error("Scan {scan_index} aborted after {failures} failed requests: {reason}")]
    ScanAborted {
        /// Index of the aborted scan
        scan_index: u32,
        /// Consecutive failures observed
        failures: u32,
        /// Last error seen
        reason: String,
    },

    /// `run_scan` invoked while another scan is active
    #[error("A scan is already in progress")]
    ScanInProgress,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the same request may simply be issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DeviceTimeout { .. } | Error::MalformedFrame(_))
    }
}
