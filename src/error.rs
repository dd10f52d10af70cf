//! Error types for rpc-sentinel

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Endpoint validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal invariant violations (programming errors)
    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantError),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid network identifier for {network}: {identifier} (must be > 0)")]
    InvalidIdentifier { network: String, identifier: u64 },

    #[error("Network {0} has no endpoints")]
    EmptyEndpoints(String),

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Score weights must sum to 1.0 (success {success}, latency {latency})")]
    InvalidWeights { success: f64, latency: f64 },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Invalid config file: {0}")]
    InvalidFile(String),

    #[error("Config file parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Endpoint validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported scheme '{scheme}' in {url} (expected http, https, ws or wss)")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("Endpoint {url} already belongs to network {network}")]
    OwnedByOtherNetwork { url: String, network: String },

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),
}

/// Internal invariant violations
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvariantError {
    #[error("Concurrency bounds invalid: min {min}, max {max}")]
    InvalidBounds { min: usize, max: usize },

    #[error("Worker count {value} outside bounds [{min}, {max}]")]
    OutOfBounds { value: usize, min: usize, max: usize },
}

/// Errors raised by a [`Transport`](crate::rpc::Transport) while probing.
///
/// These never escape the prober; they are folded into a
/// [`ProbeErrorKind`](crate::prober::ProbeErrorKind).
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection failed: {0}")]
    ConnectionRefused(String),

    #[error("Invalid response from endpoint: {0}")]
    Malformed(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(0)
        } else if e.is_connect() {
            TransportError::ConnectionRefused(e.to_string())
        } else if e.is_decode() {
            TransportError::Malformed(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::Io(io) => TransportError::ConnectionRefused(io.to_string()),
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::ConnectionRefused("connection closed".to_string())
            }
            WsError::Http(resp) => {
                TransportError::ConnectionRefused(format!("handshake rejected: {}", resp.status()))
            }
            other => TransportError::Other(other.to_string()),
        }
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
