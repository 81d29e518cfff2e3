//! Error types for the AgenShield daemon

use std::io;

use thiserror::Error;

/// Result type alias for the daemon
pub type Result<T> = std::result::Result<T, Error>;

/// AgenShield daemon errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request (missing fields, bad shapes)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown JSON-RPC method
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Broker token did not resolve to a profile
    #[error("Unknown broker token")]
    BadToken,

    /// Storage seam failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Upstream transport failure (daemon-side fetch, proxy dial)
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON-RPC error with an explicit code
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
        /// Optional data
        data: Option<serde_json::Value>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Daemon shutdown
    #[error("Daemon shutdown")]
    Shutdown,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::JsonRpc { code, .. } => *code,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::InvalidRequest(_) => rpc_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => rpc_codes::METHOD_NOT_FOUND,
            Self::BadToken => rpc_codes::BAD_TOKEN,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// JSON-RPC error codes used by the daemon
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object or missing fields
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal error (transport failures, storage failures, panics)
    pub const INTERNAL_ERROR: i32 = -32000;
    /// Unknown broker token
    pub const BAD_TOKEN: i32 = -32001;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_token_maps_to_32001() {
        assert_eq!(Error::BadToken.to_rpc_code(), -32001);
    }

    #[test]
    fn invalid_request_maps_to_32600() {
        assert_eq!(
            Error::InvalidRequest("missing target".into()).to_rpc_code(),
            -32600
        );
    }

    #[test]
    fn method_not_found_maps_to_32601() {
        assert_eq!(
            Error::MethodNotFound("no_such".into()).to_rpc_code(),
            -32601
        );
    }

    #[test]
    fn internal_errors_map_to_32000() {
        assert_eq!(Error::Internal("boom".into()).to_rpc_code(), -32000);
        assert_eq!(Error::Transport("refused".into()).to_rpc_code(), -32000);
        assert_eq!(Error::Storage("locked".into()).to_rpc_code(), -32000);
    }

    #[test]
    fn explicit_json_rpc_code_passes_through() {
        assert_eq!(Error::json_rpc(-32050, "custom").to_rpc_code(), -32050);
    }
}
