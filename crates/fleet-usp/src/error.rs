// ── USP error taxonomy (C4, §4.4) ──

use fleet_core::error::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UspError {
    #[error("malformed frame: {0}")]
    MessageFormat(String),
    #[error("malformed message structure: {0}")]
    MessageStructure(String),
    #[error("unsupported parameter: {0}")]
    UnsupportedParam(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("resources exceeded: {0}")]
    ResourcesExceeded(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("parameter is read-only: {0}")]
    ParameterReadOnly(String),
    #[error("value conflict: {0}")]
    ValueConflict(String),
    #[error("operation failed: {0}")]
    OperationFailure(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport lost: {0}")]
    TransportLost(String),
}

impl From<fleet_transport::TransportError> for UspError {
    fn from(e: fleet_transport::TransportError) -> Self {
        match e {
            fleet_transport::TransportError::Timeout { .. } => Self::Timeout,
            other => Self::TransportLost(other.to_string()),
        }
    }
}

impl From<UspError> for CoreError {
    fn from(e: UspError) -> Self {
        match e {
            UspError::Timeout => CoreError::Timeout,
            UspError::TransportLost(reason) => CoreError::TransportLost { reason },
            UspError::InvalidPath(reason) => CoreError::InvalidPath { path: String::new(), reason },
            UspError::ParameterReadOnly(path) => CoreError::NotWritable { path },
            UspError::ValueConflict(reason) => CoreError::ValueConflict { path: String::new(), reason },
            UspError::ResourcesExceeded(reason) => CoreError::ResourcesExceeded { reason },
            UspError::PermissionDenied(reason) => CoreError::PermissionDenied { reason },
            other => CoreError::Protocol { code: None, message: other.to_string() },
        }
    }
}
