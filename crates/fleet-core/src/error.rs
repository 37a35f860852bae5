// ── Core error types ──
//
// User-facing errors from fleet-core. Consumers never see transport
// status codes or XML/JSON parse failures directly -- each lower layer
// (fleet-transport, fleet-usp, fleet-cwmp) owns its own error enum and
// this type is the single thing the Operation API (C7) ever returns.

use thiserror::Error;

/// The taxonomy kind a `CoreError` belongs to (§7). Kept as a field
/// rather than relying on enum discriminant matching so the façade can
/// attach it to the structured `{kind, code, message, ...}` shape without
/// restating the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Semantic,
    Session,
    Lifecycle,
    Store,
    Control,
}

/// Unified error type for the core crate and the Operation API façade.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("device unknown: {device_id}")]
    DeviceUnknown { device_id: String },

    #[error("identity conflict registering {device_id}: {reason}")]
    IdentityConflict { device_id: String, reason: String },

    // ── Semantic ─────────────────────────────────────────────────────
    #[error("invalid parameter path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("parameter not writable: {path}")]
    NotWritable { path: String },

    #[error("type mismatch on {path}: expected {expected}, got {got}")]
    TypeMismatch { path: String, expected: String, got: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("value conflict on {path}: {reason}")]
    ValueConflict { path: String, reason: String },

    #[error("resources exceeded: {reason}")]
    ResourcesExceeded { reason: String },

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    // ── Session ──────────────────────────────────────────────────────
    #[error("session lost for {device_id}")]
    SessionLost { device_id: String },

    #[error("session faulted for {device_id}: {reason}")]
    SessionFaulted { device_id: String, reason: String },

    // ── Transport ────────────────────────────────────────────────────
    #[error("transport lost: {reason}")]
    TransportLost { reason: String },

    #[error("transport timeout after {timeout_secs}s")]
    TransportTimeout { timeout_secs: u64 },

    // ── Store ────────────────────────────────────────────────────────
    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    // ── Control ──────────────────────────────────────────────────────
    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("request rejected under load (pushback)")]
    Pushback,

    // ── Protocol (engine-specific, carries verbatim fault text) ───────
    #[error("protocol error{}: {message}", code.map(|c| format!(" (code {c})")).unwrap_or_default())]
    Protocol {
        code: Option<u32>,
        message: String,
    },

    // ── Catch-all ────────────────────────────────────────────────────
    #[error("engine error: {0}")]
    EngineError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The taxonomy kind this error belongs to (§7).
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceUnknown { .. } | Self::IdentityConflict { .. } => ErrorKind::Lifecycle,
            Self::InvalidPath { .. }
            | Self::NotWritable { .. }
            | Self::TypeMismatch { .. }
            | Self::NotFound { .. }
            | Self::ValueConflict { .. }
            | Self::ResourcesExceeded { .. }
            | Self::PermissionDenied { .. } => ErrorKind::Semantic,
            Self::SessionLost { .. } | Self::SessionFaulted { .. } => ErrorKind::Session,
            Self::TransportLost { .. } | Self::TransportTimeout { .. } => ErrorKind::Transport,
            Self::StoreUnavailable { .. } => ErrorKind::Store,
            Self::Timeout | Self::Cancelled | Self::Pushback => ErrorKind::Control,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::EngineError(_) | Self::Internal(_) => ErrorKind::Control,
        }
    }

    /// Whether a caller may reasonably retry the operation that produced
    /// this error.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportLost { .. }
                | Self::TransportTimeout { .. }
                | Self::StoreUnavailable { .. }
                | Self::Timeout
                | Self::Pushback
                | Self::SessionLost { .. }
        )
    }
}

/// The structured, user-visible failure shape from §7: `{kind, code?,
/// message, deviceId?, path?, retryable}`. This is what the REST façade
/// (out of scope) would serialize; the core only constructs it, it never
/// transmits it.
#[derive(Debug, Clone)]
pub struct FacadeError {
    pub kind: ErrorKind,
    pub code: Option<u32>,
    pub message: String,
    pub device_id: Option<String>,
    pub path: Option<String>,
    pub retryable: bool,
}

impl From<&CoreError> for FacadeError {
    fn from(err: &CoreError) -> Self {
        let code = match err {
            CoreError::Protocol { code, .. } => *code,
            _ => None,
        };
        let device_id = match err {
            CoreError::DeviceUnknown { device_id }
            | CoreError::IdentityConflict { device_id, .. }
            | CoreError::SessionLost { device_id }
            | CoreError::SessionFaulted { device_id, .. } => Some(device_id.clone()),
            _ => None,
        };
        let path = match err {
            CoreError::InvalidPath { path, .. }
            | CoreError::NotWritable { path }
            | CoreError::TypeMismatch { path, .. }
            | CoreError::ValueConflict { path, .. } => Some(path.clone()),
            _ => None,
        };
        Self {
            kind: err.kind(),
            code,
            message: err.to_string(),
            device_id,
            path,
            retryable: err.retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_unknown_is_lifecycle_and_not_retryable() {
        let err = CoreError::DeviceUnknown { device_id: "x".into() };
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
        assert!(!err.retryable());
    }

    #[test]
    fn transport_lost_is_retryable() {
        let err = CoreError::TransportLost { reason: "closed".into() };
        assert!(err.retryable());
    }

    #[test]
    fn facade_error_carries_path_for_invalid_path() {
        let err = CoreError::InvalidPath { path: "Device..Bad".into(), reason: "empty segment".into() };
        let facade: FacadeError = (&err).into();
        assert_eq!(facade.path.as_deref(), Some("Device..Bad"));
        assert_eq!(facade.kind, ErrorKind::Semantic);
    }
}
