// ── CWMP error taxonomy (C5, §4.5 / §7) ──

use fleet_core::error::CoreError;
use thiserror::Error;

use crate::fault::SoapFault;

#[derive(Debug, Error)]
pub enum CwmpError {
    #[error("malformed SOAP envelope: {0}")]
    MalformedEnvelope(String),

    #[error("envelope exceeds configured size limit")]
    EnvelopeTooLarge,

    #[error("device fault: {0}")]
    DeviceFault(SoapFault),

    #[error("session lost for {device_id}")]
    SessionLost { device_id: String },

    #[error("session already faulted")]
    SessionFaulted,

    #[error("no open session and no connection-request callback on file")]
    NoCallbackUrl,

    #[error("connection-request callback failed: {0}")]
    ConnectionRequestFailed(String),

    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for CwmpError {
    fn from(e: reqwest::Error) -> Self {
        Self::ConnectionRequestFailed(e.to_string())
    }
}

impl From<quick_xml::Error> for CwmpError {
    fn from(e: quick_xml::Error) -> Self {
        Self::MalformedEnvelope(e.to_string())
    }
}

impl From<CwmpError> for CoreError {
    fn from(e: CwmpError) -> Self {
        let message = e.to_string();
        match e {
            CwmpError::Timeout => CoreError::Timeout,
            CwmpError::SessionLost { device_id } => CoreError::SessionLost { device_id },
            CwmpError::SessionFaulted => CoreError::SessionFaulted { device_id: String::new(), reason: message },
            CwmpError::DeviceFault(fault) => CoreError::Protocol { code: Some(fault.code.code()), message: fault.text },
            CwmpError::ConnectionRequestFailed(reason) => CoreError::TransportLost { reason },
            other => CoreError::Protocol { code: None, message: other.to_string() },
        }
    }
}
