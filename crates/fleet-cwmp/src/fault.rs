// ── CWMP SOAP fault codes (§4.5) ──
//
// The standard 9000-9019 fault-code space. Kept as a closed enum rather
// than a bare `u32` so a fault can only ever be constructed with one of
// the codes the protocol actually defines.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FaultCode {
    MethodNotSupported = 9000,
    RequestDenied = 9001,
    InternalError = 9002,
    InvalidArguments = 9003,
    ResourcesExceeded = 9004,
    InvalidParameterName = 9005,
    InvalidParameterType = 9006,
    InvalidParameterValue = 9007,
    NotWritable = 9008,
    NotificationRejected = 9009,
    DownloadFailure = 9010,
    UploadFailure = 9011,
    FileTransferServerUnreachable = 9012,
    FileTransferAuthenticationFailure = 9013,
    UnsupportedProtocol = 9014,
    DownloadFailMultipleRetries = 9015,
    FileTransferCancelled = 9016,
}

impl FaultCode {
    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn default_text(self) -> &'static str {
        match self {
            Self::MethodNotSupported => "Method not supported",
            Self::RequestDenied => "Request denied",
            Self::InternalError => "Internal error",
            Self::InvalidArguments => "Invalid arguments",
            Self::ResourcesExceeded => "Resources exceeded",
            Self::InvalidParameterName => "Invalid parameter name",
            Self::InvalidParameterType => "Invalid parameter type",
            Self::InvalidParameterValue => "Invalid parameter value",
            Self::NotWritable => "Non-writable parameter",
            Self::NotificationRejected => "Notification request rejected",
            Self::DownloadFailure => "Download failure",
            Self::UploadFailure => "Upload failure",
            Self::FileTransferServerUnreachable => "File transfer server unreachable",
            Self::FileTransferAuthenticationFailure => "File transfer authentication failure",
            Self::UnsupportedProtocol => "Unsupported protocol",
            Self::DownloadFailMultipleRetries => "Download failed after retries",
            Self::FileTransferCancelled => "File transfer cancelled",
        }
    }

    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            9000 => Self::MethodNotSupported,
            9001 => Self::RequestDenied,
            9002 => Self::InternalError,
            9003 => Self::InvalidArguments,
            9004 => Self::ResourcesExceeded,
            9005 => Self::InvalidParameterName,
            9006 => Self::InvalidParameterType,
            9007 => Self::InvalidParameterValue,
            9008 => Self::NotWritable,
            9009 => Self::NotificationRejected,
            9010 => Self::DownloadFailure,
            9011 => Self::UploadFailure,
            9012 => Self::FileTransferServerUnreachable,
            9013 => Self::FileTransferAuthenticationFailure,
            9014 => Self::UnsupportedProtocol,
            9015 => Self::DownloadFailMultipleRetries,
            9016 => Self::FileTransferCancelled,
            _ => return None,
        })
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.default_text())
    }
}

#[derive(Debug, Clone)]
pub struct SoapFault {
    pub code: FaultCode,
    pub text: String,
}

impl SoapFault {
    #[must_use]
    pub fn new(code: FaultCode) -> Self {
        Self { text: code.default_text().to_string(), code }
    }

    #[must_use]
    pub fn with_text(code: FaultCode, text: impl Into<String>) -> Self {
        Self { code, text: text.into() }
    }
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_known_code() {
        for code in [9000, 9001, 9002, 9003, 9004, 9005, 9006, 9007, 9008, 9009, 9010, 9011, 9012, 9013, 9014, 9015, 9016] {
            let fault = FaultCode::from_code(code).unwrap();
            assert_eq!(fault.code(), code);
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert!(FaultCode::from_code(9999).is_none());
    }
}
