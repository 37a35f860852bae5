// ── TR-069 event code registry (§4.5) ──
//
// A closed enum for the codes the protocol itself defines, so dispatch
// on event kind is exhaustive-matched. Unrecognised strings (vendor
// extensions) are preserved verbatim rather than rejected.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCode {
    Bootstrap,
    Boot,
    Periodic,
    Scheduled,
    ValueChange,
    Kicked,
    ConnectionRequest,
    TransferComplete,
    DiagnosticsComplete,
    RequestDownload,
    AutonomousTransferComplete,
    Reboot,
    ScheduleInform,
    Download,
    Upload,
    /// A vendor-extension or future-standard code this registry doesn't
    /// recognise. Logged at `warn`, never rejected.
    Other(String),
}

impl EventCode {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "0 BOOTSTRAP" => Self::Bootstrap,
            "1 BOOT" => Self::Boot,
            "2 PERIODIC" => Self::Periodic,
            "3 SCHEDULED" => Self::Scheduled,
            "4 VALUE CHANGE" => Self::ValueChange,
            "5 KICKED" => Self::Kicked,
            "6 CONNECTION REQUEST" => Self::ConnectionRequest,
            "7 TRANSFER COMPLETE" => Self::TransferComplete,
            "8 DIAGNOSTICS COMPLETE" => Self::DiagnosticsComplete,
            "9 REQUEST DOWNLOAD" => Self::RequestDownload,
            "10 AUTONOMOUS TRANSFER COMPLETE" => Self::AutonomousTransferComplete,
            "M Reboot" => Self::Reboot,
            "M ScheduleInform" => Self::ScheduleInform,
            "M Download" => Self::Download,
            "M Upload" => Self::Upload,
            other => {
                tracing::warn!(code = other, "unrecognised CWMP event code, preserving verbatim");
                Self::Other(other.to_string())
            }
        }
    }

    #[must_use]
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, Self::Bootstrap)
    }

    #[must_use]
    pub fn is_transfer_complete(&self) -> bool {
        matches!(self, Self::TransferComplete | Self::AutonomousTransferComplete)
    }

    #[must_use]
    pub fn is_value_change(&self) -> bool {
        matches!(self, Self::ValueChange)
    }

    #[must_use]
    pub fn is_boot(&self) -> bool {
        matches!(self, Self::Boot)
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bootstrap => "0 BOOTSTRAP",
            Self::Boot => "1 BOOT",
            Self::Periodic => "2 PERIODIC",
            Self::Scheduled => "3 SCHEDULED",
            Self::ValueChange => "4 VALUE CHANGE",
            Self::Kicked => "5 KICKED",
            Self::ConnectionRequest => "6 CONNECTION REQUEST",
            Self::TransferComplete => "7 TRANSFER COMPLETE",
            Self::DiagnosticsComplete => "8 DIAGNOSTICS COMPLETE",
            Self::RequestDownload => "9 REQUEST DOWNLOAD",
            Self::AutonomousTransferComplete => "10 AUTONOMOUS TRANSFER COMPLETE",
            Self::Reboot => "M Reboot",
            Self::ScheduleInform => "M ScheduleInform",
            Self::Download => "M Download",
            Self::Upload => "M Upload",
            Self::Other(raw) => raw,
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_codes() {
        assert_eq!(EventCode::parse("1 BOOT"), EventCode::Boot);
        assert!(EventCode::parse("1 BOOT").is_boot());
        assert_eq!(EventCode::parse("7 TRANSFER COMPLETE"), EventCode::TransferComplete);
        assert!(EventCode::parse("7 TRANSFER COMPLETE").is_transfer_complete());
    }

    #[test]
    fn preserves_unrecognised_codes_verbatim() {
        let code = EventCode::parse("X VENDOR SPECIAL");
        assert_eq!(code, EventCode::Other("X VENDOR SPECIAL".to_string()));
        assert_eq!(code.to_string(), "X VENDOR SPECIAL");
    }

    #[test]
    fn display_round_trips_standard_codes() {
        for raw in ["0 BOOTSTRAP", "4 VALUE CHANGE", "M Download"] {
            assert_eq!(EventCode::parse(raw).to_string(), raw);
        }
    }
}
