// ── FileTransfer entity ──

use serde::{Deserialize, Serialize};

use super::device_id::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Download,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TransferStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// (DeviceId, CommandKey, Direction, Url, FileType, Credentials, Status,
/// StartedAt, CompletedAt, Fault). `CommandKey` is opaque to the server;
/// it is echoed back in the transfer-complete event and is the
/// correlation handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTransfer {
    pub device_id: DeviceId,
    pub command_key: String,
    pub direction: TransferDirection,
    pub url: String,
    pub file_type: String,
    pub status: TransferStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub fault: Option<String>,
}

impl FileTransfer {
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}", self.device_id.canonical(), self.command_key)
    }

    /// Mark the transfer terminal, correlating by `CommandKey`. No-op if
    /// already terminal (same exactly-once discipline as `Operation`).
    pub fn complete(&mut self, status: TransferStatus, fault: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.fault = fault;
        self.completed_at = Some(chrono::Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer() -> FileTransfer {
        FileTransfer {
            device_id: DeviceId::modern_agent("a1"),
            command_key: "ck-1".into(),
            direction: TransferDirection::Download,
            url: "https://example.test/fw.bin".into(),
            file_type: "1 Firmware Upgrade Image".into(),
            status: TransferStatus::Pending,
            started_at: chrono::Utc::now(),
            completed_at: None,
            fault: None,
        }
    }

    #[test]
    fn complete_is_idempotent_after_terminal() {
        let mut t = transfer();
        assert!(t.complete(TransferStatus::Completed, None));
        assert!(!t.complete(TransferStatus::Failed, Some("late".into())));
        assert_eq!(t.status, TransferStatus::Completed);
    }
}
