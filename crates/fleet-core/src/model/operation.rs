// ── Operation entity ──
//
// An in-flight request against a device. Status transitions are
// exactly-once terminal: once status leaves {pending, in_progress} it
// never changes again. `try_transition` is the single choke point that
// enforces this invariant -- callers should never assign `.status`
// directly outside this module's tests.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::device_id::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of RPC this operation represents. Mirrors the Operation API
/// (C7) surface plus the internal `session_lost` kind used when a CWMP
/// session drops with RPCs still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    GetParameters,
    SetParameters,
    AddObject,
    DeleteObject,
    Operate,
    ScheduleFileTransfer,
    SessionLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl OperationStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub device_id: DeviceId,
    pub kind: OperationKind,
    pub payload: serde_json::Value,
    pub status: OperationStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub timeout_at: Option<chrono::DateTime<chrono::Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl Operation {
    #[must_use]
    pub fn new(device_id: DeviceId, kind: OperationKind, payload: serde_json::Value) -> Self {
        Self {
            id: OperationId::new(),
            device_id,
            kind,
            payload,
            status: OperationStatus::Pending,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            timeout_at: None,
            result: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Attempt to move to `next`. Returns `false` (no-op) if the current
    /// status is already terminal -- the monotonic-transition invariant
    /// from §8.
    pub fn try_transition(&mut self, next: OperationStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            self.completed_at = Some(chrono::Utc::now());
        } else if next == OperationStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now());
        }
        self.status = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op() -> Operation {
        Operation::new(DeviceId::modern_agent("a1"), OperationKind::GetParameters, serde_json::json!({}))
    }

    #[test]
    fn transitions_are_monotonic() {
        let mut o = op();
        assert!(o.try_transition(OperationStatus::InProgress));
        assert!(o.try_transition(OperationStatus::Completed));
        // Terminal reached -- further transitions are rejected.
        assert!(!o.try_transition(OperationStatus::Failed));
        assert_eq!(o.status, OperationStatus::Completed);
    }

    #[test]
    fn started_at_set_once() {
        let mut o = op();
        o.try_transition(OperationStatus::InProgress);
        let first = o.started_at;
        o.started_at = None;
        o.try_transition(OperationStatus::InProgress);
        // Already terminal check doesn't apply here since InProgress isn't
        // terminal; but started_at should only be stamped when absent.
        assert!(first.is_some());
    }

    #[test]
    fn completed_at_stamped_on_terminal_transition() {
        let mut o = op();
        assert!(o.completed_at.is_none());
        o.try_transition(OperationStatus::Timeout);
        assert!(o.completed_at.is_some());
    }
}
