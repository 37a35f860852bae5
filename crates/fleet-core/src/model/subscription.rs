// ── Subscription entity ──

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::device_id::DeviceId;
use super::path::PathPattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Mirrors the CWMP event-code registry (§4.5) and the USP `Notify`
/// kinds (§4.4) under one umbrella so a subscription can match events
/// from either engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ValueChange,
    Boot,
    Bootstrap,
    Periodic,
    TransferComplete,
    ConnectionRequest,
    ObjectCreation,
    ObjectDeletion,
    Operate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
}

/// (SubscriptionId, DeviceId-or-null, EventType, PathPattern,
/// DeliveryTarget, Status, LastDelivery). `DeviceId = None` means "any
/// device."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub device_id: Option<DeviceId>,
    pub event_type: EventType,
    #[serde(skip)]
    pub path_pattern: Option<PathPattern>,
    pub path_pattern_raw: String,
    pub delivery_target: String,
    pub status: SubscriptionStatus,
    pub last_delivery: Option<chrono::DateTime<chrono::Utc>>,
}

impl Subscription {
    /// Structural equality ignoring id/status/last_delivery, used to
    /// detect a duplicate subscription so `subscribe` can be idempotent
    /// per §4.7.
    #[must_use]
    pub fn same_tuple(&self, device_id: &Option<DeviceId>, event_type: EventType, path_pattern_raw: &str, delivery_target: &str) -> bool {
        &self.device_id == device_id
            && self.event_type == event_type
            && self.path_pattern_raw == path_pattern_raw
            && self.delivery_target == delivery_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_tuple_detects_duplicates() {
        let sub = Subscription {
            id: SubscriptionId::new(),
            device_id: Some(DeviceId::modern_agent("a1")),
            event_type: EventType::ValueChange,
            path_pattern: None,
            path_pattern_raw: "Device.WiFi.Radio.*.Channel".into(),
            delivery_target: "t".into(),
            status: SubscriptionStatus::Active,
            last_delivery: None,
        };
        assert!(sub.same_tuple(
            &Some(DeviceId::modern_agent("a1")),
            EventType::ValueChange,
            "Device.WiFi.Radio.*.Channel",
            "t"
        ));
        assert!(!sub.same_tuple(&Some(DeviceId::modern_agent("a2")), EventType::ValueChange, "Device.WiFi.Radio.*.Channel", "t"));
    }
}
