// ── Store Gateway contract (C2) ──
//
// Thin contract over a document store and a key/value cache. No
// higher-level logic lives here -- implementations fail with
// `StoreUnavailable` on transport errors and `NotFound` otherwise. The
// core ships one in-process implementation (`memory::InMemoryStore`);
// a production deployment supplies its own adapter behind this same
// trait (that adapter is an excluded external collaborator).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::{
    Device, DeviceId, EventType, FileTransfer, Instance, Operation, OperationId, OperationStatus,
    Parameter, PathPattern, Subscription, SubscriptionId,
};

/// Conjunctive filter for `findDevices`: every `Some` field must match.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub identity_prefix: Option<String>,
    pub manufacturer: Option<String>,
    pub product_class: Option<String>,
    pub online_within: Option<Duration>,
}

impl DeviceFilter {
    #[must_use]
    pub fn matches(&self, device: &Device) -> bool {
        if let Some(prefix) = &self.identity_prefix {
            if !device.id.canonical().starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(m) = &self.manufacturer {
            if &device.descriptor.manufacturer != m {
                return false;
            }
        }
        if let Some(pc) = &self.product_class {
            if &device.descriptor.model_name != pc {
                return false;
            }
        }
        if let Some(window) = self.online_within {
            if !device.is_online(window) {
                return false;
            }
        }
        true
    }
}

/// A partial update applied to an `Operation`; only `Some` fields are
/// written. Rejected outright (by the implementation) if the target
/// operation is already terminal.
#[derive(Debug, Clone, Default)]
pub struct OperationPatch {
    pub status: Option<OperationStatus>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retry_increment: bool,
}

#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn upsert_device(&self, device: Device) -> Result<(), CoreError>;
    async fn get_device(&self, id: &DeviceId) -> Result<Option<Device>, CoreError>;
    async fn find_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, CoreError>;

    async fn upsert_parameters(&self, device_id: &DeviceId, parameters: Vec<Parameter>) -> Result<(), CoreError>;
    async fn get_parameters(&self, device_id: &DeviceId, pattern: &PathPattern) -> Result<Vec<Parameter>, CoreError>;

    async fn upsert_instance(&self, instance: Instance) -> Result<(), CoreError>;
    async fn remove_instance(&self, device_id: &DeviceId, object_path: &str, instance_number: u32) -> Result<(), CoreError>;
    async fn list_instances(&self, device_id: &DeviceId, object_path: &str) -> Result<Vec<Instance>, CoreError>;

    async fn record_operation(&self, op: Operation) -> Result<(), CoreError>;
    async fn update_operation(&self, id: OperationId, patch: OperationPatch) -> Result<Operation, CoreError>;
    async fn get_operation(&self, id: OperationId) -> Result<Option<Operation>, CoreError>;

    async fn upsert_transfer(&self, transfer: FileTransfer) -> Result<(), CoreError>;
    async fn get_transfer(&self, device_id: &DeviceId, command_key: &str) -> Result<Option<FileTransfer>, CoreError>;

    async fn save_subscription(&self, sub: Subscription) -> Result<SubscriptionId, CoreError>;
    async fn list_subscriptions(&self, device_id: Option<&DeviceId>, event_type: EventType) -> Result<Vec<Subscription>, CoreError>;

    /// Best-effort ephemeral state for idempotency keys and correlation
    /// tokens; readers must tolerate misses.
    async fn put_cache(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<(), CoreError>;
    async fn get_cache(&self, key: &str) -> Result<Option<serde_json::Value>, CoreError>;
}
