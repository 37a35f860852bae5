// ── In-process Store Gateway (C2 reference adapter) ──
//
// Backed by the same reactive `EntityCollection` primitive used by the
// device registry. Exists so the crate is runnable and testable
// standalone; a production deployment supplies its own adapter behind
// `StoreGateway`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::CoreError;
use crate::model::{
    Device, DeviceId, EventType, FileTransfer, Instance, Operation, OperationId, OperationStatus,
    Parameter, PathPattern, Subscription, SubscriptionId,
};

use super::collection::EntityCollection;
use super::gateway::{DeviceFilter, OperationPatch, StoreGateway};

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

pub struct InMemoryStore {
    devices: EntityCollection<String, Device>,
    parameters: EntityCollection<String, Parameter>,
    instances: EntityCollection<String, Instance>,
    operations: EntityCollection<OperationId, Operation>,
    transfers: EntityCollection<String, FileTransfer>,
    subscriptions: EntityCollection<SubscriptionId, Subscription>,
    cache: DashMap<String, CacheEntry>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: EntityCollection::new(),
            parameters: EntityCollection::new(),
            instances: EntityCollection::new(),
            operations: EntityCollection::new(),
            transfers: EntityCollection::new(),
            subscriptions: EntityCollection::new(),
            cache: DashMap::new(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreGateway for InMemoryStore {
    async fn upsert_device(&self, device: Device) -> Result<(), CoreError> {
        self.devices.upsert(device.id.canonical(), device);
        Ok(())
    }

    async fn get_device(&self, id: &DeviceId) -> Result<Option<Device>, CoreError> {
        Ok(self.devices.get(&id.canonical()).map(|d| (*d).clone()))
    }

    async fn find_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, CoreError> {
        Ok(self
            .devices
            .snapshot()
            .iter()
            .filter(|d| filter.matches(d))
            .map(|d| (**d).clone())
            .collect())
    }

    async fn upsert_parameters(&self, device_id: &DeviceId, parameters: Vec<Parameter>) -> Result<(), CoreError> {
        // All-or-nothing: validate before writing any entry.
        for p in &parameters {
            if &p.device_id != device_id {
                return Err(CoreError::Internal("parameter device_id mismatch in bulk upsert".into()));
            }
        }
        for p in parameters {
            let key = p.key();
            self.parameters.upsert(key, p);
        }
        Ok(())
    }

    async fn get_parameters(&self, device_id: &DeviceId, pattern: &PathPattern) -> Result<Vec<Parameter>, CoreError> {
        let mut matched: Vec<Parameter> = self
            .parameters
            .snapshot()
            .iter()
            .filter(|p| &p.device_id == device_id)
            .filter(|p| {
                crate::model::ParameterPath::parse(&p.path)
                    .map(|parsed| pattern.matches(&parsed))
                    .unwrap_or(false)
            })
            .map(|p| (**p).clone())
            .collect();
        matched.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(matched)
    }

    async fn upsert_instance(&self, instance: Instance) -> Result<(), CoreError> {
        self.instances.upsert(instance.key(), instance);
        Ok(())
    }

    async fn remove_instance(&self, device_id: &DeviceId, object_path: &str, instance_number: u32) -> Result<(), CoreError> {
        let key = format!("{}|{object_path}{instance_number}", device_id.canonical());
        self.instances.remove(&key);
        Ok(())
    }

    async fn list_instances(&self, device_id: &DeviceId, object_path: &str) -> Result<Vec<Instance>, CoreError> {
        Ok(self
            .instances
            .snapshot()
            .iter()
            .filter(|i| &i.device_id == device_id && i.object_path == object_path)
            .map(|i| (**i).clone())
            .collect())
    }

    async fn record_operation(&self, op: Operation) -> Result<(), CoreError> {
        self.operations.upsert(op.id, op);
        Ok(())
    }

    async fn update_operation(&self, id: OperationId, patch: OperationPatch) -> Result<Operation, CoreError> {
        let mut rejected = false;
        self.operations.update(&id, |op| {
            if op.status.is_terminal() {
                rejected = true;
                return;
            }
            if let Some(status) = patch.status {
                op.try_transition(status);
            }
            if let Some(result) = patch.result {
                op.result = Some(result);
            }
            if let Some(error) = patch.error {
                op.error = Some(error);
            }
            if patch.retry_increment {
                op.retry_count += 1;
            }
        });
        let updated = self
            .operations
            .get(&id)
            .ok_or_else(|| CoreError::NotFound { what: format!("operation {id}") })?;
        if rejected {
            return Err(CoreError::Internal(format!("operation {id} is already terminal")));
        }
        Ok((*updated).clone())
    }

    async fn get_operation(&self, id: OperationId) -> Result<Option<Operation>, CoreError> {
        Ok(self.operations.get(&id).map(|o| (*o).clone()))
    }

    async fn upsert_transfer(&self, transfer: FileTransfer) -> Result<(), CoreError> {
        self.transfers.upsert(transfer.key(), transfer);
        Ok(())
    }

    async fn get_transfer(&self, device_id: &DeviceId, command_key: &str) -> Result<Option<FileTransfer>, CoreError> {
        let key = format!("{}|{command_key}", device_id.canonical());
        Ok(self.transfers.get(&key).map(|t| (*t).clone()))
    }

    async fn save_subscription(&self, sub: Subscription) -> Result<SubscriptionId, CoreError> {
        // Idempotent on identical tuple (§4.7).
        if let Some(existing) = self
            .subscriptions
            .snapshot()
            .iter()
            .find(|s| s.same_tuple(&sub.device_id, sub.event_type, &sub.path_pattern_raw, &sub.delivery_target))
        {
            return Ok(existing.id);
        }
        let id = sub.id;
        self.subscriptions.upsert(id, sub);
        Ok(id)
    }

    async fn list_subscriptions(&self, device_id: Option<&DeviceId>, event_type: EventType) -> Result<Vec<Subscription>, CoreError> {
        Ok(self
            .subscriptions
            .snapshot()
            .iter()
            .filter(|s| s.event_type == event_type)
            .filter(|s| match (&s.device_id, device_id) {
                (None, _) => true,
                (Some(sd), Some(d)) => sd == d,
                (Some(_), None) => false,
            })
            .map(|s| (**s).clone())
            .collect())
    }

    async fn put_cache(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<(), CoreError> {
        self.cache.insert(key.to_string(), CacheEntry { value, expires_at: Instant::now() + ttl });
        Ok(())
    }

    async fn get_cache(&self, key: &str) -> Result<Option<serde_json::Value>, CoreError> {
        let Some(entry) = self.cache.get(key) else { return Ok(None) };
        if entry.expires_at < Instant::now() {
            drop(entry);
            self.cache.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceDescriptor, OperationKind};

    fn store() -> InMemoryStore {
        InMemoryStore::new()
    }

    #[tokio::test]
    async fn upsert_and_get_device_roundtrips() {
        let s = store();
        let id = DeviceId::modern_agent("a1");
        let device = Device::new(id.clone(), DeviceDescriptor::default(), None);
        s.upsert_device(device).await.unwrap();
        let fetched = s.get_device(&id).await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn set_then_get_parameters_roundtrips() {
        let s = store();
        let id = DeviceId::modern_agent("a1");
        let p = Parameter {
            device_id: id.clone(),
            path: "Device.DeviceInfo.SoftwareVersion".into(),
            value: "1.2.3".into(),
            param_type: crate::model::ParamType::String,
            writable: false,
            last_update: chrono::Utc::now(),
        };
        s.upsert_parameters(&id, vec![p]).await.unwrap();
        let pattern = PathPattern::parse("Device.DeviceInfo.*").unwrap();
        let got = s.get_parameters(&id, &pattern).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].value, "1.2.3");
    }

    #[tokio::test]
    async fn update_operation_rejects_terminal_rewrite() {
        let s = store();
        let op = Operation::new(DeviceId::modern_agent("a1"), OperationKind::GetParameters, serde_json::json!({}));
        let id = op.id;
        s.record_operation(op).await.unwrap();
        s.update_operation(id, OperationPatch { status: Some(OperationStatus::Completed), ..Default::default() })
            .await
            .unwrap();
        let result = s
            .update_operation(id, OperationPatch { status: Some(OperationStatus::Failed), ..Default::default() })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn save_subscription_is_idempotent_on_duplicate_tuple() {
        let s = store();
        let sub1 = Subscription {
            id: SubscriptionId::new(),
            device_id: None,
            event_type: EventType::ValueChange,
            path_pattern: None,
            path_pattern_raw: "Device.WiFi.Radio.*.Channel".into(),
            delivery_target: "t".into(),
            status: crate::model::SubscriptionStatus::Active,
            last_delivery: None,
        };
        let id1 = s.save_subscription(sub1.clone()).await.unwrap();
        let mut sub2 = sub1;
        sub2.id = SubscriptionId::new();
        let id2 = s.save_subscription(sub2).await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn cache_entries_expire() {
        let s = store();
        s.put_cache("k", serde_json::json!(1), Duration::from_millis(5)).await.unwrap();
        assert!(s.get_cache("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(s.get_cache("k").await.unwrap().is_none());
    }
}
