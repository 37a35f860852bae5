// ── Device Registry (C6) ──
//
// Indexes live devices by canonical id, hands out the per-device
// exclusive lock the engines use for the serialisation rules in §4.4
// and §4.5, and runs a background janitor that demotes stale devices to
// offline. Grounded on the teacher's `Mutex<Option<T>>`-guarded handles
// and its periodic refresh-task loop, generalized from "one controller"
// to "one lock per device."

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fleet_config::RegistryConfig;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::model::{Device, DeviceDescriptor, DeviceId, TransportHint};
use crate::store::{DeviceFilter, StoreGateway};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Events the registry emits as devices come and go. Consumers
/// (operator-facing health checks, C7) subscribe via `events()`.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Registered(DeviceId),
    Touched(DeviceId),
    WentOffline(DeviceId),
}

/// A `Device` plus the exclusive lock the engines acquire for mutating
/// operations against it (§5 "Per-device serialisation").
pub struct DeviceHandle {
    pub device: Device,
    pub lock: Arc<Mutex<()>>,
}

pub struct DeviceRegistry {
    store: Arc<dyn StoreGateway>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    online: DashMap<String, bool>,
    config: RegistryConfig,
    events: broadcast::Sender<RegistryEvent>,
    cancel: CancellationToken,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn StoreGateway>, config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            locks: DashMap::new(),
            online: DashMap::new(),
            config,
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Register a device. Idempotent: re-registering the same id with
    /// the same descriptor is a no-op success. A conflicting descriptor
    /// for an id that already exists fails with `IdentityConflict`,
    /// leaving the existing entry unchanged (§8 scenario 6).
    pub async fn register(
        &self,
        id: DeviceId,
        descriptor: DeviceDescriptor,
        transport_hint: Option<TransportHint>,
    ) -> Result<(), CoreError> {
        if let Some(existing) = self.store.get_device(&id).await? {
            if descriptor_matches(&existing.descriptor, &descriptor) {
                return Ok(());
            }
            return Err(CoreError::IdentityConflict {
                device_id: id.canonical(),
                reason: "descriptor mismatch on re-registration".into(),
            });
        }

        let device = Device::new(id.clone(), descriptor, transport_hint);
        self.store.upsert_device(device).await?;
        self.online.insert(id.canonical(), true);
        let _ = self.events.send(RegistryEvent::Registered(id));
        Ok(())
    }

    /// Advance a device's `LastContact` to now.
    pub async fn touch(&self, id: &DeviceId) -> Result<(), CoreError> {
        let mut device = self
            .store
            .get_device(id)
            .await?
            .ok_or_else(|| CoreError::DeviceUnknown { device_id: id.canonical() })?;
        device.touch();
        self.store.upsert_device(device).await?;
        self.online.insert(id.canonical(), true);
        let _ = self.events.send(RegistryEvent::Touched(id.clone()));
        Ok(())
    }

    /// Fetch a device plus its per-device exclusive lock. The lock is
    /// created lazily and cached for the registry's lifetime, so two
    /// concurrent callers for the same id always get the same mutex.
    pub async fn get(&self, id: &DeviceId) -> Result<DeviceHandle, CoreError> {
        let device = self
            .store
            .get_device(id)
            .await?
            .ok_or_else(|| CoreError::DeviceUnknown { device_id: id.canonical() })?;
        let lock = self.device_lock(id);
        Ok(DeviceHandle { device, lock })
    }

    /// The exclusive lock for `id`, created on first access.
    pub fn device_lock(&self, id: &DeviceId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id.canonical()).or_insert_with(|| Arc::new(Mutex::new(()))).value())
    }

    /// Devices whose `LastContact` is within `window`.
    pub async fn list_live(&self, window: Duration) -> Result<Vec<Device>, CoreError> {
        self.store
            .find_devices(&DeviceFilter { online_within: Some(window), ..Default::default() })
            .await
    }

    /// Spawn the background janitor that sweeps every `sweepInterval`
    /// and demotes stale devices to offline. Returns a handle the
    /// caller should hold to keep the task alive; dropping the returned
    /// `CancellationToken`'s parent (via `shutdown`) stops it.
    pub fn spawn_janitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.config.sweep_interval);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => registry.sweep().await,
                }
            }
        })
    }

    /// Stop the janitor and any other background work owned by this
    /// registry.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn sweep(&self) {
        let devices = match self.store.find_devices(&DeviceFilter::default()).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "janitor sweep failed to list devices");
                return;
            }
        };
        for device in devices {
            let key = device.id.canonical();
            let is_online_now = device.is_online(self.config.liveness_window);
            let was_online = self.online.get(&key).map(|v| *v).unwrap_or(true);
            if was_online && !is_online_now {
                tracing::debug!(device = %key, "device demoted to offline");
                let _ = self.events.send(RegistryEvent::WentOffline(device.id.clone()));
            }
            self.online.insert(key, is_online_now);
        }
    }
}

fn descriptor_matches(a: &DeviceDescriptor, b: &DeviceDescriptor) -> bool {
    a.manufacturer == b.manufacturer && a.model_name == b.model_name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(InMemoryStore::new()), RegistryConfig::default())
    }

    #[tokio::test]
    async fn register_is_idempotent_for_same_descriptor() {
        let reg = registry();
        let id = DeviceId::legacy_cpe("Acme", "001122", "Router", "SN1");
        let descriptor = DeviceDescriptor { manufacturer: "Acme".into(), model_name: "Router".into(), ..Default::default() };
        reg.register(id.clone(), descriptor.clone(), None).await.unwrap();
        reg.register(id, descriptor, None).await.unwrap();
    }

    #[tokio::test]
    async fn register_rejects_conflicting_descriptor() {
        let reg = registry();
        let id = DeviceId::legacy_cpe("Acme", "001122", "Router", "SN1");
        let d1 = DeviceDescriptor { manufacturer: "Acme".into(), model_name: "RouterA".into(), ..Default::default() };
        let d2 = DeviceDescriptor { manufacturer: "Acme".into(), model_name: "RouterB".into(), ..Default::default() };
        reg.register(id.clone(), d1, None).await.unwrap();
        let result = reg.register(id.clone(), d2, None).await;
        assert!(matches!(result, Err(CoreError::IdentityConflict { .. })));

        let stored = reg.get(&id).await.unwrap();
        assert_eq!(stored.device.descriptor.model_name, "RouterA");
    }

    #[tokio::test]
    async fn device_lock_is_shared_across_calls() {
        let reg = registry();
        let id = DeviceId::modern_agent("a1");
        let l1 = reg.device_lock(&id);
        let l2 = reg.device_lock(&id);
        assert!(Arc::ptr_eq(&l1, &l2));
    }

    #[tokio::test]
    async fn touch_unknown_device_fails() {
        let reg = registry();
        let id = DeviceId::modern_agent("ghost");
        let result = reg.touch(&id).await;
        assert!(matches!(result, Err(CoreError::DeviceUnknown { .. })));
    }
}
