// ── Operation API (C7) ──
//
// Uniform façade dispatching to C4 (USP) or C5 (CWMP) by device kind,
// recording every call as an `Operation` for status tracking and
// coalescing idempotency-key retries through the store's cache. No
// REST framing lives here -- that thin HTTP translation layer is an
// excluded external collaborator per §1.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::{DeviceEngine, EngineTarget, ParameterWrite, SetOutcome, TransferCredentials};
use crate::error::CoreError;
use crate::model::{
    DeviceId, EventType, FileTransfer, Instance, Operation, OperationId, OperationKind,
    OperationStatus, Parameter, ParameterPath, PathPattern, PathSegment, Subscription,
    SubscriptionId, SubscriptionStatus, TransferDirection, TransferStatus,
};
use crate::registry::DeviceRegistry;
use crate::store::{OperationPatch, StoreGateway};

pub struct OperationFacade {
    store: Arc<dyn StoreGateway>,
    registry: Arc<DeviceRegistry>,
    usp_engine: Arc<dyn DeviceEngine>,
    cwmp_engine: Arc<dyn DeviceEngine>,
    idempotency_ttl: Duration,
}

impl OperationFacade {
    #[must_use]
    pub fn new(
        store: Arc<dyn StoreGateway>,
        registry: Arc<DeviceRegistry>,
        usp_engine: Arc<dyn DeviceEngine>,
        cwmp_engine: Arc<dyn DeviceEngine>,
        idempotency_ttl: Duration,
    ) -> Self {
        Self { store, registry, usp_engine, cwmp_engine, idempotency_ttl }
    }

    fn engine_for(&self, id: &DeviceId) -> &Arc<dyn DeviceEngine> {
        if id.is_modern() {
            &self.usp_engine
        } else {
            &self.cwmp_engine
        }
    }

    async fn target_for(&self, id: &DeviceId) -> Result<EngineTarget, CoreError> {
        let handle = self.registry.get(id).await?;
        Ok(EngineTarget { device: handle.device, lock: handle.lock })
    }

    async fn record(&self, device_id: &DeviceId, kind: OperationKind, payload: serde_json::Value) -> Result<OperationId, CoreError> {
        let op = Operation::new(device_id.clone(), kind, payload);
        let id = op.id;
        self.store.record_operation(op).await?;
        self.store
            .update_operation(id, OperationPatch { status: Some(OperationStatus::InProgress), ..Default::default() })
            .await?;
        Ok(id)
    }

    async fn finish(&self, id: OperationId, result: Result<serde_json::Value, &CoreError>) {
        let patch = match result {
            Ok(value) => OperationPatch { status: Some(OperationStatus::Completed), result: Some(value), ..Default::default() },
            Err(err) => OperationPatch { status: Some(OperationStatus::Failed), error: Some(err.to_string()), ..Default::default() },
        };
        if let Err(e) = self.store.update_operation(id, patch).await {
            tracing::warn!(error = %e, operation = %id, "failed to record terminal operation status");
        }
    }

    /// `{InvalidPath, DeviceUnknown, Timeout, EngineError}`
    pub async fn get_parameters(&self, device_id: &DeviceId, patterns: &[PathPattern], timeout: Duration) -> Result<Vec<Parameter>, CoreError> {
        let target = self.target_for(device_id).await?;
        let op_id = self.record(device_id, OperationKind::GetParameters, serde_json::json!({ "patterns": patterns.iter().map(ToString::to_string).collect::<Vec<_>>() })).await?;

        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let result: Result<(), CoreError> = async {
            for pattern in patterns {
                for p in self.usp_or_cwmp_get(&target, pattern, timeout).await? {
                    if seen.insert(p.path.clone()) {
                        out.push(p);
                    }
                }
            }
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => {
                self.store.upsert_parameters(device_id, out.clone()).await?;
                self.finish(op_id, Ok(serde_json::json!({ "count": out.len() }))).await;
            }
            Err(e) => self.finish(op_id, Err(e)).await,
        }
        result?;
        Ok(out)
    }

    async fn usp_or_cwmp_get(&self, target: &EngineTarget, pattern: &PathPattern, timeout: Duration) -> Result<Vec<Parameter>, CoreError> {
        self.engine_for(&target.device.id).get(target, pattern, timeout).await
    }

    /// `{InvalidPath, TypeMismatch, NotWritable, ValueConflict, DeviceUnknown, Timeout, EngineError}`
    pub async fn set_parameters(
        &self,
        device_id: &DeviceId,
        writes: Vec<ParameterWrite>,
        idempotency_key: Option<&str>,
        all_or_nothing: bool,
        timeout: Duration,
    ) -> Result<Vec<SetOutcome>, CoreError> {
        if let Some(key) = idempotency_key {
            if let Some(cached) = self.store.get_cache(key).await? {
                if let Ok(outcomes) = serde_json::from_value::<Vec<CachedSetOutcome>>(cached) {
                    return Ok(outcomes.into_iter().map(Into::into).collect());
                }
            }
        }

        let target = self.target_for(device_id).await?;
        let _guard = target.lock.lock().await;
        let op_id = self
            .record(device_id, OperationKind::SetParameters, serde_json::json!({ "paths": writes.iter().map(|w| w.path.clone()).collect::<Vec<_>>() }))
            .await?;

        let result = self.engine_for(device_id).set(&target, writes, all_or_nothing, timeout).await;

        match &result {
            Ok(outcomes) => {
                for outcome in outcomes.iter().filter(|o| o.error.is_none()) {
                    tracing::debug!(device = %device_id, path = %outcome.path, "parameter write confirmed");
                }
                self.finish(op_id, Ok(serde_json::to_value(outcomes).unwrap_or_default())).await;
                if let Some(key) = idempotency_key {
                    let cacheable: Vec<CachedSetOutcome> = outcomes.iter().cloned().map(Into::into).collect();
                    if let Ok(value) = serde_json::to_value(cacheable) {
                        let _ = self.store.put_cache(key, value, self.idempotency_ttl).await;
                    }
                }
            }
            Err(e) => self.finish(op_id, Err(e)).await,
        }
        result
    }

    /// `{InvalidPath, ResourcesExceeded, DeviceUnknown, Timeout}`
    pub async fn add_object(&self, device_id: &DeviceId, object_path: &str, seed: Vec<ParameterWrite>, timeout: Duration) -> Result<u32, CoreError> {
        let target = self.target_for(device_id).await?;
        let _guard = target.lock.lock().await;
        let op_id = self.record(device_id, OperationKind::AddObject, serde_json::json!({ "objectPath": object_path })).await?;

        let result = self.engine_for(device_id).add(&target, object_path, seed.clone(), timeout).await;

        match &result {
            Ok(instance_number) => {
                let parameters = seed.into_iter().map(|w| (w.path, w.value)).collect();
                let instance = Instance { device_id: device_id.clone(), object_path: object_path.to_string(), instance_number: *instance_number, parameters };
                self.store.upsert_instance(instance).await?;
                self.finish(op_id, Ok(serde_json::json!({ "instanceNumber": instance_number }))).await;
            }
            Err(e) => self.finish(op_id, Err(e)).await,
        }
        result
    }

    /// `{InvalidPath, NotFound, DeviceUnknown, Timeout}`
    pub async fn delete_object(&self, device_id: &DeviceId, instance_path: &str, timeout: Duration) -> Result<(), CoreError> {
        let (object_path, instance_number) = split_instance_path(instance_path)?;

        let target = self.target_for(device_id).await?;
        let _guard = target.lock.lock().await;
        let op_id = self.record(device_id, OperationKind::DeleteObject, serde_json::json!({ "instancePath": instance_path })).await?;

        let result = self.engine_for(device_id).delete(&target, &object_path, instance_number, timeout).await;

        match &result {
            Ok(()) => {
                self.store.remove_instance(device_id, &object_path, instance_number).await?;
                self.finish(op_id, Ok(serde_json::json!({}))).await;
            }
            Err(e) => self.finish(op_id, Err(e)).await,
        }
        result
    }

    pub async fn operate(&self, device_id: &DeviceId, command: &str, arguments: serde_json::Value, timeout: Duration) -> Result<serde_json::Value, CoreError> {
        let target = self.target_for(device_id).await?;
        let _guard = target.lock.lock().await;
        let op_id = self.record(device_id, OperationKind::Operate, serde_json::json!({ "command": command, "arguments": arguments })).await?;

        let result = self.engine_for(device_id).operate(&target, command, arguments, timeout).await;
        match &result {
            Ok(value) => self.finish(op_id, Ok(value.clone())).await,
            Err(e) => self.finish(op_id, Err(e)).await,
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn schedule_file_transfer(
        &self,
        device_id: &DeviceId,
        direction: TransferDirection,
        url: &str,
        file_type: &str,
        credentials: Option<TransferCredentials>,
        delay: Duration,
        command_key: &str,
    ) -> Result<(), CoreError> {
        let target = self.target_for(device_id).await?;
        let op_id = self
            .record(device_id, OperationKind::ScheduleFileTransfer, serde_json::json!({ "commandKey": command_key, "direction": format!("{direction:?}") }))
            .await?;

        let transfer = FileTransfer {
            device_id: device_id.clone(),
            command_key: command_key.to_string(),
            direction,
            url: url.to_string(),
            file_type: file_type.to_string(),
            status: TransferStatus::Pending,
            started_at: chrono::Utc::now(),
            completed_at: None,
            fault: None,
        };
        self.store.upsert_transfer(transfer).await?;

        let result = self.engine_for(device_id).schedule_transfer(&target, direction, url, file_type, credentials, delay, command_key).await;
        match &result {
            Ok(()) => self.finish(op_id, Ok(serde_json::json!({ "commandKey": command_key }))).await,
            Err(e) => self.finish(op_id, Err(e)).await,
        }
        result
    }

    pub async fn get_transfer(&self, device_id: &DeviceId, command_key: &str) -> Result<Option<FileTransfer>, CoreError> {
        self.store.get_transfer(device_id, command_key).await
    }

    /// Idempotent on identical `(deviceId, eventType, pathPattern, deliveryTarget)`.
    pub async fn subscribe(
        &self,
        device_id: Option<DeviceId>,
        event_type: EventType,
        path_pattern_raw: &str,
        delivery_target: &str,
    ) -> Result<SubscriptionId, CoreError> {
        let path_pattern = PathPattern::parse(path_pattern_raw).map_err(|e| CoreError::InvalidPath { path: path_pattern_raw.to_string(), reason: e.reason })?;
        let sub = Subscription {
            id: SubscriptionId::new(),
            device_id,
            event_type,
            path_pattern: Some(path_pattern),
            path_pattern_raw: path_pattern_raw.to_string(),
            delivery_target: delivery_target.to_string(),
            status: SubscriptionStatus::Active,
            last_delivery: None,
        };
        self.store.save_subscription(sub).await
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CachedSetOutcome {
    path: String,
    error: Option<String>,
}

impl From<SetOutcome> for CachedSetOutcome {
    fn from(o: SetOutcome) -> Self {
        Self { path: o.path, error: o.error }
    }
}

impl From<CachedSetOutcome> for SetOutcome {
    fn from(o: CachedSetOutcome) -> Self {
        Self { path: o.path, error: o.error }
    }
}

fn split_instance_path(raw: &str) -> Result<(String, u32), CoreError> {
    let parsed = ParameterPath::parse(raw).map_err(|e| CoreError::InvalidPath { path: raw.to_string(), reason: e.reason })?;
    let segments = parsed.segments();
    let Some(PathSegment::Instance(instance_number)) = segments.last() else {
        return Err(CoreError::InvalidPath { path: raw.to_string(), reason: "instance path must end in an instance index".into() });
    };
    let object_path = segments[..segments.len() - 1].iter().map(std::string::ToString::to_string).collect::<Vec<_>>().join(".") + ".";
    Ok((object_path, *instance_number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceDescriptor, ParamType};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use fleet_config::RegistryConfig;

    struct StubEngine {
        immediate: bool,
    }

    #[async_trait]
    impl DeviceEngine for StubEngine {
        async fn get(&self, target: &EngineTarget, _pattern: &PathPattern, _timeout: Duration) -> Result<Vec<Parameter>, CoreError> {
            Ok(vec![Parameter {
                device_id: target.device.id.clone(),
                path: "Device.DeviceInfo.SoftwareVersion".into(),
                value: "1.2.3".into(),
                param_type: ParamType::String,
                writable: false,
                last_update: chrono::Utc::now(),
            }])
        }

        async fn set(&self, _target: &EngineTarget, writes: Vec<ParameterWrite>, _all_or_nothing: bool, _timeout: Duration) -> Result<Vec<SetOutcome>, CoreError> {
            Ok(writes.into_iter().map(|w| SetOutcome { path: w.path, error: None }).collect())
        }

        async fn add(&self, _target: &EngineTarget, _object_path: &str, _seed: Vec<ParameterWrite>, _timeout: Duration) -> Result<u32, CoreError> {
            Ok(1)
        }

        async fn delete(&self, _target: &EngineTarget, _object_path: &str, _instance_number: u32, _timeout: Duration) -> Result<(), CoreError> {
            Ok(())
        }

        async fn operate(&self, _target: &EngineTarget, _command: &str, arguments: serde_json::Value, _timeout: Duration) -> Result<serde_json::Value, CoreError> {
            Ok(arguments)
        }

        async fn schedule_transfer(
            &self,
            _target: &EngineTarget,
            _direction: TransferDirection,
            _url: &str,
            _file_type: &str,
            _credentials: Option<TransferCredentials>,
            _delay: Duration,
            _command_key: &str,
        ) -> Result<(), CoreError> {
            Ok(())
        }

        fn supports_immediate(&self) -> bool {
            self.immediate
        }
    }

    async fn facade() -> (OperationFacade, DeviceId) {
        let store: Arc<dyn StoreGateway> = Arc::new(InMemoryStore::new());
        let registry = Arc::new(DeviceRegistry::new(Arc::clone(&store), RegistryConfig::default()));
        let id = DeviceId::modern_agent("a1");
        registry.register(id.clone(), DeviceDescriptor::default(), None).await.unwrap();
        let usp = Arc::new(StubEngine { immediate: true });
        let cwmp = Arc::new(StubEngine { immediate: false });
        (OperationFacade::new(store, registry, usp, cwmp, Duration::from_secs(60)), id)
    }

    #[tokio::test]
    async fn get_parameters_dedupes_across_patterns() {
        let (f, id) = facade().await;
        let p1 = PathPattern::parse("Device.DeviceInfo.*").unwrap();
        let p2 = PathPattern::parse("Device.DeviceInfo.SoftwareVersion").unwrap();
        let result = f.get_parameters(&id, &[p1, p2], Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn set_parameters_replays_idempotency_key() {
        let (f, id) = facade().await;
        let writes = vec![ParameterWrite { path: "Device.WiFi.Radio.1.Enable".into(), value: "true".into(), param_type: ParamType::Boolean }];
        let first = f.set_parameters(&id, writes.clone(), Some("k1"), true, Duration::from_secs(1)).await.unwrap();
        let second = f.set_parameters(&id, writes, Some("k1"), true, Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].path, second[0].path);
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_on_identical_tuple() {
        let (f, id) = facade().await;
        let s1 = f.subscribe(Some(id.clone()), EventType::ValueChange, "Device.WiFi.Radio.*.Channel", "t").await.unwrap();
        let s2 = f.subscribe(Some(id), EventType::ValueChange, "Device.WiFi.Radio.*.Channel", "t").await.unwrap();
        assert_eq!(s1, s2);
    }

    #[tokio::test]
    async fn add_then_delete_object_round_trips() {
        let (f, id) = facade().await;
        let n = f.add_object(&id, "Device.WiFi.SSID.", vec![], Duration::from_secs(1)).await.unwrap();
        assert_eq!(n, 1);
        f.delete_object(&id, &format!("Device.WiFi.SSID.{n}."), Duration::from_secs(1)).await.unwrap();
    }

    #[test]
    fn split_instance_path_requires_trailing_instance() {
        assert!(split_instance_path("Device.WiFi.SSID.1.").is_ok());
        assert!(split_instance_path("Device.WiFi.SSID.").is_err());
    }
}
