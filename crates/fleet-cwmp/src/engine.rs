// ── CwmpEngine (C5) — the CWMP side of the polymorphic DeviceEngine ──
//
// CWMP is pull-based: nothing goes out until the device's session
// handler next pops the per-device `RpcQueue` and sends the RPC as the
// body of its HTTP response. `get`/`set`/`add`/`delete`/`operate` below
// enqueue the request, nudge the device with a connection-request
// callback when it has no session open already, and wait up to
// `timeout` for the session handler to resolve the oneshot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use fleet_config::CwmpEngineConfig;
use fleet_core::model::{Device, ParamType, Parameter, PathPattern, TransferDirection, TransportHint};
use fleet_core::{CoreError, DeviceEngine, EngineTarget, ParameterWrite, SetOutcome, TransferCredentials};
use secrecy::ExposeSecret;

use crate::connection_request;
use crate::rpc_queue::{RpcOutcome, RpcQueue, RpcRequest};
use crate::soap::ParameterValue;

pub(crate) fn value_type_tag(t: ParamType) -> &'static str {
    match t {
        ParamType::String => "string",
        ParamType::Int => "int",
        ParamType::UnsignedInt => "unsignedInt",
        ParamType::Boolean => "boolean",
        ParamType::DateTime => "dateTime",
        ParamType::Base64 => "base64",
    }
}

pub(crate) fn param_type_from_value_type(tag: &str) -> ParamType {
    match tag {
        "int" => ParamType::Int,
        "unsignedInt" => ParamType::UnsignedInt,
        "boolean" => ParamType::Boolean,
        "dateTime" => ParamType::DateTime,
        "base64" => ParamType::Base64,
        _ => ParamType::String,
    }
}

/// Nudge a device with no open session via connection-request. A
/// failure here is logged and swallowed: the RPC stays queued and may
/// still be served the next time the device calls in on its own
/// `PeriodicInform` cadence.
async fn nudge(client: &reqwest::Client, config: &CwmpEngineConfig, device: &Device) {
    let Some(TransportHint::ConnectionRequestUrl(url)) = &device.transport_hint else {
        tracing::debug!(device = %device.id, "no connection-request URL on file, relying on periodic inform");
        return;
    };
    let Some(creds) = &device.connection_request_credentials else {
        tracing::debug!(device = %device.id, "no connection-request credentials on file");
        return;
    };
    if let Err(e) = connection_request::send(client, url, &creds.username, &creds.password, config.connection_request_auth).await {
        tracing::warn!(device = %device.id, error = %e, "connection-request callback failed");
    }
}

pub struct CwmpEngine {
    config: CwmpEngineConfig,
    queue: Arc<RpcQueue>,
    active_sessions: Arc<DashSet<String>>,
    client: reqwest::Client,
}

impl CwmpEngine {
    /// `queue` and `active_sessions` are shared with the HTTP session
    /// listener: the listener pops from the same queue and marks a
    /// device's canonical id present in `active_sessions` for the
    /// lifetime of its open session.
    #[must_use]
    pub fn new(config: CwmpEngineConfig, queue: Arc<RpcQueue>, active_sessions: Arc<DashSet<String>>) -> Self {
        Self { config, queue, active_sessions, client: reqwest::Client::new() }
    }

    async fn dispatch(&self, target: &EngineTarget, request: RpcRequest, timeout: Duration) -> Result<RpcOutcome, CoreError> {
        let device_id = target.device.id.canonical();
        let rx = self.queue.enqueue(&target.device.id, request);
        if !self.active_sessions.contains(&device_id) {
            nudge(&self.client, &self.config, &target.device).await;
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(_recv_error)) => Err(CoreError::EngineError("RPC queue dropped the response channel".into())),
            Err(_elapsed) => Err(CoreError::Timeout),
        }
    }
}

#[async_trait]
impl DeviceEngine for CwmpEngine {
    async fn get(&self, target: &EngineTarget, pattern: &PathPattern, timeout: Duration) -> Result<Vec<Parameter>, CoreError> {
        let outcome = self.dispatch(target, RpcRequest::GetParameterValues { names: vec![pattern.to_string()] }, timeout).await?;
        match outcome {
            RpcOutcome::ParameterValues(values) => Ok(values
                .into_iter()
                .map(|v| Parameter {
                    device_id: target.device.id.clone(),
                    path: v.name,
                    value: v.value,
                    param_type: param_type_from_value_type(&v.value_type),
                    // GetParameterValues carries no writability flag in
                    // the protocol (that's GetParameterAttributes);
                    // treated as writable pending a real attributes read.
                    writable: true,
                    last_update: chrono::Utc::now(),
                })
                .collect()),
            other => Err(CoreError::Protocol { code: None, message: format!("unexpected RPC outcome for GetParameterValues: {other:?}") }),
        }
    }

    async fn set(&self, target: &EngineTarget, writes: Vec<ParameterWrite>, _all_or_nothing: bool, timeout: Duration) -> Result<Vec<SetOutcome>, CoreError> {
        // SetParameterValues is all-or-nothing by protocol definition,
        // so there's no partial per-path outcome to report the way USP
        // gives one; `_all_or_nothing` has no CWMP equivalent to toggle.
        let parameter_key = uuid::Uuid::new_v4().to_string();
        let values = writes.iter().map(|w| ParameterValue { name: w.path.clone(), value: w.value.clone(), value_type: value_type_tag(w.param_type).to_string() }).collect();

        let outcome = self.dispatch(target, RpcRequest::SetParameterValues { values, parameter_key }, timeout).await?;
        match outcome {
            RpcOutcome::Status(status) => {
                let error = if status <= 1 { None } else { Some(format!("device returned status {status}")) };
                Ok(writes.iter().map(|w| SetOutcome { path: w.path.clone(), error: error.clone() }).collect())
            }
            other => Err(CoreError::Protocol { code: None, message: format!("unexpected RPC outcome for SetParameterValues: {other:?}") }),
        }
    }

    async fn add(&self, target: &EngineTarget, object_path: &str, seed: Vec<ParameterWrite>, timeout: Duration) -> Result<u32, CoreError> {
        let parameter_key = uuid::Uuid::new_v4().to_string();
        let outcome = self.dispatch(target, RpcRequest::AddObject { object_path: object_path.to_string(), parameter_key: parameter_key.clone() }, timeout).await?;
        let instance_number = match outcome {
            RpcOutcome::InstanceNumber(n) => n,
            other => return Err(CoreError::Protocol { code: None, message: format!("unexpected RPC outcome for AddObject: {other:?}") }),
        };

        if !seed.is_empty() {
            let values = seed
                .iter()
                .map(|w| ParameterValue { name: format!("{object_path}{instance_number}.{}", w.path), value: w.value.clone(), value_type: value_type_tag(w.param_type).to_string() })
                .collect();
            self.dispatch(target, RpcRequest::SetParameterValues { values, parameter_key }, timeout).await?;
        }
        Ok(instance_number)
    }

    async fn delete(&self, target: &EngineTarget, object_path: &str, instance_number: u32, timeout: Duration) -> Result<(), CoreError> {
        let parameter_key = uuid::Uuid::new_v4().to_string();
        self.dispatch(target, RpcRequest::DeleteObject { object_path: object_path.to_string(), instance_number, parameter_key }, timeout).await?;
        Ok(())
    }

    /// Maps the façade's data-model operate commands onto the legacy
    /// RPCs that implement them, so the same command string routes
    /// identically whether the device speaks CWMP or USP (whose
    /// `operate` passes `command` straight through to the data model).
    async fn operate(&self, target: &EngineTarget, command: &str, _arguments: serde_json::Value, timeout: Duration) -> Result<serde_json::Value, CoreError> {
        match command {
            "Device.Reboot()" => {
                let command_key = uuid::Uuid::new_v4().to_string();
                self.dispatch(target, RpcRequest::Reboot { command_key }, timeout).await?;
                Ok(serde_json::Value::Null)
            }
            "Device.FactoryReset()" => {
                self.dispatch(target, RpcRequest::FactoryReset, timeout).await?;
                Ok(serde_json::Value::Null)
            }
            other => Err(CoreError::Protocol { code: None, message: format!("CWMP has no RPC for operate command {other:?}") }),
        }
    }

    async fn schedule_transfer(
        &self,
        target: &EngineTarget,
        direction: TransferDirection,
        url: &str,
        file_type: &str,
        credentials: Option<TransferCredentials>,
        _delay: Duration,
        command_key: &str,
    ) -> Result<(), CoreError> {
        // CWMP's Download/Upload have no delay argument of their own;
        // `_delay` is honored by the caller's retry cadence, not here.
        let (username, password) = credentials.map_or_else(|| (String::new(), String::new()), |c| (c.username, c.password.expose_secret().to_string()));
        let request = match direction {
            TransferDirection::Download => RpcRequest::Download { command_key: command_key.to_string(), file_type: file_type.to_string(), url: url.to_string(), username, password, file_size: 0 },
            TransferDirection::Upload => RpcRequest::Upload { command_key: command_key.to_string(), file_type: file_type.to_string(), url: url.to_string(), username, password },
        };
        self.dispatch(target, request, self.config.session_timeout).await.map(|_| ())
    }

    fn supports_immediate(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::model::{DeviceDescriptor, DeviceId};
    use tokio::sync::Mutex as AsyncMutex;

    fn target() -> (DeviceId, EngineTarget) {
        let device_id = DeviceId::legacy_cpe("Acme", "001122", "Router", "SN1");
        let device = Device::new(device_id.clone(), DeviceDescriptor::default(), Some(TransportHint::ConnectionRequestUrl("http://cpe.local/".into())));
        (device_id, EngineTarget { device, lock: Arc::new(AsyncMutex::new(())) })
    }

    #[tokio::test]
    async fn get_decodes_parameter_values_from_a_popped_response() {
        let queue = Arc::new(RpcQueue::new());
        let engine = CwmpEngine::new(CwmpEngineConfig::default(), Arc::clone(&queue), Arc::new(DashSet::new()));
        let (device_id, target) = target();

        let responder = tokio::spawn({
            let queue = Arc::clone(&queue);
            let device_id = device_id.clone();
            async move {
                loop {
                    if let Some(queued) = queue.pop_next(&device_id) {
                        queued.complete(Ok(RpcOutcome::ParameterValues(vec![ParameterValue {
                            name: "Device.DeviceInfo.SoftwareVersion".into(),
                            value: "2.0".into(),
                            value_type: "string".into(),
                        }])));
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        });

        let pattern = PathPattern::parse("Device.DeviceInfo.SoftwareVersion").unwrap();
        let params = engine.get(&target, &pattern, Duration::from_secs(2)).await.unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].value, "2.0");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn request_times_out_when_the_device_never_responds() {
        let queue = Arc::new(RpcQueue::new());
        let engine = CwmpEngine::new(CwmpEngineConfig::default(), queue, Arc::new(DashSet::new()));
        let (_device_id, target) = target();

        let pattern = PathPattern::match_all();
        let result = engine.get(&target, &pattern, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(CoreError::Timeout)));
    }

    #[tokio::test]
    async fn operate_rejects_commands_with_no_cwmp_rpc() {
        let queue = Arc::new(RpcQueue::new());
        let engine = CwmpEngine::new(CwmpEngineConfig::default(), queue, Arc::new(DashSet::new()));
        let (_device_id, target) = target();

        let result = engine.operate(&target, "FactoryReset", serde_json::Value::Null, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn operate_maps_the_data_model_reboot_method() {
        let queue = Arc::new(RpcQueue::new());
        let engine = CwmpEngine::new(CwmpEngineConfig::default(), Arc::clone(&queue), Arc::new(DashSet::new()));
        let (device_id, target) = target();

        let responder = tokio::spawn({
            let queue = Arc::clone(&queue);
            let device_id = device_id.clone();
            async move {
                loop {
                    if let Some(queued) = queue.pop_next(&device_id) {
                        assert!(matches!(queued.request, RpcRequest::Reboot { .. }));
                        queued.complete(Ok(RpcOutcome::Accepted));
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        });

        let result = engine.operate(&target, "Device.Reboot()", serde_json::Value::Null, Duration::from_secs(2)).await;
        assert!(result.is_ok());
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn operate_maps_the_data_model_factory_reset_method() {
        let queue = Arc::new(RpcQueue::new());
        let engine = CwmpEngine::new(CwmpEngineConfig::default(), Arc::clone(&queue), Arc::new(DashSet::new()));
        let (device_id, target) = target();

        let responder = tokio::spawn({
            let queue = Arc::clone(&queue);
            let device_id = device_id.clone();
            async move {
                loop {
                    if let Some(queued) = queue.pop_next(&device_id) {
                        assert!(matches!(queued.request, RpcRequest::FactoryReset));
                        queued.complete(Ok(RpcOutcome::Accepted));
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        });

        let result = engine.operate(&target, "Device.FactoryReset()", serde_json::Value::Null, Duration::from_secs(2)).await;
        assert!(result.is_ok());
        responder.await.unwrap();
    }

    #[test]
    fn engine_never_claims_immediate_mutators() {
        let queue = Arc::new(RpcQueue::new());
        let engine = CwmpEngine::new(CwmpEngineConfig::default(), queue, Arc::new(DashSet::new()));
        assert!(!engine.supports_immediate());
    }
}
