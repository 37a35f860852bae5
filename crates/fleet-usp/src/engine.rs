// ── UspEngine (C4) — the USP side of the polymorphic DeviceEngine ──
//
// One dispatch loop drains `Transport::receive`: response frames are
// handed to the correlation table, `Notify` frames are forwarded to
// whoever is routing subscriptions (see `subscription_router`). Every
// request method below is request/response over that same loop --
// register the message id, send the frame, wait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use fleet_config::UspEngineConfig;
use fleet_core::model::{Device, DeviceId, ParamType, Parameter, PathPattern, TransferDirection};
use fleet_core::{CoreError, DeviceEngine, EngineTarget, ParameterWrite, SetOutcome, TransferCredentials};
use fleet_transport::{EndpointId, Transport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::correlation::CorrelationTable;
use crate::error::UspError;
use crate::frame::{Field, Frame, MessageKind};

const TAG_PATTERN: u8 = 1;
const TAG_PATH: u8 = 1;
const TAG_VALUE: u8 = 2;
const TAG_TYPE: u8 = 3;
const TAG_WRITABLE: u8 = 4;
const TAG_ERROR: u8 = 5;
const TAG_OBJECT_PATH: u8 = 1;
const TAG_INSTANCE: u8 = 2;
const TAG_COMMAND: u8 = 1;
const TAG_ARGUMENTS: u8 = 2;
const TAG_RESULT: u8 = 1;
const TAG_ALL_OR_NOTHING: u8 = 9;

fn param_type_tag(t: ParamType) -> &'static str {
    match t {
        ParamType::String => "string",
        ParamType::Int => "int",
        ParamType::UnsignedInt => "unsignedInt",
        ParamType::Boolean => "boolean",
        ParamType::DateTime => "dateTime",
        ParamType::Base64 => "base64",
    }
}

fn param_type_from_tag(tag: &str) -> ParamType {
    match tag {
        "int" => ParamType::Int,
        "unsignedInt" => ParamType::UnsignedInt,
        "boolean" => ParamType::Boolean,
        "dateTime" => ParamType::DateTime,
        "base64" => ParamType::Base64,
        _ => ParamType::String,
    }
}

fn endpoint_for(device: &Device) -> Result<EndpointId, UspError> {
    match &device.transport_hint {
        Some(fleet_core::model::TransportHint::AgentEndpoint(endpoint)) => Ok(endpoint.clone()),
        _ => Err(UspError::InvalidConfig(format!("device {} has no agent endpoint", device.id))),
    }
}

pub struct UspEngine {
    config: UspEngineConfig,
    transport: Arc<dyn Transport>,
    correlation: Arc<CorrelationTable>,
    /// Which device last sent/received on a given endpoint, so an
    /// inbound `Notify` (which carries no device id of its own in the
    /// transport layer) can still be routed per-device. Populated on
    /// every outbound request; an endpoint that has never sent one yet
    /// falls back to treating the endpoint string as the agent id.
    endpoint_devices: Arc<DashMap<EndpointId, DeviceId>>,
    dispatch: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl UspEngine {
    /// Build the engine and start its dispatch loop. `notify_tx` is
    /// handed every inbound `Notify` frame, undecoded, tagged with the
    /// device it arrived from, for the subscription router to match
    /// against stored subscriptions.
    #[must_use]
    pub fn new(config: UspEngineConfig, transport: Arc<dyn Transport>, notify_tx: mpsc::Sender<(DeviceId, Frame)>) -> Arc<Self> {
        let engine = Arc::new(Self {
            config,
            transport,
            correlation: Arc::new(CorrelationTable::new()),
            endpoint_devices: Arc::new(DashMap::new()),
            dispatch: std::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
        });
        engine.spawn_dispatch(notify_tx);
        engine
    }

    fn spawn_dispatch(&self, notify_tx: mpsc::Sender<(DeviceId, Frame)>) {
        let transport = Arc::clone(&self.transport);
        let correlation = Arc::clone(&self.correlation);
        let endpoint_devices = Arc::clone(&self.endpoint_devices);
        let max_envelope_size = self.config.max_envelope_size;
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = transport.receive() => {
                        let Ok((endpoint, bytes)) = result else { continue };
                        let Ok(frame) = Frame::decode(bytes, max_envelope_size) else { continue };
                        if frame.kind == MessageKind::Notify {
                            let device_id = endpoint_devices.get(&endpoint).map(|d| d.clone()).unwrap_or_else(|| DeviceId::modern_agent(endpoint.clone()));
                            let _ = notify_tx.send((device_id, frame)).await;
                        } else {
                            correlation.resolve(frame);
                        }
                    }
                }
            }
        });
        *self.dispatch.lock().expect("dispatch mutex poisoned") = Some(handle);
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.dispatch.lock().expect("dispatch mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Count of inbound response frames whose message id matched no
    /// outstanding request -- late responses past their timeout, most
    /// often.
    #[must_use]
    pub fn orphan_responses(&self) -> u64 {
        self.correlation.orphan_responses()
    }

    async fn request(&self, device_id: &DeviceId, endpoint: &EndpointId, kind: MessageKind, fields: Vec<Field>, timeout: Duration) -> Result<Frame, UspError> {
        if self.correlation.outstanding() >= self.config.correlation_table_cap {
            return Err(UspError::ResourcesExceeded("correlation table at capacity".into()));
        }
        self.endpoint_devices.insert(endpoint.clone(), device_id.clone());

        let message_id = Uuid::new_v4().to_string();
        let request = Frame::new(message_id.clone(), kind, fields);
        let encoded = request.encode();
        if encoded.len() > self.config.max_envelope_size {
            return Err(UspError::ResourcesExceeded(format!("outbound frame {} exceeds max envelope size {}", encoded.len(), self.config.max_envelope_size)));
        }

        let pending = self.correlation.register(message_id.clone());
        if let Err(e) = self.transport.send(endpoint, encoded).await {
            self.correlation.cancel(&message_id);
            return Err(e.into());
        }
        let response = self.correlation.wait(pending, timeout).await?;
        if response.kind == MessageKind::Error {
            let message = response.field(TAG_ERROR).and_then(|f| f.as_str().ok()).unwrap_or("unspecified device error").to_string();
            return Err(UspError::OperationFailure(message));
        }
        Ok(response)
    }
}

#[async_trait]
impl DeviceEngine for UspEngine {
    async fn get(&self, target: &EngineTarget, pattern: &PathPattern, timeout: Duration) -> Result<Vec<Parameter>, CoreError> {
        let endpoint = endpoint_for(&target.device).map_err(CoreError::from)?;
        let response = self
            .request(&target.device.id, &endpoint, MessageKind::GetRequest, vec![Field::string(TAG_PATTERN, &pattern.to_string())], timeout)
            .await
            .map_err(CoreError::from)?;

        let mut parameters = Vec::new();
        for chunk in response.fields.chunks(4) {
            let [path, value, ty, writable] = chunk else { continue };
            parameters.push(Parameter {
                device_id: target.device.id.clone(),
                path: path.as_str().map_err(CoreError::from)?.to_string(),
                value: value.as_str().map_err(CoreError::from)?.to_string(),
                param_type: param_type_from_tag(ty.as_str().map_err(CoreError::from)?),
                writable: writable.as_str().map_err(CoreError::from)? == "true",
                last_update: chrono::Utc::now(),
            });
        }
        Ok(parameters)
    }

    async fn set(&self, target: &EngineTarget, writes: Vec<ParameterWrite>, all_or_nothing: bool, timeout: Duration) -> Result<Vec<SetOutcome>, CoreError> {
        let endpoint = endpoint_for(&target.device).map_err(CoreError::from)?;
        let mut fields = Vec::with_capacity(writes.len() * 3 + 1);
        for write in &writes {
            fields.push(Field::string(TAG_PATH, &write.path));
            fields.push(Field::string(TAG_VALUE, &write.value));
            fields.push(Field::string(TAG_TYPE, param_type_tag(write.param_type)));
        }
        fields.push(Field::string(TAG_ALL_OR_NOTHING, if all_or_nothing { "true" } else { "false" }));

        let response = self.request(&target.device.id, &endpoint, MessageKind::SetRequest, fields, timeout).await.map_err(CoreError::from)?;

        let mut outcomes = Vec::new();
        for chunk in response.fields.chunks(2) {
            let [path, error] = chunk else { continue };
            let error_text = error.as_str().map_err(CoreError::from)?;
            outcomes.push(SetOutcome {
                path: path.as_str().map_err(CoreError::from)?.to_string(),
                error: if error_text.is_empty() { None } else { Some(error_text.to_string()) },
            });
        }
        Ok(outcomes)
    }

    async fn add(&self, target: &EngineTarget, object_path: &str, seed: Vec<ParameterWrite>, timeout: Duration) -> Result<u32, CoreError> {
        let endpoint = endpoint_for(&target.device).map_err(CoreError::from)?;
        let mut fields = vec![Field::string(TAG_OBJECT_PATH, object_path)];
        for write in &seed {
            fields.push(Field::string(TAG_PATH, &write.path));
            fields.push(Field::string(TAG_VALUE, &write.value));
            fields.push(Field::string(TAG_TYPE, param_type_tag(write.param_type)));
        }

        let response = self.request(&target.device.id, &endpoint, MessageKind::AddRequest, fields, timeout).await.map_err(CoreError::from)?;
        let instance_field = response.field(TAG_INSTANCE).ok_or_else(|| CoreError::Protocol { code: None, message: "AddResponse missing instance field".into() })?;
        let instance_str = instance_field.as_str().map_err(CoreError::from)?;
        instance_str.parse::<u32>().map_err(|e| CoreError::Protocol { code: None, message: format!("invalid instance number {instance_str:?}: {e}") })
    }

    async fn delete(&self, target: &EngineTarget, object_path: &str, instance_number: u32, timeout: Duration) -> Result<(), CoreError> {
        let endpoint = endpoint_for(&target.device).map_err(CoreError::from)?;
        let fields = vec![Field::string(TAG_OBJECT_PATH, object_path), Field::string(TAG_INSTANCE, &instance_number.to_string())];
        self.request(&target.device.id, &endpoint, MessageKind::DeleteRequest, fields, timeout).await.map_err(CoreError::from)?;
        Ok(())
    }

    async fn operate(&self, target: &EngineTarget, command: &str, arguments: serde_json::Value, timeout: Duration) -> Result<serde_json::Value, CoreError> {
        let endpoint = endpoint_for(&target.device).map_err(CoreError::from)?;
        let fields = vec![Field::string(TAG_COMMAND, command), Field::string(TAG_ARGUMENTS, &arguments.to_string())];
        let response = self.request(&target.device.id, &endpoint, MessageKind::OperateRequest, fields, timeout).await.map_err(CoreError::from)?;

        match response.field(TAG_RESULT) {
            Some(field) => {
                let raw = field.as_str().map_err(CoreError::from)?;
                serde_json::from_str(raw).map_err(|e| CoreError::Protocol { code: None, message: format!("malformed OperateResponse result: {e}") })
            }
            None => Ok(serde_json::Value::Null),
        }
    }

    async fn schedule_transfer(
        &self,
        target: &EngineTarget,
        direction: TransferDirection,
        url: &str,
        file_type: &str,
        credentials: Option<TransferCredentials>,
        delay: Duration,
        command_key: &str,
    ) -> Result<(), CoreError> {
        // USP has no dedicated transfer message kind; a download/upload
        // is an `Operate` call against the standard firmware-image
        // object, same as any other device-initiated action.
        use secrecy::ExposeSecret;
        let mut arguments = serde_json::json!({
            "direction": match direction { TransferDirection::Download => "download", TransferDirection::Upload => "upload" },
            "url": url,
            "fileType": file_type,
            "delaySeconds": delay.as_secs(),
            "commandKey": command_key,
        });
        if let Some(creds) = credentials {
            arguments["username"] = serde_json::Value::String(creds.username);
            arguments["password"] = serde_json::Value::String(creds.password.expose_secret().to_string());
        }

        self.operate(target, "Device.DeviceInfo.FirmwareImage.1.Download()", arguments, delay + self.config.default_timeout).await.map(|_| ())
    }

    fn supports_immediate(&self) -> bool {
        true
    }
}
