// ── CWMP HTTP listener (§4.5 "HTTP transport") ──
//
// One route, `POST /`: axum for routing/extraction, tower-http for
// tracing and timeout/body-limit middleware. The handler's only job is
// to read the envelope, hand it to `CwmpServer::handle` (no HTTP types
// in its signature, independently testable), and write back whatever
// that produced.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use dashmap::{DashMap, DashSet};
use fleet_config::CwmpEngineConfig;
use fleet_core::model::{DeviceDescriptor, DeviceId, EventType, Parameter, ParameterPath, TransportHint};
use fleet_core::store::StoreGateway;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::engine::param_type_from_value_type;
use crate::error::CwmpError;
use crate::fault::{FaultCode, SoapFault};
use crate::rpc_queue::{QueuedRpc, RpcOutcome, RpcQueue, RpcRequest};
use crate::session::{RpcResponseOutcome, Session, SessionState};
use crate::soap::{self, Body, ParameterValue, TransferCompleteEvent};

const SESSION_COOKIE: &str = "cwmp-session";

fn encode_rpc_request(cwmp_id: &str, request: &RpcRequest) -> String {
    match request {
        RpcRequest::GetParameterValues { names } => soap::encode_get_parameter_values(cwmp_id, names),
        RpcRequest::SetParameterValues { values, parameter_key } => soap::encode_set_parameter_values(cwmp_id, values, parameter_key),
        RpcRequest::AddObject { object_path, parameter_key } => soap::encode_add_object(cwmp_id, object_path, parameter_key),
        RpcRequest::DeleteObject { object_path, instance_number, parameter_key } => soap::encode_delete_object(cwmp_id, &format!("{object_path}{instance_number}."), parameter_key),
        RpcRequest::Reboot { command_key } => soap::encode_reboot(cwmp_id, command_key),
        RpcRequest::FactoryReset => soap::encode_factory_reset(cwmp_id),
        RpcRequest::Download { command_key, file_type, url, username, password, file_size } => soap::encode_download(cwmp_id, command_key, file_type, url, username, password, *file_size),
        RpcRequest::Upload { command_key, file_type, url, username, password } => soap::encode_upload(cwmp_id, command_key, file_type, url, username, password),
    }
}

fn outcome_from_body(body: Body) -> Result<RpcOutcome, CwmpError> {
    match body {
        Body::GetParameterValuesResponse(values) => Ok(RpcOutcome::ParameterValues(values)),
        Body::SetParameterValuesResponse { status } | Body::DeleteObjectResponse { status } | Body::DownloadResponse { status } | Body::UploadResponse { status } => Ok(RpcOutcome::Status(status)),
        Body::AddObjectResponse { instance_number, .. } => Ok(RpcOutcome::InstanceNumber(instance_number)),
        Body::RebootResponse | Body::FactoryResetResponse => Ok(RpcOutcome::Accepted),
        other => Err(CwmpError::MalformedEnvelope(format!("unexpected RPC response body {other:?}"))),
    }
}

/// What `CwmpServer::handle` produced; the axum shim turns this
/// straight into a response.
pub struct HandledResponse {
    pub status: u16,
    pub set_cookie: Option<String>,
    pub body: String,
}

impl HandledResponse {
    fn no_content() -> Self {
        Self { status: 204, set_cookie: None, body: String::new() }
    }

    fn ok(body: String) -> Self {
        Self { status: 200, set_cookie: None, body }
    }
}

/// Session and per-device state shared between the HTTP listener and
/// [`crate::engine::CwmpEngine`]; the engine enqueues on `queue` and
/// reads `active_sessions`, this type drains `queue` as sessions open.
pub struct CwmpServer {
    config: CwmpEngineConfig,
    store: Arc<dyn StoreGateway>,
    queue: Arc<RpcQueue>,
    active_sessions: Arc<DashSet<String>>,
    sessions: DashMap<String, Session>,
    in_flight: DashMap<String, QueuedRpc>,
    cancel: CancellationToken,
}

impl CwmpServer {
    #[must_use]
    pub fn new(config: CwmpEngineConfig, store: Arc<dyn StoreGateway>, queue: Arc<RpcQueue>, active_sessions: Arc<DashSet<String>>) -> Arc<Self> {
        Arc::new(Self { config, store, queue, active_sessions, sessions: DashMap::new(), in_flight: DashMap::new(), cancel: CancellationToken::new() })
    }

    /// Spawn the background janitor that expires sessions past
    /// `session_sweep_interval` with no activity within `session_timeout`.
    /// Mirrors the registry's own `spawn_janitor`/`sweep` pair (C6):
    /// a `tokio::select!` over a `CancellationToken` and an interval tick.
    pub fn spawn_janitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let server = Arc::clone(self);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(server.config.session_sweep_interval);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => server.sweep().await,
                }
            }
        })
    }

    /// Stop the janitor.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Expire sessions whose `last_activity` is older than
    /// `session_timeout`: fail their in-flight RPC with `SessionLost`,
    /// drop the session, and clear the device from `active_sessions` so
    /// `CwmpEngine::dispatch` nudges it again on the next request.
    async fn sweep(&self) {
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.last_activity.elapsed() > self.config.session_timeout)
            .map(|entry| entry.cookie.clone())
            .collect();

        for cookie in stale {
            let Some((_, session)) = self.sessions.remove(&cookie) else { continue };
            self.active_sessions.remove(&session.device_id.canonical());
            if let Some((_, queued)) = self.in_flight.remove(&cookie) {
                queued.complete(Err(CwmpError::SessionLost { device_id: session.device_id.canonical() }));
            }
            self.queue.fail_in_flight(&session.device_id);
            tracing::info!(device = %session.device_id, cookie = %cookie, "session expired, in-flight RPC failed with session_lost");
        }
    }

    fn fault(&self, cwmp_id: &str, code: FaultCode, text: impl Into<String>) -> HandledResponse {
        let fault = SoapFault::with_text(code, text);
        HandledResponse::ok(soap::encode_fault(cwmp_id, &fault))
    }

    /// Handle one SOAP-over-HTTP exchange. No HTTP types appear here by
    /// design: `cookie` is whatever the caller extracted from the
    /// `Cookie` header, and the axum shim turns `HandledResponse` into
    /// the wire response (including `Set-Cookie`).
    pub async fn handle(&self, cookie: Option<&str>, raw_body: &str) -> HandledResponse {
        let envelope = match soap::decode(raw_body, self.config.max_envelope_size) {
            Ok(envelope) => envelope,
            Err(CwmpError::EnvelopeTooLarge) => return self.fault("0", FaultCode::ResourcesExceeded, "envelope exceeds configured size limit"),
            Err(e) => return self.fault("0", FaultCode::InternalError, e.to_string()),
        };
        let cwmp_id = envelope.cwmp_id.unwrap_or_default();

        match envelope.body {
            Body::Inform(inform) => self.handle_inform(&cwmp_id, inform).await,
            Body::EmptyPost => self.handle_empty_post(cookie, &cwmp_id),
            Body::TransferComplete(event) => self.handle_transfer_complete(cookie, &cwmp_id, event).await,
            Body::Fault(fault) => self.handle_rpc_fault(cookie, fault),
            other => self.handle_rpc_response(cookie, &cwmp_id, other).await,
        }
    }

    async fn handle_inform(&self, cwmp_id: &str, inform: soap::Inform) -> HandledResponse {
        let device_id = DeviceId::legacy_cpe(inform.manufacturer.clone(), inform.oui.clone(), inform.product_class.clone(), inform.serial_number.clone());

        let mut device = self.store.get_device(&device_id).await.ok().flatten().unwrap_or_else(|| {
            fleet_core::model::Device::new(
                device_id.clone(),
                DeviceDescriptor { manufacturer: inform.manufacturer.clone(), model_name: inform.product_class.clone(), ..Default::default() },
                None,
            )
        });
        device.touch();
        if let Some(url) = inform.parameter_values.iter().find(|v| v.name == "Device.ManagementServer.ConnectionRequestURL") {
            device.transport_hint = Some(TransportHint::ConnectionRequestUrl(url.value.clone()));
        }
        if let Err(e) = self.store.upsert_device(device).await {
            tracing::warn!(device = %device_id, error = %e, "failed to persist device on Inform");
        }

        if !inform.parameter_values.is_empty() {
            self.apply_value_change(&device_id, &inform.parameter_values).await;
        }
        for event in &inform.events {
            if matches!(event.code, crate::event_code::EventCode::Other(_)) {
                tracing::warn!(device = %device_id, code = %event.code, "unrecognised CWMP event code");
            }
        }

        let cookie = Uuid::new_v4().to_string();
        let mut session = Session::new(device_id.clone(), cookie.clone());
        if session.on_inform(true).is_err() {
            return self.fault(cwmp_id, FaultCode::InternalError, "session state machine rejected a fresh Inform");
        }
        self.active_sessions.insert(device_id.canonical());
        self.sessions.insert(cookie.clone(), session);

        HandledResponse { status: 200, set_cookie: Some(cookie), body: soap::encode_inform_response(cwmp_id, 1) }
    }

    fn handle_empty_post(&self, cookie: Option<&str>, cwmp_id: &str) -> HandledResponse {
        let Some(cookie) = cookie else { return HandledResponse::no_content() };
        let Some(mut entry) = self.sessions.get_mut(cookie) else { return HandledResponse::no_content() };

        match entry.state {
            SessionState::Authenticated => {
                let has_queued = self.queue.has_queued(&entry.device_id);
                if entry.on_inform_response_sent(has_queued).is_err() {
                    return HandledResponse::no_content();
                }
                self.serve_next_or_close(&mut entry, cookie, cwmp_id)
            }
            SessionState::Active => self.serve_next_or_close(&mut entry, cookie, cwmp_id),
            SessionState::Closing | SessionState::Faulted => {
                let _ = entry.on_close();
                self.active_sessions.remove(&entry.device_id.canonical());
                drop(entry);
                self.sessions.remove(cookie);
                HandledResponse::no_content()
            }
            SessionState::New | SessionState::Closed => HandledResponse::no_content(),
        }
    }

    fn serve_next_or_close(&self, entry: &mut Session, cookie: &str, cwmp_id: &str) -> HandledResponse {
        if let Some(queued) = self.queue.pop_next(&entry.device_id) {
            let body = encode_rpc_request(cwmp_id, &queued.request);
            self.in_flight.insert(cookie.to_string(), queued);
            HandledResponse::ok(body)
        } else {
            entry.state = SessionState::Closing;
            HandledResponse::no_content()
        }
    }

    async fn handle_rpc_response(&self, cookie: Option<&str>, cwmp_id: &str, body: Body) -> HandledResponse {
        let Some(cookie) = cookie else { return HandledResponse::no_content() };
        let Some(queued) = self.in_flight.remove(cookie).map(|(_, q)| q) else { return HandledResponse::no_content() };
        let Some(mut entry) = self.sessions.get_mut(cookie) else { return HandledResponse::no_content() };

        match outcome_from_body(body) {
            Ok(outcome) => {
                queued.complete(Ok(outcome));
                self.queue.complete(&entry.device_id);
                let next = if self.queue.has_queued(&entry.device_id) { RpcResponseOutcome::NextQueued } else { RpcResponseOutcome::QueueEmpty };
                let _ = entry.on_rpc_response(next);
                self.serve_next_or_close(&mut entry, cookie, cwmp_id)
            }
            Err(e) => {
                queued.complete(Err(e));
                self.queue.fail_in_flight(&entry.device_id);
                let _ = entry.on_rpc_response(RpcResponseOutcome::Malformed);
                let _ = entry.on_close();
                self.active_sessions.remove(&entry.device_id.canonical());
                HandledResponse::no_content()
            }
        }
    }

    fn handle_rpc_fault(&self, cookie: Option<&str>, fault: SoapFault) -> HandledResponse {
        let Some(cookie) = cookie else { return HandledResponse::no_content() };
        let Some(queued) = self.in_flight.remove(cookie).map(|(_, q)| q) else { return HandledResponse::no_content() };
        queued.complete(Err(CwmpError::DeviceFault(fault)));
        if let Some(mut entry) = self.sessions.get_mut(cookie) {
            self.queue.fail_in_flight(&entry.device_id);
            let _ = entry.on_rpc_response(RpcResponseOutcome::Malformed);
            let _ = entry.on_close();
            self.active_sessions.remove(&entry.device_id.canonical());
        }
        HandledResponse::no_content()
    }

    async fn handle_transfer_complete(&self, cookie: Option<&str>, cwmp_id: &str, event: TransferCompleteEvent) -> HandledResponse {
        if let Some(device_id) = cookie.and_then(|c| self.sessions.get(c)).map(|s| s.device_id.clone()) {
            match self.store.get_transfer(&device_id, &event.command_key).await {
                Ok(Some(mut transfer)) => {
                    let (status, fault_text) = match &event.fault {
                        Some(f) => (fleet_core::model::TransferStatus::Failed, Some(f.text.clone())),
                        None => (fleet_core::model::TransferStatus::Completed, None),
                    };
                    transfer.complete(status, fault_text);
                    if let Err(e) = self.store.upsert_transfer(transfer).await {
                        tracing::warn!(device = %device_id, error = %e, "failed to persist completed transfer");
                    }
                }
                Ok(None) => tracing::warn!(device = %device_id, command_key = %event.command_key, "transfer complete for an unknown command key"),
                Err(e) => tracing::warn!(device = %device_id, error = %e, "store error resolving transfer"),
            }
        }
        HandledResponse::ok(soap::encode_transfer_complete_response(cwmp_id))
    }

    /// Persist the Inform's `ParameterList` and log matching
    /// subscriptions for a `4 VALUE CHANGE` event. Delivery itself has
    /// no sink wired here, the same boundary the USP subscription
    /// router draws around its own `on_delivery` callback.
    async fn apply_value_change(&self, device_id: &DeviceId, values: &[ParameterValue]) {
        let parameters: Vec<Parameter> = values
            .iter()
            .map(|v| Parameter {
                device_id: device_id.clone(),
                path: v.name.clone(),
                value: v.value.clone(),
                param_type: param_type_from_value_type(&v.value_type),
                writable: true,
                last_update: chrono::Utc::now(),
            })
            .collect();
        if let Err(e) = self.store.upsert_parameters(device_id, parameters).await {
            tracing::warn!(device = %device_id, error = %e, "failed to persist value-change parameters");
            return;
        }

        for value in values {
            let Ok(path) = ParameterPath::parse(&value.name) else { continue };
            let subscriptions = self.store.list_subscriptions(Some(device_id), EventType::ValueChange).await.unwrap_or_default();
            for sub in subscriptions.into_iter().filter(|s| s.path_pattern.as_ref().is_none_or(|p| p.matches(&path))) {
                tracing::info!(device = %device_id, path = %value.name, target = %sub.delivery_target, "value-change subscription matched");
            }
        }
    }
}

fn extract_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').map(str::trim).find_map(|pair| pair.strip_prefix(SESSION_COOKIE).and_then(|rest| rest.strip_prefix('=')).map(ToString::to_string))
}

async fn handle_post(State(server): State<Arc<CwmpServer>>, headers: HeaderMap, body: Bytes) -> Response {
    let cookie = extract_cookie(&headers);
    let raw_body = String::from_utf8_lossy(&body);
    let response = server.handle(cookie.as_deref(), &raw_body).await;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http_response = (status, response.body).into_response();
    if let Some(cookie) = response.set_cookie {
        if let Ok(value) = HeaderValue::from_str(&format!("{SESSION_COOKIE}={cookie}; Path=/; HttpOnly")) {
            http_response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    http_response
}

/// Build the listener's router: one `POST /` route behind tracing,
/// a request timeout, and a body-size cap mirroring
/// `CwmpEngineConfig::max_envelope_size`.
#[must_use]
pub fn router(server: Arc<CwmpServer>) -> Router {
    let max_size = server.config.max_envelope_size;
    Router::new()
        .route("/", post(handle_post))
        .layer(RequestBodyLimitLayer::new(max_size))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::store::InMemoryStore;

    fn server() -> Arc<CwmpServer> {
        CwmpServer::new(CwmpEngineConfig::default(), Arc::new(InMemoryStore::new()), Arc::new(RpcQueue::new()), Arc::new(DashSet::new()))
    }

    const INFORM: &str = r#"<?xml version="1.0"?>
<soap-env:Envelope xmlns:soap-env="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-2">
<soap-env:Header><cwmp:ID soap-env:mustUnderstand="1">1</cwmp:ID></soap-env:Header>
<soap-env:Body><cwmp:Inform>
<DeviceId><Manufacturer>Acme</Manufacturer><OUI>001122</OUI><ProductClass>Router</ProductClass><SerialNumber>SN1</SerialNumber></DeviceId>
<Event><EventStruct><EventCode>1 BOOT</EventCode><CommandKey></CommandKey></EventStruct></Event>
<MaxEnvelopes>1</MaxEnvelopes>
</cwmp:Inform></soap-env:Body></soap-env:Envelope>"#;

    #[tokio::test]
    async fn inform_opens_a_session_and_issues_a_cookie() {
        let server = server();
        let response = server.handle(None, INFORM).await;
        assert_eq!(response.status, 200);
        assert!(response.set_cookie.is_some());
        assert!(response.body.contains("InformResponse"));
    }

    #[tokio::test]
    async fn empty_post_with_no_queued_work_closes_the_session() {
        let server = server();
        let inform_response = server.handle(None, INFORM).await;
        let cookie = inform_response.set_cookie.unwrap();

        let first = server.handle(Some(&cookie), "").await;
        assert_eq!(first.status, 204);

        let second = server.handle(Some(&cookie), "").await;
        assert_eq!(second.status, 204);
    }

    #[tokio::test]
    async fn queued_rpc_is_served_on_the_next_empty_post() {
        let server = server();
        let inform_response = server.handle(None, INFORM).await;
        let cookie = inform_response.set_cookie.unwrap();
        let device_id = DeviceId::legacy_cpe("Acme", "001122", "Router", "SN1");

        let _rx = server.queue.enqueue(&device_id, RpcRequest::Reboot { command_key: "ck-1".into() });
        let next = server.handle(Some(&cookie), "").await;
        assert_eq!(next.status, 200);
        assert!(next.body.contains("Reboot"));
    }

    #[tokio::test]
    async fn unknown_cookie_on_empty_post_yields_no_content() {
        let server = server();
        let response = server.handle(Some("bogus"), "").await;
        assert_eq!(response.status, 204);
    }

    #[tokio::test]
    async fn abandoned_session_is_swept_and_its_in_flight_rpc_fails_with_session_lost() {
        let config = CwmpEngineConfig { session_timeout: Duration::from_millis(20), session_sweep_interval: Duration::from_millis(5), ..CwmpEngineConfig::default() };
        let server = CwmpServer::new(config, Arc::new(InMemoryStore::new()), Arc::new(RpcQueue::new()), Arc::new(DashSet::new()));
        let device_id = DeviceId::legacy_cpe("Acme", "001122", "Router", "SN1");

        let inform_response = server.handle(None, INFORM).await;
        let cookie = inform_response.set_cookie.unwrap();

        let rx = server.queue.enqueue(&device_id, RpcRequest::Reboot { command_key: "ck-1".into() });
        let popped = server.handle(Some(&cookie), "").await;
        assert_eq!(popped.status, 200);

        let janitor = server.spawn_janitor();
        let outcome = tokio::time::timeout(Duration::from_millis(500), rx).await.unwrap().unwrap();
        assert!(matches!(outcome, Err(CwmpError::SessionLost { .. })));
        assert!(!server.active_sessions.contains(&device_id.canonical()));

        server.shutdown();
        janitor.abort();
    }

    #[tokio::test]
    async fn oversized_envelope_yields_a_fault_envelope() {
        let server = CwmpServer::new(
            CwmpEngineConfig { max_envelope_size: 8, ..CwmpEngineConfig::default() },
            Arc::new(InMemoryStore::new()),
            Arc::new(RpcQueue::new()),
            Arc::new(DashSet::new()),
        );
        let response = server.handle(None, INFORM).await;
        assert_eq!(response.status, 200);
        assert!(response.body.contains("9004"));
    }
}
