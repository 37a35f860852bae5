// ── TopicBroker adapter (C3) ──
//
// Publish/subscribe with topic templates parameterised by endpoint id
// (§6: `usp/agent/<endpoint>/#`, mapped here to the NATS subject
// `usp.agent.<endpoint>.>`). Delivery is at-least-once and unordered
// across addresses. Precise message-id dedup is the consuming engine's
// job (C4's correlation table only ever acts once per id); this
// adapter only suppresses exact-duplicate redeliveries it can see
// within a short window, as a best-effort assist, never a guarantee.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use async_nats::Client;
use async_trait::async_trait;
use dashmap::DashMap;
use fleet_config::TransportConfig;
use futures_util::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::adapter::{ConnectionState, EndpointId, Frame, Transport};
use crate::error::TransportError;

const INBOUND_CHANNEL_CAPACITY: usize = 4096;
const DEDUP_WINDOW: Duration = Duration::from_secs(30);

fn publish_subject(endpoint: &str) -> String {
    format!("usp.agent.{endpoint}.event")
}

fn subscribe_wildcard() -> &'static str {
    "usp.agent.*.>"
}

fn endpoint_from_subject(subject: &str) -> Option<String> {
    let rest = subject.strip_prefix("usp.agent.")?;
    let (endpoint, _) = rest.split_once('.')?;
    Some(endpoint.to_string())
}

fn frame_fingerprint(frame: &Frame) -> u64 {
    let mut hasher = DefaultHasher::new();
    frame.hash(&mut hasher);
    hasher.finish()
}

pub struct TopicBroker {
    config: TransportConfig,
    client: Mutex<Option<Client>>,
    inbound_tx: tokio::sync::mpsc::Sender<(EndpointId, Frame)>,
    inbound_rx: Mutex<tokio::sync::mpsc::Receiver<(EndpointId, Frame)>>,
    seen: DashMap<u64, Instant>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl TopicBroker {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            client: Mutex::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            seen: DashMap::new(),
            state_tx,
            state_rx,
            pump: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    fn is_duplicate(&self, frame: &Frame) -> bool {
        let now = Instant::now();
        self.seen.retain(|_, seen_at| now.duration_since(*seen_at) < DEDUP_WINDOW);
        let fp = frame_fingerprint(frame);
        self.seen.insert(fp, now).is_some()
    }
}

#[async_trait]
impl Transport for TopicBroker {
    async fn connect(&self) -> Result<(), TransportError> {
        let _ = self.state_tx.send(ConnectionState::Connecting);
        let client = async_nats::connect(self.config.endpoint.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let mut subscriber = client.subscribe(subscribe_wildcard()).await.map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let inbound_tx = self.inbound_tx.clone();
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    msg = subscriber.next() => {
                        let Some(msg) = msg else { break };
                        if let Some(endpoint) = endpoint_from_subject(&msg.subject) {
                            let _ = inbound_tx.send((endpoint, msg.payload)).await;
                        }
                    }
                }
            }
        });

        *self.pump.lock().await = Some(handle);
        *self.client.lock().await = Some(client);
        let _ = self.state_tx.send(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.cancel.cancel();
        if let Some(handle) = self.pump.lock().await.take() {
            let _ = handle.await;
        }
        self.client.lock().await.take();
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send(&self, endpoint: &EndpointId, frame: Frame) -> Result<(), TransportError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .publish(publish_subject(endpoint), frame)
            .await
            .map_err(|e| TransportError::SendFailed { address: endpoint.clone(), reason: e.to_string() })
    }

    async fn receive(&self) -> Result<(EndpointId, Frame), TransportError> {
        loop {
            let (endpoint, frame) = self.inbound_rx.lock().await.recv().await.ok_or_else(|| TransportError::Lost("inbound channel closed".into()))?;
            if self.is_duplicate(&frame) {
                tracing::trace!(%endpoint, "dropping duplicate redelivery");
                continue;
            }
            return Ok((endpoint, frame));
        }
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_naming_round_trips_endpoint() {
        assert_eq!(publish_subject("ep-1"), "usp.agent.ep-1.event");
        assert_eq!(endpoint_from_subject("usp.agent.ep-1.event"), Some("ep-1".to_string()));
    }

    #[test]
    fn duplicate_frame_suppressed_within_window() {
        let broker = TopicBroker::new(TransportConfig::disabled());
        let frame = Frame::from_static(b"hello");
        assert!(!broker.is_duplicate(&frame));
        assert!(broker.is_duplicate(&frame));
    }
}
