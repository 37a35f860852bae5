// ── QueueBroker adapter (C3) ──
//
// Request/response over an AMQP-like broker, mapping an endpoint id to
// a dedicated queue name (§6: `openusp/agent/<endpoint>/in|out`,
// STOMP-style). Ordering is guaranteed per (address, direction), same
// as PersistentSocket. Implemented over `async-nats` queue-group
// subscriptions, the closest broker primitive to a point-to-point
// queue that the pack's NATS usage demonstrates.

use async_nats::Client;
use async_trait::async_trait;
use fleet_config::TransportConfig;
use futures_util::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::adapter::{ConnectionState, EndpointId, Frame, Transport};
use crate::error::TransportError;

const INBOUND_CHANNEL_CAPACITY: usize = 4096;
const QUEUE_GROUP: &str = "fleet-controller";

fn in_subject(endpoint: &str) -> String {
    format!("openusp.agent.{endpoint}.in")
}

fn out_subject_wildcard() -> &'static str {
    "openusp.agent.*.out"
}

fn endpoint_from_out_subject(subject: &str) -> Option<String> {
    let rest = subject.strip_prefix("openusp.agent.")?;
    let endpoint = rest.strip_suffix(".out")?;
    Some(endpoint.to_string())
}

pub struct QueueBroker {
    config: TransportConfig,
    client: Mutex<Option<Client>>,
    inbound_tx: tokio::sync::mpsc::Sender<(EndpointId, Frame)>,
    inbound_rx: Mutex<tokio::sync::mpsc::Receiver<(EndpointId, Frame)>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl QueueBroker {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            client: Mutex::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            state_tx,
            state_rx,
            pump: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Transport for QueueBroker {
    async fn connect(&self) -> Result<(), TransportError> {
        let _ = self.state_tx.send(ConnectionState::Connecting);
        let client = async_nats::connect(self.config.endpoint.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let mut subscriber = client
            .queue_subscribe(out_subject_wildcard(), QUEUE_GROUP.to_string())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let inbound_tx = self.inbound_tx.clone();
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    msg = subscriber.next() => {
                        let Some(msg) = msg else { break };
                        if let Some(endpoint) = endpoint_from_out_subject(&msg.subject) {
                            let _ = inbound_tx.send((endpoint, msg.payload)).await;
                        } else {
                            tracing::debug!(subject = %msg.subject, "dropping frame with unrecognised subject");
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
            .publish(in_subject(endpoint), frame)
            .await
            .map_err(|e| TransportError::SendFailed { address: endpoint.clone(), reason: e.to_string() })
    }

    async fn receive(&self) -> Result<(EndpointId, Frame), TransportError> {
        self.inbound_rx.lock().await.recv().await.ok_or_else(|| TransportError::Lost("inbound channel closed".into()))
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
        assert_eq!(in_subject("ep-1"), "openusp.agent.ep-1.in");
        assert_eq!(endpoint_from_out_subject("openusp.agent.ep-1.out"), Some("ep-1".to_string()));
        assert_eq!(endpoint_from_out_subject("garbage"), None);
    }

    #[test]
    fn new_broker_starts_disconnected() {
        let broker = QueueBroker::new(TransportConfig::disabled());
        assert_eq!(*broker.watch_state().borrow(), ConnectionState::Disconnected);
    }
}
