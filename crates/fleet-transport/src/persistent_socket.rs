// ── PersistentSocket adapter (C3) ──
//
// Full-duplex framed socket with keep-alive, over a WebSocket-style
// upgrade (§6 "framed WebSocket-style upgrade"). Ordering is guaranteed
// per (address, direction), matching the promise PersistentSocket makes
// in §4.3. Reconnection loop and backoff are grounded directly on the
// teacher's `websocket.rs` (`ws_loop`, `connect_and_read`,
// `calculate_backoff`), generalized from a read-only event stream to a
// bidirectional frame pipe.

use async_trait::async_trait;
use fleet_config::TransportConfig;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;

use crate::adapter::{ConnectionState, EndpointId, Frame, Transport};
use crate::backoff::calculate_backoff;
use crate::error::TransportError;

const INBOUND_CHANNEL_CAPACITY: usize = 4096;
const OUTBOUND_CHANNEL_CAPACITY: usize = 1024;

struct OutboundFrame {
    endpoint: EndpointId,
    frame: Frame,
    ack: oneshot::Sender<Result<(), TransportError>>,
}

pub struct PersistentSocket {
    config: TransportConfig,
    outbound_tx: mpsc::Sender<OutboundFrame>,
    outbound_rx: Mutex<Option<mpsc::Receiver<OutboundFrame>>>,
    inbound_rx: Mutex<mpsc::Receiver<(EndpointId, Frame)>>,
    inbound_tx: mpsc::Sender<(EndpointId, Frame)>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl PersistentSocket {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            inbound_rx: Mutex::new(inbound_rx),
            inbound_tx,
            state_tx,
            state_rx,
            task: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Transport for PersistentSocket {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut task_slot = self.task.lock().await;
        if task_slot.is_some() {
            return Ok(());
        }
        let Some(mut outbound_rx) = self.outbound_rx.lock().await.take() else {
            return Err(TransportError::ConnectFailed("outbound channel already consumed".into()));
        };

        let url = self.config.endpoint.clone();
        let backoff_cfg = self.config.reconnect_backoff.clone();
        let inbound_tx = self.inbound_tx.clone();
        let state_tx = self.state_tx.clone();
        let cancel = self.cancel.child_token();

        let handle = tokio::spawn(async move {
            reconnect_loop(url, &mut outbound_rx, &inbound_tx, &state_tx, &backoff_cfg, &cancel).await;
        });
        *task_slot = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send(&self, endpoint: &EndpointId, frame: Frame) -> Result<(), TransportError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.outbound_tx
            .send(OutboundFrame { endpoint: endpoint.clone(), frame, ack: ack_tx })
            .await
            .map_err(|_| TransportError::NotConnected)?;
        ack_rx.await.map_err(|_| TransportError::Lost("socket task dropped the ack channel".into()))?
    }

    async fn receive(&self) -> Result<(EndpointId, Frame), TransportError> {
        self.inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportError::Lost("inbound channel closed".into()))
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

async fn reconnect_loop(
    url: url::Url,
    outbound_rx: &mut mpsc::Receiver<OutboundFrame>,
    inbound_tx: &mpsc::Sender<(EndpointId, Frame)>,
    state_tx: &watch::Sender<ConnectionState>,
    backoff_cfg: &fleet_config::ReconnectBackoff,
    cancel: &CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let _ = state_tx.send(ConnectionState::Connecting);
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_pump(&url, outbound_rx, inbound_tx, state_tx, cancel) => {
                match result {
                    Ok(()) => {
                        tracing::info!("persistent socket disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "persistent socket error");
                        let delay = calculate_backoff(attempt, backoff_cfg);
                        tracing::info!(delay_ms = delay.as_millis() as u64, attempt, "waiting before reconnect");
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }
    let _ = state_tx.send(ConnectionState::Disconnected);
}

async fn connect_and_pump(
    url: &url::Url,
    outbound_rx: &mut mpsc::Receiver<OutboundFrame>,
    inbound_tx: &mpsc::Sender<(EndpointId, Frame)>,
    state_tx: &watch::Sender<ConnectionState>,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    let uri: tungstenite::http::Uri = url.as_str().parse().map_err(|e: tungstenite::http::uri::InvalidUri| TransportError::ConnectFailed(e.to_string()))?;
    let request = ClientRequestBuilder::new(uri);

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await.map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    let _ = state_tx.send(ConnectionState::Connected);
    tracing::info!(url = %url, "persistent socket connected");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            outbound = outbound_rx.recv() => {
                let Some(OutboundFrame { endpoint, frame, ack }) = outbound else { return Ok(()) };
                let result = write
                    .send(tungstenite::Message::Binary(frame))
                    .await
                    .map_err(|e| TransportError::SendFailed { address: endpoint, reason: e.to_string() });
                let _ = ack.send(result);
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        // PersistentSocket carries no per-frame address; the
                        // wire format (C4/C5) addresses itself via the frame
                        // body, so the endpoint here is the connection's own
                        // URL -- callers keyed per-connection don't need more.
                        let _ = inbound_tx.send((url.to_string(), data)).await;
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(TransportError::Lost(e.to_string())),
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_socket_starts_disconnected() {
        let socket = PersistentSocket::new(TransportConfig::disabled());
        assert_eq!(*socket.watch_state().borrow(), ConnectionState::Disconnected);
    }
}
