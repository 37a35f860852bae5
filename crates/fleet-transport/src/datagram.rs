// ── Datagram adapter (C3) ──
//
// Length-delimited messages over a connectionless transport. No
// teacher or pack precedent for this adapter kind; implemented
// directly over `tokio::net::UdpSocket`. Retries once on send per §4.3
// ("the adapter retries once on send and surfaces a TransportTimeout
// otherwise"); ordering is not guaranteed across or within an address.

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use fleet_config::TransportConfig;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::adapter::{ConnectionState, EndpointId, Frame, Transport};
use crate::error::TransportError;

const INBOUND_CHANNEL_CAPACITY: usize = 4096;
const MAX_DATAGRAM_SIZE: usize = 65_507;

pub struct Datagram {
    config: TransportConfig,
    socket: RwLock<Option<std::sync::Arc<UdpSocket>>>,
    /// Endpoint id -> socket address, learned from the config's static
    /// endpoint and from inbound traffic (reply-to address).
    routes: std::sync::Arc<RwLock<HashMap<EndpointId, SocketAddr>>>,
    inbound_tx: tokio::sync::mpsc::Sender<(EndpointId, Frame)>,
    inbound_rx: Mutex<tokio::sync::mpsc::Receiver<(EndpointId, Frame)>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Datagram {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            socket: RwLock::new(None),
            routes: std::sync::Arc::new(RwLock::new(HashMap::new())),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            state_tx,
            state_rx,
            pump: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a known endpoint -> socket address mapping, e.g. from a
    /// Device's stored transport hint. `send` fails with
    /// `UnknownEndpoint` for an address with no route.
    pub async fn add_route(&self, endpoint: EndpointId, addr: SocketAddr) {
        self.routes.write().await.insert(endpoint, addr);
    }

    async fn send_once(&self, socket: &UdpSocket, addr: SocketAddr, frame: &Frame) -> std::io::Result<()> {
        socket.send_to(frame, addr).await.map(|_| ())
    }
}

#[async_trait]
impl Transport for Datagram {
    async fn connect(&self) -> Result<(), TransportError> {
        let _ = self.state_tx.send(ConnectionState::Connecting);
        let bind_addr = if self.config.endpoint.host_str() == Some("0.0.0.0") { "0.0.0.0:0" } else { "[::]:0" };
        let socket = std::sync::Arc::new(UdpSocket::bind(bind_addr).await.map_err(|e| TransportError::ConnectFailed(e.to_string()))?);
        *self.socket.write().await = Some(std::sync::Arc::clone(&socket));

        let inbound_tx = self.inbound_tx.clone();
        let routes = std::sync::Arc::clone(&self.routes);
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0_u8; MAX_DATAGRAM_SIZE];
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = socket.recv_from(&mut buf) => {
                        let Ok((len, from)) = result else { continue };
                        let endpoint = {
                            let routes = routes.read().await;
                            routes.iter().find(|(_, a)| **a == from).map(|(id, _)| id.clone())
                        }
                        .unwrap_or_else(|| from.to_string());
                        let _ = inbound_tx.send((endpoint, Frame::copy_from_slice(&buf[..len]))).await;
                    }
                }
            }
        });

        *self.pump.lock().await = Some(handle);
        let _ = self.state_tx.send(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.cancel.cancel();
        if let Some(handle) = self.pump.lock().await.take() {
            let _ = handle.await;
        }
        self.socket.write().await.take();
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send(&self, endpoint: &EndpointId, frame: Frame) -> Result<(), TransportError> {
        let guard = self.socket.read().await;
        let socket = guard.as_ref().ok_or(TransportError::NotConnected)?;
        let addr = {
            let routes = self.routes.read().await;
            *routes.get(endpoint).ok_or_else(|| TransportError::UnknownEndpoint(endpoint.clone()))?
        };

        if self.send_once(socket, addr, &frame).await.is_ok() {
            return Ok(());
        }
        // Retry exactly once per §4.3.
        self.send_once(socket, addr, &frame)
            .await
            .map_err(|_| TransportError::Timeout { address: endpoint.clone() })
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

    #[tokio::test]
    async fn send_without_route_fails_fast() {
        let datagram = Datagram::new(TransportConfig::disabled());
        // No socket connected, no route -- NotConnected wins first.
        let result = datagram.send(&"ep-1".to_string(), Frame::from_static(b"x")).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }
}
