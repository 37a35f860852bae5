// ── Transport Abstraction contract (C3) ──
//
// One capability set shared by every adapter: connect / disconnect /
// send(address, frame) / receive() -> (address, frame). Frames are
// opaque to this layer; C4/C5 own the wire format. Ordering guarantees
// vary per adapter -- see each module's docs -- and the engine layers
// must not assume more than what is documented here.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::error::TransportError;

pub type EndpointId = String;
pub type Frame = Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Send one frame addressed to `endpoint`. Per-adapter ordering is
    /// documented on the implementing type.
    async fn send(&self, endpoint: &EndpointId, frame: Frame) -> Result<(), TransportError>;

    /// Await the next inbound frame from any endpoint. Adapters that
    /// fan out multiple inbound tasks still serialise delivery through
    /// one channel here; concurrent callers each get distinct frames.
    async fn receive(&self) -> Result<(EndpointId, Frame), TransportError>;

    /// Observe connection-state transitions without polling.
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;
}
