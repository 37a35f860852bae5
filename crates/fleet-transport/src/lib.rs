//! Transport Abstraction (C3): pluggable adapters for the asynchronous
//! message fabrics USP/CWMP frames ride on. Every adapter shares one
//! contract -- see [`adapter::Transport`] -- and frames are opaque to
//! this layer.

pub mod adapter;
mod backoff;
pub mod datagram;
pub mod error;
pub mod persistent_socket;
pub mod queue_broker;
pub mod topic_broker;

pub use adapter::{ConnectionState, EndpointId, Frame, Transport};
pub use datagram::Datagram;
pub use error::TransportError;
pub use persistent_socket::PersistentSocket;
pub use queue_broker::QueueBroker;
pub use topic_broker::TopicBroker;
