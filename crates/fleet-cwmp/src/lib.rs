//! CWMP Session Engine (C5): SOAP codec, session state machine,
//! per-device RPC queue, connection-request callback, and the HTTP
//! listener and [`engine::CwmpEngine`] implementation of
//! [`fleet_core::DeviceEngine`] for legacy TR-069 CPEs.

pub mod connection_request;
pub mod engine;
pub mod error;
pub mod event_code;
pub mod fault;
pub mod rpc_queue;
pub mod server;
pub mod session;
pub mod soap;

pub use engine::CwmpEngine;
pub use error::CwmpError;
pub use event_code::EventCode;
pub use fault::{FaultCode, SoapFault};
pub use rpc_queue::{RpcOutcome, RpcQueue, RpcRequest};
pub use server::{router, CwmpServer};
pub use session::{Session, SessionState};
