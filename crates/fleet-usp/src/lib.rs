//! USP Message Engine (C4): binary frame codec, correlation table, and
//! the [`engine::UspEngine`] implementation of
//! [`fleet_core::DeviceEngine`] for modern TR-369 agents.

pub mod correlation;
pub mod engine;
pub mod error;
pub mod frame;
pub mod subscription_router;

pub use correlation::CorrelationTable;
pub use engine::UspEngine;
pub use error::UspError;
pub use frame::{Field, Frame, MessageKind};
pub use subscription_router::{Delivery, SubscriptionRouter};
