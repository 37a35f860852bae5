// ── Store Gateway (C2) ──

mod collection;
mod gateway;
mod memory;

pub use gateway::{DeviceFilter, OperationPatch, StoreGateway};
pub use memory::InMemoryStore;
