// ── Data model (§3) ──
//
// Pure entity types shared across every engine. No module here performs
// I/O; persistence lives in `crate::store`, transport in
// `fleet-transport`, `fleet-usp`, `fleet-cwmp`.

mod device;
mod device_id;
mod instance;
mod operation;
mod parameter;
mod path;
mod subscription;
mod transfer;

pub use device::{ConnectionRequestCredentials, Device, DeviceDescriptor, TransportHint};
pub use device_id::DeviceId;
pub use instance::Instance;
pub use operation::{Operation, OperationId, OperationKind, OperationStatus};
pub use parameter::{ParamType, Parameter};
pub use path::{InvalidPath, ParameterPath, PathPattern, PathSegment};
pub use subscription::{EventType, Subscription, SubscriptionId, SubscriptionStatus};
pub use transfer::{FileTransfer, TransferDirection, TransferStatus};
