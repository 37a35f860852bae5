// ── Per-device RPC queue (§4.5 / §5) ──
//
// Operator calls enqueue here; the session handler pops exactly one at
// a time, FIFO, per device, and only once the previous pop has
// completed -- "one RPC in flight per session." A broken session fails
// the one in-flight RPC with `SessionLost` but leaves the rest of the
// queue intact for the device's next session.

use std::collections::VecDeque;

use dashmap::DashMap;
use fleet_core::engine::ParameterWrite;
use fleet_core::model::DeviceId;
use tokio::sync::oneshot;

use crate::error::CwmpError;
use crate::soap::ParameterValue;

#[derive(Debug, Clone)]
pub enum RpcRequest {
    GetParameterValues { names: Vec<String> },
    SetParameterValues { values: Vec<ParameterWrite>, parameter_key: String },
    AddObject { object_path: String, parameter_key: String },
    DeleteObject { object_path: String, instance_number: u32, parameter_key: String },
    Reboot { command_key: String },
    FactoryReset,
    Download { command_key: String, file_type: String, url: String, username: String, password: String, file_size: u64 },
    Upload { command_key: String, file_type: String, url: String, username: String, password: String },
}

#[derive(Debug, Clone)]
pub enum RpcOutcome {
    ParameterValues(Vec<ParameterValue>),
    Status(u32),
    InstanceNumber(u32),
    Accepted,
}

pub struct QueuedRpc {
    pub request: RpcRequest,
    respond: oneshot::Sender<Result<RpcOutcome, CwmpError>>,
}

impl QueuedRpc {
    pub fn complete(self, result: Result<RpcOutcome, CwmpError>) {
        let _ = self.respond.send(result);
    }
}

#[derive(Default)]
struct DeviceQueue {
    pending: VecDeque<QueuedRpc>,
    in_flight: bool,
}

#[derive(Default)]
pub struct RpcQueue {
    queues: DashMap<String, DeviceQueue>,
}

impl RpcQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `request` for `device_id`; the caller awaits the
    /// returned receiver for the eventual RPC outcome.
    pub fn enqueue(&self, device_id: &DeviceId, request: RpcRequest) -> oneshot::Receiver<Result<RpcOutcome, CwmpError>> {
        let (tx, rx) = oneshot::channel();
        self.queues.entry(device_id.canonical()).or_default().pending.push_back(QueuedRpc { request, respond: tx });
        rx
    }

    #[must_use]
    pub fn has_queued(&self, device_id: &DeviceId) -> bool {
        self.queues.get(&device_id.canonical()).is_some_and(|q| !q.pending.is_empty())
    }

    /// Pop the next RPC for `device_id` if none is already in flight.
    /// Marks the queue in-flight until [`Self::complete`] is called.
    pub fn pop_next(&self, device_id: &DeviceId) -> Option<QueuedRpc> {
        let mut entry = self.queues.get_mut(&device_id.canonical())?;
        if entry.in_flight {
            return None;
        }
        let next = entry.pending.pop_front()?;
        entry.in_flight = true;
        Some(next)
    }

    /// Clear the in-flight marker so the next `pop_next` can proceed.
    pub fn complete(&self, device_id: &DeviceId) {
        if let Some(mut entry) = self.queues.get_mut(&device_id.canonical()) {
            entry.in_flight = false;
        }
    }

    /// Clear the in-flight marker so the device's next session can pop
    /// again. `pop_next` already moved the `QueuedRpc` out of this queue
    /// to its caller, so this cannot complete it -- the caller (the
    /// session janitor or the HTTP handler's fault/response paths in
    /// `server.rs`) is responsible for calling `QueuedRpc::complete`
    /// with `SessionLost` before calling this. Queued-but-not-yet-sent
    /// RPCs are left untouched for the device's next session.
    pub fn fail_in_flight(&self, device_id: &DeviceId) {
        if let Some(mut entry) = self.queues.get_mut(&device_id.canonical()) {
            entry.in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceId {
        DeviceId::legacy_cpe("Acme", "001122", "Router", "SN1")
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = RpcQueue::new();
        let _r1 = queue.enqueue(&device(), RpcRequest::Reboot { command_key: "a".into() });
        let _r2 = queue.enqueue(&device(), RpcRequest::Reboot { command_key: "b".into() });

        let first = queue.pop_next(&device()).unwrap();
        let RpcRequest::Reboot { command_key } = &first.request else { panic!() };
        assert_eq!(command_key, "a");
        first.complete(Ok(RpcOutcome::Accepted));
    }

    #[tokio::test]
    async fn only_one_rpc_in_flight_at_a_time() {
        let queue = RpcQueue::new();
        let _r1 = queue.enqueue(&device(), RpcRequest::Reboot { command_key: "a".into() });
        let _r2 = queue.enqueue(&device(), RpcRequest::Reboot { command_key: "b".into() });

        let first = queue.pop_next(&device()).unwrap();
        assert!(queue.pop_next(&device()).is_none());
        queue.complete(&device());
        assert!(queue.pop_next(&device()).is_some());
        first.complete(Ok(RpcOutcome::Accepted));
    }

    #[tokio::test]
    async fn session_loss_leaves_remaining_queue_intact() {
        let queue = RpcQueue::new();
        let r1 = queue.enqueue(&device(), RpcRequest::Reboot { command_key: "a".into() });
        let _r2 = queue.enqueue(&device(), RpcRequest::Reboot { command_key: "b".into() });

        let first = queue.pop_next(&device()).unwrap();
        first.complete(Err(CwmpError::SessionLost { device_id: device().canonical() }));
        queue.fail_in_flight(&device());

        assert!(matches!(r1.await.unwrap(), Err(CwmpError::SessionLost { .. })));
        assert!(queue.has_queued(&device()));
    }
}
