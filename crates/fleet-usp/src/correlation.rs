// ── Correlation table (§5) ──
//
// Maps an outstanding request's message id to the oneshot waiter that
// resolves it. `register` inserts the waiter synchronously so a
// response racing in before the caller awaits can never be dropped;
// `wait` is the async half that blocks the caller and applies the
// timeout. Whichever of response/timeout/cancel fires first wins, the
// loser is a silent no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::UspError;
use crate::frame::Frame;

pub struct PendingResponse {
    message_id: String,
    rx: oneshot::Receiver<Frame>,
}

pub struct CorrelationTable {
    waiters: DashMap<String, oneshot::Sender<Frame>>,
    orphan_responses: AtomicU64,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    #[must_use]
    pub fn new() -> Self {
        Self { waiters: DashMap::new(), orphan_responses: AtomicU64::new(0) }
    }

    /// Reserve a slot for `message_id` before the request frame is sent.
    pub fn register(&self, message_id: impl Into<String>) -> PendingResponse {
        let message_id = message_id.into();
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(message_id.clone(), tx);
        PendingResponse { message_id, rx }
    }

    /// Block on a previously registered slot until a response arrives,
    /// `timeout` elapses, or the waiter is dropped.
    pub async fn wait(&self, pending: PendingResponse, timeout: Duration) -> Result<Frame, UspError> {
        let PendingResponse { message_id, rx } = pending;
        let result = tokio::time::timeout(timeout, rx).await;
        self.waiters.remove(&message_id);

        match result {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(UspError::TransportLost("correlation waiter dropped".into())),
            Err(_) => Err(UspError::Timeout),
        }
    }

    /// Deliver an inbound response frame to its waiter, if one is still
    /// registered. Returns `true` if a waiter consumed it; a response
    /// whose id is no longer (or never was) in the table is dropped and
    /// counted in [`Self::orphan_responses`].
    pub fn resolve(&self, frame: Frame) -> bool {
        if let Some((_, tx)) = self.waiters.remove(&frame.message_id) {
            return tx.send(frame).is_ok();
        }
        self.orphan_responses.fetch_add(1, Ordering::Relaxed);
        false
    }

    pub fn cancel(&self, message_id: &str) {
        self.waiters.remove(message_id);
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.waiters.len()
    }

    /// Count of response frames whose message id matched no registered
    /// waiter -- late responses past their timeout, or responses for a
    /// request this process never sent.
    #[must_use]
    pub fn orphan_responses(&self) -> u64 {
        self.orphan_responses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MessageKind;

    #[tokio::test]
    async fn resolves_a_registered_waiter() {
        let table = std::sync::Arc::new(CorrelationTable::new());
        let pending = table.register("msg-1");
        assert_eq!(table.outstanding(), 1);

        let table2 = table.clone();
        let handle = tokio::spawn(async move { table2.wait(pending, Duration::from_secs(1)).await });

        assert!(table.resolve(Frame::new("msg-1", MessageKind::GetResponse, vec![])));
        let resolved = handle.await.unwrap().unwrap();
        assert_eq!(resolved.message_id, "msg-1");
    }

    #[tokio::test]
    async fn unregistered_resolve_is_a_no_op() {
        let table = CorrelationTable::new();
        assert!(!table.resolve(Frame::new("ghost", MessageKind::GetResponse, vec![])));
    }

    #[tokio::test]
    async fn unregistered_resolve_counts_as_an_orphan_response() {
        let table = CorrelationTable::new();
        table.resolve(Frame::new("ghost", MessageKind::GetResponse, vec![]));
        table.resolve(Frame::new("ghost-2", MessageKind::GetResponse, vec![]));
        assert_eq!(table.orphan_responses(), 2);
    }

    #[tokio::test]
    async fn late_response_after_timeout_counts_as_an_orphan() {
        let table = std::sync::Arc::new(CorrelationTable::new());
        let pending = table.register("msg-late");
        let result = table.wait(pending, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(UspError::Timeout)));

        assert!(!table.resolve(Frame::new("msg-late", MessageKind::GetResponse, vec![])));
        assert_eq!(table.orphan_responses(), 1);
    }

    #[tokio::test]
    async fn wait_times_out_when_nothing_resolves() {
        let table = CorrelationTable::new();
        let pending = table.register("msg-2");
        let result = table.wait(pending, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(UspError::Timeout)));
        assert_eq!(table.outstanding(), 0);
    }

    #[test]
    fn register_reserves_the_slot_immediately() {
        let table = CorrelationTable::new();
        let _pending = table.register("msg-3");
        assert_eq!(table.outstanding(), 1);
    }
}
