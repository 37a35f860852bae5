// ── Subscription router (C4 half of §4.7 subscribe/notify) ──
//
// USP agents push `Notify` frames autonomously once a subscription has
// been established on-device; this router's job is only the inbound
// half -- match each arriving `Notify` against the subscriptions C7 has
// recorded in the store and deliver to whichever `delivery_target`
// they named. It never originates a `SubscribeRequest` itself; that
// wiring happens out of band when the subscription is first created.

use std::sync::Arc;

use fleet_core::model::{DeviceId, EventType, Subscription};
use fleet_core::store::StoreGateway;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::frame::Frame;

const TAG_DEVICE_ID: u8 = 1;
const TAG_EVENT_TYPE: u8 = 2;
const TAG_PATH: u8 = 3;
const TAG_PAYLOAD: u8 = 4;

fn event_type_from_tag(tag: &str) -> Option<EventType> {
    Some(match tag {
        "value_change" => EventType::ValueChange,
        "boot" => EventType::Boot,
        "bootstrap" => EventType::Bootstrap,
        "periodic" => EventType::Periodic,
        "transfer_complete" => EventType::TransferComplete,
        "connection_request" => EventType::ConnectionRequest,
        "object_creation" => EventType::ObjectCreation,
        "object_deletion" => EventType::ObjectDeletion,
        "operate" => EventType::Operate,
        _ => return None,
    })
}

/// One decoded delivery: the subscription it matched plus the raw event
/// payload, handed to whatever sink `delivery_target` names (out of
/// scope here; this router only does the matching).
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subscription: Subscription,
    pub device_id: DeviceId,
    pub path: String,
    pub payload: String,
}

pub struct SubscriptionRouter {
    store: Arc<dyn StoreGateway>,
    cancel: CancellationToken,
}

impl SubscriptionRouter {
    #[must_use]
    pub fn new(store: Arc<dyn StoreGateway>) -> Self {
        Self { store, cancel: CancellationToken::new() }
    }

    /// Decode one `Notify` frame and return the deliveries it produces,
    /// one per matching active subscription.
    pub async fn route(&self, device_id: &DeviceId, frame: &Frame) -> Vec<Delivery> {
        let Some(event_tag) = frame.field(TAG_EVENT_TYPE).and_then(|f| f.as_str().ok()) else {
            return Vec::new();
        };
        let Some(event_type) = event_type_from_tag(event_tag) else {
            return Vec::new();
        };
        let path = frame.field(TAG_PATH).and_then(|f| f.as_str().ok()).unwrap_or_default().to_string();
        let payload = frame.field(TAG_PAYLOAD).and_then(|f| f.as_str().ok()).unwrap_or_default().to_string();

        let Ok(parameter_path) = fleet_core::model::ParameterPath::parse(&path).or_else(|_| fleet_core::model::ParameterPath::parse(&format!("{path}."))) else {
            return Vec::new();
        };

        let subscriptions = self.store.list_subscriptions(Some(device_id), event_type).await.unwrap_or_default();

        subscriptions
            .into_iter()
            .filter(|sub| sub.path_pattern.as_ref().is_none_or(|pattern| pattern.matches(&parameter_path)))
            .map(|subscription| Delivery { subscription, device_id: device_id.clone(), path: path.clone(), payload: payload.clone() })
            .collect()
    }

    /// Drain `notify_rx` (fed by the dispatch loop) and hand each
    /// resulting delivery to `on_delivery` until cancelled.
    pub async fn run(self: Arc<Self>, mut notify_rx: mpsc::Receiver<(DeviceId, Frame)>, on_delivery: impl Fn(Delivery) + Send + Sync + 'static) {
        let on_delivery = Arc::new(on_delivery);
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                frame = notify_rx.recv() => {
                    let Some((device_id, frame)) = frame else { break };
                    for delivery in self.route(&device_id, &frame).await {
                        (on_delivery)(delivery);
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Field, MessageKind};
    use fleet_core::store::InMemoryStore;

    #[tokio::test]
    async fn unparseable_event_type_yields_no_deliveries() {
        let router = SubscriptionRouter::new(Arc::new(InMemoryStore::new()));
        let frame = Frame::new("n1", MessageKind::Notify, vec![Field::string(TAG_EVENT_TYPE, "not_a_real_event")]);
        let deliveries = router.route(&DeviceId::modern_agent("a1"), &frame).await;
        assert!(deliveries.is_empty());
    }

    #[tokio::test]
    async fn notify_with_no_subscriptions_yields_no_deliveries() {
        let router = SubscriptionRouter::new(Arc::new(InMemoryStore::new()));
        let frame = Frame::new(
            "n2",
            MessageKind::Notify,
            vec![
                Field::string(TAG_DEVICE_ID, "a1"),
                Field::string(TAG_EVENT_TYPE, "value_change"),
                Field::string(TAG_PATH, "Device.WiFi.Radio.1.Channel"),
                Field::string(TAG_PAYLOAD, "11"),
            ],
        );
        let deliveries = router.route(&DeviceId::modern_agent("a1"), &frame).await;
        assert!(deliveries.is_empty());
    }
}
