//! Pub/sub hub: per-connection subscriptions and channel fan-out.
//!
//! Hub state for a connection is created lazily on its first subscribe and
//! purged by [`Hub::cleanup_connection`] when the mainloop exits. One mutex
//! guards both the per-connection records and the channel index, so
//! `id ∈ index[channel]` holds exactly when `channel ∈ record(id)`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use wsgate_rpc::{ConnectionId, ContextData, EventFrame, PubSub, RpcError, encode};

use super::registry::ConnectionRegistry;
use crate::metrics::HUB_BROADCAST_DELIVERIES_TOTAL;

/// Hub-side state of one connection.
#[derive(Debug)]
struct HubConnection {
    /// Context data at the time of the first subscribe.
    context_data: ContextData,
    subscriptions: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct HubState {
    connections: HashMap<ConnectionId, HubConnection>,
    subscriptions: HashMap<String, HashSet<ConnectionId>>,
}

/// Channel subscriptions and event delivery for live connections.
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    state: Mutex<HubState>,
}

impl Hub {
    /// Create a hub delivering through `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(HubState::default()),
        }
    }

    /// Drop every subscription held by `id` along with its hub record.
    ///
    /// Must run after the registry entry is removed so a concurrent
    /// `subscribe` cannot recreate the record.
    pub fn cleanup_connection(&self, id: &ConnectionId) {
        let mut state = self.state.lock();
        let Some(record) = state.connections.remove(id) else {
            return;
        };
        for channel in &record.subscriptions {
            remove_from_index(&mut state.subscriptions, channel, id);
        }
        debug!(
            connection_id = %id,
            channels = record.subscriptions.len(),
            "hub state purged"
        );
    }

    /// Connections with hub state.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Subscribers of `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .get(channel)
            .map_or(0, HashSet::len)
    }

    /// Total (connection, channel) pairs.
    pub fn subscription_count(&self) -> usize {
        self.state
            .lock()
            .connections
            .values()
            .map(|c| c.subscriptions.len())
            .sum()
    }

    /// Context snapshot taken when `id` first subscribed.
    pub fn subscriber_context(&self, id: &ConnectionId) -> Option<ContextData> {
        self.state
            .lock()
            .connections
            .get(id)
            .map(|c| c.context_data.clone())
    }
}

fn remove_from_index(
    index: &mut HashMap<String, HashSet<ConnectionId>>,
    channel: &str,
    id: &ConnectionId,
) {
    if let Some(members) = index.get_mut(channel) {
        let _ = members.remove(id);
        if members.is_empty() {
            let _ = index.remove(channel);
        }
    }
}

impl PubSub for Hub {
    fn get_subscriptions(&self, id: &ConnectionId) -> Vec<String> {
        self.state
            .lock()
            .connections
            .get(id)
            .map(|c| c.subscriptions.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn subscribe(&self, id: &ConnectionId, channel: &str) -> Result<(), RpcError> {
        let mut state = self.state.lock();
        // Checked under the hub lock: cleanup_connection takes the same lock
        // after the registry entry is gone.
        let Some(entry) = self.registry.get(id) else {
            return Err(RpcError::ConnectionNotFound {
                connection_id: id.to_string(),
            });
        };
        let record = state
            .connections
            .entry(id.clone())
            .or_insert_with(|| HubConnection {
                context_data: ContextData::clone(&entry.context_data),
                subscriptions: BTreeSet::new(),
            });
        let _ = record.subscriptions.insert(channel.to_owned());
        let _ = state
            .subscriptions
            .entry(channel.to_owned())
            .or_default()
            .insert(id.clone());
        debug!(connection_id = %id, channel, "subscribed");
        Ok(())
    }

    fn unsubscribe(&self, id: &ConnectionId, channel: &str) {
        let mut state = self.state.lock();
        if let Some(record) = state.connections.get_mut(id) {
            let _ = record.subscriptions.remove(channel);
        }
        remove_from_index(&mut state.subscriptions, channel, id);
        debug!(connection_id = %id, channel, "unsubscribed");
    }

    fn broadcast(&self, channel: &str, event: &str, data: Value) -> usize {
        let members: Vec<ConnectionId> = match self.state.lock().subscriptions.get(channel) {
            Some(members) => members.iter().cloned().collect(),
            None => return 0,
        };
        let frame = encode(&EventFrame::new(event, data));
        let delivered = members
            .iter()
            .filter(|id| self.registry.send(id, frame.clone()))
            .count();
        debug!(
            channel,
            event,
            subscribers = members.len(),
            delivered,
            "broadcast event"
        );
        counter!(HUB_BROADCAST_DELIVERIES_TOTAL).increment(delivered as u64);
        delivered
    }

    fn unicast(&self, id: &ConnectionId, event: &str, data: Value) -> bool {
        let delivered = self.registry.send(id, encode(&EventFrame::new(event, data)));
        if !delivered {
            warn!(connection_id = %id, event, "unicast not delivered");
        }
        delivered
    }

    fn send(&self, id: &ConnectionId, raw: String) -> bool {
        self.registry.send(id, raw)
    }

    fn get_context(&self, id: &ConnectionId) -> Option<ContextData> {
        self.registry.context(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::queue::{self, QueueMessage, QueueReceiver};
    use crate::websocket::registry::ConnectionEntry;
    use serde_json::json;

    fn setup() -> (Arc<ConnectionRegistry>, Hub) {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Hub::new(Arc::clone(&registry));
        (registry, hub)
    }

    fn connect(registry: &ConnectionRegistry, id: &str) -> QueueReceiver {
        let (tx, rx) = queue::channel();
        let mut ctx = ContextData::new();
        let _ = ctx.insert("user".into(), json!(id));
        let _ = registry.register(ConnectionEntry::new(ConnectionId::from(id), Arc::new(ctx), tx));
        rx
    }

    fn pushed(rx: &mut QueueReceiver) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            match msg {
                QueueMessage::Push(frame) => out.push(serde_json::from_str(&frame).unwrap()),
                other => panic!("unexpected queue message {other:?}"),
            }
        }
        out
    }

    #[test]
    fn subscriptions_sorted() {
        let (registry, hub) = setup();
        let _rx = connect(&registry, "c1");
        let id = ConnectionId::from("c1");
        for ch in ["zeta", "alpha", "mid", "alpha"] {
            hub.subscribe(&id, ch).unwrap();
        }
        assert_eq!(hub.get_subscriptions(&id), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn subscriptions_empty_without_record() {
        let (_registry, hub) = setup();
        assert!(hub.get_subscriptions(&ConnectionId::from("nobody")).is_empty());
    }

    #[test]
    fn subscribe_requires_registered_connection() {
        let (_registry, hub) = setup();
        let err = hub.subscribe(&ConnectionId::from("ghost"), "news").unwrap_err();
        assert_eq!(err.exc_type(), "ConnectionNotFound");
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn broadcast_reaches_each_subscriber_once() {
        let (registry, hub) = setup();
        let mut rx1 = connect(&registry, "c1");
        let mut rx2 = connect(&registry, "c2");
        let mut rx3 = connect(&registry, "c3");
        hub.subscribe(&ConnectionId::from("c1"), "news").unwrap();
        hub.subscribe(&ConnectionId::from("c2"), "news").unwrap();
        hub.subscribe(&ConnectionId::from("c3"), "other").unwrap();

        let delivered = hub.broadcast("news", "headline", json!({"title": "hi"}));
        assert_eq!(delivered, 2);

        for rx in [&mut rx1, &mut rx2] {
            let frames = pushed(rx);
            assert_eq!(frames.len(), 1);
            assert_eq!(
                frames[0],
                json!({"type": "event", "event": "headline", "data": {"title": "hi"}})
            );
        }
        assert!(pushed(&mut rx3).is_empty());
    }

    #[test]
    fn unsubscribe_stops_delivery_and_drops_empty_channel() {
        let (registry, hub) = setup();
        let mut rx = connect(&registry, "c1");
        let id = ConnectionId::from("c1");
        hub.subscribe(&id, "news").unwrap();
        hub.unsubscribe(&id, "news");

        assert_eq!(hub.broadcast("news", "headline", json!(null)), 0);
        assert!(pushed(&mut rx).is_empty());
        assert_eq!(hub.channel_count(), 0);
        assert!(hub.get_subscriptions(&id).is_empty());
    }

    #[test]
    fn unsubscribe_absent_is_noop() {
        let (_registry, hub) = setup();
        hub.unsubscribe(&ConnectionId::from("ghost"), "news");
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn broadcast_skips_departed_connection() {
        let (registry, hub) = setup();
        let _rx1 = connect(&registry, "c1");
        let mut rx2 = connect(&registry, "c2");
        hub.subscribe(&ConnectionId::from("c1"), "news").unwrap();
        hub.subscribe(&ConnectionId::from("c2"), "news").unwrap();

        // c1 left the registry but its hub state has not been purged yet.
        let _ = registry.remove(&ConnectionId::from("c1"));
        assert_eq!(hub.broadcast("news", "headline", json!(1)), 1);
        assert_eq!(pushed(&mut rx2).len(), 1);
    }

    #[test]
    fn cleanup_purges_index_and_record() {
        let (registry, hub) = setup();
        let _rx1 = connect(&registry, "c1");
        let _rx2 = connect(&registry, "c2");
        let c1 = ConnectionId::from("c1");
        let c2 = ConnectionId::from("c2");
        hub.subscribe(&c1, "a").unwrap();
        hub.subscribe(&c1, "b").unwrap();
        hub.subscribe(&c2, "b").unwrap();

        let _ = registry.remove(&c1);
        hub.cleanup_connection(&c1);

        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.channel_count(), 1);
        assert_eq!(hub.subscriber_count("a"), 0);
        assert_eq!(hub.subscriber_count("b"), 1);
        assert_eq!(hub.subscription_count(), 1);
        assert!(hub.subscribe(&c1, "a").is_err());
    }

    #[test]
    fn cleanup_without_record_is_noop() {
        let (_registry, hub) = setup();
        hub.cleanup_connection(&ConnectionId::from("ghost"));
    }

    #[test]
    fn unicast_and_send() {
        let (registry, hub) = setup();
        let mut rx = connect(&registry, "c1");
        let id = ConnectionId::from("c1");

        assert!(hub.unicast(&id, "notice", json!({"n": 1})));
        assert!(hub.send(&id, r#"{"raw":true}"#.into()));
        let frames = pushed(&mut rx);
        assert_eq!(frames[0]["event"], "notice");
        assert_eq!(frames[1], json!({"raw": true}));

        assert!(!hub.unicast(&ConnectionId::from("ghost"), "notice", json!(null)));
        assert!(!hub.send(&ConnectionId::from("ghost"), "x".into()));
    }

    #[test]
    fn context_comes_from_registry() {
        let (registry, hub) = setup();
        let _rx = connect(&registry, "c1");
        let id = ConnectionId::from("c1");
        assert_eq!(hub.get_context(&id).unwrap()["user"], "c1");
        assert!(hub.get_context(&ConnectionId::from("ghost")).is_none());

        hub.subscribe(&id, "news").unwrap();
        assert_eq!(hub.subscriber_context(&id).unwrap()["user"], "c1");
    }

    #[test]
    fn broadcast_flood_to_idle_subscriber_is_capped() {
        let (registry, hub) = setup();
        let mut rx = connect(&registry, "idle");
        let id = ConnectionId::from("idle");
        hub.subscribe(&id, "ticks").unwrap();

        let cap = queue::DEFAULT_MAX_PENDING_PUSHES;
        let delivered: usize = (0..cap + 50)
            .map(|n| hub.broadcast("ticks", "tick", json!(n)))
            .sum();
        assert_eq!(delivered, cap);

        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, cap);
    }

    #[test]
    fn concurrent_subscribe_and_cleanup_leave_no_dangling_ids() {
        let (registry, hub) = setup();
        let hub = Arc::new(hub);
        let mut receivers = Vec::new();
        for i in 0..32 {
            receivers.push(connect(&registry, &format!("c{i}")));
        }

        let workers: Vec<_> = (0..32)
            .map(|i| {
                let hub = Arc::clone(&hub);
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let id = ConnectionId::from(format!("c{i}"));
                    for n in 0..20 {
                        let _ = hub.subscribe(&id, &format!("ch{}", n % 4));
                        if n == 10 && i % 2 == 0 {
                            let _ = registry.remove(&id);
                            hub.cleanup_connection(&id);
                        }
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        for ch in ["ch0", "ch1", "ch2", "ch3"] {
            assert_eq!(hub.subscriber_count(ch), 16);
        }
        assert_eq!(hub.connection_count(), 16);
        for i in (0..32).step_by(2) {
            assert!(hub
                .get_subscriptions(&ConnectionId::from(format!("c{i}")))
                .is_empty());
        }
    }
}
