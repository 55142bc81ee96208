//! Instance-addressable notification bus.
//!
//! The host's widget adapters subscribe by widget instance id; the
//! interaction manager and bindings publish. Diagnostics tooling can
//! subscribe to every notification at once.
//!
//! Handlers run synchronously on the publishing task. They may subscribe or
//! unsubscribe while being invoked; a panicking handler is logged and does
//! not affect the others.

use crate::value::FieldMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Who changed a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// An interaction response.
    Interaction,
    /// The host application.
    Host,
    /// A data binding.
    Binding,
}

/// Something a widget instance (or diagnostics) should hear about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Notification {
    /// A property in the instance's state changed.
    PropertyChange {
        /// Target instance.
        instance_id: String,
        /// Changed property.
        property: String,
        /// Previous value.
        old_value: Option<Value>,
        /// New value.
        new_value: Value,
        /// Who changed it.
        source: ChangeSource,
    },
    /// A binding delivered new data to the instance.
    DataUpdate {
        /// Target instance.
        instance_id: String,
        /// Delivered fields.
        fields: FieldMap,
    },
    /// An interaction response completed (successfully or not).
    InteractionResult {
        /// Instance whose interaction ran.
        instance_id: String,
        /// Serialized result record.
        result: Value,
    },
    /// An interaction response was refused.
    InteractionRejected {
        /// Instance whose interaction ran.
        instance_id: String,
        /// Why it was refused.
        reason: String,
    },
}

impl Notification {
    /// Instance this notification is addressed to.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        match self {
            Self::PropertyChange { instance_id, .. }
            | Self::DataUpdate { instance_id, .. }
            | Self::InteractionResult { instance_id, .. }
            | Self::InteractionRejected { instance_id, .. } => instance_id,
        }
    }
}

/// Handle returned by subscribe calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Topic {
    Instance(String),
    All,
}

/// Pub/sub bus keyed by widget instance id.
#[derive(Default)]
pub struct NotificationBus {
    subscribers: RwLock<HashMap<Topic, Vec<(SubscriberId, Handler)>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.total_subscribers())
            .finish()
    }
}

impl NotificationBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, topic: Topic, handler: Handler) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .expect("bus lock poisoned")
            .entry(topic)
            .or_default()
            .push((id, handler));
        id
    }

    /// Subscribe to notifications addressed to one instance.
    pub fn subscribe<F>(&self, instance_id: &str, handler: F) -> SubscriberId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.add(Topic::Instance(instance_id.to_string()), Arc::new(handler))
    }

    /// Subscribe to every notification.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.add(Topic::All, Arc::new(handler))
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().expect("bus lock poisoned");
        let mut removed = false;
        subscribers.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(sid, _)| *sid != id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        removed
    }

    /// Publish a notification. Returns how many handlers received it.
    pub fn publish(&self, notification: &Notification) -> usize {
        let handlers: Vec<Handler> = {
            let subscribers = self.subscribers.read().expect("bus lock poisoned");
            let direct = subscribers.get(&Topic::Instance(notification.instance_id().to_string()));
            let all = subscribers.get(&Topic::All);
            direct
                .into_iter()
                .chain(all)
                .flatten()
                .map(|(_, h)| Arc::clone(h))
                .collect()
        };

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(notification))).is_err() {
                tracing::warn!(
                    instance = %notification.instance_id(),
                    "notification handler panicked"
                );
            }
        }
        handlers.len()
    }

    /// Number of subscribers for one instance.
    #[must_use]
    pub fn subscriber_count(&self, instance_id: &str) -> usize {
        self.subscribers
            .read()
            .expect("bus lock poisoned")
            .get(&Topic::Instance(instance_id.to_string()))
            .map_or(0, Vec::len)
    }

    /// Number of subscribers across all topics.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.subscribers
            .read()
            .expect("bus lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.subscribers.write().expect("bus lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn change(instance: &str, value: Value) -> Notification {
        Notification::PropertyChange {
            instance_id: instance.into(),
            property: "text".into(),
            old_value: None,
            new_value: value,
            source: ChangeSource::Interaction,
        }
    }

    #[test]
    fn test_routes_by_instance() {
        let bus = NotificationBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe("a", move |n| {
            sink.lock().expect("test mutex").push(n.clone());
        });

        assert_eq!(bus.publish(&change("a", json!(1))), 1);
        assert_eq!(bus.publish(&change("b", json!(2))), 0);
        assert_eq!(seen.lock().expect("test mutex").len(), 1);
    }

    #[test]
    fn test_subscribe_all_sees_everything() {
        let bus = NotificationBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        bus.subscribe_all(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(&change("a", json!(1)));
        bus.publish(&Notification::InteractionRejected {
            instance_id: "b".into(),
            reason: "denied".into(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = NotificationBus::new();
        let id = bus.subscribe("a", |_| {});
        assert_eq!(bus.subscriber_count("a"), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.total_subscribers(), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = Arc::new(NotificationBus::new());
        let slot: Arc<Mutex<Option<SubscriberId>>> = Arc::new(Mutex::new(None));
        let (b, s) = (Arc::clone(&bus), Arc::clone(&slot));
        let id = bus.subscribe("a", move |_| {
            if let Some(id) = *s.lock().expect("test mutex") {
                b.unsubscribe(id);
            }
        });
        *slot.lock().expect("test mutex") = Some(id);

        assert_eq!(bus.publish(&change("a", json!(1))), 1);
        assert_eq!(bus.publish(&change("a", json!(2))), 0);
    }

    #[test]
    fn test_panicking_handler_isolated() {
        let bus = NotificationBus::new();
        let count = Arc::new(AtomicU64::new(0));
        bus.subscribe("a", |_| panic!("adapter bug"));
        let c = Arc::clone(&count);
        bus.subscribe("a", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.publish(&change("a", json!(1))), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notification_serializes_with_tag() {
        let value = serde_json::to_value(change("a", json!("x"))).expect("serializable");
        assert_eq!(value["type"], "property-change");
        assert_eq!(value["instance_id"], "a");
    }
}
