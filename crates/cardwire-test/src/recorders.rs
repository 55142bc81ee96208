//! Recording doubles for the navigation seam and the notification bus.

use cardwire_core::{Notification, NotificationBus, SubscriberId};
use cardwire_interact::{NavigationError, NavigationRequest, Navigator};
use std::sync::{Arc, Mutex};

/// Records every navigation. Either operation can be made to fail.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    navigations: Mutex<Vec<NavigationRequest>>,
    opened: Mutex<Vec<(String, Option<String>)>>,
    fail_navigate: bool,
    fail_open: bool,
}

impl RecordingNavigator {
    /// Navigator where everything succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `navigate` call.
    pub fn failing_navigate(mut self) -> Self {
        self.fail_navigate = true;
        self
    }

    /// Fail every `open_new` call.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Navigator where everything fails.
    pub fn failing() -> Self {
        Self::new().failing_navigate().failing_open()
    }

    /// Recorded `navigate` requests.
    pub fn navigations(&self) -> Vec<NavigationRequest> {
        self.navigations.lock().expect("navigator lock poisoned").clone()
    }

    /// Recorded `open_new` calls as `(url, features)`.
    pub fn opened(&self) -> Vec<(String, Option<String>)> {
        self.opened.lock().expect("navigator lock poisoned").clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, request: &NavigationRequest) -> Result<(), NavigationError> {
        self.navigations
            .lock()
            .expect("navigator lock poisoned")
            .push(request.clone());
        if self.fail_navigate {
            return Err(NavigationError(format!("navigation to {} blocked", request.url)));
        }
        Ok(())
    }

    fn open_new(&self, url: &str, features: Option<&str>) -> Result<(), NavigationError> {
        self.opened
            .lock()
            .expect("navigator lock poisoned")
            .push((url.to_string(), features.map(str::to_string)));
        if self.fail_open {
            return Err(NavigationError(format!("opening {url} blocked")));
        }
        Ok(())
    }
}

/// Collects every notification published on a bus.
#[derive(Debug, Clone)]
pub struct BusRecorder {
    seen: Arc<Mutex<Vec<Notification>>>,
    id: SubscriberId,
}

impl BusRecorder {
    /// Subscribe to every instance on `bus`.
    pub fn attach(bus: &NotificationBus) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = bus.subscribe_all(move |n: &Notification| {
            sink.lock().expect("recorder lock poisoned").push(n.clone());
        });
        Self { seen, id }
    }

    /// Subscription id, for unsubscribing.
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Everything recorded so far.
    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().expect("recorder lock poisoned").clone()
    }

    /// Recorded notifications matching `predicate`.
    pub fn filter<F>(&self, predicate: F) -> Vec<Notification>
    where
        F: Fn(&Notification) -> bool,
    {
        self.all().into_iter().filter(|n| predicate(n)).collect()
    }

    /// Recorded property changes as `(instance, property, new value)`.
    pub fn property_changes(&self) -> Vec<(String, String, serde_json::Value)> {
        self.all()
            .into_iter()
            .filter_map(|n| match n {
                Notification::PropertyChange {
                    instance_id,
                    property,
                    new_value,
                    ..
                } => Some((instance_id, property, new_value)),
                _ => None,
            })
            .collect()
    }

    /// Forget what was recorded.
    pub fn clear(&self) {
        self.seen.lock().expect("recorder lock poisoned").clear();
    }
}
