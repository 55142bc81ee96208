//! Provider doubles.

use async_trait::async_trait;
use cardwire_data::{DataProvider, ProviderError, ProviderKind, PushSink, Subscription};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers with a scripted sequence of payloads and counts fetches.
///
/// Once the sequence is exhausted the last payload repeats.
#[derive(Debug)]
pub struct CountingProvider {
    kind: ProviderKind,
    payloads: Vec<Value>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl CountingProvider {
    /// Always answer with `payload`.
    pub fn new(payload: Value) -> Self {
        Self::sequence(vec![payload])
    }

    /// Answer with `payloads` in order.
    pub fn sequence(payloads: Vec<Value>) -> Self {
        Self {
            kind: ProviderKind::Static,
            payloads,
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Report a different kind (e.g. `Http` to take part in fallback
    /// refreshes).
    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Completed and in-flight fetches.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProvider for CountingProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn fetch(&self) -> Result<Value, ProviderError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .payloads
            .get(n)
            .or_else(|| self.payloads.last())
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// Always fails with the given error.
#[derive(Debug)]
pub struct FailingProvider {
    error: ProviderError,
    fetches: AtomicUsize,
}

impl FailingProvider {
    /// Fail every fetch with `error`.
    pub fn new(error: ProviderError) -> Self {
        Self {
            error,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Fail with a network error.
    pub fn network(message: &str) -> Self {
        Self::new(ProviderError::Network(message.to_string()))
    }

    /// Attempted fetches.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProvider for FailingProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Http
    }

    async fn fetch(&self) -> Result<Value, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Push provider driven by the test: [`push`](Self::push) delivers to every
/// live subscriber.
#[derive(Clone, Default)]
pub struct ManualPushProvider {
    inner: Arc<PushInner>,
}

#[derive(Default)]
struct PushInner {
    next_id: AtomicU64,
    sinks: Mutex<BTreeMap<u64, PushSink>>,
    current: Mutex<Option<Value>>,
}

impl fmt::Debug for ManualPushProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualPushProvider")
            .field("subscribers", &self.subscribers())
            .finish()
    }
}

impl ManualPushProvider {
    /// Provider with no subscribers and nothing to fetch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every subscriber. It also becomes the fetch
    /// answer. Returns how many subscribers received it.
    pub fn push(&self, payload: Value) -> usize {
        *self.inner.current.lock().expect("push provider lock poisoned") = Some(payload.clone());
        let sinks: Vec<PushSink> = self
            .inner
            .sinks
            .lock()
            .expect("push provider lock poisoned")
            .values()
            .cloned()
            .collect();
        for sink in &sinks {
            sink(payload.clone());
        }
        sinks.len()
    }

    /// Live subscriptions.
    pub fn subscribers(&self) -> usize {
        self.inner
            .sinks
            .lock()
            .expect("push provider lock poisoned")
            .len()
    }
}

#[async_trait]
impl DataProvider for ManualPushProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WebSocket
    }

    async fn fetch(&self) -> Result<Value, ProviderError> {
        self.inner
            .current
            .lock()
            .expect("push provider lock poisoned")
            .clone()
            .ok_or_else(|| ProviderError::Network("no message received yet".to_string()))
    }

    fn supports_push(&self) -> bool {
        true
    }

    fn subscribe(&self, sink: PushSink) -> Result<Subscription, ProviderError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .sinks
            .lock()
            .expect("push provider lock poisoned")
            .insert(id, sink);
        let inner = Arc::clone(&self.inner);
        Ok(Subscription::new(move || {
            inner
                .sinks
                .lock()
                .expect("push provider lock poisoned")
                .remove(&id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_counting_sequence() {
        let provider = CountingProvider::sequence(vec![json!(1), json!(2)]);
        assert_eq!(provider.fetch().await, Ok(json!(1)));
        assert_eq!(provider.fetch().await, Ok(json!(2)));
        assert_eq!(provider.fetch().await, Ok(json!(2)));
        assert_eq!(provider.fetches(), 3);
    }

    #[tokio::test]
    async fn test_failing() {
        let provider = FailingProvider::network("down");
        assert_eq!(
            provider.fetch().await,
            Err(ProviderError::Network("down".into()))
        );
        assert_eq!(provider.fetches(), 1);
    }

    #[test]
    fn test_push_and_unsubscribe() {
        let provider = ManualPushProvider::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let subscription = provider
            .subscribe(Arc::new(move |v| s.lock().expect("test lock").push(v)))
            .expect("push capable");

        assert_eq!(provider.push(json!(1)), 1);
        subscription.unsubscribe();
        assert_eq!(provider.push(json!(2)), 0);
        assert_eq!(*seen.lock().expect("test lock"), vec![json!(1)]);
        assert_eq!(provider.subscribers(), 0);
    }
}
