//! WebSocket streaming provider.

use super::reconnect::ReconnectConfig;
use crate::error::ProviderError;
use crate::provider::{DataProvider, ProviderKind, PushSink, Subscription};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Default heartbeat period.
pub(crate) const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Provider that forwards every inbound WebSocket message to subscribers.
///
/// Text frames are decoded as JSON when possible and forwarded as a string
/// otherwise. The connection is re-established per [`ReconnectConfig`].
#[derive(Debug, Clone)]
pub struct WebSocketProvider {
    url: String,
    topic: Option<String>,
    heartbeat: Option<(Duration, String)>,
    reconnect: ReconnectConfig,
    last: Arc<Mutex<Option<Value>>>,
}

impl WebSocketProvider {
    /// Stream from `url` (`ws://` or `wss://`).
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            topic: None,
            heartbeat: None,
            reconnect: ReconnectConfig::default(),
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Send a subscribe frame for `topic` after connecting.
    #[must_use]
    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = Some(topic.to_string());
        self
    }

    /// Send `message` every `period`.
    #[must_use]
    pub fn with_heartbeat(mut self, period: Duration, message: &str) -> Self {
        self.heartbeat = Some((period, message.to_string()));
        self
    }

    /// Set the reconnection policy.
    #[must_use]
    pub fn with_reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    /// Most recent message received by any subscription.
    #[must_use]
    pub fn last_message(&self) -> Option<Value> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stream URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// JSON when the frame parses, the raw text otherwise.
fn decode_frame(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

struct StreamTask {
    url: String,
    topic: Option<String>,
    heartbeat: Option<(Duration, String)>,
    reconnect: ReconnectConfig,
    last: Arc<Mutex<Option<Value>>>,
    sink: PushSink,
}

impl StreamTask {
    async fn run(self) {
        let mut attempt = 0u32;
        loop {
            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    tracing::debug!(url = %self.url, "websocket connected");
                    attempt = 0;
                    self.pump(stream).await;
                }
                Err(err) => {
                    tracing::warn!(url = %self.url, error = %err, "websocket connect failed");
                }
            }
            if !self.reconnect.should_reconnect(attempt) {
                tracing::warn!(url = %self.url, attempts = attempt, "websocket giving up");
                return;
            }
            tokio::time::sleep(self.reconnect.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    async fn pump<S>(&self, stream: S)
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
    {
        let (mut write, mut read) = stream.split();
        if let Some(topic) = &self.topic {
            let frame = json!({"type": "subscribe", "topic": topic}).to_string();
            if write.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }

        let mut heartbeat = self.heartbeat.as_ref().map(|(period, _)| {
            let mut interval = interval_at(Instant::now() + *period, *period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            tokio::select! {
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => self.deliver(decode_frame(&text)),
                    Some(Ok(Message::Binary(bytes))) => {
                        self.deliver(decode_frame(&String::from_utf8_lossy(&bytes)));
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(url = %self.url, error = %err, "websocket read failed");
                        return;
                    }
                },
                () = next_tick(&mut heartbeat) => {
                    if let Some((_, message)) = &self.heartbeat {
                        if write.send(Message::Text(message.clone())).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    fn deliver(&self, value: Value) {
        // the cache is a single slot, so a poisoned lock still holds a usable value
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.clone());
        (self.sink)(value);
    }
}

#[async_trait]
impl DataProvider for WebSocketProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WebSocket
    }

    async fn fetch(&self) -> Result<Value, ProviderError> {
        Err(ProviderError::Unsupported {
            kind: self.kind().as_str(),
            operation: "fetch",
        })
    }

    fn supports_fetch(&self) -> bool {
        false
    }

    fn supports_push(&self) -> bool {
        true
    }

    fn subscribe(&self, sink: PushSink) -> Result<Subscription, ProviderError> {
        self.validate_config()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ProviderError::NoRuntime)?;
        let task = StreamTask {
            url: self.url.clone(),
            topic: self.topic.clone(),
            heartbeat: self.heartbeat.clone(),
            reconnect: self.reconnect.clone(),
            last: Arc::clone(&self.last),
            sink,
        };
        Ok(Subscription::from_task(runtime.spawn(task.run())))
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ProviderError::InvalidConfig(format!(
                "websocket url must start with ws:// or wss://, got '{}'",
                self.url
            )));
        }
        if let Some((period, _)) = &self.heartbeat {
            if period.is_zero() {
                return Err(ProviderError::InvalidConfig(
                    "heartbeat period must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn test_decode_frame() {
        assert_eq!(decode_frame(r#"{"t": 1}"#), json!({"t": 1}));
        assert_eq!(decode_frame("hello"), json!("hello"));
        assert_eq!(decode_frame("42"), json!(42));
    }

    #[test]
    fn test_validate_url() {
        assert!(WebSocketProvider::new("wss://example.com/ws").validate_config().is_ok());
        assert!(matches!(
            WebSocketProvider::new("http://example.com").validate_config(),
            Err(ProviderError::InvalidConfig(_))
        ));
        assert!(WebSocketProvider::new("ws://x")
            .with_heartbeat(Duration::ZERO, "ping")
            .validate_config()
            .is_err());
    }

    #[tokio::test]
    async fn test_fetch_unsupported() {
        let provider = WebSocketProvider::new("ws://localhost:1");
        assert!(matches!(
            provider.fetch().await,
            Err(ProviderError::Unsupported { operation: "fetch", .. })
        ));
        assert!(provider.supports_push());
        assert!(!provider.supports_fetch());
    }

    #[test]
    fn test_last_message_survives_poisoned_cache() {
        let provider = WebSocketProvider::new("ws://localhost:1");
        *provider.last.lock().expect("fresh lock") = Some(json!(3));
        let cache = Arc::clone(&provider.last);
        let poisoner = std::thread::spawn(move || {
            let _guard = cache.lock();
            panic!("poison the cache");
        });
        assert!(poisoner.join().is_err());
        assert_eq!(provider.last_message(), Some(json!(3)));
    }

    #[test]
    fn test_subscribe_needs_runtime() {
        let provider = WebSocketProvider::new("ws://localhost:1");
        assert!(matches!(
            provider.subscribe(Arc::new(|_| {})),
            Err(ProviderError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_forwards_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(socket).await.expect("handshake");
            let subscribe = ws.next().await.expect("frame").expect("frame ok");
            ws.send(Message::Text(r#"{"temp": 21.5}"#.to_string())).await.expect("send");
            ws.send(Message::Text("offline".to_string())).await.expect("send");
            subscribe
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let provider = WebSocketProvider::new(&format!("ws://{addr}"))
            .with_topic("sensors")
            .with_reconnect(ReconnectConfig::disabled());
        let sub = provider
            .subscribe(Arc::new(move |value| {
                let _ = tx.send(value);
            }))
            .expect("subscribe");

        assert_eq!(rx.recv().await, Some(json!({"temp": 21.5})));
        assert_eq!(rx.recv().await, Some(json!("offline")));
        assert_eq!(provider.last_message(), Some(json!("offline")));

        let subscribe = server.await.expect("server");
        let frame: Value =
            serde_json::from_str(&subscribe.into_text().expect("text")).expect("json frame");
        assert_eq!(frame, json!({"type": "subscribe", "topic": "sensors"}));
        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn test_refresh_of_socket_binding_reuses_last_message() {
        use crate::{DataPipeline, MappingRule, ReactiveBinding, TriggerConfig};
        use cardwire_core::{ComponentDataRequirement, DataFieldRequirement, ValueType};
        use std::sync::atomic::{AtomicUsize, Ordering};

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(socket).await.expect("handshake");
            ws.send(Message::Text(r#"{"temp": 19}"#.to_string())).await.expect("send");
            // hold the connection open until the client leaves
            while let Some(Ok(_)) = ws.next().await {}
        });

        let requirement = Arc::new(
            ComponentDataRequirement::new("Thermometer")
                .with_field("temp", DataFieldRequirement::value(ValueType::Number, "temperature")),
        );
        let provider = WebSocketProvider::new(&format!("ws://{addr}"))
            .with_reconnect(ReconnectConfig::disabled());
        let pipeline = DataPipeline::new("thermo:data", Arc::new(provider), requirement)
            .with_rule(MappingRule::new("temp", "temp"));
        let binding = ReactiveBinding::new("thermo:data", "thermo", pipeline)
            .with_trigger(TriggerConfig::Push);
        let (tx, mut rx) = mpsc::unbounded_channel();
        binding.on_update(move |fields| {
            let _ = tx.send(fields.clone());
        });
        let errors = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&errors);
        binding.on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });
        binding.start().expect("starts");

        let wait = Duration::from_secs(5);
        let first = tokio::time::timeout(wait, rx.recv()).await.expect("pushed");
        assert_eq!(first.and_then(|f| f.get("temp").cloned()), Some(json!(19)));

        binding.trigger().expect("running");
        let second = tokio::time::timeout(wait, rx.recv()).await.expect("refreshed");
        assert_eq!(second.and_then(|f| f.get("temp").cloned()), Some(json!(19)));
        assert_eq!(errors.load(Ordering::SeqCst), 0);

        binding.stop();
        server.abort();
    }
}
