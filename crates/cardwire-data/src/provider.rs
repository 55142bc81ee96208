//! The data provider contract.
//!
//! Every source kind implements [`DataProvider`]: a one-shot [`fetch`] and,
//! for push-capable kinds, [`subscribe`] which forwards each message to a
//! [`PushSink`] until the returned [`Subscription`] is cancelled or dropped.
//!
//! [`fetch`]: DataProvider::fetch
//! [`subscribe`]: DataProvider::subscribe

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Data source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Literal payload.
    Static,
    /// Sandboxed expression.
    Script,
    /// HTTP request.
    Http,
    /// Device telemetry API.
    Telemetry,
    /// WebSocket stream.
    WebSocket,
}

impl ProviderKind {
    /// Kind name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Script => "script",
            Self::Http => "http",
            Self::Telemetry => "telemetry",
            Self::WebSocket => "websocket",
        }
    }

    /// Whether the kind talks to a remote request/response API.
    #[must_use]
    pub const fn is_http(self) -> bool {
        matches!(self, Self::Http | Self::Telemetry)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives pushed payloads.
pub type PushSink = Arc<dyn Fn(Value) + Send + Sync>;

type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle for a push subscription.
///
/// Cancelling is idempotent, and dropping the handle cancels it. A poisoned
/// slot is still usable: it only ever holds the pending cancel function.
pub struct Subscription {
    cancel: Mutex<Option<CancelFn>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    /// Subscription cancelled by running `cancel`.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Subscription that owns a background task.
    #[must_use]
    pub fn from_task(handle: JoinHandle<()>) -> Self {
        Self::new(move || handle.abort())
    }

    /// Stop receiving. Safe to call more than once.
    pub fn unsubscribe(&self) {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Whether the subscription is still live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// A source of raw data for a pipeline.
#[async_trait]
pub trait DataProvider: Send + Sync + fmt::Debug {
    /// Provider kind.
    fn kind(&self) -> ProviderKind;

    /// Fetch the current payload once.
    async fn fetch(&self) -> Result<Value, ProviderError>;

    /// Whether [`fetch`](Self::fetch) can produce a payload. Push-only
    /// providers return `false`.
    fn supports_fetch(&self) -> bool {
        true
    }

    /// Whether [`subscribe`](Self::subscribe) is supported.
    fn supports_push(&self) -> bool {
        false
    }

    /// Forward every pushed payload to `sink`.
    fn subscribe(&self, _sink: PushSink) -> Result<Subscription, ProviderError> {
        Err(ProviderError::Unsupported {
            kind: self.kind().as_str(),
            operation: "subscribe",
        })
    }

    /// Check the configuration without performing I/O.
    fn validate_config(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
