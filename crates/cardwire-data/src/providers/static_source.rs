use crate::error::ProviderError;
use crate::provider::{DataProvider, ProviderKind};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type Generator = Arc<dyn Fn() -> Value + Send + Sync>;

#[derive(Clone)]
enum Payload {
    Literal(Value),
    Generated(Generator),
}

/// Provider that answers with a fixed or generated payload.
#[derive(Clone)]
pub struct StaticProvider {
    payload: Payload,
    delay: Option<Duration>,
}

impl fmt::Debug for StaticProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("StaticProvider");
        match &self.payload {
            Payload::Literal(value) => s.field("data", value),
            Payload::Generated(_) => s.field("data", &"<generator>"),
        };
        s.field("delay", &self.delay).finish()
    }
}

impl StaticProvider {
    /// Answer with `data`.
    #[must_use]
    pub const fn new(data: Value) -> Self {
        Self {
            payload: Payload::Literal(data),
            delay: None,
        }
    }

    /// Answer with whatever `generator` returns at fetch time.
    pub fn from_fn<F>(generator: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            payload: Payload::Generated(Arc::new(generator)),
            delay: None,
        }
    }

    /// Wait before answering.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl DataProvider for StaticProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Static
    }

    async fn fetch(&self) -> Result<Value, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(match &self.payload {
            Payload::Literal(value) => value.clone(),
            Payload::Generated(generator) => generator(),
        })
    }
}
