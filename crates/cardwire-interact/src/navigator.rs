//! Navigation seam.
//!
//! The host supplies a [`Navigator`]; the interaction manager never talks to
//! a browser or window system directly.

use crate::config::JumpTarget;
use thiserror::Error;

/// Navigation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("navigation failed: {0}")]
pub struct NavigationError(pub String);

/// A navigation the host should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    /// URL or route.
    pub url: String,
    /// Where to open it.
    pub target: JumpTarget,
    /// Whether `url` is an absolute external URL.
    pub external: bool,
    /// Window features for new contexts.
    pub features: Option<String>,
}

/// Performs navigation on behalf of the interaction manager.
pub trait Navigator: Send + Sync {
    /// Navigate according to `request`.
    fn navigate(&self, request: &NavigationRequest) -> Result<(), NavigationError>;

    /// Open `url` in a new context.
    fn open_new(&self, url: &str, features: Option<&str>) -> Result<(), NavigationError>;
}

/// Navigator for headless hosts: logs every request and succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, request: &NavigationRequest) -> Result<(), NavigationError> {
        tracing::info!(
            url = %request.url,
            target = request.target.as_str(),
            external = request.external,
            "navigate"
        );
        Ok(())
    }

    fn open_new(&self, url: &str, features: Option<&str>) -> Result<(), NavigationError> {
        tracing::info!(%url, features = features.unwrap_or(""), "open new context");
        Ok(())
    }
}
