//! Built-in data providers.

mod http;
mod reconnect;
mod script;
mod static_source;
mod telemetry;
mod websocket;

pub use http::{HttpMethod, HttpProvider};
pub use reconnect::ReconnectConfig;
pub use script::ScriptProvider;
pub use static_source::StaticProvider;
pub use telemetry::{
    Aggregation, ReqwestTransport, TelemetryProvider, TelemetryQuery, TelemetryRequest,
    TelemetryTransport, TimeRange,
};
pub use websocket::WebSocketProvider;
pub(crate) use websocket::DEFAULT_HEARTBEAT;
