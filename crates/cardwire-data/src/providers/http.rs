use crate::error::ProviderError;
use crate::provider::{DataProvider, ProviderKind};
use async_trait::async_trait;
use cardwire_core::value::to_text;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default request timeout.
pub(crate) const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    const fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Provider that issues one HTTP request per fetch.
///
/// Query parameters are appended for GET only; the body is sent for every
/// other method. JSON responses are decoded, anything else is returned as a
/// string. Non-2xx responses fail with [`ProviderError::Status`].
#[derive(Debug, Clone)]
pub struct HttpProvider {
    url: String,
    method: HttpMethod,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, Value>,
    body: Option<Value>,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    client: reqwest::Client,
}

impl HttpProvider {
    /// GET `url`.
    pub fn new(url: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
            retries: 0,
            retry_delay: Duration::from_secs(1),
            client,
        })
    }

    /// Set the method.
    #[must_use]
    pub const fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Add a query parameter (GET only).
    #[must_use]
    pub fn with_param(mut self, name: &str, value: Value) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    /// Set the request body (ignored for GET).
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retry failed requests `retries` times, waiting `delay` in between.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    /// Request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request method.
    #[must_use]
    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    async fn request_once(&self) -> Result<Value, ProviderError> {
        let mut request = self
            .client
            .request(self.method.to_reqwest(), &self.url)
            .timeout(self.timeout);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if self.method == HttpMethod::Get {
            if !self.params.is_empty() {
                let pairs: Vec<(&str, String)> = self
                    .params
                    .iter()
                    .map(|(k, v)| (k.as_str(), to_text(v)))
                    .collect();
                request = request.query(&pairs);
            }
        } else if let Some(body) = &self.body {
            request = match body {
                Value::String(text) => request
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(text.clone()),
                other => request.json(other),
            };
        }

        let response = request.send().await.map_err(|e| self.transport_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        if is_json {
            response
                .json::<Value>()
                .await
                .map_err(|e| ProviderError::Decode(e.to_string()))
        } else {
            response
                .text()
                .await
                .map(Value::String)
                .map_err(|e| self.transport_error(&e))
        }
    }

    fn transport_error(&self, err: &reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl DataProvider for HttpProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Http
    }

    async fn fetch(&self) -> Result<Value, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.request_once().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.retries => {
                    tracing::debug!(url = %self.url, attempt, error = %err, "retrying request");
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| ProviderError::InvalidConfig(format!("invalid url '{}': {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProviderError::InvalidConfig(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if self.timeout.is_zero() {
            return Err(ProviderError::InvalidConfig("timeout must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve `responses` in order, one per connection; yields the raw requests.
    async fn serve(responses: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.expect("accept");
                requests.push(read_request(&mut socket).await);
                socket.write_all(response.as_bytes()).await.expect("write");
                socket.shutdown().await.ok();
            }
            requests
        });
        (format!("http://{addr}"), handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.expect("read");
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&raw).to_string()
    }

    fn reply(status: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn test_get_json_with_params() {
        let (url, server) = serve(vec![reply("200 OK", "application/json", r#"{"temp":21}"#)]).await;
        let provider = HttpProvider::new(&format!("{url}/api/data"))
            .expect("client")
            .with_param("device", json!("d-1"))
            .with_param("limit", json!(5))
            .with_header("x-token", "abc")
            .with_body(json!({"ignored": true}));

        assert_eq!(provider.fetch().await, Ok(json!({"temp": 21})));
        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("GET /api/data?device=d-1&limit=5 HTTP/1.1"));
        assert!(requests[0].contains("x-token: abc"));
        assert!(!requests[0].contains("ignored"));
    }

    #[tokio::test]
    async fn test_post_body_and_text_response() {
        let (url, server) = serve(vec![reply("200 OK", "text/plain", "ok")]).await;
        let provider = HttpProvider::new(&url)
            .expect("client")
            .with_method(HttpMethod::Post)
            .with_param("skipped", json!(1))
            .with_body(json!({"query": "temp"}));

        assert_eq!(provider.fetch().await, Ok(json!("ok")));
        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("POST / HTTP/1.1"));
        assert!(requests[0].ends_with(r#"{"query":"temp"}"#));
    }

    #[tokio::test]
    async fn test_non_2xx_is_error() {
        let (url, _server) = serve(vec![reply("503 Service Unavailable", "text/plain", "")]).await;
        let provider = HttpProvider::new(&url).expect("client");
        assert_eq!(
            provider.fetch().await,
            Err(ProviderError::Status {
                status: 503,
                reason: "Service Unavailable".into()
            })
        );
    }

    #[tokio::test]
    async fn test_retries() {
        let (url, server) = serve(vec![
            reply("500 Internal Server Error", "text/plain", ""),
            reply("200 OK", "application/json", "[1,2]"),
        ])
        .await;
        let provider = HttpProvider::new(&url)
            .expect("client")
            .with_retries(1, Duration::from_millis(1));
        assert_eq!(provider.fetch().await, Ok(json!([1, 2])));
        assert_eq!(server.await.expect("server").len(), 2);
    }

    #[test]
    fn test_validate_config() {
        let ok = HttpProvider::new("https://example.com/api").expect("client");
        assert!(ok.validate_config().is_ok());
        assert_eq!(ok.method(), HttpMethod::Get);

        let bad = HttpProvider::new("not a url").expect("client");
        assert!(matches!(bad.validate_config(), Err(ProviderError::InvalidConfig(_))));

        let ws = HttpProvider::new("ws://example.com").expect("client");
        assert!(matches!(ws.validate_config(), Err(ProviderError::InvalidConfig(_))));
    }
}
