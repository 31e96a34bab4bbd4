use async_trait::async_trait;
use serde_json::Value;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::debug;

use crate::error::{InvMeshError, Result};

/// Header that tags broker traffic
pub const TYPE_HEADER: &str = "type";
/// Value of [`TYPE_HEADER`] on worker polls
pub const WORKER_TYPE: &str = "worker";

/// A single POST to the broker
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerCall {
    pub url: String,
    /// JSON body, `None` sends an empty body
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl BrokerCall {
    /// POST to `url` with an empty body, no headers and no timeout
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP seam between the peers and the broker.
///
/// Implementations classify failures: a connection reset mid-request must
/// surface as [`InvMeshError::PeerReset`], a non-2xx answer as
/// [`InvMeshError::Status`], an elapsed per-call timeout as
/// [`InvMeshError::Timeout`].
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Send the call and return the peer's JSON body, `None` when it was empty
    async fn post(&self, call: BrokerCall) -> Result<Option<Value>>;
}

/// reqwest-backed transport. The inner client keeps a keep-alive pool per
/// broker host, so consecutive polls reuse the same connection.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Transport with a fresh reqwest client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(None)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| InvMeshError::config_error(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BrokerTransport for HttpTransport {
    async fn post(&self, call: BrokerCall) -> Result<Option<Value>> {
        debug!("POST {}", call.url);

        let mut request = self.client.post(&call.url);
        for (name, value) in &call.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = call.timeout {
            request = request.timeout(timeout);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify(e, call.timeout))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify(e, call.timeout))?;

        if !status.is_success() {
            return Err(InvMeshError::Status {
                status: status.as_u16(),
                body: (!bytes.is_empty()).then(|| String::from_utf8_lossy(&bytes).into_owned()),
            });
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

fn classify(err: reqwest::Error, timeout: Option<Duration>) -> InvMeshError {
    if err.is_timeout() {
        return InvMeshError::Timeout {
            timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
        };
    }
    if is_peer_reset(&err) {
        return InvMeshError::PeerReset(error_chain(&err));
    }
    InvMeshError::Transport(error_chain(&err))
}

/// Whether an error chain shows the peer dropping the connection mid-request
pub fn is_peer_reset(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        // hyper reports a socket closed before the response as an incomplete message
        if err
            .to_string()
            .contains("connection closed before message completed")
        {
            return true;
        }
        current = err.source();
    }
    false
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
