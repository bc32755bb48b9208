//! Transport boundary: turns a request into a stream of response chunks.

use std::pin::Pin;

use futures::StreamExt as _;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::{ClientError, StreamError};

/// Response body as it arrives off the wire, in network order.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// HTTP method used to open a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A request that opens one event stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    pub method: Method,
    pub url: String,
    /// Query parameters appended to `url`.
    pub query: Vec<(String, String)>,
    /// JSON body for `Post` requests.
    pub body: Option<serde_json::Value>,
}

impl StreamRequest {
    /// Creates a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Creates a `POST` request with a JSON body.
    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    /// Adds a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

/// Opens event streams. Implemented over HTTP by [`HttpTransport`]; tests use
/// scripted in-memory transports.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Issues the request and returns the response body as a chunk stream.
    ///
    /// Failures before the body starts are returned directly; failures while
    /// reading surface as an `Err` item in the stream.
    async fn open(&self, request: StreamRequest) -> Result<ByteStream, StreamError>;
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// Creates a transport from explicit configuration.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a transport from the environment (see [`ClientConfig::from_env`]).
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Configuration this transport was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: StreamRequest) -> Result<ByteStream, StreamError> {
        debug!(url = %request.url, method = ?request.method, "opening event stream");
        let mut http_req = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        }
        .header(reqwest::header::ACCEPT, "text/event-stream");
        if !request.query.is_empty() {
            http_req = http_req.query(&request.query);
        }
        if let Some(body) = &request.body {
            http_req = http_req.json(body);
        }

        let endpoint = request.url;
        let response = http_req
            .send()
            .await
            .map_err(|e| StreamError::transport(&endpoint, format!("request failed: {e}"), None))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::transport(
                endpoint,
                format!("request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| {
                StreamError::transport(&endpoint, format!("streaming read failed: {e}"), None)
            })
        });
        Ok(Box::pin(stream))
    }
}
