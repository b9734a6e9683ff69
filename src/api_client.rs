//! HTTP request execution for test case rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

const CONTENT_PREVIEW_CHARS: usize = 100;

/// A fully substituted request, ready to send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiRequest {
    pub method: String,
    pub url: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// What came back from the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub code: u16,
    pub body: Value,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub elapsed_ms: f64,
}

impl ApiResponse {
    /// The value conditions and actions see as `result`.
    ///
    /// Header names in `result.headers` are lower-case whatever casing
    /// the server sent, so conditions should test
    /// `contains(result.headers, 'content-type')`.
    pub fn to_value(&self) -> Value {
        json!({
            "code": self.code,
            "body": self.body,
            "headers": string_map(&self.headers),
            "cookies": string_map(&self.cookies),
            "elapsed_time_ms": self.elapsed_ms,
        })
    }
}

fn string_map(map: &HashMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<Map<_, _>>(),
    )
}

/// Why a request produced no response.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Transport(String),
    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl ExecuteError {
    /// Timeouts and transport errors mark a case `Failed`; anything
    /// else marks it `Error`.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

impl From<reqwest::Error> for ExecuteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Transport(format!("{e:#}"))
        }
    }
}

/// Sends requests on behalf of the runner.
///
/// Implementations report response header names in lower case.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ExecuteError>;
}

#[async_trait]
impl<T: RequestExecutor + ?Sized> RequestExecutor for Arc<T> {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ExecuteError> {
        (**self).execute(request).await
    }
}

/// `RequestExecutor` backed by a reqwest client.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    /// Build an executor whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn build_url(request: &ApiRequest) -> Result<Url, ExecuteError> {
        let mut url = Url::parse(request.url.trim())
            .map_err(|e| ExecuteError::Transport(format!("invalid URL '{}': {e}", request.url)))?;
        if !request.query.is_empty() {
            let mut params: Vec<_> = request.query.iter().collect();
            params.sort();
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ExecuteError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ExecuteError::Transport(format!("invalid method '{}': {e}", request.method)))?;
        let url = Self::build_url(request)?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!("Sending request");
        let started = Instant::now();
        let response = builder.send().await?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let code = response.status().as_u16();
        debug!("Received response with status: {}", code);

        let headers = header_map(response.headers());
        let cookies = response
            .cookies()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect();
        let content_type = headers
            .get(CONTENT_TYPE.as_str())
            .cloned()
            .unwrap_or_default();
        let text = response.text().await?;

        Ok(ApiResponse {
            code,
            body: decode_body(&content_type, &text),
            headers,
            cookies,
            elapsed_ms,
        })
    }
}

/// Lower-case header names; repeated headers are joined with `, `.
fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

/// Turn a response body into the `result.body` value according to its
/// content type.
pub fn decode_body(content_type: &str, text: &str) -> Value {
    let content_type_lower = content_type.to_ascii_lowercase();
    if content_type_lower.contains("application/json") || content_type_lower.contains("+json") {
        match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => json!({
                "decoding_error": format!("Failed to decode JSON: {e}"),
                "raw_response_text": text,
            }),
        }
    } else if content_type_lower.starts_with("text/")
        || content_type_lower.contains("html")
        || content_type_lower.contains("xml")
    {
        json!({ "text": text })
    } else {
        let mut preview: String = text.chars().take(CONTENT_PREVIEW_CHARS).collect();
        if text.chars().count() > CONTENT_PREVIEW_CHARS {
            preview.push_str("...");
        }
        json!({
            "content_type": content_type,
            "content_preview": preview,
        })
    }
}
