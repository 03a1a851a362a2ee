use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, JsonRpcError, ProviderError, RpcError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Per-request limit; a bundler that accepts the connection and stalls must not hang a caller.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimal JSON-RPC 2.0 over HTTP.
///
/// The general client (as an ethers `Provider`), the bundler, the paymaster and the gas-price
/// client all speak through this type, so they share one set of error semantics.
#[derive(Debug, Clone)]
pub struct RpcTransport {
    url: reqwest::Url,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rpc url is empty")]
    MissingUrl,

    #[error("invalid rpc url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("POST {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("RPC error: {0}")]
    Rpc(JsonRpcError),

    #[error("failed to decode JSON-RPC response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("missing result field")]
    MissingResult,
}

impl RpcError for TransportError {
    fn as_error_response(&self) -> Option<&JsonRpcError> {
        match self {
            TransportError::Rpc(err) => Some(err),
            _ => None,
        }
    }

    fn as_serde_error(&self) -> Option<&serde_json::Error> {
        match self {
            TransportError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for ProviderError {
    fn from(src: TransportError) -> Self {
        ProviderError::JsonRpcClientError(Box::new(src))
    }
}

impl RpcTransport {
    /// Fails immediately on an empty or unparsable URL; nothing is sent.
    pub fn new(url: &str) -> Result<Self, TransportError> {
        Self::with_request_timeout(url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(TransportError::MissingUrl);
        }
        let url = reqwest::Url::parse(trimmed).map_err(|source| TransportError::InvalidUrl {
            url: trimmed.to_string(),
            source,
        })?;
        Ok(Self {
            url,
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(TransportError::Client)?,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    /// Untyped call returning the raw `result` value.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(self.url.clone())
            .json(&req)
            .send()
            .await
            .map_err(|source| TransportError::Http {
                url: self.url.to_string(),
                source,
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|source| TransportError::Http {
            url: self.url.to_string(),
            source,
        })?;

        if !status.is_success() {
            return Err(TransportError::Status { status, body: text });
        }

        let mut body: Value = serde_json::from_str(&text)?;

        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            let err: JsonRpcError = serde_json::from_value(err.clone())?;
            return Err(TransportError::Rpc(err));
        }

        match body.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(TransportError::MissingResult),
        }
    }
}

#[async_trait]
impl JsonRpcClient for RpcTransport {
    type Error = TransportError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        // ethers passes `()` for parameterless methods; send `[]` rather than `null`
        let params = match serde_json::to_value(params)? {
            Value::Null => Value::Array(vec![]),
            v => v,
        };
        let result = self.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }
}
