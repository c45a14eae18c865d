//! Minimal Ethereum JSON-RPC client over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use crate::error::{ChainError, Error, Result};

/// Error object returned inside a JSON-RPC response.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcErrorBody {
    /// Message and data concatenated, lowercased, for classification.
    #[must_use]
    pub fn normalized(&self) -> String {
        let mut text = self.message.to_ascii_lowercase();
        if let Some(data) = &self.data {
            text.push(' ');
            text.push_str(&data.to_string().to_ascii_lowercase());
        }
        text
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

/// JSON-RPC client with a per-call timeout and optional bearer token.
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    api_token: Option<String>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Create a client for `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, api_token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            url: url.into(),
            api_token,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Perform a call and return either the result or the RPC error object.
    ///
    /// Transport failures and timeouts are returned as `Err`.
    pub async fn call_raw(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<std::result::Result<Value, RpcErrorBody>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(method, id, "JSON-RPC request");

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let exchange = async move {
            let response = request.send().await?;
            let response = response.error_for_status()?;
            response.json::<RpcResponse>().await
        };
        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::timeout(method, self.timeout_ms()))?
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(method, self.timeout_ms())
                } else if e.is_decode() {
                    Error::Parse(format!("{method}: {e}"))
                } else {
                    Error::Chain(ChainError::Connectivity(format!("{method}: {e}")))
                }
            })?;

        match (response.result, response.error) {
            (_, Some(error)) => Ok(Err(error)),
            (Some(result), None) => Ok(Ok(result)),
            (None, None) => Ok(Ok(Value::Null)),
        }
    }

    /// Perform a call and deserialize its result.
    ///
    /// RPC error objects become [`ChainError::Connectivity`].
    pub async fn call<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<T> {
        match self.call_raw(method, params).await? {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| Error::Parse(format!("{method}: {e}"))),
            Err(error) => Err(Error::Chain(ChainError::Connectivity(format!(
                "{method}: {} ({})",
                error.message, error.code
            )))),
        }
    }
}

/// Parse a `0x`-prefixed hex quantity.
///
/// # Errors
///
/// Returns [`Error::Parse`] for malformed input.
pub fn parse_quantity(raw: &str) -> Result<u64> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| Error::Parse(format!("quantity without 0x prefix: {raw}")))?;
    if digits.is_empty() {
        return Err(Error::Parse("empty quantity".to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|e| Error::Parse(format!("quantity {raw}: {e}")))
}

/// Format a block number or other quantity as hex.
#[must_use]
pub fn quantity(value: u64) -> String {
    format!("{value:#x}")
}
