use crate::error::{
    FlipError,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use serde_json::Value;
use std::{
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
    time::Duration,
};
use thiserror::Error;

/// JSON-RPC error code the node uses when preflight simulation of a
/// transaction fails.
pub const PREFLIGHT_FAILURE_CODE: i64 = -32002;

#[derive(Clone, Debug, Error)]
pub enum RpcError {
    /// Network, timeout or HTTP status failure; nothing was decoded.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

/// One JSON-RPC round trip against a named endpoint.
pub trait RpcTransport {
    fn call(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, RpcError>> + Send;
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                FlipError::Config(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            http,
            next_id: AtomicU64::new(1),
        })
    }
}

impl RpcTransport for HttpTransport {
    async fn call(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        tracing::debug!(%endpoint, %method, id, "rpc request");
        let res = self
            .http
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| RpcError::Transport(format!("failed to read body: {e}")))?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(RpcError::Transport(format!(
                "{endpoint} responded with {status} to {method}: {body}"
            )));
        }
        let response: RpcResponse = serde_json::from_slice(&bytes)
            .map_err(|e| RpcError::Malformed(format!("{method}: {e}")))?;
        if let Some(err) = response.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value, what: &'static str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| FlipError::decode(what, e))
}
