//! Network transports used by the prober
//!
//! The identity check is a JSON-RPC `eth_chainId` call. [`RpcTransport`]
//! speaks it over HTTP(S) with reqwest and over WS(S) with tokio-tungstenite.

use crate::error::TransportError;
use crate::rpc::{parse_endpoint_url, TransportKind};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Outbound seam of the sentinel: "connect to URL, return its chain ID".
///
/// Implementations must honour `timeout` on a best-effort basis; the prober
/// enforces it independently anyway.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn chain_id(&self, url: &str, timeout: Duration) -> Result<u64, TransportError>;
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

fn chain_id_request() -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_chainId",
        "params": [],
    })
}

/// Decode an `eth_chainId` response body into a chain ID
pub(crate) fn decode_chain_id(body: &str) -> Result<u64, TransportError> {
    let response: JsonRpcResponse = serde_json::from_str(body)
        .map_err(|e| TransportError::Malformed(format!("not a JSON-RPC response: {}", e)))?;

    if let Some(err) = response.error {
        return Err(TransportError::Rpc {
            code: err.code,
            message: err.message,
        });
    }

    match response.result {
        Some(serde_json::Value::String(s)) => {
            let hex = s
                .strip_prefix("0x")
                .or_else(|| s.strip_prefix("0X"))
                .ok_or_else(|| TransportError::Malformed(format!("chain ID not hex: {}", s)))?;
            u64::from_str_radix(hex, 16)
                .map_err(|e| TransportError::Malformed(format!("bad chain ID {}: {}", s, e)))
        }
        // Some nodes answer with a bare number
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| TransportError::Malformed(format!("bad chain ID {}", n))),
        Some(other) => Err(TransportError::Malformed(format!(
            "unexpected chain ID type: {}",
            other
        ))),
        None => Err(TransportError::Malformed("missing result".to_string())),
    }
}

/// Production transport for http(s) and ws(s) endpoints
#[derive(Debug, Clone)]
pub struct RpcTransport {
    http: reqwest::Client,
}

impl RpcTransport {
    pub fn new() -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("rpc-sentinel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    async fn http_chain_id(&self, url: &str, timeout: Duration) -> Result<u64, TransportError> {
        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .json(&chain_id_request())
            .send()
            .await
            .map_err(|e| match TransportError::from(e) {
                TransportError::Timeout(_) => TransportError::Timeout(timeout.as_millis() as u64),
                other => other,
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(TransportError::ConnectionRefused(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(TransportError::Malformed(format!("HTTP {}", status)));
        }

        let body = response.text().await.map_err(TransportError::from)?;
        decode_chain_id(&body)
    }

    async fn ws_chain_id(&self, url: &str, timeout: Duration) -> Result<u64, TransportError> {
        tokio::time::timeout(timeout, ws_exchange(url))
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))?
    }
}

async fn ws_exchange(url: &str) -> Result<u64, TransportError> {
    let (mut stream, _) = tokio_tungstenite::connect_async(url).await?;
    stream
        .send(Message::Text(chain_id_request().to_string()))
        .await?;

    while let Some(message) = stream.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8(bytes)
                .map_err(|e| TransportError::Malformed(format!("non UTF-8 frame: {}", e)))?,
            Message::Close(_) => break,
            _ => continue,
        };
        let _ = stream.close(None).await;
        return decode_chain_id(&text);
    }

    Err(TransportError::ConnectionRefused(
        "socket closed before reply".to_string(),
    ))
}

#[async_trait]
impl Transport for RpcTransport {
    async fn chain_id(&self, url: &str, timeout: Duration) -> Result<u64, TransportError> {
        let (_, kind) =
            parse_endpoint_url(url).map_err(|e| TransportError::Other(e.to_string()))?;

        match kind {
            TransportKind::Http => self.http_chain_id(url, timeout).await,
            TransportKind::WebSocket => self.ws_chain_id(url, timeout).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_decode_hex_chain_id() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":"0x539"}"#;
        assert_eq!(decode_chain_id(body).unwrap(), 1337);
    }

    #[test]
    fn test_decode_rpc_error() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#;
        assert!(matches!(
            decode_chain_id(body),
            Err(TransportError::Rpc { code: -32601, .. })
        ));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_chain_id("<html>rate limited</html>"),
            Err(TransportError::Malformed(_))
        ));
        assert!(matches!(
            decode_chain_id(r#"{"jsonrpc":"2.0","id":1,"result":"mainnet"}"#),
            Err(TransportError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_http_chain_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "eth_chainId"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": "0x1"
            })))
            .mount(&server)
            .await;

        let transport = RpcTransport::new().unwrap();
        let id = transport
            .chain_id(&server.uri(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn test_http_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let transport = RpcTransport::new().unwrap();
        let err = transport
            .chain_id(&server.uri(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(200)));
    }

    #[tokio::test]
    async fn test_http_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let transport = RpcTransport::new().unwrap();
        let err = transport
            .chain_id(&server.uri(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionRefused(_)));
    }
}
