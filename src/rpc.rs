//! JSON-RPC 2.0 over HTTP.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Identity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::committee::CommitteeNode;
use crate::error::{Result, SigningError};
use crate::gatherer::{RoundContext, ShareSource};
use crate::protocol::{Qa, SignReply};
use crate::types::SignResult;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Sends one call and returns its `result`. A JSON-RPC `error` is a transport failure.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct HttpRpcClient {
    client: Client,
}

impl HttpRpcClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Client presenting a TLS identity, `pem` holding certificate and private key.
    pub fn with_identity(timeout: Duration, pem: &[u8]) -> Result<Self> {
        let identity = Identity::from_pem(pem)
            .map_err(|err| SigningError::Config(format!("bad TLS client identity: {}", err)))?;
        let client = Client::builder()
            .timeout(timeout)
            .identity(identity)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value> {
        let id = rand::thread_rng().gen_range(1..=u32::MAX as u64);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        tracing::trace!(url, method, id, "JSON RPC call");

        let response = self.client.post(url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SigningError::Transport(format!(
                "{} answered HTTP {}: {}",
                url, status, body
            )));
        }

        let response: RpcResponse = response.json().await?;
        if let Some(error) = response.error {
            return Err(SigningError::Transport(format!(
                "{} returned error {}: {}",
                method, error.code, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| SigningError::Transport(format!("{} returned no result", method)))
    }
}

/// Requests shares from committee nodes over JSON-RPC.
pub struct NodeShareSource<T> {
    transport: T,
}

impl<T: RpcTransport> NodeShareSource<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl<T: RpcTransport> ShareSource for NodeShareSource<T> {
    async fn request_share(&self, node: &CommitteeNode, round: &RoundContext) -> Result<SignResult> {
        if node.url.is_empty() {
            return Err(SigningError::Transport(format!(
                "node #{} has no reachable endpoint",
                node.position
            )));
        }
        let qa = Qa {
            skaled_number: node.position,
            sequence_id: round.sequence_id.clone(),
            ts: timestamp(),
        };
        let params = round.request.params_for(qa)?;
        let result = self
            .transport
            .call(&node.url, round.request.method(), params)
            .await?;
        let reply: SignReply = serde_json::from_value(result).map_err(|err| {
            SigningError::MalformedResult(format!("no signResult in node answer: {}", err))
        })?;
        Ok(reply.sign_result)
    }
}

/// Milliseconds since the epoch, as a decimal string.
pub fn timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ShareRequest, SignU256Params};
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedTransport {
        answer: Value,
        calls: Mutex<Vec<(String, String, Value)>>,
    }

    #[async_trait]
    impl RpcTransport for CannedTransport {
        async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), method.to_string(), params));
            Ok(self.answer.clone())
        }
    }

    fn node(url: &str) -> CommitteeNode {
        CommitteeNode {
            position: 2,
            node_id: 7,
            url: url.to_string(),
            signer_index: 2,
            public_key: None,
        }
    }

    fn round() -> RoundContext {
        RoundContext {
            sequence_id: "0xfeed".to_string(),
            loop_counter: 3,
            request: ShareRequest::U256(SignU256Params {
                value_to_sign: "0x12".to_string(),
                qa: None,
            }),
        }
    }

    #[tokio::test]
    async fn requests_share_with_qa() {
        let source = NodeShareSource::new(CannedTransport {
            answer: json!({"signResult": {"signatureShare": "1:2", "status": 0}}),
            calls: Mutex::new(vec![]),
        });
        let result = source.request_share(&node("http://n2:10003"), &round()).await.unwrap();
        assert!(result.is_ok());

        let calls = source.transport.calls.lock().unwrap();
        let (url, method, params) = &calls[0];
        assert_eq!(url, "http://n2:10003");
        assert_eq!(method, "skale_imaBSU256");
        assert_eq!(params["valueToSign"], json!("0x12"));
        assert_eq!(params["qa"]["skaledNumber"], json!(2));
        assert_eq!(params["qa"]["sequenceId"], json!("0xfeed"));
    }

    #[tokio::test]
    async fn answer_without_sign_result_is_malformed() {
        let source = NodeShareSource::new(CannedTransport {
            answer: json!({"status": 0}),
            calls: Mutex::new(vec![]),
        });
        let err = source.request_share(&node("http://n2:10003"), &round()).await.unwrap_err();
        assert!(matches!(err, SigningError::MalformedResult(_)));

        let err = source.request_share(&node(""), &round()).await.unwrap_err();
        assert!(matches!(err, SigningError::Transport(_)));
    }
}
