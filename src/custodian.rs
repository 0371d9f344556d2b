//! Remote key custodian holding this node's BLS key share.
//!
//! The private share never leaves the custodian; it signs a 32-byte hash on request.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{AgentConfig, CustodianAccount};
use crate::error::{Result, SigningError};
use crate::protocol::{CustodianSignParams, METHOD_CUSTODIAN_SIGN};
use crate::rpc::{HttpRpcClient, RpcTransport};
use crate::types::SignResult;

#[async_trait]
pub trait Custodian: Send + Sync {
    async fn sign_message_hash(&self, params: &CustodianSignParams) -> Result<SignResult>;

    /// Name of the key share this node signs with.
    fn key_share_name(&self) -> Result<String>;
}

/// Custodian reached over JSON-RPC, optionally with a TLS client identity.
#[derive(Debug, Clone)]
pub struct RpcCustodian {
    primary: CustodianAccount,
    fallback: CustodianAccount,
    timeout: Duration,
}

impl RpcCustodian {
    pub fn new(primary: CustodianAccount, fallback: CustodianAccount, timeout: Duration) -> Self {
        Self {
            primary,
            fallback,
            timeout,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.s_chain_account.clone(),
            config.main_net_account.clone(),
            config.rpc_timeout(),
        )
    }

    /// The s-chain account if it names a custodian, the main-net account otherwise.
    pub fn account(&self) -> Result<&CustodianAccount> {
        [&self.primary, &self.fallback]
            .into_iter()
            .find(|account| account.has_url())
            .ok_or_else(|| SigningError::Config("no key custodian URL configured".to_string()))
    }

    async fn client(&self, account: &CustodianAccount) -> Result<HttpRpcClient> {
        match (&account.tls_cert_path, &account.tls_key_path) {
            (Some(cert), Some(key)) => {
                let mut pem = tokio::fs::read(cert).await?;
                pem.push(b'\n');
                pem.extend(tokio::fs::read(key).await?);
                HttpRpcClient::with_identity(self.timeout, &pem)
            }
            _ => {
                tracing::warn!("key custodian will be called without TLS client certificate");
                HttpRpcClient::new(self.timeout)
            }
        }
    }
}

#[async_trait]
impl Custodian for RpcCustodian {
    async fn sign_message_hash(&self, params: &CustodianSignParams) -> Result<SignResult> {
        let account = self.account()?;
        let url = account.url.as_deref().unwrap_or_default();
        let client = self.client(account).await?;
        tracing::debug!(
            url,
            key = %params.key_share_name,
            hash = %params.message_hash,
            "calling key custodian"
        );
        let answer = client
            .call(url, METHOD_CUSTODIAN_SIGN, serde_json::to_value(params)?)
            .await?;
        parse_answer(answer)
    }

    fn key_share_name(&self) -> Result<String> {
        self.account()?
            .key_share_name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| SigningError::Config("no BLS key share name configured".to_string()))
    }
}

/// The custodian answers with the sign result itself or wrapped in `signResult`.
fn parse_answer(answer: Value) -> Result<SignResult> {
    let body = match answer.get("signResult") {
        Some(inner) => inner.clone(),
        None => answer,
    };
    let result: SignResult = serde_json::from_value(body)?;
    if let Some(message) = result.reported_error() {
        return Err(SigningError::Custodian(message.to_string()));
    }
    Ok(result)
}
