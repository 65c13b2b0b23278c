//! Solana JSON-RPC adapter: `getLatestBlockhash`, `sendTransaction`,
//! `getSignatureStatuses`, `getAccountInfo`, `getBalance`.

use base64::Engine;
use serde_json::{json, Value};

use super::provider_pool::ProviderPool;
use super::{SolAccountInfo, SolSignatureStatus, SolanaRpc};
use crate::error::CoreError;

pub struct JsonRpcClient {
    http: reqwest::Client,
    pool: ProviderPool,
}

impl JsonRpcClient {
    pub fn new(pool: ProviderPool) -> Self {
        JsonRpcClient {
            http: reqwest::Client::new(),
            pool,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, CoreError> {
        let mut last_err = None;
        for base in self.pool.ordered_candidates() {
            let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
            match self.http.post(base.clone()).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let envelope: Value = match resp.json().await {
                        Ok(v) => v,
                        Err(e) => {
                            self.pool.record_failure(&base, e.to_string());
                            last_err = Some(e.to_string());
                            continue;
                        }
                    };
                    if let Some(err) = envelope.get("error") {
                        return Err(CoreError::Rpc(err.to_string()));
                    }
                    self.pool.record_success(&base);
                    return Ok(envelope.get("result").cloned().unwrap_or(Value::Null));
                }
                Ok(resp) if resp.status().as_u16() == 429 || resp.status().is_server_error() => {
                    self.pool.record_failure(&base, resp.status().to_string());
                    last_err = Some(resp.status().to_string());
                }
                Ok(resp) => return Err(CoreError::Rpc(format!("provider returned {}", resp.status()))),
                Err(e) => {
                    self.pool.record_failure(&base, e.to_string());
                    last_err = Some(e.to_string());
                }
            }
        }
        Err(CoreError::Rpc(last_err.unwrap_or_else(|| "no SOL providers configured".into())))
    }
}

#[async_trait::async_trait]
impl SolanaRpc for JsonRpcClient {
    #[tracing::instrument(skip(self), fields(chain = "SOL"), err)]
    async fn get_latest_blockhash(&self) -> Result<[u8; 32], CoreError> {
        let result = self
            .call("getLatestBlockhash", json!([{"commitment": "confirmed"}]))
            .await?;
        let blockhash_str = result
            .get("value")
            .and_then(|v| v.get("blockhash"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Rpc("missing blockhash in response".into()))?;
        let bytes = bs58::decode(blockhash_str)
            .into_vec()
            .map_err(|e| CoreError::Rpc(e.to_string()))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::Rpc("blockhash was not 32 bytes".into()))
    }

    #[tracing::instrument(skip(self, base64_tx), fields(chain = "SOL"), err)]
    async fn send_base64_tx(&self, base64_tx: &str) -> Result<String, CoreError> {
        let result = self
            .call(
                "sendTransaction",
                json!([base64_tx, {"encoding": "base64", "preflightCommitment": "confirmed"}]),
            )
            .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::TxBroadcastFailed("non-string signature in response".into()))
    }

    #[tracing::instrument(skip(self), fields(chain = "SOL"), err)]
    async fn get_signature_statuses(
        &self,
        signatures: &[String],
    ) -> Result<Vec<Option<SolSignatureStatus>>, CoreError> {
        let result = self
            .call(
                "getSignatureStatuses",
                json!([signatures, {"searchTransactionHistory": true}]),
            )
            .await?;
        let values = result
            .get("value")
            .and_then(|v| v.as_array())
            .ok_or_else(|| CoreError::Rpc("missing value array in response".into()))?;
        Ok(values
            .iter()
            .map(|entry| {
                if entry.is_null() {
                    return None;
                }
                Some(SolSignatureStatus {
                    err: entry.get("err").filter(|e| !e.is_null()).map(|e| e.to_string()),
                    confirmation_status: entry
                        .get("confirmationStatus")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    slot: entry.get("slot").and_then(|v| v.as_u64()).unwrap_or(0),
                })
            })
            .collect())
    }

    #[tracing::instrument(skip(self), fields(chain = "SOL"), err)]
    async fn get_account_info(&self, pubkey: &str) -> Result<SolAccountInfo, CoreError> {
        let result = self
            .call("getAccountInfo", json!([pubkey, {"encoding": "base64"}]))
            .await?;
        match result.get("value").filter(|v| !v.is_null()) {
            None => Ok(SolAccountInfo {
                lamports: 0,
                exists: false,
            }),
            Some(account) => Ok(SolAccountInfo {
                lamports: account.get("lamports").and_then(|v| v.as_u64()).unwrap_or(0),
                exists: true,
            }),
        }
    }

    #[tracing::instrument(skip(self), fields(chain = "SOL"), err)]
    async fn get_balance(&self, pubkey: &str) -> Result<u64, CoreError> {
        let result = self.call("getBalance", json!([pubkey, {"commitment": "confirmed"}])).await?;
        result
            .get("value")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| CoreError::Rpc("missing value in getBalance response".into()))
    }
}

/// base64-encodes a signed transaction for `sendTransaction`.
pub fn to_base64(raw_tx: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(raw_tx)
}
