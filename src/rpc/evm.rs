//! EVM JSON-RPC adapter: `eth_getTransactionCount`, `eth_gasPrice`,
//! `eth_sendRawTransaction`, `eth_getTransactionReceipt`, `eth_getBalance`,
//! `eth_call`.

use serde_json::{json, Value};

use super::provider_pool::ProviderPool;
use super::{EvmReceipt, EvmRpc};
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
            let body = json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            });
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
                        // A well-formed JSON-RPC error (bad params, revert
                        // reason) is final; do not fail over.
                        return Err(CoreError::Rpc(err.to_string()));
                    }
                    self.pool.record_success(&base);
                    return Ok(envelope.get("result").cloned().unwrap_or(Value::Null));
                }
                Ok(resp) if resp.status().as_u16() == 429 || resp.status().is_server_error() => {
                    self.pool.record_failure(&base, resp.status().to_string());
                    last_err = Some(resp.status().to_string());
                }
                Ok(resp) => {
                    return Err(CoreError::Rpc(format!("provider returned {}", resp.status())));
                }
                Err(e) => {
                    self.pool.record_failure(&base, e.to_string());
                    last_err = Some(e.to_string());
                }
            }
        }
        Err(CoreError::Rpc(last_err.unwrap_or_else(|| "no EVM providers configured".into())))
    }
}

fn parse_hex_u128(v: &Value) -> Result<u128, CoreError> {
    let s = v
        .as_str()
        .ok_or_else(|| CoreError::Rpc("expected a hex-quantity string".into()))?;
    u128::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| CoreError::Rpc(e.to_string()))
}

fn parse_hex_u64(v: &Value) -> Result<u64, CoreError> {
    let s = v
        .as_str()
        .ok_or_else(|| CoreError::Rpc("expected a hex-quantity string".into()))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| CoreError::Rpc(e.to_string()))
}

#[async_trait::async_trait]
impl EvmRpc for JsonRpcClient {
    #[tracing::instrument(skip(self), fields(chain = "EVM"), err)]
    async fn pending_nonce(&self, address: &str) -> Result<u64, CoreError> {
        let result = self.call("eth_getTransactionCount", json!([address, "pending"])).await?;
        parse_hex_u64(&result)
    }

    #[tracing::instrument(skip(self), fields(chain = "EVM"), err)]
    async fn suggest_gas_price(&self) -> Result<u128, CoreError> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        parse_hex_u128(&result)
    }

    #[tracing::instrument(skip(self, raw), fields(chain = "EVM"), err)]
    async fn send_signed_tx(&self, raw: &[u8]) -> Result<String, CoreError> {
        let hex_raw = format!("0x{}", hex::encode(raw));
        let result = self.call("eth_sendRawTransaction", json!([hex_raw])).await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::TxBroadcastFailed("non-string tx hash in response".into()))
    }

    #[tracing::instrument(skip(self), fields(chain = "EVM"), err)]
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<EvmReceipt>, CoreError> {
        let result = self.call("eth_getTransactionReceipt", json!([tx_hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        let status = parse_hex_u64(result.get("status").ok_or_else(|| {
            CoreError::Rpc("receipt missing status field".into())
        })?)? as u8;
        let block_number = result
            .get("blockNumber")
            .map(parse_hex_u64)
            .transpose()?
            .unwrap_or(0);
        Ok(Some(EvmReceipt { status, block_number }))
    }

    #[tracing::instrument(skip(self), fields(chain = "EVM"), err)]
    async fn balance_at(&self, address: &str) -> Result<u128, CoreError> {
        let result = self.call("eth_getBalance", json!([address, "latest"])).await?;
        parse_hex_u128(&result)
    }

    #[tracing::instrument(skip(self, data), fields(chain = "EVM"), err)]
    async fn call_contract(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, CoreError> {
        let hex_data = format!("0x{}", hex::encode(data));
        let result = self
            .call("eth_call", json!([{"to": to, "data": hex_data}, "latest"]))
            .await?;
        let s = result
            .as_str()
            .ok_or_else(|| CoreError::Rpc("expected hex string from eth_call".into()))?;
        hex::decode(s.trim_start_matches("0x")).map_err(|e| CoreError::Rpc(e.to_string()))
    }
}
