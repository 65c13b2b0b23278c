//! Esplora-compatible BTC adapter: `GET /address/{a}/utxo`, `GET /tx/{h}/status`,
//! `POST /tx` (raw hex body, text/plain) → txid.

use serde::Deserialize;

use super::provider_pool::ProviderPool;
use super::{BtcRpc, ProbeOutcome};
use crate::error::CoreError;
use crate::model::{BtcFeeTiers, Utxo};

pub struct EsploraClient {
    http: reqwest::Client,
    pool: ProviderPool,
}

impl EsploraClient {
    pub fn new(pool: ProviderPool) -> Self {
        EsploraClient {
            http: reqwest::Client::new(),
            pool,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: EsploraUtxoStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxoStatus {
    confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct EsploraTxStatus {
    confirmed: bool,
}

fn is_transient(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

#[async_trait::async_trait]
impl BtcRpc for EsploraClient {
    #[tracing::instrument(skip(self), fields(chain = "BTC"), err)]
    async fn fetch_utxos(&self, address: &str) -> Result<Vec<Utxo>, CoreError> {
        let mut last_err = None;
        for base in self.pool.ordered_candidates() {
            let url = base
                .join(&format!("address/{address}/utxo"))
                .map_err(|e| CoreError::Rpc(e.to_string()))?;
            match self.http.get(url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let raw: Vec<EsploraUtxo> = match resp.json().await {
                        Ok(v) => v,
                        Err(e) => {
                            self.pool.record_failure(&base, e.to_string());
                            last_err = Some(e.to_string());
                            continue;
                        }
                    };
                    self.pool.record_success(&base);
                    return Ok(raw
                        .into_iter()
                        .filter(|u| u.status.confirmed)
                        .map(|u| Utxo {
                            txid: u.txid,
                            vout: u.vout,
                            value_sats: u.value,
                            confirmed: u.status.confirmed,
                            address_index: 0,
                            owner_address: address.to_string(),
                            script_pubkey: Vec::new(),
                        })
                        .collect());
                }
                Ok(resp) if is_transient(resp.status()) => {
                    self.pool.record_failure(&base, resp.status().to_string());
                    last_err = Some(resp.status().to_string());
                }
                Ok(resp) => {
                    return Err(CoreError::Rpc(format!(
                        "esplora returned {} for utxo lookup",
                        resp.status()
                    )));
                }
                Err(e) => {
                    self.pool.record_failure(&base, e.to_string());
                    last_err = Some(e.to_string());
                }
            }
        }
        Err(CoreError::Rpc(last_err.unwrap_or_else(|| "no BTC providers configured".into())))
    }

    #[tracing::instrument(skip(self, raw_hex), fields(chain = "BTC"), err)]
    async fn broadcast_raw_hex(&self, raw_hex: &str) -> Result<String, CoreError> {
        let mut last_err = None;
        for base in self.pool.ordered_candidates() {
            let url = base.join("tx").map_err(|e| CoreError::Rpc(e.to_string()))?;
            match self
                .http
                .post(url)
                .header("Content-Type", "text/plain")
                .body(raw_hex.to_string())
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    self.pool.record_success(&base);
                    return resp.text().await.map_err(|e| CoreError::Rpc(e.to_string()));
                }
                Ok(resp) if is_transient(resp.status()) => {
                    self.pool.record_failure(&base, resp.status().to_string());
                    last_err = Some(resp.status().to_string());
                }
                Ok(resp) => {
                    // 4xx describing a malformed tx is final: don't fail over.
                    let body = resp.text().await.unwrap_or_default();
                    return Err(CoreError::TxBroadcastFailed(body));
                }
                Err(e) => {
                    self.pool.record_failure(&base, e.to_string());
                    last_err = Some(e.to_string());
                }
            }
        }
        Err(CoreError::TxBroadcastFailed(
            last_err.unwrap_or_else(|| "no BTC providers configured".into()),
        ))
    }

    #[tracing::instrument(skip(self), fields(chain = "BTC"), err)]
    async fn fetch_tx_status(&self, txid: &str) -> Result<ProbeOutcome, CoreError> {
        for base in self.pool.ordered_candidates() {
            let url = base
                .join(&format!("tx/{txid}/status"))
                .map_err(|e| CoreError::Rpc(e.to_string()))?;
            match self.http.get(url).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    self.pool.record_success(&base);
                    return Ok(ProbeOutcome::NotFound);
                }
                Ok(resp) if resp.status().is_success() => {
                    let status: EsploraTxStatus = match resp.json().await {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    self.pool.record_success(&base);
                    return Ok(if status.confirmed {
                        ProbeOutcome::Confirmed
                    } else {
                        ProbeOutcome::Pending
                    });
                }
                Ok(resp) if is_transient(resp.status()) => {
                    self.pool.record_failure(&base, resp.status().to_string());
                }
                _ => continue,
            }
        }
        Ok(ProbeOutcome::Pending)
    }

    #[tracing::instrument(skip(self), fields(chain = "BTC"), err)]
    async fn fetch_fee_tiers(&self) -> Result<BtcFeeTiers, CoreError> {
        for base in self.pool.ordered_candidates() {
            let url = base
                .join("fee-estimates")
                .map_err(|e| CoreError::Rpc(e.to_string()))?;
            if let Ok(resp) = self.http.get(url).send().await {
                if resp.status().is_success() {
                    if let Ok(tiers) = resp.json::<std::collections::BTreeMap<String, f64>>().await {
                        self.pool.record_success(&base);
                        return Ok(BtcFeeTiers {
                            fastest: *tiers.get("1").unwrap_or(&20.0),
                            half_hour: *tiers.get("3").unwrap_or(&10.0),
                            hour: *tiers.get("6").unwrap_or(&5.0),
                            economy: *tiers.get("144").unwrap_or(&2.0),
                            minimum: *tiers.get("1008").unwrap_or(&1.0),
                        });
                    }
                }
            }
        }
        Err(CoreError::Rpc("no BTC fee estimate provider available".into()))
    }
}
