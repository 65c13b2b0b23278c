//! Gas pre-seed service (spec §4.6): distributes native coin from one
//! source index to a list of target addresses that hold tokens but lack
//! gas to move them.

use alloy_primitives::{Address as EvmAddress, U256};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditLog, AuditRow, AuditStatus};
use crate::config::Config;
use crate::error::CoreError;
use crate::keys::{DerivedKey, KeyFacade};
use crate::model::{Amount, Chain, SweepId, Token, TxState, TxStatus};
use crate::rpc::{EvmReceipt, EvmRpc};
use crate::serialization::evm::LegacyTx;
use crate::tx_state_store::TxStateStore;

/// A single target's requested send amount, pre-computed by the caller from
/// the target's observed token balance and the chain's gas policy.
#[derive(Debug, Clone)]
pub struct GasPreSeedTarget {
    pub address_index: u32,
    pub address: String,
    pub send_lamports_or_wei: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasPreSeedTxResult {
    pub address_index: u32,
    pub address: String,
    pub succeeded: bool,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasPreSeedResult {
    pub success_count: usize,
    pub fail_count: usize,
    pub total_sent: Amount,
    pub tx_results: Vec<GasPreSeedTxResult>,
}

/// Strings EVM providers return for a nonce race; a single re-fetch-and-
/// retry is attempted on any of these.
const NONCE_RACE_MARKERS: [&str; 3] = ["nonce too low", "already known", "replacement underpriced"];

fn is_nonce_race(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    NONCE_RACE_MARKERS.iter().any(|m| lower.contains(m))
}

#[tracing::instrument(skip(rpc, keys, store, audit, config, targets), err)]
#[allow(clippy::too_many_arguments)]
pub async fn execute(
    rpc: &dyn EvmRpc,
    keys: &dyn KeyFacade,
    store: &dyn TxStateStore,
    audit: &dyn AuditLog,
    config: &Config,
    sweep_id: SweepId,
    source_index: u32,
    source_address: &str,
    targets: Vec<GasPreSeedTarget>,
    expected_gas_price_wei: Option<u128>,
) -> Result<GasPreSeedResult, CoreError> {
    let gas_limit = config.evm_gas_limits.native_transfer;
    let gas_price = rpc.suggest_gas_price().await?;
    let buffered_gas_price = ((gas_price as f64) * config.evm_gas_buffer_multiple).ceil() as u128;
    if let Some(expected) = expected_gas_price_wei {
        crate::fees::check_gas_price_spike(expected, buffered_gas_price, config.evm_gas_spike_multiple)?;
    }

    // Idempotency: skip targets already confirmed in this sweep.
    let mut to_send = Vec::new();
    let mut tx_results = Vec::new();
    for target in targets {
        if store.has_confirmed_for(sweep_id, &target.address).await? {
            tx_results.push(GasPreSeedTxResult {
                address_index: target.address_index,
                address: target.address.clone(),
                succeeded: true,
                tx_hash: None,
                error: None,
            });
            continue;
        }
        to_send.push(target);
    }

    let per_target_cost: u128 = buffered_gas_price * gas_limit as u128;
    let total_needed: u128 = to_send
        .iter()
        .map(|t| t.send_lamports_or_wei + per_target_cost)
        .sum();
    let source_balance = rpc.balance_at(source_address).await?;
    if source_balance < total_needed {
        return Err(CoreError::GasPreSeedFailed(format!(
            "source balance {source_balance} cannot cover total requirement {total_needed}"
        )));
    }

    let key = keys.derive(Chain::Evm, source_index).await?;
    let signing_key = match key {
        DerivedKey::Secp256k1(k) => k,
        DerivedKey::Ed25519(_) => {
            return Err(CoreError::KeyDerivation("expected a secp256k1 key for EVM".into()));
        }
    };

    let mut nonce = rpc.pending_nonce(source_address).await?;
    let mut total_sent: u128 = 0;

    for target in &to_send {
        let dest: EvmAddress = match target.address.parse() {
            Ok(a) => a,
            Err(_) => {
                tx_results.push(GasPreSeedTxResult {
                    address_index: target.address_index,
                    address: target.address.clone(),
                    succeeded: false,
                    tx_hash: None,
                    error: Some("invalid destination address".into()),
                });
                continue;
            }
        };

        let row = TxState::new_pending(
            sweep_id,
            Chain::Evm,
            Token::Native,
            source_index,
            source_address,
            target.address.clone(),
            Amount(target.send_lamports_or_wei),
        );
        let tx_state_id = row.id;
        store.create(row).await?;
        store
            .update_status(tx_state_id, TxStatus::Broadcasting, None, None)
            .await?;

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            let tx = LegacyTx {
                nonce,
                gas_price: buffered_gas_price,
                gas_limit,
                to: dest,
                value: U256::from(target.send_lamports_or_wei),
                data: Vec::new(),
            };
            let sig = tx.sign(&signing_key, config.evm_chain_id);
            let raw = tx.encode_signed(&sig);

            match rpc.send_signed_tx(&raw).await {
                Ok(hash) => break Ok(hash),
                Err(e) if attempts == 1 && is_nonce_race(&e.to_string()) => {
                    nonce = rpc.pending_nonce(source_address).await?;
                    continue;
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(tx_hash) => {
                store
                    .update_status(tx_state_id, TxStatus::Confirming, Some(tx_hash.clone()), None)
                    .await?;
                audit
                    .record(AuditRow {
                        chain: Chain::Evm,
                        tx_hash: tx_hash.clone(),
                        from_address: source_address.to_string(),
                        amount: Amount(target.send_lamports_or_wei),
                        status: AuditStatus::Pending,
                    })
                    .await?;
                nonce += 1;

                let confirmed = wait_for_receipt(rpc, &tx_hash, config).await;
                match confirmed {
                    Ok(true) => {
                        store
                            .update_status(tx_state_id, TxStatus::Confirmed, Some(tx_hash.clone()), None)
                            .await?;
                        audit.update_status(Chain::Evm, &tx_hash, AuditStatus::Confirmed).await?;
                        total_sent += target.send_lamports_or_wei;
                        tx_results.push(GasPreSeedTxResult {
                            address_index: target.address_index,
                            address: target.address.clone(),
                            succeeded: true,
                            tx_hash: Some(tx_hash),
                            error: None,
                        });
                    }
                    Ok(false) => {
                        store
                            .update_status(
                                tx_state_id,
                                TxStatus::Failed,
                                Some(tx_hash.clone()),
                                Some("transaction reverted".into()),
                            )
                            .await?;
                        audit.update_status(Chain::Evm, &tx_hash, AuditStatus::Failed).await?;
                        tx_results.push(GasPreSeedTxResult {
                            address_index: target.address_index,
                            address: target.address.clone(),
                            succeeded: false,
                            tx_hash: Some(tx_hash),
                            error: Some("transaction reverted".into()),
                        });
                    }
                    Err(e) => {
                        store
                            .update_status(
                                tx_state_id,
                                TxStatus::Uncertain,
                                Some(tx_hash.clone()),
                                Some(e.to_string()),
                            )
                            .await?;
                        tx_results.push(GasPreSeedTxResult {
                            address_index: target.address_index,
                            address: target.address.clone(),
                            succeeded: false,
                            tx_hash: Some(tx_hash),
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
            Err(e) => {
                store
                    .update_status(tx_state_id, TxStatus::Failed, None, Some(e.to_string()))
                    .await?;
                tx_results.push(GasPreSeedTxResult {
                    address_index: target.address_index,
                    address: target.address.clone(),
                    succeeded: false,
                    tx_hash: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    // `signing_key` drops here, zeroizing.

    let success_count = tx_results.iter().filter(|r| r.succeeded).count();
    let fail_count = tx_results.len() - success_count;

    Ok(GasPreSeedResult {
        success_count,
        fail_count,
        total_sent: Amount(total_sent),
        tx_results,
    })
}

/// Waits synchronously for a receipt, polling at the EVM poll interval up to
/// the EVM poll timeout. Returns `Ok(true)` for status 1, `Ok(false)` for
/// status 0, `Err` on timeout (caller marks the row `uncertain`).
async fn wait_for_receipt(rpc: &dyn EvmRpc, tx_hash: &str, config: &Config) -> Result<bool, CoreError> {
    let interval = std::time::Duration::from_secs(config.evm_poll_interval_secs);
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(config.evm_poll_timeout_secs);
    loop {
        if let Some(EvmReceipt { status, .. }) = rpc.get_receipt(tx_hash).await? {
            return Ok(status == 1);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(CoreError::ReceiptTimeout(tx_hash.to_string()));
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_nonce_race_error_strings() {
        assert!(is_nonce_race("nonce too low"));
        assert!(is_nonce_race("Error: already known"));
        assert!(is_nonce_race("replacement underpriced"));
        assert!(!is_nonce_race("insufficient funds"));
    }
}
