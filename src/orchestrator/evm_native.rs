//! EVM native-coin sweep: one legacy transfer per source, sequentially
//! (spec §4.5.2).

use std::sync::Arc;

use alloy_primitives::{Address as EvmAddress, U256};

use crate::audit::{AuditLog, AuditRow, AuditStatus};
use crate::config::Config;
use crate::error::CoreError;
use crate::keys::{DerivedKey, KeyFacade};
use crate::model::{AddressWithBalance, Amount, Chain, Token, TxState, TxStatus};
use crate::rpc::{EvmReceipt, EvmRpc};
use crate::serialization::evm::LegacyTx;
use crate::shutdown::Shutdown;
use crate::tx_state_store::TxStateStore;

use super::{SourceResult, SweepContext, SweepResult};

#[derive(Clone)]
pub struct EvmDeps {
    pub rpc: Arc<dyn EvmRpc>,
    pub keys: Arc<dyn KeyFacade>,
    pub store: Arc<dyn TxStateStore>,
    pub audit: Arc<dyn AuditLog>,
    pub config: Arc<Config>,
    pub shutdown: Shutdown,
}

fn parse_evm_address(s: &str) -> Result<EvmAddress, CoreError> {
    s.parse()
        .map_err(|_| CoreError::InvalidDestination {
            chain: Chain::Evm,
            reason: format!("{s} is not a valid 0x-prefixed EVM address"),
        })
}

#[tracing::instrument(skip(ctx, deps, buffered_gas_price_wei), fields(chain = "EVM", token = "NATIVE"), err)]
pub async fn execute(
    ctx: &SweepContext,
    deps: &EvmDeps,
    buffered_gas_price_wei: u128,
    expected_gas_price_wei: Option<u128>,
) -> Result<SweepResult, CoreError> {
    if let Some(expected) = expected_gas_price_wei {
        crate::fees::check_gas_price_spike(expected, buffered_gas_price_wei, deps.config.evm_gas_spike_multiple)?;
    }
    let mut result = SweepResult::empty(ctx.sweep_id);
    let dest = parse_evm_address(&ctx.destination)?;
    let gas_limit = deps.config.evm_gas_limits.native_transfer;
    let gas_cost = buffered_gas_price_wei * gas_limit as u128;

    for source in &ctx.sources {
        if ctx.is_cancelled() {
            break;
        }
        match sweep_one_source(deps, ctx, source, dest, buffered_gas_price_wei, gas_limit, gas_cost).await {
            Ok(source_result) => result.push(source_result),
            Err(e) => {
                result.push(SourceResult {
                    address: source.address.clone(),
                    tx_state_id: None,
                    tx_hash: None,
                    amount: None,
                    succeeded: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    Ok(result)
}

async fn sweep_one_source(
    deps: &EvmDeps,
    ctx: &SweepContext,
    source: &AddressWithBalance,
    dest: EvmAddress,
    gas_price_wei: u128,
    gas_limit: u64,
    gas_cost: u128,
) -> Result<SourceResult, CoreError> {
    let live_balance = deps.rpc.balance_at(&source.address.value).await?;
    let snapshot_balance = source.native_balance.0;
    if live_balance != snapshot_balance {
        tracing::warn!(
            address = %source.address.value,
            snapshot = snapshot_balance,
            live = live_balance,
            "EVM native balance diverged from preview snapshot"
        );
    }

    if live_balance <= gas_cost {
        return Ok(SourceResult {
            address: source.address.clone(),
            tx_state_id: None,
            tx_hash: None,
            amount: None,
            succeeded: false,
            error: Some("balance at or below the gas floor".into()),
        });
    }
    let send_amount = live_balance - gas_cost;

    let key = deps.keys.derive(Chain::Evm, source.address.index).await?;
    let signing_key = match key {
        DerivedKey::Secp256k1(k) => k,
        DerivedKey::Ed25519(_) => {
            return Err(CoreError::KeyDerivation("expected a secp256k1 key for EVM".into()));
        }
    };

    let nonce = deps.rpc.pending_nonce(&source.address.value).await?;
    let tx = LegacyTx {
        nonce,
        gas_price: gas_price_wei,
        gas_limit,
        to: dest,
        value: U256::from(send_amount),
        data: Vec::new(),
    };
    let sig = tx.sign(&signing_key, deps.config.evm_chain_id);
    let raw = tx.encode_signed(&sig);
    // `signing_key` drops here, zeroizing.

    let row = TxState::new_pending(
        ctx.sweep_id,
        Chain::Evm,
        Token::Native,
        source.address.index,
        source.address.value.clone(),
        ctx.destination.clone(),
        Amount(send_amount),
    );
    let tx_state_id = row.id;
    deps.store.create(row).await?;
    deps.store
        .update_status(tx_state_id, TxStatus::Broadcasting, None, None)
        .await?;

    let tx_hash = match deps.rpc.send_signed_tx(&raw).await {
        Ok(hash) => hash,
        Err(e) => {
            deps.store
                .update_status(tx_state_id, TxStatus::Failed, None, Some(e.to_string()))
                .await?;
            return Ok(SourceResult {
                address: source.address.clone(),
                tx_state_id: Some(tx_state_id),
                tx_hash: None,
                amount: None,
                succeeded: false,
                error: Some(e.to_string()),
            });
        }
    };

    deps.store
        .update_status(tx_state_id, TxStatus::Confirming, Some(tx_hash.clone()), None)
        .await?;
    deps.audit
        .record(AuditRow {
            chain: Chain::Evm,
            tx_hash: tx_hash.clone(),
            from_address: source.address.value.clone(),
            amount: Amount(send_amount),
            status: AuditStatus::Pending,
        })
        .await?;

    spawn_receipt_poller(deps, tx_state_id, tx_hash.clone());

    Ok(SourceResult {
        address: source.address.clone(),
        tx_state_id: Some(tx_state_id),
        tx_hash: Some(tx_hash),
        amount: Some(Amount(send_amount)),
        succeeded: true,
        error: None,
    })
}

/// Waits for a receipt on a fixed interval until it arrives, confirms, or
/// fails, or the EVM poll timeout elapses.
pub(crate) fn spawn_receipt_poller(deps: &EvmDeps, tx_state_id: crate::model::TxStateId, tx_hash: String) {
    let deps = deps.clone();
    let cancellation = deps.shutdown.cancellation_token();
    deps.shutdown.spawn_tracked(async move {
        let interval = std::time::Duration::from_secs(deps.config.evm_poll_interval_secs);
        let deadline =
            tokio::time::Instant::now() + std::time::Duration::from_secs(deps.config.evm_poll_timeout_secs);

        loop {
            if cancellation.is_cancelled() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = deps
                    .store
                    .update_status(
                        tx_state_id,
                        TxStatus::Uncertain,
                        Some(tx_hash.clone()),
                        Some("receipt poll timed out".into()),
                    )
                    .await;
                return;
            }

            match deps.rpc.get_receipt(&tx_hash).await {
                Ok(Some(EvmReceipt { status: 1, .. })) => {
                    let _ = deps
                        .store
                        .update_status(tx_state_id, TxStatus::Confirmed, Some(tx_hash.clone()), None)
                        .await;
                    let _ = deps.audit.update_status(Chain::Evm, &tx_hash, AuditStatus::Confirmed).await;
                    return;
                }
                Ok(Some(EvmReceipt { .. })) => {
                    let _ = deps
                        .store
                        .update_status(
                            tx_state_id,
                            TxStatus::Failed,
                            Some(tx_hash.clone()),
                            Some("transaction reverted".into()),
                        )
                        .await;
                    let _ = deps.audit.update_status(Chain::Evm, &tx_hash, AuditStatus::Failed).await;
                    return;
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "EVM receipt probe failed, will retry"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancellation.cancelled() => return,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_destination() {
        assert!(parse_evm_address("not-an-address").is_err());
    }

    #[test]
    fn accepts_a_well_formed_destination() {
        assert!(parse_evm_address("0x0000000000000000000000000000000000000001").is_ok());
    }
}
