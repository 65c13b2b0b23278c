//! EVM token sweep: a sweep-level gas precheck across all sources, then one
//! `transfer(...)` call per source, sequentially (spec §4.5.3).

use alloy_primitives::U256;

use crate::audit::{AuditLog, AuditRow, AuditStatus};
use crate::error::CoreError;
use crate::keys::{DerivedKey, KeyFacade};
use crate::model::{AddressWithBalance, Amount, Chain, Token, TxState, TxStatus};
use crate::rpc::EvmRpc;
use crate::serialization::evm::{erc20_balance_of_calldata, erc20_transfer_calldata, LegacyTx};
use crate::tx_state_store::TxStateStore;

use super::evm_native::{spawn_receipt_poller, EvmDeps};
use super::{SourceResult, SweepContext, SweepResult};

fn parse_evm_address(s: &str) -> Result<alloy_primitives::Address, CoreError> {
    s.parse()
        .map_err(|_| CoreError::InvalidDestination {
            chain: Chain::Evm,
            reason: format!("{s} is not a valid 0x-prefixed EVM address"),
        })
}

#[tracing::instrument(
    skip(ctx, deps, buffered_gas_price_wei, token_contract),
    fields(chain = "EVM", token = %token),
    err
)]
pub async fn execute(
    ctx: &SweepContext,
    deps: &EvmDeps,
    token: Token,
    token_contract: &str,
    buffered_gas_price_wei: u128,
    expected_gas_price_wei: Option<u128>,
) -> Result<SweepResult, CoreError> {
    if let Some(expected) = expected_gas_price_wei {
        crate::fees::check_gas_price_spike(expected, buffered_gas_price_wei, deps.config.evm_gas_spike_multiple)?;
    }
    let dest = parse_evm_address(&ctx.destination)?;
    let token_addr = parse_evm_address(token_contract)?;
    let gas_limit = deps.config.evm_gas_limits.token_transfer;
    let gas_cost = buffered_gas_price_wei * gas_limit as u128;

    let mut short_indices = Vec::new();
    for source in &ctx.sources {
        let live_gas_balance = deps.rpc.balance_at(&source.address.value).await?;
        if live_gas_balance < gas_cost {
            short_indices.push(source.address.index);
        }
    }
    if !short_indices.is_empty() {
        return Err(CoreError::InsufficientBnbForGas {
            count: short_indices.len(),
            indices: short_indices,
        });
    }

    let mut result = SweepResult::empty(ctx.sweep_id);
    for source in &ctx.sources {
        if ctx.is_cancelled() {
            break;
        }
        match sweep_one_source(
            deps,
            ctx,
            source,
            token,
            dest,
            token_addr,
            buffered_gas_price_wei,
            gas_limit,
            gas_cost,
        )
        .await
        {
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

#[allow(clippy::too_many_arguments)]
async fn sweep_one_source(
    deps: &EvmDeps,
    ctx: &SweepContext,
    source: &AddressWithBalance,
    token: Token,
    dest: alloy_primitives::Address,
    token_addr: alloy_primitives::Address,
    gas_price_wei: u128,
    gas_limit: u64,
    gas_cost: u128,
) -> Result<SourceResult, CoreError> {
    // Re-check gas at the moment of send: the sweep-level precheck above
    // can be stale by the time an earlier source's send has landed.
    let live_gas_balance = deps.rpc.balance_at(&source.address.value).await?;
    if live_gas_balance < gas_cost {
        return Ok(SourceResult {
            address: source.address.clone(),
            tx_state_id: None,
            tx_hash: None,
            amount: None,
            succeeded: false,
            error: Some("gas balance dropped below the floor before send".into()),
        });
    }

    let owner = parse_evm_address(&source.address.value)?;
    let balance_of_data = erc20_balance_of_calldata(owner);
    let raw_balance = deps.rpc.call_contract(&format!("{token_addr:#x}"), &balance_of_data).await?;
    let on_chain_balance = u128::from_be_bytes(
        raw_balance
            .get(16..32)
            .and_then(|s| s.try_into().ok())
            .unwrap_or([0u8; 16]),
    );
    // Conservative: never send more than the snapshot recorded, even if the
    // on-chain balance grew since.
    let snapshot_balance = source.balance_of(token).0;
    let send_amount = on_chain_balance.min(snapshot_balance);
    if send_amount == 0 {
        return Ok(SourceResult {
            address: source.address.clone(),
            tx_state_id: None,
            tx_hash: None,
            amount: None,
            succeeded: false,
            error: Some("no token balance to sweep".into()),
        });
    }

    let key = deps.keys.derive(Chain::Evm, source.address.index).await?;
    let signing_key = match key {
        DerivedKey::Secp256k1(k) => k,
        DerivedKey::Ed25519(_) => {
            return Err(CoreError::KeyDerivation("expected a secp256k1 key for EVM".into()));
        }
    };

    let nonce = deps.rpc.pending_nonce(&source.address.value).await?;
    let data = erc20_transfer_calldata(dest, U256::from(send_amount));
    let tx = LegacyTx {
        nonce,
        gas_price: gas_price_wei,
        gas_limit,
        to: token_addr,
        value: U256::ZERO,
        data,
    };
    let sig = tx.sign(&signing_key, deps.config.evm_chain_id);
    let raw = tx.encode_signed(&sig);

    let row = TxState::new_pending(
        ctx.sweep_id,
        Chain::Evm,
        token,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_token_contract() {
        assert!(parse_evm_address("not-a-contract").is_err());
    }
}
