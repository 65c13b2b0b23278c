//! SOL SPL-Token sweep: derives ATAs, creates the destination ATA at most
//! once, then one SPL-Token.Transfer per source, sequentially (spec
//! §4.5.5).

use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;

use crate::audit::{AuditLog, AuditRow, AuditStatus};
use crate::error::CoreError;
use crate::fees::SOL_LAMPORTS_PER_SIGNATURE;
use crate::keys::{DerivedKey, KeyFacade};
use crate::model::{AddressWithBalance, Amount, Chain, Token, TxState, TxStatus};
use crate::rpc::SolanaRpc;
use crate::serialization::solana::{
    compile, create_associated_token_account, derive_associated_token_account, sign_and_serialize,
    spl_token_transfer, Pubkey,
};
use crate::tx_state_store::TxStateStore;

use super::sol_native::{poll_confirmation, SolDeps};
use super::{SourceResult, SweepContext, SweepResult};

fn parse_pubkey(s: &str, chain: Chain) -> Result<Pubkey, CoreError> {
    s.parse().map_err(|_| CoreError::InvalidDestination {
        chain,
        reason: format!("{s} is not a valid base58 Solana address"),
    })
}

#[tracing::instrument(skip(ctx, deps, mint), fields(chain = "SOL", token = %token), err)]
pub async fn execute(
    ctx: &SweepContext,
    deps: &SolDeps,
    token: Token,
    mint: &str,
) -> Result<SweepResult, CoreError> {
    let dest_wallet = parse_pubkey(&ctx.destination, Chain::Sol)?;
    let mint_pubkey = parse_pubkey(mint, Chain::Sol)?;
    let dest_ata = derive_associated_token_account(dest_wallet, mint_pubkey);

    let dest_exists = deps.rpc.get_account_info(&dest_ata.to_base58()).await?.exists;
    let dest_ata_exists = AtomicBool::new(dest_exists);

    let mut result = SweepResult::empty(ctx.sweep_id);
    for source in &ctx.sources {
        if ctx.is_cancelled() {
            break;
        }
        match sweep_one_source(deps, ctx, source, token, dest_wallet, dest_ata, mint_pubkey, &dest_ata_exists).await {
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
    deps: &SolDeps,
    ctx: &SweepContext,
    source: &AddressWithBalance,
    token: Token,
    dest_wallet: Pubkey,
    dest_ata: Pubkey,
    mint: Pubkey,
    dest_ata_exists: &AtomicBool,
) -> Result<SourceResult, CoreError> {
    let source_pubkey: Pubkey = source.address.value.parse().map_err(|_| {
        CoreError::InvalidAddress(format!("{} is not a valid base58 Solana address", source.address.value))
    })?;

    let send_amount = source.balance_of(token).0 as u64;
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

    let needs_create = !dest_ata_exists.load(Ordering::SeqCst);
    // Rent-exemption for a new token account; ATA creation adds this on top
    // of the per-signature fee.
    const ATA_RENT_LAMPORTS: u64 = 2_039_280;
    let required_lamports = SOL_LAMPORTS_PER_SIGNATURE + if needs_create { ATA_RENT_LAMPORTS } else { 0 };

    let live_sol_balance = deps.rpc.get_balance(&source.address.value).await?;
    if live_sol_balance < required_lamports {
        return Ok(SourceResult {
            address: source.address.clone(),
            tx_state_id: None,
            tx_hash: None,
            amount: None,
            succeeded: false,
            error: Some("insufficient SOL to cover fee and rent".into()),
        });
    }

    let key = deps.keys.derive(Chain::Sol, source.address.index).await?;
    let signing_key = match key {
        DerivedKey::Ed25519(k) => *k,
        DerivedKey::Secp256k1(_) => {
            return Err(CoreError::KeyDerivation("expected an Ed25519 key for SOL".into()));
        }
    };

    let source_ata = derive_associated_token_account(source_pubkey, mint);
    let blockhash = deps.rpc.get_latest_blockhash().await?;

    let mut instructions = Vec::new();
    if needs_create {
        instructions.push(create_associated_token_account(
            source_pubkey,
            dest_ata,
            dest_wallet,
            mint,
        ));
    }
    instructions.push(spl_token_transfer(source_ata, dest_ata, source_pubkey, send_amount));

    let message = compile(source_pubkey, &instructions, blockhash);
    let raw_tx = sign_and_serialize(&message, &[(&source_pubkey, &signing_key)])?;
    let base64_tx = base64::engine::general_purpose::STANDARD.encode(&raw_tx);

    let row = TxState::new_pending(
        ctx.sweep_id,
        Chain::Sol,
        token,
        source.address.index,
        source.address.value.clone(),
        ctx.destination.clone(),
        Amount(send_amount as u128),
    );
    let tx_state_id = row.id;
    deps.store.create(row).await?;
    deps.store
        .update_status(tx_state_id, TxStatus::Broadcasting, None, None)
        .await?;

    let signature = match deps.rpc.send_base64_tx(&base64_tx).await {
        Ok(sig) => sig,
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
        .update_status(tx_state_id, TxStatus::Confirming, Some(signature.clone()), None)
        .await?;
    deps.audit
        .record(AuditRow {
            chain: Chain::Sol,
            tx_hash: signature.clone(),
            from_address: source.address.value.clone(),
            amount: Amount(send_amount as u128),
            status: AuditStatus::Pending,
        })
        .await?;

    poll_confirmation(deps, tx_state_id, signature.clone()).await;

    // Only after a confirmed send that included CreateATA do later sources
    // skip it — a failed or uncertain creation must not be assumed to have
    // landed.
    if needs_create {
        let confirmed = deps
            .store
            .list_by_sweep(ctx.sweep_id)
            .await
            .ok()
            .and_then(|rows| rows.into_iter().find(|r| r.id == tx_state_id))
            .map(|r| r.status == TxStatus::Confirmed)
            .unwrap_or(false);
        if confirmed {
            dest_ata_exists.store(true, Ordering::SeqCst);
        }
    }

    Ok(SourceResult {
        address: source.address.clone(),
        tx_state_id: Some(tx_state_id),
        tx_hash: Some(signature),
        amount: Some(Amount(send_amount as u128)),
        succeeded: true,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_mint() {
        assert!(parse_pubkey("not base58 at all!!", Chain::Sol).is_err());
    }
}
