//! SOL native (lamport) sweep: one System.Transfer per source, sequentially,
//! with synchronous confirmation polling (spec §4.5.4).

use std::sync::Arc;

use base64::Engine;
use ed25519_dalek::SigningKey;

use crate::audit::{AuditLog, AuditRow, AuditStatus};
use crate::config::Config;
use crate::error::CoreError;
use crate::fees::SOL_LAMPORTS_PER_SIGNATURE;
use crate::keys::{DerivedKey, KeyFacade};
use crate::model::{AddressWithBalance, Amount, Chain, Token, TxState, TxStatus};
use crate::rpc::{sol_status_to_probe, ProbeOutcome, SolanaRpc};
use crate::serialization::solana::{compile, sign_and_serialize, system_transfer, Pubkey};
use crate::shutdown::Shutdown;
use crate::tx_state_store::TxStateStore;

use super::{SourceResult, SweepContext, SweepResult};

#[derive(Clone)]
pub struct SolDeps {
    pub rpc: Arc<dyn SolanaRpc>,
    pub keys: Arc<dyn KeyFacade>,
    pub store: Arc<dyn TxStateStore>,
    pub audit: Arc<dyn AuditLog>,
    pub config: Arc<Config>,
    pub shutdown: Shutdown,
}

fn parse_pubkey(s: &str, chain: Chain) -> Result<Pubkey, CoreError> {
    s.parse().map_err(|_| CoreError::InvalidDestination {
        chain,
        reason: format!("{s} is not a valid base58 Solana address"),
    })
}

#[tracing::instrument(skip(ctx, deps), fields(chain = "SOL", token = "NATIVE"), err)]
pub async fn execute(ctx: &SweepContext, deps: &SolDeps) -> Result<SweepResult, CoreError> {
    let mut result = SweepResult::empty(ctx.sweep_id);
    let dest = parse_pubkey(&ctx.destination, Chain::Sol)?;

    for source in &ctx.sources {
        if ctx.is_cancelled() {
            break;
        }
        match sweep_one_source(deps, ctx, source, dest).await {
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
    deps: &SolDeps,
    ctx: &SweepContext,
    source: &AddressWithBalance,
    dest: Pubkey,
) -> Result<SourceResult, CoreError> {
    let source_pubkey: Pubkey = source.address.value.parse().map_err(|_| {
        CoreError::InvalidAddress(format!("{} is not a valid base58 Solana address", source.address.value))
    })?;

    let live_balance = deps.rpc.get_balance(&source.address.value).await?;
    if live_balance <= SOL_LAMPORTS_PER_SIGNATURE {
        return Ok(SourceResult {
            address: source.address.clone(),
            tx_state_id: None,
            tx_hash: None,
            amount: None,
            succeeded: false,
            error: Some("balance at or below the fee floor".into()),
        });
    }
    let send_amount = live_balance - SOL_LAMPORTS_PER_SIGNATURE;

    let key = deps.keys.derive(Chain::Sol, source.address.index).await?;
    let signing_key = match key {
        DerivedKey::Ed25519(k) => *k,
        DerivedKey::Secp256k1(_) => {
            return Err(CoreError::KeyDerivation("expected an Ed25519 key for SOL".into()));
        }
    };
    verify_derived_matches(&signing_key, source_pubkey)?;

    let blockhash = deps.rpc.get_latest_blockhash().await?;
    let ix = system_transfer(source_pubkey, dest, send_amount);
    let message = compile(source_pubkey, &[ix], blockhash);
    let raw_tx = sign_and_serialize(&message, &[(&source_pubkey, &signing_key)])?;
    let base64_tx = base64::engine::general_purpose::STANDARD.encode(&raw_tx);

    let row = TxState::new_pending(
        ctx.sweep_id,
        Chain::Sol,
        Token::Native,
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

    // Broadcast success alone is reported as success; convergence of the
    // terminal row happens via the synchronous poll below, but the
    // per-source result has already been decided (spec §4.5.4).
    poll_confirmation(deps, tx_state_id, signature.clone()).await;

    Ok(SourceResult {
        address: source.address.clone(),
        tx_state_id: Some(tx_state_id),
        tx_hash: Some(signature),
        amount: Some(Amount(send_amount as u128)),
        succeeded: true,
        error: None,
    })
}

fn verify_derived_matches(signing_key: &SigningKey, expected: Pubkey) -> Result<(), CoreError> {
    let derived = Pubkey(signing_key.verifying_key().to_bytes());
    if derived != expected {
        return Err(CoreError::KeyDerivation(format!(
            "derived key {derived} does not match source address {expected}"
        )));
    }
    Ok(())
}

/// Synchronously polls `getSignatureStatuses` up to the SOL confirmation
/// timeout, at the SOL poll interval, converging the row to
/// confirmed/failed/uncertain.
pub(crate) async fn poll_confirmation(deps: &SolDeps, tx_state_id: crate::model::TxStateId, signature: String) {
    let interval = std::time::Duration::from_secs(deps.config.sol_poll_interval_secs);
    let deadline =
        tokio::time::Instant::now() + std::time::Duration::from_secs(deps.config.sol_poll_timeout_secs);
    let cancellation = deps.shutdown.cancellation_token();

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
                    Some(signature.clone()),
                    Some("confirmation poll timed out".into()),
                )
                .await;
            return;
        }

        match deps.rpc.get_signature_statuses(std::slice::from_ref(&signature)).await {
            Ok(statuses) => {
                if let Some(Some(status)) = statuses.into_iter().next() {
                    match sol_status_to_probe(&status) {
                        ProbeOutcome::Confirmed => {
                            let _ = deps
                                .store
                                .update_status(tx_state_id, TxStatus::Confirmed, Some(signature.clone()), None)
                                .await;
                            let _ = deps.audit.update_status(Chain::Sol, &signature, AuditStatus::Confirmed).await;
                            return;
                        }
                        ProbeOutcome::Failed => {
                            let _ = deps
                                .store
                                .update_status(
                                    tx_state_id,
                                    TxStatus::Failed,
                                    Some(signature.clone()),
                                    Some("transaction failed on-chain".into()),
                                )
                                .await;
                            let _ = deps.audit.update_status(Chain::Sol, &signature, AuditStatus::Failed).await;
                            return;
                        }
                        ProbeOutcome::Pending | ProbeOutcome::NotFound => {}
                    }
                }
            }
            Err(e) => tracing::debug!(error = %e, "SOL confirmation probe failed, will retry"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancellation.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_destination() {
        assert!(parse_pubkey("not base58 at all!!", Chain::Sol).is_err());
    }

    #[test]
    fn verify_derived_matches_accepts_the_matching_key() {
        let key = SigningKey::from_bytes(&[5u8; 32]);
        let pk = Pubkey(key.verifying_key().to_bytes());
        assert!(verify_derived_matches(&key, pk).is_ok());
    }

    #[test]
    fn verify_derived_matches_rejects_a_mismatched_key() {
        let key = SigningKey::from_bytes(&[5u8; 32]);
        let other = Pubkey([1u8; 32]);
        assert!(verify_derived_matches(&key, other).is_err());
    }
}
