//! BTC sweep: single consolidation transaction (spec §4.5.1).

use std::sync::Arc;

use crate::audit::{AuditLog, AuditRow, AuditStatus};
use crate::config::Config;
use crate::error::CoreError;
use crate::keys::{DerivedKey, KeyFacade};
use crate::model::{Address, Amount, Chain, Token, TxState, TxStatus};
use crate::rpc::{BtcRpc, ProbeOutcome};
use crate::serialization::btc::{self, SignableInput};
use crate::shutdown::Shutdown;
use crate::tx_state_store::TxStateStore;

use super::{SourceResult, SweepContext, SweepResult};

/// Pre-fetched preview snapshot used for the preview→execute UTXO
/// divergence check (spec §4.3).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct BtcPreviewSnapshot {
    pub utxo_count: usize,
    pub total_value_sats: u64,
}

/// `Arc`-wrapped so [`spawn_confirmation_poller`] can hand a `'static`
/// bundle to `Shutdown::spawn_tracked` instead of borrowing from the
/// caller's stack.
#[derive(Clone)]
pub struct BtcDeps {
    pub rpc: Arc<dyn BtcRpc>,
    pub keys: Arc<dyn KeyFacade>,
    pub store: Arc<dyn TxStateStore>,
    pub audit: Arc<dyn AuditLog>,
    pub config: Arc<Config>,
    pub shutdown: Shutdown,
}

#[tracing::instrument(skip(ctx, deps, preview, fee_rate_sat_per_vb), fields(chain = "BTC"), err)]
pub async fn execute(
    ctx: &SweepContext,
    deps: &BtcDeps,
    preview: Option<&BtcPreviewSnapshot>,
    fee_rate_sat_per_vb: f64,
) -> Result<SweepResult, CoreError> {
    let mut result = SweepResult::empty(ctx.sweep_id);

    let mut utxos = Vec::new();
    for source in &ctx.sources {
        utxos.extend(deps.rpc.fetch_utxos(&source.address.value).await?);
    }

    if utxos.is_empty() {
        return Err(CoreError::NoFundedAddresses {
            chain: Chain::Btc,
            token: Token::Native.to_string(),
        });
    }

    if let Some(preview) = preview {
        let live_value: u64 = utxos.iter().map(|u| u.value_sats).sum();
        crate::fees::check_utxo_divergence(
            preview.utxo_count,
            utxos.len(),
            preview.total_value_sats,
            live_value,
            deps.config.btc_utxo_count_drop_tolerance_pct,
            deps.config.btc_utxo_value_drop_tolerance_pct,
        )?;
    }

    let total_input: u64 = utxos.iter().map(|u| u.value_sats).sum();
    let fee_sats = btc::estimate_fee_sats(
        utxos.len() as u64,
        1,
        fee_rate_sat_per_vb,
        deps.config.btc_fee_safety_margin_pct,
    );
    if total_input <= fee_sats {
        return Err(CoreError::InsufficientBalance {
            have: total_input.to_string(),
            need: fee_sats.to_string(),
        });
    }
    let output_value = total_input - fee_sats;
    if output_value < btc::weight::DUST_THRESHOLD_SATS {
        return Err(CoreError::TxBuildFailed("output would be dust after fees".into()));
    }

    let weight = btc::weight::OVERHEAD
        + utxos.len() as u64 * (btc::weight::NON_WITNESS_INPUT + btc::weight::WITNESS_INPUT)
        + btc::weight::OUTPUT;
    if weight > btc::weight::HARD_CAP {
        return Err(CoreError::TxBuildFailed(format!(
            "transaction weight {weight} exceeds the hard cap of {}",
            btc::weight::HARD_CAP
        )));
    }

    let dest_script = bech32_to_script_pubkey(&ctx.destination)?;

    let signable_inputs: Vec<SignableInput> = utxos.iter().map(|u| SignableInput { utxo: u }).collect();

    let mut witnesses = Vec::with_capacity(signable_inputs.len());
    for (i, input) in signable_inputs.iter().enumerate() {
        let key = deps.keys.derive(Chain::Btc, input.utxo.address_index).await?;
        let signing_key = match key {
            DerivedKey::Secp256k1(k) => k,
            DerivedKey::Ed25519(_) => {
                return Err(CoreError::KeyDerivation("expected a secp256k1 key for BTC".into()));
            }
        };
        let pubkey_point = signing_key.verifying_key().to_encoded_point(true);
        let pubkey_bytes = pubkey_point.as_bytes().to_vec();
        let pubkey_hash = hash160(&pubkey_bytes);
        let script_code = btc::p2wpkh_script_pubkey(&pubkey_hash);
        let sighash = btc::bip143_sighash(
            &signable_inputs,
            i,
            &script_code,
            input.utxo.value_sats,
            &dest_script,
            output_value,
        );
        let sig = btc::sign_input(&signing_key, &sighash);
        witnesses.push((sig, pubkey_bytes));
        // `signing_key` (and the wrapping `DerivedKey`) drops here, zeroizing.
    }

    let signed_tx = btc::serialize_signed(&signable_inputs, &witnesses, &dest_script, output_value);
    let raw_hex = hex::encode(&signed_tx);

    let row = TxState::new_pending(
        ctx.sweep_id,
        Chain::Btc,
        Token::Native,
        0,
        "consolidated",
        ctx.destination.clone(),
        Amount(output_value as u128),
    );
    let tx_state_id = row.id;
    deps.store.create(row).await?;
    deps.store
        .update_status(tx_state_id, TxStatus::Broadcasting, None, None)
        .await?;

    let broadcast = deps.rpc.broadcast_raw_hex(&raw_hex).await;
    let txid = match broadcast {
        Ok(txid) => txid,
        Err(e) => {
            deps.store
                .update_status(tx_state_id, TxStatus::Failed, None, Some(e.to_string()))
                .await?;
            result.push(SourceResult {
                address: Address::new(Chain::Btc, 0, "consolidated"),
                tx_state_id: Some(tx_state_id),
                tx_hash: None,
                amount: None,
                succeeded: false,
                error: Some(e.to_string()),
            });
            return Ok(result);
        }
    };

    deps.store
        .update_status(tx_state_id, TxStatus::Confirming, Some(txid.clone()), None)
        .await?;

    for utxo in &utxos {
        deps.audit
            .record(AuditRow {
                chain: Chain::Btc,
                tx_hash: txid.clone(),
                from_address: utxo.owner_address.clone(),
                amount: Amount(utxo.value_sats as u128),
                status: AuditStatus::Pending,
            })
            .await?;
    }

    result.push(SourceResult {
        address: Address::new(Chain::Btc, 0, "consolidated"),
        tx_state_id: Some(tx_state_id),
        tx_hash: Some(txid.clone()),
        amount: Some(Amount(output_value as u128)),
        succeeded: true,
        error: None,
    });

    spawn_confirmation_poller(deps, tx_state_id, txid);

    Ok(result)
}

/// Launches a background poller that queries tx-status on a fixed interval
/// until the transaction confirms, fails, or the timeout elapses (spec
/// §4.5.1). Runs on `deps.shutdown`'s tracker so shutdown can drain it.
fn spawn_confirmation_poller(deps: &BtcDeps, tx_state_id: crate::model::TxStateId, txid: String) {
    let deps = deps.clone();
    let cancellation = deps.shutdown.cancellation_token();
    deps.shutdown.spawn_tracked(async move {
        let interval = std::time::Duration::from_secs(deps.config.btc_poll_interval_secs);
        let deadline = tokio::time::Instant::now()
            + std::time::Duration::from_secs(deps.config.btc_poll_timeout_secs);

        loop {
            if cancellation.is_cancelled() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                if let Err(e) = deps
                    .store
                    .update_status(
                        tx_state_id,
                        TxStatus::Uncertain,
                        Some(txid.clone()),
                        Some("confirmation poll timed out".into()),
                    )
                    .await
                {
                    tracing::warn!(error = %e, "failed to record BTC confirmation timeout");
                }
                return;
            }

            match deps.rpc.fetch_tx_status(&txid).await {
                Ok(ProbeOutcome::Confirmed) => {
                    if let Err(e) = deps
                        .store
                        .update_status(tx_state_id, TxStatus::Confirmed, Some(txid.clone()), None)
                        .await
                    {
                        tracing::warn!(error = %e, "failed to record BTC confirmation");
                    }
                    if let Err(e) = deps
                        .audit
                        .update_status(Chain::Btc, &txid, AuditStatus::Confirmed)
                        .await
                    {
                        tracing::warn!(error = %e, "failed to update BTC audit status");
                    }
                    return;
                }
                Ok(ProbeOutcome::Failed) => {
                    if let Err(e) = deps
                        .store
                        .update_status(
                            tx_state_id,
                            TxStatus::Failed,
                            Some(txid.clone()),
                            Some("transaction failed on-chain".into()),
                        )
                        .await
                    {
                        tracing::warn!(error = %e, "failed to record BTC failure");
                    }
                    if let Err(e) = deps.audit.update_status(Chain::Btc, &txid, AuditStatus::Failed).await {
                        tracing::warn!(error = %e, "failed to update BTC audit status");
                    }
                    return;
                }
                Ok(ProbeOutcome::Pending) | Ok(ProbeOutcome::NotFound) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "BTC confirmation probe failed, will retry");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancellation.cancelled() => return,
            }
        }
    });
}

fn bech32_to_script_pubkey(address: &str) -> Result<Vec<u8>, CoreError> {
    let (witness_version, program) =
        btc::bech32::decode_segwit_address(address).map_err(|e| CoreError::InvalidAddress(e.to_string()))?;
    if witness_version != 0 || program.len() != 20 {
        return Err(CoreError::InvalidAddress(
            "only P2WPKH (witness v0, 20-byte program) destinations are supported".into(),
        ));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&program);
    Ok(btc::p2wpkh_script_pubkey(&hash))
}

fn hash160(data: &[u8]) -> [u8; 20] {
    use sha2::{Digest, Sha256};
    let sha = Sha256::digest(data);
    let ripemd = ripemd::Ripemd160::digest(sha);
    ripemd.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bech32_rejects_non_p2wpkh_programs() {
        // BIP173's P2WSH test vector: a valid bech32 address, but a 32-byte
        // witness program. This crate is P2WPKH-only per spec and must
        // reject it on program length, not checksum.
        let err =
            bech32_to_script_pubkey("bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3")
                .unwrap_err();
        assert!(matches!(err, CoreError::InvalidAddress(_)));
    }

    #[test]
    fn bech32_accepts_a_valid_p2wpkh_address() {
        // BIP173's P2WPKH test vector.
        let script = bech32_to_script_pubkey("BC1QW508D6QEJXTDG4Y5R3ZARVARY0C5XW7KV8F3T4").unwrap();
        assert_eq!(script.len(), 25);
    }
}
