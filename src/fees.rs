//! Fee / cost estimator (spec §4.3). Returns a policy, not a number.

use crate::config::Config;
use crate::error::CoreError;
use crate::model::{BtcFeeTiers, FeeEstimate};
use crate::rpc::{BtcRpc, EvmRpc};

/// SOL: constant lamports per required signature (each sweep tx has exactly
/// one signer, so this is also the per-tx fee).
pub const SOL_LAMPORTS_PER_SIGNATURE: u64 = 5_000;

fn fallback_btc_tiers(_config: &Config) -> BtcFeeTiers {
    BtcFeeTiers {
        fastest: 20.0,
        half_hour: 10.0,
        hour: 5.0,
        economy: 2.0,
        minimum: 1.0,
    }
}

#[tracing::instrument(skip(rpc, config), err)]
pub async fn estimate_btc_fee(rpc: &dyn BtcRpc, config: &Config) -> Result<FeeEstimate, CoreError> {
    let tiers = match rpc.fetch_fee_tiers().await {
        Ok(tiers) => tiers,
        Err(e) => {
            tracing::warn!(error = %e, "falling back to the default BTC fee tier table");
            fallback_btc_tiers(config)
        }
    };
    Ok(FeeEstimate::Btc { tiers })
}

/// `bufferedGasPrice = suggested * multiplier` (conventionally ~1.2, i.e. +20%).
#[tracing::instrument(skip(rpc, config), err)]
pub async fn estimate_evm_fee(rpc: &dyn EvmRpc, config: &Config) -> Result<FeeEstimate, CoreError> {
    let suggested = rpc.suggest_gas_price().await?;
    let buffered = ((suggested as f64) * config.evm_gas_buffer_multiple).ceil() as u128;
    Ok(FeeEstimate::Evm {
        buffered_gas_price_wei: buffered,
    })
}

pub fn sol_fee_estimate() -> FeeEstimate {
    FeeEstimate::Sol {
        lamports_per_signature: SOL_LAMPORTS_PER_SIGNATURE,
    }
}

/// Preview→Execute tolerance (EVM): abort if the live buffered price is
/// more than `multiple`x the previewed value.
pub fn check_gas_price_spike(preview_wei: u128, live_wei: u128, multiple: f64) -> Result<(), CoreError> {
    if (live_wei as f64) > (preview_wei as f64) * multiple {
        return Err(CoreError::GasPriceSpiked {
            preview: preview_wei.to_string(),
            live: live_wei.to_string(),
            multiple: multiple.to_string(),
        });
    }
    Ok(())
}

/// Preview→Execute tolerance (BTC): reject if the live UTXO count/value
/// diverged from the preview snapshot by more than the configured
/// tolerance.
pub fn check_utxo_divergence(
    preview_count: usize,
    live_count: usize,
    preview_value_sats: u64,
    live_value_sats: u64,
    count_drop_pct: f64,
    value_drop_pct: f64,
) -> Result<(), CoreError> {
    if preview_count == 0 {
        return Ok(());
    }
    let count_drop = 100.0 * (preview_count as f64 - live_count as f64) / preview_count as f64;
    if count_drop > count_drop_pct {
        return Err(CoreError::UtxoDiverged(format!(
            "UTXO count dropped {count_drop:.2}% (preview {preview_count}, live {live_count})"
        )));
    }
    if preview_value_sats > 0 {
        let value_drop = 100.0 * (preview_value_sats as f64 - live_value_sats as f64) / preview_value_sats as f64;
        if value_drop > value_drop_pct {
            return Err(CoreError::UtxoDiverged(format!(
                "UTXO value dropped {value_drop:.2}% (preview {preview_value_sats}, live {live_value_sats})"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_price_spike_triggers_past_the_multiple() {
        assert!(check_gas_price_spike(100, 250, 2.0).is_err());
        assert!(check_gas_price_spike(100, 199, 2.0).is_ok());
    }

    #[test]
    fn utxo_divergence_tolerates_small_drops() {
        assert!(check_utxo_divergence(100, 96, 1_000_000, 1_000_000, 5.0, 3.0).is_ok());
        assert!(check_utxo_divergence(100, 90, 1_000_000, 1_000_000, 5.0, 3.0).is_err());
    }

    #[test]
    fn utxo_divergence_checks_value_drop_independently() {
        assert!(check_utxo_divergence(100, 100, 1_000_000, 960_000, 5.0, 3.0).is_err());
    }
}
