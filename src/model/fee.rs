use serde::{Deserialize, Serialize};

/// Five-tier sat/vB BTC fee schedule, as returned by the provider's fee
/// estimation endpoint (or the configured fallback table).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BtcFeeTiers {
    pub fastest: f64,
    pub half_hour: f64,
    pub hour: f64,
    pub economy: f64,
    pub minimum: f64,
}

impl BtcFeeTiers {
    /// The engine's default tier: the half-hour rate.
    pub fn default_tier(&self) -> f64 {
        self.half_hour
    }
}

/// Per-chain fee policy returned by the fee estimator. This is a policy, not
/// a single number: BTC carries a tier table, EVM a single buffered wei
/// price, SOL a fixed lamport-per-signature constant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "chain")]
pub enum FeeEstimate {
    Btc { tiers: BtcFeeTiers },
    Evm { buffered_gas_price_wei: u128 },
    Sol { lamports_per_signature: u64 },
}
