//! Runtime configuration, grounded on the teacher's `config::Config` +
//! `LiteralOrEnv<T>` pattern: most values are a literal JSON string, but a
//! `"$VAR"`/`"${VAR}"` value is resolved against the process environment at
//! deserialize time. This lets RPC URLs or the mnemonic path live outside
//! the config file without a bespoke env-loading layer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::str::FromStr;

use crate::model::Chain;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("environment variable {0} referenced by config is not set")]
    MissingEnvVar(String),
}

/// Wraps a value that may be given literally or as `"$VAR"` / `"${VAR}"` in
/// the source JSON, resolved against `std::env` at deserialize time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(pub T);

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

fn parse_env_var_syntax(raw: &str) -> Option<&str> {
    if let Some(rest) = raw.strip_prefix("${") {
        rest.strip_suffix('}')
    } else {
        raw.strip_prefix('$')
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let resolved = match parse_env_var_syntax(&raw) {
            Some(var_name) => std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "environment variable {var_name} referenced by config is not set"
                ))
            })?,
            None => raw,
        };
        resolved
            .parse::<T>()
            .map(LiteralOrEnv)
            .map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// One RPC provider entry: a URL and an optional human label used in
/// `provider_health` rows and log lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub url: LiteralOrEnv<url::Url>,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_btc_fee_safety_margin_pct() -> f64 {
    2.0
}

fn default_gas_spike_multiple() -> f64 {
    2.0
}

fn default_gas_buffer_multiple() -> f64 {
    1.2
}

fn default_utxo_count_drop_pct() -> f64 {
    5.0
}

fn default_utxo_value_drop_pct() -> f64 {
    3.0
}

fn default_hub_buffer_size() -> usize {
    64
}

fn default_btc_poll_interval_secs() -> u64 {
    15
}

fn default_btc_poll_timeout_secs() -> u64 {
    3600
}

fn default_evm_poll_interval_secs() -> u64 {
    5
}

fn default_evm_poll_timeout_secs() -> u64 {
    600
}

fn default_sol_poll_interval_secs() -> u64 {
    2
}

fn default_sol_poll_timeout_secs() -> u64 {
    60
}

fn default_reconciler_max_age_secs() -> u64 {
    86_400
}

/// Per-chain RPC endpoints plus the policy constants spec §4.3, §4.8 and §5
/// name as "configured". Loaded once at startup; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub btc_providers: Vec<ProviderConfig>,
    pub evm_providers: Vec<ProviderConfig>,
    pub sol_providers: Vec<ProviderConfig>,

    pub evm_chain_id: u64,
    pub evm_usdc_contract: Option<LiteralOrEnv<String>>,
    pub evm_usdt_contract: Option<LiteralOrEnv<String>>,
    pub sol_usdc_mint: Option<LiteralOrEnv<String>>,
    pub sol_usdt_mint: Option<LiteralOrEnv<String>>,

    pub mnemonic_path: LiteralOrEnv<String>,

    #[serde(default = "default_btc_fee_safety_margin_pct")]
    pub btc_fee_safety_margin_pct: f64,
    #[serde(default = "default_utxo_count_drop_pct")]
    pub btc_utxo_count_drop_tolerance_pct: f64,
    #[serde(default = "default_utxo_value_drop_pct")]
    pub btc_utxo_value_drop_tolerance_pct: f64,

    #[serde(default = "default_gas_spike_multiple")]
    pub evm_gas_spike_multiple: f64,
    #[serde(default = "default_gas_buffer_multiple")]
    pub evm_gas_buffer_multiple: f64,
    #[serde(default)]
    pub evm_gas_limits: GasLimits,
    #[serde(default)]
    pub evm_gas_floor_wei: u128,

    #[serde(default = "default_hub_buffer_size")]
    pub event_hub_buffer_size: usize,

    #[serde(default = "default_btc_poll_interval_secs")]
    pub btc_poll_interval_secs: u64,
    #[serde(default = "default_btc_poll_timeout_secs")]
    pub btc_poll_timeout_secs: u64,
    #[serde(default = "default_evm_poll_interval_secs")]
    pub evm_poll_interval_secs: u64,
    #[serde(default = "default_evm_poll_timeout_secs")]
    pub evm_poll_timeout_secs: u64,
    #[serde(default = "default_sol_poll_interval_secs")]
    pub sol_poll_interval_secs: u64,
    #[serde(default = "default_sol_poll_timeout_secs")]
    pub sol_poll_timeout_secs: u64,

    #[serde(default = "default_reconciler_max_age_secs")]
    pub reconciler_max_age_secs: u64,
}

/// Fixed per-operation EVM gas limits (spec §4.1: "a fixed constant per
/// operation").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasLimits {
    pub native_transfer: u64,
    pub token_transfer: u64,
    pub token_balance_read: u64,
}

impl Default for GasLimits {
    fn default() -> Self {
        GasLimits {
            native_transfer: 21_000,
            token_transfer: 65_000,
            token_balance_read: 30_000,
        }
    }
}

impl Config {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let raw = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })
    }

    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let path = std::env::var("SWEEP_CONFIG_PATH").unwrap_or_else(|_| "config.json".into());
        Self::load_from_path(path)
    }

    pub fn providers_for(&self, chain: Chain) -> &[ProviderConfig] {
        match chain {
            Chain::Btc => &self.btc_providers,
            Chain::Evm => &self.evm_providers,
            Chain::Sol => &self.sol_providers,
        }
    }
}

/// Arbitrary key/value settings layered on top of `Config`, mirroring the
/// `settings` table named in spec §6. Out of scope to persist here; this
/// type exists so dispatcher code has somewhere to put ad-hoc overrides
/// without threading new `Config` fields through the whole crate.
pub type Settings = HashMap<String, String>;

pub fn parse_settings_value<T: DeserializeOwned>(settings: &Settings, key: &str) -> Option<T> {
    settings
        .get(key)
        .and_then(|v| serde_json::from_str(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_or_env_resolves_dollar_prefixed_var() {
        unsafe {
            std::env::set_var("SWEEP_TEST_VAR", "42");
        }
        let json = serde_json::json!("$SWEEP_TEST_VAR");
        let parsed: LiteralOrEnv<u64> = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.0, 42);
    }

    #[test]
    fn literal_or_env_resolves_braced_var() {
        unsafe {
            std::env::set_var("SWEEP_TEST_VAR2", "hello");
        }
        let json = serde_json::json!("${SWEEP_TEST_VAR2}");
        let parsed: LiteralOrEnv<String> = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.0, "hello");
    }

    #[test]
    fn literal_or_env_passes_through_plain_literal() {
        let json = serde_json::json!("100");
        let parsed: LiteralOrEnv<u32> = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.0, 100);
    }
}
