//! Unified preview/execute dispatcher (spec §4.10): validates chain/token/
//! destination, re-fetches funded addresses, serializes Execute calls per
//! chain, and routes to the right orchestrator flow.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::CoreError;
use crate::events::EventHub;
use crate::fees::{estimate_btc_fee, estimate_evm_fee, sol_fee_estimate};
use crate::keys::KeyFacade;
use crate::model::{
    AddressWithBalance, Amount, Chain, Event, FeeEstimate, SweepId, Token, TxStateId, TxStatus,
};
use crate::orchestrator::btc::BtcPreviewSnapshot;
use crate::orchestrator::evm_native::EvmDeps;
use crate::orchestrator::sol_native::SolDeps;
use crate::orchestrator::{btc, evm_native, evm_token, sol_native, sol_token, SweepContext, SweepResult};
use crate::rpc::{BtcRpc, EvmRpc, SolanaRpc};
use crate::shutdown::Shutdown;
use crate::tx_state_store::TxStateStore;

static SOL_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("static regex"));

/// External collaborator abstraction: funded-address discovery (balance
/// scanning) is explicitly out of scope for this crate (spec §1); the
/// dispatcher only consumes whatever the embedding application's scanner
/// currently knows.
#[async_trait::async_trait]
pub trait FundedAddressSource: Send + Sync {
    async fn funded_addresses(&self, chain: Chain, token: Token) -> Result<Vec<AddressWithBalance>, CoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewSend {
    pub chain: String,
    pub token: String,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundedAddressView {
    pub index: u32,
    pub address: String,
    pub balance: Amount,
    pub has_gas: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResult {
    pub funded_count: usize,
    pub total_amount: Amount,
    pub fee_estimate: FeeEstimate,
    pub net_amount: Amount,
    pub tx_count: usize,
    pub needs_gas_pre_seed: bool,
    pub gas_pre_seed_count: usize,
    pub funded_addresses: Vec<FundedAddressView>,
    /// BTC only: the UTXO snapshot Execute must be handed back so it can
    /// re-validate against the live UTXO set (spec §4.3).
    pub btc_preview: Option<BtcPreviewSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteSend {
    pub chain: String,
    pub token: String,
    pub destination: String,
    /// Echoed back from `PreviewResult::btc_preview`; ignored for non-BTC
    /// chains.
    #[serde(default)]
    pub btc_preview: Option<BtcPreviewSnapshot>,
    /// The buffered gas price `PreviewResult::fee_estimate` carried for EVM;
    /// ignored for non-EVM chains. Guards against a live price spike between
    /// preview and execute (spec §4.3).
    #[serde(default)]
    pub expected_gas_price_wei: Option<u128>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResumeRequest {
    pub sweep_id: SweepId,
    /// Defaults to the destination the original sweep used.
    pub destination: Option<String>,
}

/// Terminal/non-terminal breakdown for a sweep (spec §6 `GetResumeSummary`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResumeSummary {
    pub total: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub uncertain: usize,
    /// Rows an `ExecuteResume` call would re-drive (failed + uncertain).
    pub to_retry: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedTxResult {
    pub address_index: u32,
    pub from: String,
    pub hash: Option<String>,
    pub amount: Option<Amount>,
    pub status: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedSendResult {
    pub sweep_id: SweepId,
    pub success_count: usize,
    pub fail_count: usize,
    pub results: Vec<UnifiedTxResult>,
}

fn validate_chain_token(chain: Chain, token: Token) -> Result<(), CoreError> {
    if !chain.supports(token) {
        return Err(CoreError::InvalidToken {
            chain,
            token: token.to_string(),
        });
    }
    Ok(())
}

/// Destination validation rule per chain (spec §4.10 step 2): bech32 decode
/// for BTC, `0x`-prefixed hex-address accept for EVM, base58 regex length
/// 32-44 for SOL.
fn validate_destination(chain: Chain, destination: &str) -> Result<(), CoreError> {
    let invalid = |reason: String| CoreError::InvalidDestination { chain, reason };
    match chain {
        Chain::Btc => {
            crate::serialization::btc::bech32::decode_segwit_address(destination)
                .map_err(|e| invalid(e.to_string()))?;
        }
        Chain::Evm => {
            if !destination.starts_with("0x") || destination.len() != 42 || !destination[2..].chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid("expected a 0x-prefixed 20-byte hex address".into()));
            }
        }
        Chain::Sol => {
            if !SOL_ADDRESS_RE.is_match(destination) {
                return Err(invalid("expected a 32-44 character base58 address".into()));
            }
        }
    }
    Ok(())
}

/// Wires every per-chain adapter plus shared facilities the dispatcher
/// needs to route Preview/Execute calls. Routing-level; orchestrator flows
/// receive their own narrower `*Deps` bundles built from these.
pub struct Dispatcher {
    pub config: Arc<Config>,
    pub btc_rpc: Arc<dyn BtcRpc>,
    pub evm_rpc: Arc<dyn EvmRpc>,
    pub sol_rpc: Arc<dyn SolanaRpc>,
    pub keys: Arc<dyn KeyFacade>,
    pub store: Arc<dyn TxStateStore>,
    pub audit: Arc<dyn AuditLog>,
    pub addresses: Arc<dyn FundedAddressSource>,
    pub hub: EventHub,
    pub shutdown: Shutdown,
    /// Per-chain mutex serializing Execute calls (spec §5): nonces (EVM)
    /// and blockhash-bound signed transactions (SOL) must not race.
    chain_locks: DashMap<Chain, Arc<Mutex<()>>>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<Config>,
        btc_rpc: Arc<dyn BtcRpc>,
        evm_rpc: Arc<dyn EvmRpc>,
        sol_rpc: Arc<dyn SolanaRpc>,
        keys: Arc<dyn KeyFacade>,
        store: Arc<dyn TxStateStore>,
        audit: Arc<dyn AuditLog>,
        addresses: Arc<dyn FundedAddressSource>,
        hub: EventHub,
        shutdown: Shutdown,
    ) -> Self {
        Dispatcher {
            config,
            btc_rpc,
            evm_rpc,
            sol_rpc,
            keys,
            store,
            audit,
            addresses,
            hub,
            shutdown,
            chain_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, chain: Chain) -> Arc<Mutex<()>> {
        Arc::clone(self.chain_locks.entry(chain).or_insert_with(|| Arc::new(Mutex::new(()))).value())
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn preview(&self, req: PreviewSend) -> Result<PreviewResult, CoreError> {
        let chain: Chain = req.chain.parse()?;
        let token: Token = req.token.parse()?;
        validate_chain_token(chain, token)?;
        validate_destination(chain, &req.destination)?;

        let sources = self.addresses.funded_addresses(chain, token).await?;
        if sources.is_empty() {
            return Err(CoreError::NoFundedAddresses {
                chain,
                token: token.to_string(),
            });
        }

        let total_amount: u128 = sources.iter().map(|s| s.balance_of(token).0).sum();
        let fee_estimate = self.estimate_fee(chain).await?;
        let (net_amount, tx_count) = self.estimate_net_and_tx_count(chain, token, &sources, total_amount, &fee_estimate);

        let needs_gas = chain != Chain::Btc && token != Token::Native;
        let gas_pre_seed_count = if needs_gas {
            self.count_gas_short_sources(chain, &sources, &fee_estimate).await?
        } else {
            0
        };

        let funded_addresses = sources
            .iter()
            .map(|s| FundedAddressView {
                index: s.address.index,
                address: s.address.value.clone(),
                balance: s.balance_of(token),
                has_gas: s.native_balance.0 > 0,
            })
            .collect();

        let btc_preview = if chain == Chain::Btc {
            Some(self.snapshot_btc_utxos(&sources).await?)
        } else {
            None
        };

        Ok(PreviewResult {
            funded_count: sources.len(),
            total_amount: Amount(total_amount),
            fee_estimate,
            net_amount,
            tx_count,
            needs_gas_pre_seed: gas_pre_seed_count > 0,
            gas_pre_seed_count,
            funded_addresses,
            btc_preview,
        })
    }

    /// Fetches the live UTXO set for every source and summarizes it, so
    /// `execute()` can re-validate against this snapshot before broadcasting
    /// (spec §4.3 BTC tolerance).
    async fn snapshot_btc_utxos(&self, sources: &[AddressWithBalance]) -> Result<BtcPreviewSnapshot, CoreError> {
        let mut utxo_count = 0usize;
        let mut total_value_sats = 0u64;
        for source in sources {
            let utxos = self.btc_rpc.fetch_utxos(&source.address.value).await?;
            utxo_count += utxos.len();
            total_value_sats += utxos.iter().map(|u| u.value_sats).sum::<u64>();
        }
        Ok(BtcPreviewSnapshot {
            utxo_count,
            total_value_sats,
        })
    }

    async fn estimate_fee(&self, chain: Chain) -> Result<FeeEstimate, CoreError> {
        match chain {
            Chain::Btc => estimate_btc_fee(self.btc_rpc.as_ref(), &self.config).await,
            Chain::Evm => estimate_evm_fee(self.evm_rpc.as_ref(), &self.config).await,
            Chain::Sol => Ok(sol_fee_estimate()),
        }
    }

    fn estimate_net_and_tx_count(
        &self,
        chain: Chain,
        token: Token,
        sources: &[AddressWithBalance],
        total_amount: u128,
        fee: &FeeEstimate,
    ) -> (Amount, usize) {
        match (chain, fee) {
            (Chain::Btc, FeeEstimate::Btc { tiers }) => {
                let fee_rate = tiers.default_tier();
                let fee_sats = crate::serialization::btc::estimate_fee_sats(
                    sources.len() as u64,
                    1,
                    fee_rate,
                    self.config.btc_fee_safety_margin_pct,
                );
                (Amount(total_amount.saturating_sub(fee_sats as u128)), 1)
            }
            (Chain::Evm, FeeEstimate::Evm { buffered_gas_price_wei }) => {
                let gas_limit = match token {
                    Token::Native => self.config.evm_gas_limits.native_transfer,
                    _ => self.config.evm_gas_limits.token_transfer,
                };
                let per_tx_cost = *buffered_gas_price_wei * gas_limit as u128;
                let tx_count = sources.len();
                let total_cost = per_tx_cost * tx_count as u128;
                (Amount(total_amount.saturating_sub(total_cost)), tx_count)
            }
            (Chain::Sol, FeeEstimate::Sol { lamports_per_signature }) => {
                let total_cost = (*lamports_per_signature as u128) * sources.len() as u128;
                (Amount(total_amount.saturating_sub(total_cost)), sources.len())
            }
            _ => (Amount(total_amount), sources.len()),
        }
    }

    async fn count_gas_short_sources(
        &self,
        chain: Chain,
        sources: &[AddressWithBalance],
        fee: &FeeEstimate,
    ) -> Result<usize, CoreError> {
        let FeeEstimate::Evm { buffered_gas_price_wei } = fee else {
            return Ok(0);
        };
        let gas_cost = *buffered_gas_price_wei * self.config.evm_gas_limits.token_transfer as u128;
        let _ = chain;
        Ok(sources.iter().filter(|s| s.native_balance.0 < gas_cost).count())
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn execute(&self, req: ExecuteSend) -> Result<UnifiedSendResult, CoreError> {
        let chain: Chain = req.chain.parse()?;
        let token: Token = req.token.parse()?;
        validate_chain_token(chain, token)?;
        validate_destination(chain, &req.destination)?;

        let lock = self.lock_for(chain);
        let _guard = lock.try_lock().map_err(|_| CoreError::SendBusy(chain))?;

        let sources = self.addresses.funded_addresses(chain, token).await?;
        if sources.is_empty() {
            return Err(CoreError::NoFundedAddresses {
                chain,
                token: token.to_string(),
            });
        }

        let sweep_id = SweepId::new_random();
        let ctx = SweepContext {
            sweep_id,
            cancellation: self.shutdown.cancellation_token(),
            sources,
            destination: req.destination.clone(),
        };

        let result = self
            .route(chain, token, &ctx, req.btc_preview.as_ref(), req.expected_gas_price_wei)
            .await;
        self.finish(sweep_id, chain, result)
    }

    /// Re-drives the non-terminal/failed rows of a prior sweep under the
    /// same `sweepID` (spec §6 `ExecuteResume`, §7 "the only path that
    /// re-broadcasts after a failed sweep"). New `TxState` rows are created
    /// with fresh ids, preserving SWEEP-COHESION and the monotonicity of the
    /// rows it supersedes.
    #[tracing::instrument(skip(self), err)]
    pub async fn execute_resume(&self, req: ExecuteResumeRequest) -> Result<UnifiedSendResult, CoreError> {
        let rows = self.store.list_by_sweep(req.sweep_id).await?;
        let first = rows
            .first()
            .ok_or_else(|| CoreError::SweepNotFound(req.sweep_id.to_string()))?;
        let chain = first.chain;
        let token = first.token;
        let destination = req.destination.unwrap_or_else(|| first.to_address.clone());
        validate_destination(chain, &destination)?;

        let retry_indices: std::collections::HashSet<u32> = rows
            .iter()
            .filter(|r| matches!(r.status, TxStatus::Failed | TxStatus::Uncertain))
            .map(|r| r.address_index)
            .collect();
        if retry_indices.is_empty() {
            return Err(CoreError::SweepNotFound(format!(
                "sweep {} has no failed or uncertain rows to retry",
                req.sweep_id
            )));
        }

        let lock = self.lock_for(chain);
        let _guard = lock.try_lock().map_err(|_| CoreError::SendBusy(chain))?;

        let all_sources = self.addresses.funded_addresses(chain, token).await?;
        // BTC sweeps consolidate every source into a single row, so there is
        // nothing per-address to filter by; any other chain retries only the
        // addresses that failed or went uncertain last time.
        let sources: Vec<AddressWithBalance> = if chain == Chain::Btc {
            all_sources
        } else {
            all_sources
                .into_iter()
                .filter(|s| retry_indices.contains(&s.address.index))
                .collect()
        };
        if sources.is_empty() {
            return Err(CoreError::NoFundedAddresses {
                chain,
                token: token.to_string(),
            });
        }

        let ctx = SweepContext {
            sweep_id: req.sweep_id,
            cancellation: self.shutdown.cancellation_token(),
            sources,
            destination: destination.clone(),
        };

        let btc_preview = if chain == Chain::Btc {
            Some(self.snapshot_btc_utxos(&ctx.sources).await?)
        } else {
            None
        };
        let expected_gas_price_wei = if chain == Chain::Evm {
            Some(self.evm_rpc.suggest_gas_price().await?)
        } else {
            None
        };

        let result = self
            .route(chain, token, &ctx, btc_preview.as_ref(), expected_gas_price_wei)
            .await;
        self.finish(req.sweep_id, chain, result)
    }

    /// Publishes the completion event and normalizes a `SweepResult` into the
    /// dispatcher's wire type. Shared by `execute` and `execute_resume`.
    fn finish(
        &self,
        sweep_id: SweepId,
        chain: Chain,
        result: Result<SweepResult, CoreError>,
    ) -> Result<UnifiedSendResult, CoreError> {
        match &result {
            Ok(sweep_result) => {
                self.hub.publish(Event::TxComplete {
                    sweep_id,
                    chain,
                    success_count: sweep_result.success_count,
                    fail_count: sweep_result.fail_count,
                });
            }
            Err(e) => {
                self.hub.publish(Event::TxError {
                    sweep_id,
                    chain,
                    message: e.to_string(),
                });
            }
        }

        let sweep_result = result?;
        Ok(UnifiedSendResult {
            sweep_id: sweep_result.sweep_id,
            success_count: sweep_result.success_count,
            fail_count: sweep_result.fail_count,
            results: sweep_result
                .per_source
                .into_iter()
                .map(|r| UnifiedTxResult {
                    address_index: r.address.index,
                    from: r.address.value,
                    hash: r.tx_hash,
                    amount: r.amount,
                    status: if r.succeeded { "broadcast".to_string() } else { "failed".to_string() },
                    error: r.error,
                })
                .collect(),
        })
    }

    /// Returns every `TxState` row belonging to a sweep (spec §6 `GetSweep`).
    pub async fn get_sweep(&self, sweep_id: SweepId) -> Result<Vec<crate::model::TxState>, CoreError> {
        self.store.list_by_sweep(sweep_id).await
    }

    /// Terminal/non-terminal breakdown for a sweep (spec §6 `GetResumeSummary`).
    pub async fn get_resume_summary(&self, sweep_id: SweepId) -> Result<ResumeSummary, CoreError> {
        let rows = self.store.list_by_sweep(sweep_id).await?;
        let mut summary = ResumeSummary {
            total: rows.len(),
            confirmed: 0,
            failed: 0,
            uncertain: 0,
            to_retry: 0,
        };
        for row in &rows {
            match row.status {
                TxStatus::Confirmed => summary.confirmed += 1,
                TxStatus::Failed => {
                    summary.failed += 1;
                    summary.to_retry += 1;
                }
                TxStatus::Uncertain => {
                    summary.uncertain += 1;
                    summary.to_retry += 1;
                }
                _ => {}
            }
        }
        Ok(summary)
    }

    /// Non-terminal rows, optionally filtered to one chain (spec §6
    /// `GetPendingTxStates?chain=...`).
    pub async fn get_pending_tx_states(&self, chain: Option<Chain>) -> Result<Vec<crate::model::TxState>, CoreError> {
        self.store.list_pending_filtered(chain).await
    }

    /// Acknowledges a row so it drops out of `get_pending_tx_states` (spec §6
    /// `DismissTxState`).
    pub async fn dismiss_tx_state(&self, id: TxStateId) -> Result<(), CoreError> {
        self.store.dismiss(id).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn route(
        &self,
        chain: Chain,
        token: Token,
        ctx: &SweepContext,
        btc_preview: Option<&BtcPreviewSnapshot>,
        expected_gas_price_wei: Option<u128>,
    ) -> Result<SweepResult, CoreError> {
        match (chain, token) {
            (Chain::Btc, Token::Native) => {
                let deps = btc::BtcDeps {
                    rpc: self.btc_rpc.clone(),
                    keys: self.keys.clone(),
                    store: self.store.clone(),
                    audit: self.audit.clone(),
                    config: self.config.clone(),
                    shutdown: self.shutdown.clone(),
                };
                let fee = estimate_btc_fee(self.btc_rpc.as_ref(), &self.config).await?;
                let fee_rate = match fee {
                    FeeEstimate::Btc { tiers } => tiers.default_tier(),
                    _ => unreachable!("estimate_btc_fee always returns FeeEstimate::Btc"),
                };
                btc::execute(ctx, &deps, btc_preview, fee_rate).await
            }
            (Chain::Evm, Token::Native) => {
                let deps = EvmDeps {
                    rpc: self.evm_rpc.clone(),
                    keys: self.keys.clone(),
                    store: self.store.clone(),
                    audit: self.audit.clone(),
                    config: self.config.clone(),
                    shutdown: self.shutdown.clone(),
                };
                let gas_price = self.evm_rpc.suggest_gas_price().await?;
                let buffered = ((gas_price as f64) * self.config.evm_gas_buffer_multiple).ceil() as u128;
                evm_native::execute(ctx, &deps, buffered, expected_gas_price_wei).await
            }
            (Chain::Evm, token @ (Token::Usdc | Token::Usdt)) => {
                let deps = EvmDeps {
                    rpc: self.evm_rpc.clone(),
                    keys: self.keys.clone(),
                    store: self.store.clone(),
                    audit: self.audit.clone(),
                    config: self.config.clone(),
                    shutdown: self.shutdown.clone(),
                };
                let contract = self.token_contract(token)?;
                let gas_price = self.evm_rpc.suggest_gas_price().await?;
                let buffered = ((gas_price as f64) * self.config.evm_gas_buffer_multiple).ceil() as u128;
                evm_token::execute(ctx, &deps, token, &contract, buffered, expected_gas_price_wei).await
            }
            (Chain::Sol, Token::Native) => {
                let deps = SolDeps {
                    rpc: self.sol_rpc.clone(),
                    keys: self.keys.clone(),
                    store: self.store.clone(),
                    audit: self.audit.clone(),
                    config: self.config.clone(),
                    shutdown: self.shutdown.clone(),
                };
                sol_native::execute(ctx, &deps).await
            }
            (Chain::Sol, token @ (Token::Usdc | Token::Usdt)) => {
                let deps = SolDeps {
                    rpc: self.sol_rpc.clone(),
                    keys: self.keys.clone(),
                    store: self.store.clone(),
                    audit: self.audit.clone(),
                    config: self.config.clone(),
                    shutdown: self.shutdown.clone(),
                };
                let mint = self.token_mint(token)?;
                sol_token::execute(ctx, &deps, token, &mint).await
            }
            (Chain::Btc, _) => Err(CoreError::InvalidToken {
                chain,
                token: token.to_string(),
            }),
        }
    }

    fn token_contract(&self, token: Token) -> Result<String, CoreError> {
        let configured = match token {
            Token::Usdc => &self.config.evm_usdc_contract,
            Token::Usdt => &self.config.evm_usdt_contract,
            Token::Native => return Err(CoreError::InvalidToken {
                chain: Chain::Evm,
                token: token.to_string(),
            }),
        };
        configured
            .as_ref()
            .map(|v| v.0.clone())
            .ok_or_else(|| CoreError::InvalidToken {
                chain: Chain::Evm,
                token: token.to_string(),
            })
    }

    fn token_mint(&self, token: Token) -> Result<String, CoreError> {
        let configured = match token {
            Token::Usdc => &self.config.sol_usdc_mint,
            Token::Usdt => &self.config.sol_usdt_mint,
            Token::Native => return Err(CoreError::InvalidToken {
                chain: Chain::Sol,
                token: token.to_string(),
            }),
        };
        configured
            .as_ref()
            .map(|v| v.0.clone())
            .ok_or_else(|| CoreError::InvalidToken {
                chain: Chain::Sol,
                token: token.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btc_destination_requires_valid_bech32() {
        assert!(validate_destination(Chain::Btc, "BC1QW508D6QEJXTDG4Y5R3ZARVARY0C5XW7KV8F3T4").is_ok());
        assert!(validate_destination(Chain::Btc, "not-an-address").is_err());
    }

    #[test]
    fn evm_destination_requires_0x_prefixed_hex() {
        assert!(validate_destination(Chain::Evm, "0x0000000000000000000000000000000000000001").is_ok());
        assert!(validate_destination(Chain::Evm, "0xnothex").is_err());
        assert!(validate_destination(Chain::Evm, "0000000000000000000000000000000000000001").is_err());
    }

    #[test]
    fn sol_destination_requires_base58_in_length_range() {
        assert!(validate_destination(Chain::Sol, "11111111111111111111111111111111").is_ok());
        assert!(validate_destination(Chain::Sol, "short").is_err());
        assert!(validate_destination(Chain::Sol, "0OIl-not-base58-charset-here-xx").is_err());
    }

    #[test]
    fn chain_token_validation_rejects_btc_stablecoins() {
        assert!(validate_chain_token(Chain::Btc, Token::Usdc).is_err());
        assert!(validate_chain_token(Chain::Btc, Token::Native).is_ok());
    }
}
