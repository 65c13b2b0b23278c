//! Sweep orchestrator (spec §4.5): five flows (BTC, EVM-native, EVM-token,
//! SOL-native, SOL-token) sharing one common shape — enumerate funded
//! sources, validate, build+sign+broadcast, schedule confirmation, and
//! absorb per-source failures into the aggregate result rather than
//! aborting the whole sweep.

pub mod btc;
pub mod evm_native;
pub mod evm_token;
pub mod sol_native;
pub mod sol_token;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::model::{Address, AddressWithBalance, Amount, SweepId, TxStateId};

/// Inputs common to every flow: cancellation, the funded sources to sweep,
/// and the destination.
pub struct SweepContext {
    pub sweep_id: SweepId,
    pub cancellation: CancellationToken,
    pub sources: Vec<AddressWithBalance>,
    pub destination: String,
}

impl SweepContext {
    /// Consulted between sources; the orchestrator must break the loop
    /// cleanly on cancellation rather than start a new source.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Per-source outcome, normalized later by the dispatcher into
/// `UnifiedSendResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceResult {
    pub address: Address,
    pub tx_state_id: Option<TxStateId>,
    pub tx_hash: Option<String>,
    pub amount: Option<Amount>,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Aggregate result of one flow invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub sweep_id: SweepId,
    pub success_count: usize,
    pub fail_count: usize,
    pub per_source: Vec<SourceResult>,
}

impl SweepResult {
    pub fn empty(sweep_id: SweepId) -> Self {
        SweepResult {
            sweep_id,
            success_count: 0,
            fail_count: 0,
            per_source: Vec::new(),
        }
    }

    pub fn push(&mut self, result: SourceResult) {
        if result.succeeded {
            self.success_count += 1;
        } else {
            self.fail_count += 1;
        }
        self.per_source.push(result);
    }
}
