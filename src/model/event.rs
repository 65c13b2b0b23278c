use crate::model::{Chain, SweepId, TxStateId, TxStatus};
use serde::{Deserialize, Serialize};

/// Tagged record fanned out by the event hub. In-memory only, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    TxStatus {
        sweep_id: SweepId,
        tx_id: TxStateId,
        chain: Chain,
        status: TxStatus,
    },
    TxComplete {
        sweep_id: SweepId,
        chain: Chain,
        success_count: usize,
        fail_count: usize,
    },
    TxError {
        sweep_id: SweepId,
        chain: Chain,
        message: String,
    },
}
