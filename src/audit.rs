//! Audit log facade for the `transactions` table named in spec §6: one row
//! per *physical* transaction (every BTC input individually, for instance),
//! distinct from `tx_state`'s logical-transfer rows. No donor implementation
//! exists for this in the source this port is drawn from, so the shape
//! below follows spec §6's field list directly. Same no-op-when-absent
//! facade behavior as [`crate::tx_state_store::TxStateStore`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{Amount, Chain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    pub chain: Chain,
    pub tx_hash: String,
    pub from_address: String,
    pub amount: Amount,
    pub status: AuditStatus,
}

#[async_trait::async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, row: AuditRow) -> Result<(), CoreError>;
    async fn update_status(&self, chain: Chain, tx_hash: &str, status: AuditStatus) -> Result<(), CoreError>;
}

pub struct NullAuditLog;

#[async_trait::async_trait]
impl AuditLog for NullAuditLog {
    async fn record(&self, row: AuditRow) -> Result<(), CoreError> {
        tracing::warn!(tx_hash = %row.tx_hash, "no audit log configured; dropping record");
        Ok(())
    }

    async fn update_status(&self, chain: Chain, tx_hash: &str, status: AuditStatus) -> Result<(), CoreError> {
        tracing::warn!(?chain, tx_hash, ?status, "no audit log configured; dropping update");
        Ok(())
    }
}
