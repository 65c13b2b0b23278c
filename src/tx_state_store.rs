//! Transaction state machine persistence facade (spec §4.7). Three
//! operations plus the queries startup/resume/observation need. Storage may
//! be absent in tests — in that case the facade is a no-op that warns and
//! returns success, so the orchestrator is oblivious to whether persistence
//! is wired up.

use crate::error::CoreError;
use crate::model::{Chain, SweepId, TxState, TxStateId, TxStatus};

#[async_trait::async_trait]
pub trait TxStateStore: Send + Sync {
    async fn create(&self, row: TxState) -> Result<(), CoreError>;

    async fn update_status(
        &self,
        id: TxStateId,
        status: TxStatus,
        tx_hash: Option<String>,
        error: Option<String>,
    ) -> Result<(), CoreError>;

    async fn list_non_terminal(&self) -> Result<Vec<TxState>, CoreError>;

    async fn list_by_sweep(&self, sweep_id: SweepId) -> Result<Vec<TxState>, CoreError>;

    async fn has_confirmed_for(&self, sweep_id: SweepId, to_address: &str) -> Result<bool, CoreError>;

    async fn list_pending_filtered(&self, chain: Option<Chain>) -> Result<Vec<TxState>, CoreError>;

    /// Acknowledges a terminal row so it drops out of `list_pending_filtered`'s
    /// view (spec §6 `DismissTxState`). Does not delete the row.
    async fn dismiss(&self, id: TxStateId) -> Result<(), CoreError>;
}

/// No-op store used when no persistence handle is configured. Every write
/// succeeds and logs a warning; every read returns empty.
pub struct NullTxStateStore;

#[async_trait::async_trait]
impl TxStateStore for NullTxStateStore {
    async fn create(&self, row: TxState) -> Result<(), CoreError> {
        tracing::warn!(id = %row.id, "no tx_state store configured; dropping create");
        Ok(())
    }

    async fn update_status(
        &self,
        id: TxStateId,
        status: TxStatus,
        _tx_hash: Option<String>,
        _error: Option<String>,
    ) -> Result<(), CoreError> {
        tracing::warn!(%id, ?status, "no tx_state store configured; dropping update");
        Ok(())
    }

    async fn list_non_terminal(&self) -> Result<Vec<TxState>, CoreError> {
        Ok(Vec::new())
    }

    async fn list_by_sweep(&self, _sweep_id: SweepId) -> Result<Vec<TxState>, CoreError> {
        Ok(Vec::new())
    }

    async fn has_confirmed_for(&self, _sweep_id: SweepId, _to_address: &str) -> Result<bool, CoreError> {
        Ok(false)
    }

    async fn list_pending_filtered(&self, _chain: Option<Chain>) -> Result<Vec<TxState>, CoreError> {
        Ok(Vec::new())
    }

    async fn dismiss(&self, id: TxStateId) -> Result<(), CoreError> {
        tracing::warn!(%id, "no tx_state store configured; dropping dismiss");
        Ok(())
    }
}

/// In-memory store that tracks each row's current status and rejects a
/// write that `TxStatus::can_transition_to` disallows. Exists to exercise
/// the transition diagram in tests; a real persistence layer is expected to
/// apply the same check before committing an `update_status` write.
#[cfg(test)]
pub(crate) struct InMemoryTxStateStore {
    rows: std::sync::Mutex<std::collections::HashMap<TxStateId, TxState>>,
}

#[cfg(test)]
impl InMemoryTxStateStore {
    pub(crate) fn new() -> Self {
        InMemoryTxStateStore {
            rows: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub(crate) fn get(&self, id: TxStateId) -> Option<TxState> {
        self.rows.lock().expect("lock poisoned").get(&id).cloned()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl TxStateStore for InMemoryTxStateStore {
    async fn create(&self, row: TxState) -> Result<(), CoreError> {
        self.rows.lock().expect("lock poisoned").insert(row.id, row);
        Ok(())
    }

    async fn update_status(
        &self,
        id: TxStateId,
        status: TxStatus,
        tx_hash: Option<String>,
        error: Option<String>,
    ) -> Result<(), CoreError> {
        let mut rows = self.rows.lock().expect("lock poisoned");
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| CoreError::Database(format!("no tx_state row {id}")))?;
        if !row.status.can_transition_to(status) {
            return Err(CoreError::Database(format!(
                "illegal transition {:?} -> {:?} for row {id}",
                row.status, status
            )));
        }
        row.status = status;
        if tx_hash.is_some() {
            row.tx_hash = tx_hash;
        }
        row.error = error;
        row.updated_at = crate::model::now_unix();
        Ok(())
    }

    async fn list_non_terminal(&self) -> Result<Vec<TxState>, CoreError> {
        Ok(self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_by_sweep(&self, sweep_id: SweepId) -> Result<Vec<TxState>, CoreError> {
        Ok(self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|r| r.sweep_id == sweep_id)
            .cloned()
            .collect())
    }

    async fn has_confirmed_for(&self, sweep_id: SweepId, to_address: &str) -> Result<bool, CoreError> {
        Ok(self.rows.lock().expect("lock poisoned").values().any(|r| {
            r.sweep_id == sweep_id && r.to_address == to_address && r.status == TxStatus::Confirmed
        }))
    }

    async fn list_pending_filtered(&self, chain: Option<Chain>) -> Result<Vec<TxState>, CoreError> {
        Ok(self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|r| !r.status.is_terminal() && chain.map(|c| c == r.chain).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn dismiss(&self, _id: TxStateId) -> Result<(), CoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, Token};

    #[tokio::test]
    async fn null_store_accepts_writes_and_returns_empty_reads() {
        let store = NullTxStateStore;
        let row = TxState::new_pending(
            SweepId::new_random(),
            Chain::Btc,
            Token::Native,
            0,
            "from",
            "to",
            Amount(100),
        );
        let id = row.id;
        store.create(row).await.unwrap();
        store
            .update_status(id, TxStatus::Broadcasting, None, None)
            .await
            .unwrap();
        assert!(store.list_non_terminal().await.unwrap().is_empty());
        assert!(!store.has_confirmed_for(SweepId::new_random(), "to").await.unwrap());
    }

    #[tokio::test]
    async fn in_memory_store_enforces_the_transition_diagram() {
        let store = InMemoryTxStateStore::new();
        let row = TxState::new_pending(
            SweepId::new_random(),
            Chain::Evm,
            Token::Native,
            0,
            "from",
            "to",
            Amount(100),
        );
        let id = row.id;
        store.create(row).await.unwrap();

        store
            .update_status(id, TxStatus::Broadcasting, None, None)
            .await
            .unwrap();
        assert_eq!(store.get(id).unwrap().status, TxStatus::Broadcasting);

        // Confirmed is only legal from Confirming, not directly from Broadcasting.
        assert!(store
            .update_status(id, TxStatus::Confirmed, Some("0xhash".into()), None)
            .await
            .is_err());
        assert_eq!(store.get(id).unwrap().status, TxStatus::Broadcasting);

        store
            .update_status(id, TxStatus::Confirming, Some("0xhash".into()), None)
            .await
            .unwrap();
        store
            .update_status(id, TxStatus::Confirmed, Some("0xhash".into()), None)
            .await
            .unwrap();

        // Terminal: no further transition is legal.
        assert!(store
            .update_status(id, TxStatus::Failed, None, Some("late error".into()))
            .await
            .is_err());
    }
}
