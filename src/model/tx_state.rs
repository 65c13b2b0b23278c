use crate::model::{Amount, Chain, SweepId, Token};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The durable per-transfer state-machine row. See the crate-level
/// documentation for the legal transition diagram and invariants
/// (TX-UNIQUENESS, SWEEP-COHESION, IDEMPOTENCY).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxState {
    pub id: TxStateId,
    pub sweep_id: SweepId,
    pub chain: Chain,
    pub token: Token,
    pub address_index: u32,
    pub from_address: String,
    pub to_address: String,
    pub amount: Amount,
    pub tx_hash: Option<String>,
    pub status: TxStatus,
    pub error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Broadcasting,
    Confirming,
    Confirmed,
    Failed,
    Uncertain,
}

impl TxStatus {
    /// Terminal from the reconciler's point of view. `Uncertain` is
    /// terminal-for-now but may be retried by a subsequent sweep via
    /// `ExecuteResume`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TxStatus::Confirmed | TxStatus::Failed | TxStatus::Uncertain
        )
    }

    /// Whether `self -> next` is a legal transition per the state diagram in
    /// spec §3. Used defensively by the persistence facade before writing.
    pub fn can_transition_to(self, next: TxStatus) -> bool {
        use TxStatus::*;
        match (self, next) {
            (Pending, Broadcasting) => true,
            (Broadcasting, Confirming) => true,
            (Confirming, Confirmed | Failed | Uncertain) => true,
            // any non-terminal row may fail on a local signing/broadcast error
            (Pending | Broadcasting, Failed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxStateId(#[serde(with = "hex8")] pub [u8; 8]);

impl TxStateId {
    pub fn new_random() -> Self {
        let mut bytes = [0u8; 8];
        rand::rng().fill_bytes(&mut bytes);
        TxStateId(bytes)
    }
}

impl std::fmt::Display for TxStateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

mod hex8 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 8], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 8 bytes"))
    }
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}

impl TxState {
    /// Construct a fresh `pending` row. Only the orchestrator calls this, at
    /// the moment it has decided to attempt a transfer.
    pub fn new_pending(
        sweep_id: SweepId,
        chain: Chain,
        token: Token,
        address_index: u32,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        amount: Amount,
    ) -> Self {
        let now = now_unix();
        TxState {
            id: TxStateId::new_random(),
            sweep_id,
            chain,
            token,
            address_index,
            from_address: from_address.into(),
            to_address: to_address.into(),
            amount,
            tx_hash: None,
            status: TxStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_and_failed_are_terminal() {
        assert!(TxStatus::Confirmed.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
        assert!(TxStatus::Uncertain.is_terminal());
        assert!(!TxStatus::Pending.is_terminal());
        assert!(!TxStatus::Broadcasting.is_terminal());
        assert!(!TxStatus::Confirming.is_terminal());
    }

    #[test]
    fn legal_transitions_match_the_state_diagram() {
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Broadcasting));
        assert!(TxStatus::Broadcasting.can_transition_to(TxStatus::Confirming));
        assert!(TxStatus::Confirming.can_transition_to(TxStatus::Confirmed));
        assert!(TxStatus::Confirming.can_transition_to(TxStatus::Uncertain));
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Failed));
        assert!(!TxStatus::Confirmed.can_transition_to(TxStatus::Failed));
        assert!(!TxStatus::Failed.can_transition_to(TxStatus::Confirmed));
    }
}
