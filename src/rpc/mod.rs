//! Chain RPC adapters (spec §4.2). Each adapter exposes only the
//! capability set the orchestrator needs, speaking raw JSON-RPC/REST via
//! `reqwest` rather than a chain SDK's provider type — grounded on
//! `nervana21-bitcoin-rpc-codegen`, which depends on `reqwest` + `serde_json`
//! for the same shape of client.

pub mod btc;
pub mod evm;
pub mod provider_pool;
pub mod solana;

use crate::error::CoreError;
use crate::model::{BtcFeeTiers, Utxo};

/// Outcome of a single on-chain status probe, shared across chains by the
/// reconciler and confirmation pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Confirmed,
    Failed,
    Pending,
    NotFound,
}

#[async_trait::async_trait]
pub trait BtcRpc: Send + Sync {
    async fn fetch_utxos(&self, address: &str) -> Result<Vec<Utxo>, CoreError>;
    async fn broadcast_raw_hex(&self, raw_hex: &str) -> Result<String, CoreError>;
    async fn fetch_tx_status(&self, txid: &str) -> Result<ProbeOutcome, CoreError>;
    async fn fetch_fee_tiers(&self) -> Result<BtcFeeTiers, CoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvmReceipt {
    pub status: u8,
    pub block_number: u64,
}

#[async_trait::async_trait]
pub trait EvmRpc: Send + Sync {
    async fn pending_nonce(&self, address: &str) -> Result<u64, CoreError>;
    async fn suggest_gas_price(&self) -> Result<u128, CoreError>;
    async fn send_signed_tx(&self, raw: &[u8]) -> Result<String, CoreError>;
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<EvmReceipt>, CoreError>;
    async fn balance_at(&self, address: &str) -> Result<u128, CoreError>;
    async fn call_contract(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, CoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolSignatureStatus {
    pub err: Option<String>,
    pub confirmation_status: Option<String>,
    pub slot: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolAccountInfo {
    pub lamports: u64,
    pub exists: bool,
}

#[async_trait::async_trait]
pub trait SolanaRpc: Send + Sync {
    async fn get_latest_blockhash(&self) -> Result<[u8; 32], CoreError>;
    async fn send_base64_tx(&self, base64_tx: &str) -> Result<String, CoreError>;
    async fn get_signature_statuses(
        &self,
        signatures: &[String],
    ) -> Result<Vec<Option<SolSignatureStatus>>, CoreError>;
    async fn get_account_info(&self, pubkey: &str) -> Result<SolAccountInfo, CoreError>;
    async fn get_balance(&self, pubkey: &str) -> Result<u64, CoreError>;
}

pub fn sol_status_to_probe(status: &SolSignatureStatus) -> ProbeOutcome {
    if status.err.is_some() {
        return ProbeOutcome::Failed;
    }
    match status.confirmation_status.as_deref() {
        Some("confirmed") | Some("finalized") => ProbeOutcome::Confirmed,
        _ => ProbeOutcome::Pending,
    }
}

pub fn evm_receipt_to_probe(receipt: Option<&EvmReceipt>) -> ProbeOutcome {
    match receipt {
        None => ProbeOutcome::NotFound,
        Some(r) if r.status == 1 => ProbeOutcome::Confirmed,
        Some(_) => ProbeOutcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sol_status_with_err_is_failed_regardless_of_confirmation() {
        let status = SolSignatureStatus {
            err: Some("InstructionError".into()),
            confirmation_status: Some("confirmed".into()),
            slot: 1,
        };
        assert_eq!(sol_status_to_probe(&status), ProbeOutcome::Failed);
    }

    #[test]
    fn sol_status_confirmed_or_finalized_is_confirmed() {
        for tag in ["confirmed", "finalized"] {
            let status = SolSignatureStatus {
                err: None,
                confirmation_status: Some(tag.into()),
                slot: 42,
            };
            assert_eq!(sol_status_to_probe(&status), ProbeOutcome::Confirmed);
        }
    }

    #[test]
    fn evm_receipt_status_maps_to_probe_outcome() {
        assert_eq!(evm_receipt_to_probe(None), ProbeOutcome::NotFound);
        assert_eq!(
            evm_receipt_to_probe(Some(&EvmReceipt {
                status: 1,
                block_number: 12_345
            })),
            ProbeOutcome::Confirmed
        );
        assert_eq!(
            evm_receipt_to_probe(Some(&EvmReceipt {
                status: 0,
                block_number: 1
            })),
            ProbeOutcome::Failed
        );
    }
}
