//! Shared error taxonomy for the sweep engine.
//!
//! [`ErrorKind`] enumerates the abstract tags an external caller (dispatcher
//! client, UI) needs to branch on. [`CoreError`] is the concrete `thiserror`
//! type that carries a kind plus enough context to log or display, the same
//! split the teacher draws between `facilitator::ErrorReason` (a flat,
//! serializable tag) and `facilitator_local::PaymentError` (a rich `thiserror`
//! enum with one variant per failure mode).

use crate::model::Chain;

/// Abstract, stable error tags surfaced across the dispatcher boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
#[non_exhaustive]
pub enum ErrorKind {
    InvalidChain,
    InvalidToken,
    InvalidDestination,
    InvalidAddress,
    NoFundedAddresses,
    InsufficientBalance,
    InsufficientBnbForGas,
    SendBusy,
    SweepNotFound,
    TxBuildFailed,
    TxBroadcastFailed,
    GasPreSeedFailed,
    Database,
    UtxoDiverged,
    GasPriceSpiked,
    BtcConfirmationTimeout,
    SolConfirmationTimeout,
    SolTxFailed,
    SolTxTooLarge,
    ReceiptTimeout,
    TxReverted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// The crate-wide error type. Every fallible public operation returns
/// `Result<T, CoreError>`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unsupported chain: {0}")]
    InvalidChain(String),

    #[error("token {token} is not valid on chain {chain:?}")]
    InvalidToken { chain: Chain, token: String },

    #[error("invalid destination address for {chain:?}: {reason}")]
    InvalidDestination { chain: Chain, reason: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("no funded addresses for {chain:?}/{token}")]
    NoFundedAddresses { chain: Chain, token: String },

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: String, need: String },

    #[error("{count} address(es) lack native gas: {indices:?}")]
    InsufficientBnbForGas { count: usize, indices: Vec<u32> },

    #[error("a sweep is already in progress for chain {0:?}")]
    SendBusy(Chain),

    #[error("sweep {0} not found")]
    SweepNotFound(String),

    #[error("failed to build transaction: {0}")]
    TxBuildFailed(String),

    #[error("failed to broadcast transaction: {0}")]
    TxBroadcastFailed(String),

    #[error("gas pre-seed failed: {0}")]
    GasPreSeedFailed(String),

    #[error("persistence error: {0}")]
    Database(String),

    #[error("UTXO set diverged since preview: {0}")]
    UtxoDiverged(String),

    #[error("live gas price {live} exceeds {multiple}x the previewed {preview}")]
    GasPriceSpiked {
        preview: String,
        live: String,
        multiple: String,
    },

    #[error("BTC confirmation polling timed out for txid {0}")]
    BtcConfirmationTimeout(String),

    #[error("SOL confirmation polling timed out for signature {0}")]
    SolConfirmationTimeout(String),

    #[error("SOL transaction failed on-chain: {0}")]
    SolTxFailed(String),

    #[error("SOL transaction exceeds the 1232-byte wire limit ({0} bytes)")]
    SolTxTooLarge(usize),

    #[error("timed out waiting for a receipt for tx {0}")]
    ReceiptTimeout(String),

    #[error("transaction reverted: {0}")]
    TxReverted(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("chain RPC error: {0}")]
    Rpc(String),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidChain(_) => ErrorKind::InvalidChain,
            CoreError::InvalidToken { .. } => ErrorKind::InvalidToken,
            CoreError::InvalidDestination { .. } => ErrorKind::InvalidDestination,
            CoreError::InvalidAddress(_) => ErrorKind::InvalidAddress,
            CoreError::NoFundedAddresses { .. } => ErrorKind::NoFundedAddresses,
            CoreError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            CoreError::InsufficientBnbForGas { .. } => ErrorKind::InsufficientBnbForGas,
            CoreError::SendBusy(_) => ErrorKind::SendBusy,
            CoreError::SweepNotFound(_) => ErrorKind::SweepNotFound,
            CoreError::TxBuildFailed(_) => ErrorKind::TxBuildFailed,
            CoreError::TxBroadcastFailed(_) => ErrorKind::TxBroadcastFailed,
            CoreError::GasPreSeedFailed(_) => ErrorKind::GasPreSeedFailed,
            CoreError::Database(_) => ErrorKind::Database,
            CoreError::UtxoDiverged(_) => ErrorKind::UtxoDiverged,
            CoreError::GasPriceSpiked { .. } => ErrorKind::GasPriceSpiked,
            CoreError::BtcConfirmationTimeout(_) => ErrorKind::BtcConfirmationTimeout,
            CoreError::SolConfirmationTimeout(_) => ErrorKind::SolConfirmationTimeout,
            CoreError::SolTxFailed(_) => ErrorKind::SolTxFailed,
            CoreError::SolTxTooLarge(_) => ErrorKind::SolTxTooLarge,
            CoreError::ReceiptTimeout(_) => ErrorKind::ReceiptTimeout,
            CoreError::TxReverted(_) => ErrorKind::TxReverted,
            // Internal errors with no direct external tag map to the closest
            // build/broadcast-phase kind.
            CoreError::KeyDerivation(_) => ErrorKind::TxBuildFailed,
            CoreError::Rpc(_) => ErrorKind::TxBroadcastFailed,
            CoreError::Config(_) => ErrorKind::Database,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
