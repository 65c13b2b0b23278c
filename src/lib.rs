//! Multi-chain HD wallet sweep engine: BTC (P2WPKH consolidation), EVM
//! (BSC-compatible legacy transfers, ERC-20 transfers), and Solana (native
//! + SPL-Token transfers), plus the durable transaction-state machine,
//! gas pre-seeding, reconciliation, and event plumbing around them.
//!
//! This crate has no chain-SDK dependency (spec §9): wire formats (BIP-143,
//! legacy RLP, Solana's legacy message format) are hand-rolled in
//! [`serialization`]; chain access goes through narrow [`rpc`] traits over
//! raw JSON-RPC/REST. Balance scanning and mnemonic-backed key derivation
//! are out of scope and are consumed as traits ([`dispatcher::FundedAddressSource`],
//! [`keys::KeyFacade`]) implemented by the embedding application.

pub mod audit;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod fees;
pub mod gas_preseed;
pub mod keys;
pub mod model;
pub mod orchestrator;
pub mod provider_health;
pub mod reconciler;
pub mod rpc;
pub mod serialization;
pub mod shutdown;
pub mod telemetry;
pub mod tx_state_store;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use events::EventHub;
pub use shutdown::Shutdown;
