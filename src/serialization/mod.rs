//! Chain-specific wire-format encoders and signers (spec §4.1). No chain
//! SDK is used anywhere in this module: every format is built from bytes.

pub mod btc;
pub mod evm;
pub mod solana;
