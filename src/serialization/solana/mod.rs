pub mod compact_u16;
pub mod instructions;
pub mod message;
pub mod pubkey;
pub mod transaction;

pub use instructions::{create_associated_token_account, derive_associated_token_account, spl_token_transfer, system_transfer, Instruction};
pub use message::{compile, Message};
pub use pubkey::Pubkey;
pub use transaction::{sign_and_serialize, MAX_WIRE_SIZE};
