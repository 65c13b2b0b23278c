use serde::{Deserialize, Serialize};

/// A Bitcoin unspent output. Immutable: it is either present in the
/// mempool/chain or spent; the core never mutates one in place, only
/// re-fetches the current set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value_sats: u64,
    pub confirmed: bool,
    pub address_index: u32,
    pub owner_address: String,
    /// P2WPKH scriptPubKey, reconstructable from the owning address and
    /// carried here so callers don't need to re-derive it.
    pub script_pubkey: Vec<u8>,
}
