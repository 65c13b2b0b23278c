//! Legacy (type-0) EVM transaction encoding and EIP-155 signing.
//!
//! No chain SDK is used: RLP is hand-rolled below rather than pulled from a
//! transaction-building crate, keeping the wire format fully independent of
//! any particular SDK's transaction types (spec design note, §9).

use alloy_primitives::{keccak256, Address, U256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey};

/// An unsigned legacy transaction: (nonce, gasPrice, gasLimit, to, value, data).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
}

/// `r`, `s`, `v` of a signed legacy transaction. `v` already encodes the
/// EIP-155 chain id (`recovery_id + chain_id*2 + 35`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacySignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u64,
}

impl LegacyTx {
    /// The EIP-155 signing hash: `keccak256(rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]))`.
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        let fields = vec![
            rlp_uint(self.nonce as u128),
            rlp_uint(self.gas_price),
            rlp_uint(self.gas_limit as u128),
            rlp_bytes(self.to.as_slice()),
            rlp_uint_u256(self.value),
            rlp_bytes(&self.data),
            rlp_uint(chain_id as u128),
            rlp_uint(0),
            rlp_uint(0),
        ];
        keccak256(rlp_list(&fields)).0
    }

    /// Signs under EIP-155 for `chain_id` and returns the raw signed bytes.
    pub fn sign(&self, signing_key: &SigningKey, chain_id: u64) -> LegacySignature {
        let hash = self.signing_hash(chain_id);
        let (signature, recid): (Signature, RecoveryId) = signing_key
            .sign_prehash_recoverable(&hash)
            .expect("secp256k1 signing over a 32-byte prehash cannot fail");
        let r: [u8; 32] = signature.r().to_bytes().into();
        let s: [u8; 32] = signature.s().to_bytes().into();
        let v = recid.to_byte() as u64 + chain_id * 2 + 35;
        LegacySignature { r, s, v }
    }

    /// RLP-encodes the fully signed transaction for broadcast.
    pub fn encode_signed(&self, sig: &LegacySignature) -> Vec<u8> {
        let fields = vec![
            rlp_uint(self.nonce as u128),
            rlp_uint(self.gas_price),
            rlp_uint(self.gas_limit as u128),
            rlp_bytes(self.to.as_slice()),
            rlp_uint_u256(self.value),
            rlp_bytes(&self.data),
            rlp_uint(sig.v as u128),
            rlp_bytes(&strip_leading_zeros(&sig.r)),
            rlp_bytes(&strip_leading_zeros(&sig.s)),
        ];
        rlp_list(&fields)
    }
}

/// Encodes the calldata for `transfer(address,uint256)`: 4-byte selector of
/// `keccak256("transfer(address,uint256)")` followed by the 32-byte
/// left-padded recipient and amount.
pub fn erc20_transfer_calldata(recipient: Address, amount: U256) -> Vec<u8> {
    let selector = &keccak256(b"transfer(address,uint256)").0[..4];
    let mut out = Vec::with_capacity(4 + 32 + 32);
    out.extend_from_slice(selector);
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(recipient.as_slice());
    out.extend_from_slice(&amount.to_be_bytes::<32>());
    out
}

/// Encodes the calldata for `balanceOf(address)`, used for the conservative
/// on-chain re-read before an EVM token sweep.
pub fn erc20_balance_of_calldata(owner: Address) -> Vec<u8> {
    let selector = &keccak256(b"balanceOf(address)").0[..4];
    let mut out = Vec::with_capacity(4 + 32);
    out.extend_from_slice(selector);
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(owner.as_slice());
    out
}

fn strip_leading_zeros(bytes: &[u8; 32]) -> Vec<u8> {
    let first_nonzero = bytes.iter().position(|&b| b != 0);
    match first_nonzero {
        Some(idx) => bytes[idx..].to_vec(),
        None => Vec::new(),
    }
}

fn rlp_length_prefix(offset: u8, len: usize) -> Vec<u8> {
    if len < 56 {
        vec![offset + len as u8]
    } else {
        let len_bytes = minimal_be_bytes(len as u64);
        let mut out = vec![offset + 55 + len_bytes.len() as u8];
        out.extend_from_slice(&len_bytes);
        out
    }
}

fn minimal_be_bytes(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[first_nonzero..].to_vec()
}

fn rlp_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        return vec![data[0]];
    }
    let mut out = rlp_length_prefix(0x80, data.len());
    out.extend_from_slice(data);
    out
}

fn rlp_uint(mut v: u128) -> Vec<u8> {
    if v == 0 {
        return rlp_bytes(&[]);
    }
    let mut bytes = Vec::new();
    while v > 0 {
        bytes.push((v & 0xff) as u8);
        v >>= 8;
    }
    bytes.reverse();
    rlp_bytes(&bytes)
}

fn rlp_uint_u256(v: U256) -> Vec<u8> {
    rlp_bytes(&strip_leading_zeros(&v.to_be_bytes::<32>()))
}

fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(|i| i.len()).sum();
    let mut out = rlp_length_prefix(0xc0, payload_len);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn test_key() -> SigningKey {
        SigningKey::from_slice(&[7u8; 32]).unwrap()
    }

    #[test]
    fn rlp_uint_encodes_small_values_as_single_byte() {
        assert_eq!(rlp_uint(0), vec![0x80]);
        assert_eq!(rlp_uint(1), vec![0x01]);
        assert_eq!(rlp_uint(127), vec![0x7f]);
    }

    #[test]
    fn rlp_uint_encodes_large_values_with_length_prefix() {
        assert_eq!(rlp_uint(128), vec![0x81, 0x80]);
        assert_eq!(rlp_uint(256), vec![0x82, 0x01, 0x00]);
    }

    #[test]
    fn signed_legacy_tx_v_encodes_eip155_chain_id() {
        let tx = LegacyTx {
            nonce: 0,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Address::ZERO,
            value: U256::from(1u64),
            data: Vec::new(),
        };
        let key = test_key();
        let chain_id = 56; // BSC
        let sig = tx.sign(&key, chain_id);
        assert!(sig.v == chain_id * 2 + 35 || sig.v == chain_id * 2 + 36);
        let encoded = tx.encode_signed(&sig);
        assert!(encoded[0] >= 0xc0, "signed tx must RLP-encode as a list");
    }

    #[test]
    fn erc20_transfer_calldata_has_expected_shape() {
        let recipient = Address::ZERO;
        let amount = U256::from(1_000_000u64);
        let data = erc20_transfer_calldata(recipient, amount);
        assert_eq!(data.len(), 4 + 32 + 32);
        // keccak256("transfer(address,uint256)")[:4] = 0xa9059cbb
        assert_eq!(&data[0..4], &[0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn balance_of_calldata_has_expected_shape() {
        let data = erc20_balance_of_calldata(Address::ZERO);
        assert_eq!(data.len(), 4 + 32);
        // keccak256("balanceOf(address)")[:4] = 0x70a08231
        assert_eq!(&data[0..4], &[0x70, 0xa0, 0x82, 0x31]);
    }
}
