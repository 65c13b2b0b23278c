use ed25519_dalek::{Signer, SigningKey};

use super::compact_u16;
use super::message::Message;
use super::pubkey::Pubkey;
use crate::error::CoreError;

pub const MAX_WIRE_SIZE: usize = 1232;

/// Signs `message` with the given keypairs (one per required signer, in
/// `message.signer_keys()` order) and serializes the wire transaction:
/// compact-u16 signature count + 64-byte signatures + serialized message.
///
/// Enforces the 1232-byte hard limit.
pub fn sign_and_serialize(message: &Message, keys: &[(&Pubkey, &SigningKey)]) -> Result<Vec<u8>, CoreError> {
    let serialized_message = message.serialize();
    let mut signatures = Vec::with_capacity(message.signer_keys().len());
    for signer_pubkey in message.signer_keys() {
        let (_, key) = keys
            .iter()
            .find(|(pk, _)| *pk == signer_pubkey)
            .ok_or_else(|| CoreError::KeyDerivation(format!("missing signer for {signer_pubkey}")))?;
        let sig = key.sign(&serialized_message);
        signatures.push(sig.to_bytes());
    }

    let mut out = Vec::new();
    out.extend_from_slice(&compact_u16::encode(signatures.len() as u16));
    for sig in &signatures {
        out.extend_from_slice(sig);
    }
    out.extend_from_slice(&serialized_message);

    if out.len() > MAX_WIRE_SIZE {
        return Err(CoreError::SolTxTooLarge(out.len()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::solana::instructions::system_transfer;
    use crate::serialization::solana::message::compile;

    #[test]
    fn a_single_transfer_tx_is_well_under_the_wire_limit() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let fee_payer = Pubkey(key.verifying_key().to_bytes());
        let to = Pubkey([7u8; 32]);
        let ix = system_transfer(fee_payer, to, 999_995_000);
        let message = compile(fee_payer, &[ix], [3u8; 32]);
        let tx = sign_and_serialize(&message, &[(&fee_payer, &key)]).unwrap();
        assert!(tx.len() < 300);
        assert!(tx.len() <= MAX_WIRE_SIZE);
    }

    #[test]
    fn missing_signer_key_is_an_error() {
        let fee_payer = Pubkey([1u8; 32]);
        let to = Pubkey([2u8; 32]);
        let ix = system_transfer(fee_payer, to, 1000);
        let message = compile(fee_payer, &[ix], [0u8; 32]);
        let result = sign_and_serialize(&message, &[]);
        assert!(result.is_err());
    }
}
