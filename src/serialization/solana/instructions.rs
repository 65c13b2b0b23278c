//! Raw instruction builders: System Transfer, SPL-Token Transfer, and
//! Create-Associated-Token-Account. Each instruction references accounts by
//! `Pubkey` plus role flags; [`super::message::compile`] resolves those into
//! the account-index form the wire format requires.

use super::pubkey::Pubkey;

pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new_from_array([0u8; 32]);

// Well-known program ids, base58-decoded at const-eval time would require a
// const base58 decoder; these are populated once via `Lazy` in `known`.
pub mod known {
    use super::Pubkey;
    use once_cell::sync::Lazy;

    pub static TOKEN_PROGRAM_ID: Lazy<Pubkey> =
        Lazy::new(|| "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA".parse().unwrap());
    pub static ASSOCIATED_TOKEN_PROGRAM_ID: Lazy<Pubkey> =
        Lazy::new(|| "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL".parse().unwrap());
    pub static RENT_SYSVAR_ID: Lazy<Pubkey> =
        Lazy::new(|| "SysvarRent111111111111111111111111111111".parse().unwrap());
}

/// An account reference with the role flags the message compiler needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn new(pubkey: Pubkey, is_signer: bool, is_writable: bool) -> Self {
        AccountMeta {
            pubkey,
            is_signer,
            is_writable,
        }
    }
}

/// An instruction prior to compilation: still referencing full `Pubkey`s
/// rather than account-table indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// System Program `Transfer`: 12-byte data = LE u32 variant(2) ‖ LE u64 lamports.
pub fn system_transfer(from: Pubkey, to: Pubkey, lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(from, true, true),
            AccountMeta::new(to, false, true),
        ],
        data,
    }
}

/// SPL-Token `Transfer`: 9-byte data = u8 variant(3) ‖ LE u64 amount.
pub fn spl_token_transfer(source_ata: Pubkey, dest_ata: Pubkey, owner: Pubkey, amount: u64) -> Instruction {
    let mut data = Vec::with_capacity(9);
    data.push(3u8);
    data.extend_from_slice(&amount.to_le_bytes());
    Instruction {
        program_id: *known::TOKEN_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(source_ata, false, true),
            AccountMeta::new(dest_ata, false, true),
            AccountMeta::new(owner, true, false),
        ],
        data,
    }
}

/// Create-Associated-Token-Account: empty data, 7 accounts in fixed order:
/// payer, ata, wallet, mint, system-program, token-program, rent-sysvar.
pub fn create_associated_token_account(
    payer: Pubkey,
    ata: Pubkey,
    wallet: Pubkey,
    mint: Pubkey,
) -> Instruction {
    Instruction {
        program_id: *known::ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(payer, true, true),
            AccountMeta::new(ata, false, true),
            AccountMeta::new(wallet, false, false),
            AccountMeta::new(mint, false, false),
            AccountMeta::new(SYSTEM_PROGRAM_ID, false, false),
            AccountMeta::new(*known::TOKEN_PROGRAM_ID, false, false),
            AccountMeta::new(*known::RENT_SYSVAR_ID, false, false),
        ],
        data: Vec::new(),
    }
}

/// Derives a wallet's Associated Token Account for `mint`: the first
/// program-derived address off `[wallet, token_program, mint]` under the
/// associated-token program, per SPL's standard derivation.
pub fn derive_associated_token_account(wallet: Pubkey, mint: Pubkey) -> Pubkey {
    find_program_address(
        &[
            wallet.0.as_slice(),
            known::TOKEN_PROGRAM_ID.0.as_slice(),
            mint.0.as_slice(),
        ],
        &known::ASSOCIATED_TOKEN_PROGRAM_ID,
    )
}

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Minimal off-curve program-derived-address search, matching the
/// `find_program_address` algorithm: try bump seeds from 255 down to 0,
/// accept the first hash that does not land on the ed25519 curve.
fn find_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> Pubkey {
    for bump in (0u8..=255).rev() {
        if let Some(candidate) = create_program_address(seeds, &[bump], program_id) {
            return candidate;
        }
    }
    panic!("unable to find a valid program address");
}

fn create_program_address(seeds: &[&[u8]], extra: &[u8], program_id: &Pubkey) -> Option<Pubkey> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(extra);
    hasher.update(program_id.0);
    hasher.update(PDA_MARKER);
    let hash: [u8; 32] = hasher.finalize().into();
    if is_on_curve(&hash) {
        None
    } else {
        Some(Pubkey(hash))
    }
}

/// Ed25519 point decompression check: a 32-byte value is "on-curve" (and
/// thus an invalid PDA, being a potential public key) if it decompresses to
/// a valid curve point.
fn is_on_curve(bytes: &[u8; 32]) -> bool {
    curve25519_dalek_compressed_decompress(bytes).is_some()
}

fn curve25519_dalek_compressed_decompress(bytes: &[u8; 32]) -> Option<()> {
    // `ed25519-dalek`'s `VerifyingKey::from_bytes` rejects byte strings that
    // do not decompress to a valid curve point, which is exactly the check
    // `create_program_address` needs without a direct curve25519 dependency.
    ed25519_dalek::VerifyingKey::from_bytes(bytes).ok().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_transfer_has_expected_shape() {
        let from = Pubkey([1u8; 32]);
        let to = Pubkey([2u8; 32]);
        let ix = system_transfer(from, to, 999_995_000);
        assert_eq!(ix.data.len(), 12);
        assert_eq!(&ix.data[0..4], &2u32.to_le_bytes());
        assert_eq!(&ix.data[4..12], &999_995_000u64.to_le_bytes());
        assert_eq!(ix.accounts.len(), 2);
        assert!(ix.accounts[0].is_signer && ix.accounts[0].is_writable);
        assert!(!ix.accounts[1].is_signer && ix.accounts[1].is_writable);
    }

    #[test]
    fn spl_token_transfer_has_expected_shape() {
        let ix = spl_token_transfer(Pubkey([1u8; 32]), Pubkey([2u8; 32]), Pubkey([3u8; 32]), 500);
        assert_eq!(ix.data.len(), 9);
        assert_eq!(ix.data[0], 3);
        assert_eq!(&ix.data[1..9], &500u64.to_le_bytes());
    }

    #[test]
    fn create_ata_has_seven_accounts_and_empty_data() {
        let ix = create_associated_token_account(
            Pubkey([1u8; 32]),
            Pubkey([2u8; 32]),
            Pubkey([3u8; 32]),
            Pubkey([4u8; 32]),
        );
        assert!(ix.data.is_empty());
        assert_eq!(ix.accounts.len(), 7);
        assert!(ix.accounts[0].is_signer && ix.accounts[0].is_writable); // payer
        assert!(ix.accounts[1].is_writable && !ix.accounts[1].is_signer); // ata
    }

    #[test]
    fn derive_associated_token_account_is_deterministic() {
        let wallet = Pubkey([9u8; 32]);
        let mint = Pubkey([8u8; 32]);
        let a = derive_associated_token_account(wallet, mint);
        let b = derive_associated_token_account(wallet, mint);
        assert_eq!(a, b);
    }
}
