//! Legacy (un-versioned) Solana message compilation and serialization.

use super::compact_u16;
use super::instructions::{AccountMeta, Instruction};
use super::pubkey::Pubkey;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Roles {
    is_signer: bool,
    is_writable: bool,
}

/// A compiled instruction: program-id index plus account indexes, ready for
/// wire serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indexes: Vec<u8>,
    pub data: Vec<u8>,
}

/// The compiled legacy message: ordered account keys, compiled
/// instructions, and the header counts the wire format needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: [u8; 32],
    pub instructions: Vec<CompiledInstruction>,
}

/// Compiles a set of instructions plus a fee payer into a legacy message.
///
/// Account ordering: fee payer first, then the four privilege groups in
/// order — writable+signer, readonly+signer, writable+non-signer,
/// readonly+non-signer — each sorted by base58 within the group. Role flags
/// are merged by union (signer OR writable wins) across all references to
/// the same account.
pub fn compile(fee_payer: Pubkey, instructions: &[Instruction], recent_blockhash: [u8; 32]) -> Message {
    let mut roles: BTreeMap<Pubkey, Roles> = BTreeMap::new();
    let mut program_ids: Vec<Pubkey> = Vec::new();

    roles.entry(fee_payer).or_default().is_signer = true;
    roles.entry(fee_payer).or_default().is_writable = true;

    for ix in instructions {
        if !program_ids.contains(&ix.program_id) {
            program_ids.push(ix.program_id);
        }
        roles.entry(ix.program_id).or_default();
        for AccountMeta {
            pubkey,
            is_signer,
            is_writable,
        } in &ix.accounts
        {
            let entry = roles.entry(*pubkey).or_default();
            entry.is_signer |= is_signer;
            entry.is_writable |= is_writable;
        }
    }
    // Programs referenced only as program_id (not as an account meta) are
    // readonly, non-signer, unless some instruction also listed them as an
    // account.
    for pid in &program_ids {
        roles.entry(*pid).or_default();
    }

    let mut writable_signer = Vec::new();
    let mut readonly_signer = Vec::new();
    let mut writable_nonsigner = Vec::new();
    let mut readonly_nonsigner = Vec::new();

    for (pubkey, role) in &roles {
        if *pubkey == fee_payer {
            continue;
        }
        match (role.is_signer, role.is_writable) {
            (true, true) => writable_signer.push(*pubkey),
            (true, false) => readonly_signer.push(*pubkey),
            (false, true) => writable_nonsigner.push(*pubkey),
            (false, false) => readonly_nonsigner.push(*pubkey),
        }
    }
    for group in [
        &mut writable_signer,
        &mut readonly_signer,
        &mut writable_nonsigner,
        &mut readonly_nonsigner,
    ] {
        group.sort_by_key(|pk| pk.to_base58());
    }

    let mut account_keys = vec![fee_payer];
    account_keys.extend(writable_signer.iter());
    account_keys.extend(readonly_signer.iter());
    account_keys.extend(writable_nonsigner.iter());
    account_keys.extend(readonly_nonsigner.iter());

    let num_required_signatures = (1 + writable_signer.len() + readonly_signer.len()) as u8;
    let num_readonly_signed = readonly_signer.len() as u8;
    let num_readonly_unsigned = readonly_nonsigner.len() as u8;

    let index_of = |pk: &Pubkey| account_keys.iter().position(|k| k == pk).unwrap() as u8;

    let compiled_instructions = instructions
        .iter()
        .map(|ix| CompiledInstruction {
            program_id_index: index_of(&ix.program_id),
            account_indexes: ix.accounts.iter().map(|a| index_of(&a.pubkey)).collect(),
            data: ix.data.clone(),
        })
        .collect();

    Message {
        num_required_signatures,
        num_readonly_signed,
        num_readonly_unsigned,
        account_keys,
        recent_blockhash,
        instructions: compiled_instructions,
    }
}

impl Message {
    /// The set of account keys that must sign: the first
    /// `num_required_signatures` entries of `account_keys`.
    pub fn signer_keys(&self) -> &[Pubkey] {
        &self.account_keys[..self.num_required_signatures as usize]
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.num_required_signatures);
        out.push(self.num_readonly_signed);
        out.push(self.num_readonly_unsigned);
        out.extend_from_slice(&compact_u16::encode(self.account_keys.len() as u16));
        for key in &self.account_keys {
            out.extend_from_slice(&key.0);
        }
        out.extend_from_slice(&self.recent_blockhash);
        out.extend_from_slice(&compact_u16::encode(self.instructions.len() as u16));
        for ix in &self.instructions {
            out.push(ix.program_id_index);
            out.extend_from_slice(&compact_u16::encode(ix.account_indexes.len() as u16));
            out.extend_from_slice(&ix.account_indexes);
            out.extend_from_slice(&compact_u16::encode(ix.data.len() as u16));
            out.extend_from_slice(&ix.data);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::solana::instructions::system_transfer;

    #[test]
    fn fee_payer_is_always_account_zero() {
        let fee_payer = Pubkey([1u8; 32]);
        let to = Pubkey([2u8; 32]);
        let msg = compile(fee_payer, &[system_transfer(fee_payer, to, 1000)], [0u8; 32]);
        assert_eq!(msg.account_keys[0], fee_payer);
    }

    #[test]
    fn signer_keys_are_exactly_the_first_n_accounts() {
        let fee_payer = Pubkey([1u8; 32]);
        let to = Pubkey([2u8; 32]);
        let msg = compile(fee_payer, &[system_transfer(fee_payer, to, 1000)], [0u8; 32]);
        assert_eq!(msg.num_required_signatures, 1);
        assert_eq!(msg.signer_keys(), &[fee_payer]);
    }

    #[test]
    fn privilege_groups_appear_in_the_specified_order() {
        let fee_payer = Pubkey([1u8; 32]);
        let writable_other_signer = Pubkey([2u8; 32]);
        let readonly = Pubkey([3u8; 32]);
        let ix = Instruction {
            program_id: Pubkey([99u8; 32]),
            accounts: vec![
                AccountMeta::new(writable_other_signer, true, true),
                AccountMeta::new(readonly, false, false),
            ],
            data: vec![],
        };
        let msg = compile(fee_payer, &[ix], [0u8; 32]);
        // fee payer, then writable+signer, then readonly+non-signer (program
        // id also lands readonly+non-signer, sorted alongside `readonly`).
        assert_eq!(msg.account_keys[0], fee_payer);
        assert_eq!(msg.account_keys[1], writable_other_signer);
        assert!(msg.account_keys[2..].contains(&readonly));
    }
}
