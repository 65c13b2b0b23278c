use crate::model::{Amount, Chain, Token};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A derived address. The derivation index is the stable identity; `value`
/// is a view (bech32/base58/hex depending on chain) and is immutable once
/// constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub chain: Chain,
    pub index: u32,
    pub value: String,
}

impl Address {
    pub fn new(chain: Chain, index: u32, value: impl Into<String>) -> Self {
        Address {
            chain,
            index,
            value: value.into(),
        }
    }
}

/// An address enriched with the balances the out-of-scope scanner observed.
/// Consumed read-only by the orchestrator; never mutated by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressWithBalance {
    #[serde(flatten)]
    pub address: Address,
    pub native_balance: Amount,
    pub token_balances: HashMap<Token, Amount>,
}

impl AddressWithBalance {
    pub fn balance_of(&self, token: Token) -> Amount {
        match token {
            Token::Native => self.native_balance,
            other => self.token_balances.get(&other).copied().unwrap_or(Amount::ZERO),
        }
    }

    pub fn has_gas(&self, floor: Amount) -> bool {
        self.native_balance > floor
    }
}
