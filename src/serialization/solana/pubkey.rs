//! A minimal Solana public key: 32 bytes, base58-displayed. No `solana-sdk`
//! dependency — base58 codec only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey(pub [u8; 32]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PubkeyError {
    #[error("invalid base58: {0}")]
    Base58(String),
    #[error("expected 32 bytes, got {0}")]
    WrongLength(usize),
}

impl Pubkey {
    pub const fn new_from_array(bytes: [u8; 32]) -> Self {
        Pubkey(bytes)
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl FromStr for Pubkey {
    type Err = PubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| PubkeyError::Base58(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| PubkeyError::WrongLength(bytes.len()))?;
        Ok(Pubkey(arr))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl Serialize for Pubkey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkey_roundtrips_through_base58() {
        let pk = Pubkey([42u8; 32]);
        let s = pk.to_base58();
        let parsed: Pubkey = s.parse().unwrap();
        assert_eq!(parsed, pk);
    }

    #[test]
    fn rejects_wrong_length() {
        let too_short = bs58::encode([1u8; 16]).into_string();
        assert!(matches!(
            too_short.parse::<Pubkey>(),
            Err(PubkeyError::WrongLength(16))
        ));
    }
}
