use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three networks the sweep engine targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    Btc,
    Evm,
    Sol,
}

impl FromStr for Chain {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BTC" => Ok(Chain::Btc),
            "EVM" => Ok(Chain::Evm),
            "SOL" => Ok(Chain::Sol),
            other => Err(crate::error::CoreError::InvalidChain(other.to_string())),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Chain::Btc => "BTC",
            Chain::Evm => "EVM",
            Chain::Sol => "SOL",
        };
        f.write_str(s)
    }
}

/// The fungible assets the engine knows how to move. `Native` means the
/// chain's own coin (BTC, BNB, SOL); `Usdc`/`Usdt` are token transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Token {
    Native,
    Usdc,
    Usdt,
}

impl FromStr for Token {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NATIVE" => Ok(Token::Native),
            "USDC" => Ok(Token::Usdc),
            "USDT" => Ok(Token::Usdt),
            other => Err(crate::error::CoreError::InvalidToken {
                chain: Chain::Btc,
                token: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Native => "NATIVE",
            Token::Usdc => "USDC",
            Token::Usdt => "USDT",
        };
        f.write_str(s)
    }
}

impl Chain {
    /// BTC only ever moves its native coin; EVM and SOL can also move the
    /// stablecoins configured for that chain.
    pub fn supports(&self, token: Token) -> bool {
        match self {
            Chain::Btc => token == Token::Native,
            Chain::Evm | Chain::Sol => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_roundtrips_through_display_and_from_str() {
        for chain in [Chain::Btc, Chain::Evm, Chain::Sol] {
            let parsed: Chain = chain.to_string().parse().unwrap();
            assert_eq!(parsed, chain);
        }
    }

    #[test]
    fn chain_parse_is_case_insensitive() {
        assert_eq!("btc".parse::<Chain>().unwrap(), Chain::Btc);
        assert_eq!("Evm".parse::<Chain>().unwrap(), Chain::Evm);
    }

    #[test]
    fn btc_rejects_non_native_tokens() {
        assert!(Chain::Btc.supports(Token::Native));
        assert!(!Chain::Btc.supports(Token::Usdc));
        assert!(!Chain::Btc.supports(Token::Usdt));
    }

    #[test]
    fn evm_and_sol_support_all_tokens() {
        for token in [Token::Native, Token::Usdc, Token::Usdt] {
            assert!(Chain::Evm.supports(token));
            assert!(Chain::Sol.supports(token));
        }
    }
}
