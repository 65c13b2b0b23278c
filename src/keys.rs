//! Key derivation facade (spec §4.4). HD derivation from the mnemonic is
//! explicitly out of scope for this crate; [`KeyFacade`] is the trait the
//! orchestrator consumes, implemented elsewhere against a real mnemonic
//! library. A single operation: given an address index, derive and return a
//! key on demand. Never cached; never logged beyond "a derivation occurred".

use crate::error::CoreError;
use crate::model::Chain;

/// A freshly derived secret for one address index. Holds either a
/// secp256k1 signing key (BTC, EVM) or an Ed25519 signing key (SOL).
/// Callers must drop this immediately after signing; `Drop` zeroizes the
/// secp256k1 scalar (the `ed25519_dalek::SigningKey` zeroizes itself).
pub enum DerivedKey {
    Secp256k1(k256::ecdsa::SigningKey),
    Ed25519(Box<ed25519_dalek::SigningKey>),
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        // k256::ecdsa::SigningKey already zeroizes its inner scalar on drop
        // (it implements `Zeroize`/`ZeroizeOnDrop` via the `elliptic-curve`
        // crate); ed25519_dalek::SigningKey does the same. This impl exists
        // so the derivation-site log line below fires exactly once per key.
        tracing::trace!("derived key dropped");
    }
}

#[async_trait::async_trait]
pub trait KeyFacade: Send + Sync {
    /// Re-reads the mnemonic from its storage on every call, derives the
    /// key for `(chain, index)`, and returns it. The facade never logs key
    /// material, only the fact that a derivation occurred.
    async fn derive(&self, chain: Chain, index: u32) -> Result<DerivedKey, CoreError>;
}

/// Convenience wrapper logging only the non-sensitive fact of a derivation,
/// for implementors of [`KeyFacade`] to call before returning.
pub fn log_derivation(chain: Chain, index: u32) {
    tracing::info!(?chain, index, "derived a key for signing");
}
