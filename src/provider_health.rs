//! Durable mirror of [`crate::rpc::provider_pool::ProviderPool`]'s in-memory
//! health state, for the `provider_health` table named in spec §6.
//! No-op-by-default, consistent with the persistence facades in
//! [`crate::tx_state_store`] and [`crate::audit`].

use crate::error::CoreError;
use crate::rpc::provider_pool::ProviderHealth;

#[async_trait::async_trait]
pub trait ProviderHealthSink: Send + Sync {
    async fn record(&self, health: &ProviderHealth) -> Result<(), CoreError>;
}

pub struct NullProviderHealthSink;

#[async_trait::async_trait]
impl ProviderHealthSink for NullProviderHealthSink {
    async fn record(&self, health: &ProviderHealth) -> Result<(), CoreError> {
        tracing::trace!(provider = %health.name, "no provider_health sink configured; dropping record");
        Ok(())
    }
}
