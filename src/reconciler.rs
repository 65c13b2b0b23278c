//! Reconciler (spec §4.8): runs once at core startup, doing a single
//! on-chain probe per non-terminal row and launching a background poller
//! for anything still ambiguous.

use std::sync::Arc;

use crate::audit::{AuditLog, AuditStatus};
use crate::config::Config;
use crate::error::CoreError;
use crate::model::{Chain, TxState, TxStatus, now_unix};
use crate::rpc::{BtcRpc, EvmRpc, ProbeOutcome, SolanaRpc};
use crate::shutdown::Shutdown;
use crate::tx_state_store::TxStateStore;

pub struct ReconcilerDeps {
    pub btc_rpc: Arc<dyn BtcRpc>,
    pub evm_rpc: Arc<dyn EvmRpc>,
    pub sol_rpc: Arc<dyn SolanaRpc>,
    pub store: Arc<dyn TxStateStore>,
    pub audit: Arc<dyn AuditLog>,
    pub config: Arc<Config>,
    pub shutdown: Shutdown,
}

/// Summary of what the reconciler did, for a startup log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub failed_never_broadcast: usize,
    pub confirmed: usize,
    pub failed_on_chain: usize,
    pub uncertain: usize,
    pub pollers_launched: usize,
}

#[tracing::instrument(skip(deps), err)]
pub async fn run(deps: &ReconcilerDeps) -> Result<ReconcileSummary, CoreError> {
    let mut summary = ReconcileSummary::default();
    let rows = deps.store.list_non_terminal().await?;

    for row in rows {
        if row.tx_hash.is_none() {
            deps.store
                .update_status(row.id, TxStatus::Failed, None, Some("never broadcast".into()))
                .await?;
            summary.failed_never_broadcast += 1;
            continue;
        }
        reconcile_row(deps, row, &mut summary).await?;
    }

    Ok(summary)
}

async fn reconcile_row(
    deps: &ReconcilerDeps,
    row: TxState,
    summary: &mut ReconcileSummary,
) -> Result<(), CoreError> {
    let tx_hash = row.tx_hash.clone().expect("checked non-empty above");
    let age_secs = now_unix().saturating_sub(row.created_at);

    let probe = probe_once(deps, row.chain, &tx_hash).await;

    match probe {
        Ok(ProbeOutcome::Confirmed) => {
            deps.store
                .update_status(row.id, TxStatus::Confirmed, Some(tx_hash.clone()), None)
                .await?;
            deps.audit.update_status(row.chain, &tx_hash, AuditStatus::Confirmed).await?;
            summary.confirmed += 1;
        }
        Ok(ProbeOutcome::Failed) => {
            deps.store
                .update_status(
                    row.id,
                    TxStatus::Failed,
                    Some(tx_hash.clone()),
                    Some("transaction failed on-chain".into()),
                )
                .await?;
            deps.audit.update_status(row.chain, &tx_hash, AuditStatus::Failed).await?;
            summary.failed_on_chain += 1;
        }
        Ok(ProbeOutcome::Pending) | Ok(ProbeOutcome::NotFound) | Err(_) => {
            if age_secs > deps.config.reconciler_max_age_secs {
                deps.store
                    .update_status(
                        row.id,
                        TxStatus::Uncertain,
                        Some(tx_hash.clone()),
                        Some("exceeded reconciler max age with no decisive probe".into()),
                    )
                    .await?;
                summary.uncertain += 1;
            } else {
                spawn_poller(deps, row.id, row.chain, tx_hash);
                summary.pollers_launched += 1;
            }
        }
    }

    Ok(())
}

async fn probe_once(deps: &ReconcilerDeps, chain: Chain, tx_hash: &str) -> Result<ProbeOutcome, CoreError> {
    match chain {
        Chain::Btc => deps.btc_rpc.fetch_tx_status(tx_hash).await,
        Chain::Evm => match deps.evm_rpc.get_receipt(tx_hash).await? {
            None => Ok(ProbeOutcome::Pending),
            Some(r) if r.status == 1 => Ok(ProbeOutcome::Confirmed),
            Some(_) => Ok(ProbeOutcome::Failed),
        },
        Chain::Sol => {
            let statuses = deps.sol_rpc.get_signature_statuses(std::slice::from_ref(&tx_hash.to_string())).await?;
            match statuses.into_iter().next().flatten() {
                Some(status) => Ok(crate::rpc::sol_status_to_probe(&status)),
                None => Ok(ProbeOutcome::NotFound),
            }
        }
    }
}

/// Launches the same poll loop the orchestrator uses for a freshly
/// broadcast transaction, reusing the per-chain poll constants.
fn spawn_poller(deps: &ReconcilerDeps, tx_state_id: crate::model::TxStateId, chain: Chain, tx_hash: String) {
    let store = deps.store.clone();
    let audit = deps.audit.clone();
    let config = deps.config.clone();
    let btc_rpc = deps.btc_rpc.clone();
    let evm_rpc = deps.evm_rpc.clone();
    let sol_rpc = deps.sol_rpc.clone();
    let cancellation = deps.shutdown.cancellation_token();

    deps.shutdown.spawn_tracked(async move {
        let (interval_secs, timeout_secs) = match chain {
            Chain::Btc => (config.btc_poll_interval_secs, config.btc_poll_timeout_secs),
            Chain::Evm => (config.evm_poll_interval_secs, config.evm_poll_timeout_secs),
            Chain::Sol => (config.sol_poll_interval_secs, config.sol_poll_timeout_secs),
        };
        let interval = std::time::Duration::from_secs(interval_secs);
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(timeout_secs);

        loop {
            if cancellation.is_cancelled() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = store
                    .update_status(
                        tx_state_id,
                        TxStatus::Uncertain,
                        Some(tx_hash.clone()),
                        Some("reconciler poller timed out".into()),
                    )
                    .await;
                return;
            }

            let probe = match chain {
                Chain::Btc => btc_rpc.fetch_tx_status(&tx_hash).await,
                Chain::Evm => evm_rpc.get_receipt(&tx_hash).await.map(|r| match r {
                    None => ProbeOutcome::Pending,
                    Some(r) if r.status == 1 => ProbeOutcome::Confirmed,
                    Some(_) => ProbeOutcome::Failed,
                }),
                Chain::Sol => sol_rpc
                    .get_signature_statuses(std::slice::from_ref(&tx_hash))
                    .await
                    .map(|s| match s.into_iter().next().flatten() {
                        Some(status) => crate::rpc::sol_status_to_probe(&status),
                        None => ProbeOutcome::NotFound,
                    }),
            };

            match probe {
                Ok(ProbeOutcome::Confirmed) => {
                    let _ = store
                        .update_status(tx_state_id, TxStatus::Confirmed, Some(tx_hash.clone()), None)
                        .await;
                    let _ = audit.update_status(chain, &tx_hash, AuditStatus::Confirmed).await;
                    return;
                }
                Ok(ProbeOutcome::Failed) => {
                    let _ = store
                        .update_status(
                            tx_state_id,
                            TxStatus::Failed,
                            Some(tx_hash.clone()),
                            Some("transaction failed on-chain".into()),
                        )
                        .await;
                    let _ = audit.update_status(chain, &tx_hash, AuditStatus::Failed).await;
                    return;
                }
                Ok(ProbeOutcome::Pending) | Ok(ProbeOutcome::NotFound) => {}
                Err(e) => tracing::debug!(error = %e, "reconciler poller probe failed, will retry"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancellation.cancelled() => return,
            }
        }
    });
}
