//! Round-robin + circuit-breaking over a configured list of provider URLs.
//!
//! Grounded on the teacher's `PendingNonceManager`
//! (`Arc<DashMap<Address, Arc<Mutex<u64>>>>`): the same "DashMap keyed by
//! identity, `Arc<Mutex<_>>` value" shape, generalized here from "nonce per
//! address" to "health state per provider URL". The pool tracks the
//! `provider_health` fields named in spec §6 and is the caller-visible unit
//! of retry/failover policy an adapter needs (spec §4.2: "fails with a
//! transient error on 429/5xx/network to let callers fall back").

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ProviderConfig;
use crate::model::Chain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderHealth {
    pub chain: Chain,
    pub name: String,
    pub url: String,
    pub status: CircuitState,
    pub circuit_state: CircuitState,
    pub consecutive_fails: u32,
    pub last_success: Option<u64>,
    pub last_error: Option<u64>,
    pub last_error_msg: Option<String>,
}

const CIRCUIT_OPEN_THRESHOLD: u32 = 5;

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A round-robin pool over a chain's configured RPC providers, with a
/// per-provider failure counter that opens a circuit after repeated
/// failures so a dead provider stops being handed out.
pub struct ProviderPool {
    chain: Chain,
    urls: Vec<url::Url>,
    health: Arc<DashMap<String, Arc<std::sync::Mutex<ProviderHealth>>>>,
    cursor: AtomicUsize,
}

impl ProviderPool {
    pub fn new(chain: Chain, providers: &[ProviderConfig]) -> Self {
        let health = Arc::new(DashMap::new());
        let urls: Vec<url::Url> = providers
            .iter()
            .map(|p| {
                let url = p.url.0.clone();
                let name = p.label.clone().unwrap_or_else(|| url.to_string());
                health.insert(
                    url.to_string(),
                    Arc::new(std::sync::Mutex::new(ProviderHealth {
                        chain,
                        name,
                        url: url.to_string(),
                        status: CircuitState::Closed,
                        circuit_state: CircuitState::Closed,
                        consecutive_fails: 0,
                        last_success: None,
                        last_error: None,
                        last_error_msg: None,
                    })),
                );
                url
            })
            .collect();
        ProviderPool {
            chain,
            urls,
            health,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns providers in round-robin order starting from the next
    /// cursor position, skipping those with an open circuit (unless all are
    /// open, in which case every provider is still offered — a wholly-open
    /// pool must keep trying rather than fail closed forever).
    pub fn ordered_candidates(&self) -> Vec<url::Url> {
        if self.urls.is_empty() {
            return Vec::new();
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % self.urls.len();
        let mut ordered: Vec<url::Url> = (0..self.urls.len())
            .map(|offset| self.urls[(start + offset) % self.urls.len()].clone())
            .collect();
        let all_open = ordered.iter().all(|u| self.is_open(u));
        if !all_open {
            ordered.retain(|u| !self.is_open(u));
        }
        ordered
    }

    fn is_open(&self, url: &url::Url) -> bool {
        self.health
            .get(&url.to_string())
            .map(|h| h.lock().unwrap().circuit_state == CircuitState::Open)
            .unwrap_or(false)
    }

    pub fn record_success(&self, url: &url::Url) {
        if let Some(entry) = self.health.get(&url.to_string()) {
            let mut h = entry.lock().unwrap();
            h.consecutive_fails = 0;
            h.circuit_state = CircuitState::Closed;
            h.status = CircuitState::Closed;
            h.last_success = Some(now());
        }
    }

    pub fn record_failure(&self, url: &url::Url, message: impl Into<String>) {
        if let Some(entry) = self.health.get(&url.to_string()) {
            let mut h = entry.lock().unwrap();
            h.consecutive_fails += 1;
            h.last_error = Some(now());
            h.last_error_msg = Some(message.into());
            if h.consecutive_fails >= CIRCUIT_OPEN_THRESHOLD {
                h.circuit_state = CircuitState::Open;
                h.status = CircuitState::Open;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        self.health.iter().map(|e| e.lock().unwrap().clone()).collect()
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiteralOrEnv;

    fn providers(n: usize) -> Vec<ProviderConfig> {
        (0..n)
            .map(|i| ProviderConfig {
                url: LiteralOrEnv(url::Url::parse(&format!("https://p{i}.example/")).unwrap()),
                label: Some(format!("p{i}")),
            })
            .collect()
    }

    #[test]
    fn round_robin_rotates_the_start_position() {
        let pool = ProviderPool::new(Chain::Btc, &providers(3));
        let first = pool.ordered_candidates();
        let second = pool.ordered_candidates();
        assert_ne!(first[0], second[0]);
    }

    #[test]
    fn repeated_failures_open_the_circuit() {
        let pool = ProviderPool::new(Chain::Evm, &providers(1));
        let url = pool.urls[0].clone();
        for _ in 0..CIRCUIT_OPEN_THRESHOLD {
            pool.record_failure(&url, "boom");
        }
        assert!(pool.is_open(&url));
    }

    #[test]
    fn success_resets_the_circuit() {
        let pool = ProviderPool::new(Chain::Sol, &providers(1));
        let url = pool.urls[0].clone();
        for _ in 0..CIRCUIT_OPEN_THRESHOLD {
            pool.record_failure(&url, "boom");
        }
        pool.record_success(&url);
        assert!(!pool.is_open(&url));
    }
}
