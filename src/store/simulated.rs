//! Simulated Index Store with Fault Injection
//!
//! DST-compatible wrapper that injects store failures using buggify. All
//! randomness comes from the wrapped RNG, so a seed replays the same faults.
//!
//! Injected faults:
//! - the store is unreachable (any call, no effect)
//! - a primitive fails before reaching the engine (no effect)
//! - a write is applied but its acknowledgement is lost (effect, then error)
//! - a reindex reports per-document failures

use super::{AliasBindings, AliasTarget, IndexStore, ReindexReport, StoreError, StoreFuture};
use super::StoreResult;
use crate::buggify::faults::index_store as faults;
use crate::buggify::FaultConfig;
use crate::io::Rng;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability per fault id, see [`faults`]
    pub faults: FaultConfig,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            faults: FaultConfig::moderate(),
            latency_range_us: (0, 0),
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            faults: FaultConfig::chaos(),
            latency_range_us: (0, 500),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            faults: FaultConfig::new(),
            latency_range_us: (0, 0),
        }
    }

    pub fn with_fault(mut self, fault_id: &str, probability: f64) -> Self {
        self.faults.set(fault_id, probability);
        self
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub calls: u64,
    pub unreachable: u64,
    pub failures: u64,
    pub lost_acks: u64,
    pub partial_reindexes: u64,
}

impl SimulatedStoreStats {
    pub fn injected(&self) -> u64 {
        self.unreachable + self.failures + self.lost_acks + self.partial_reindexes
    }
}

struct SimulatedStoreInner<R: Rng> {
    rng: R,
    stats: SimulatedStoreStats,
}

/// Simulated index store that wraps another store and injects faults
pub struct SimulatedIndexStore<S: IndexStore, R: Rng> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner<R>>>,
}

impl<S: IndexStore, R: Rng> SimulatedIndexStore<S, R> {
    pub fn new(inner_store: S, rng: R, config: SimulatedStoreConfig) -> Self {
        SimulatedIndexStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng,
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// Roll the pre-call faults: latency, unreachable, then `fault`
    async fn before(&self, fault: Option<&'static str>) -> StoreResult<()> {
        let latency = {
            let mut s = self.state.lock();
            s.stats.calls += 1;
            let (min, max) = self.config.latency_range_us;
            if max > min {
                s.rng.gen_range(min, max)
            } else {
                min
            }
        };
        if latency > 0 {
            tokio::time::sleep(Duration::from_micros(latency)).await;
        }

        let mut s = self.state.lock();
        if crate::buggify!(&mut s.rng, &self.config.faults, faults::UNREACHABLE) {
            s.stats.unreachable += 1;
            return Err(StoreError::unavailable("simulated: No Living connections"));
        }
        if let Some(fault) = fault {
            if crate::buggify!(&mut s.rng, &self.config.faults, fault) {
                s.stats.failures += 1;
                return Err(StoreError::unavailable(format!("simulated {}", fault)));
            }
        }
        Ok(())
    }

    /// Roll the lost acknowledgement fault after an applied write
    fn after_write(&self, ack: Value) -> StoreResult<Value> {
        let mut s = self.state.lock();
        if crate::buggify!(&mut s.rng, &self.config.faults, faults::LOST_ACK) {
            s.stats.lost_acks += 1;
            return Err(StoreError::unavailable("simulated: acknowledgement lost"));
        }
        Ok(ack)
    }
}

impl<S: IndexStore, R: Rng + 'static> IndexStore for SimulatedIndexStore<S, R> {
    fn name(&self) -> &str {
        "simulated"
    }

    fn exists_alias<'a>(&'a self, alias: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.before(Some(faults::EXISTS_FAIL)).await?;
            self.inner_store.exists_alias(alias).await
        })
    }

    fn exists_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.before(Some(faults::EXISTS_FAIL)).await?;
            self.inner_store.exists_index(index).await
        })
    }

    fn create_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.before(Some(faults::CREATE_INDEX_FAIL)).await?;
            let ack = self.inner_store.create_index(index).await?;
            self.after_write(ack)
        })
    }

    fn delete_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.before(Some(faults::DELETE_INDEX_FAIL)).await?;
            let ack = self.inner_store.delete_index(index).await?;
            self.after_write(ack)
        })
    }

    fn put_template<'a>(&'a self, name: &'a str, body: &'a Value) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.before(Some(faults::PUT_TEMPLATE_FAIL)).await?;
            let ack = self.inner_store.put_template(name, body).await?;
            self.after_write(ack)
        })
    }

    fn delete_template<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.before(Some(faults::DELETE_TEMPLATE_FAIL)).await?;
            let ack = self.inner_store.delete_template(name).await?;
            self.after_write(ack)
        })
    }

    fn create_or_replace_alias<'a>(
        &'a self,
        alias: &'a str,
        index: &'a str,
    ) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.before(Some(faults::ALIAS_WRITE_FAIL)).await?;
            let ack = self.inner_store.create_or_replace_alias(alias, index).await?;
            self.after_write(ack)
        })
    }

    fn put_alias<'a>(&'a self, alias: &'a str, index: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.before(Some(faults::ALIAS_WRITE_FAIL)).await?;
            let ack = self.inner_store.put_alias(alias, index).await?;
            self.after_write(ack)
        })
    }

    fn switch_alias<'a>(
        &'a self,
        alias: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.before(Some(faults::ALIAS_WRITE_FAIL)).await?;
            let ack = self.inner_store.switch_alias(alias, from, to).await?;
            self.after_write(ack)
        })
    }

    fn delete_alias_binding<'a>(
        &'a self,
        alias: &'a str,
        target: &'a AliasTarget,
    ) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.before(Some(faults::ALIAS_WRITE_FAIL)).await?;
            let ack = self.inner_store.delete_alias_binding(alias, target).await?;
            self.after_write(ack)
        })
    }

    fn resolve_alias<'a>(&'a self, alias: &'a str) -> StoreFuture<'a, AliasBindings> {
        Box::pin(async move {
            self.before(Some(faults::RESOLVE_ALIAS_FAIL)).await?;
            self.inner_store.resolve_alias(alias).await
        })
    }

    fn reindex<'a>(&'a self, source: &'a str, dest: &'a str) -> StoreFuture<'a, ReindexReport> {
        Box::pin(async move {
            self.before(Some(faults::REINDEX_FAIL)).await?;
            let mut report = self.inner_store.reindex(source, dest).await?;

            let mut s = self.state.lock();
            if crate::buggify!(&mut s.rng, &self.config.faults, faults::REINDEX_PARTIAL) {
                s.stats.partial_reindexes += 1;
                report.failures.push(json!({
                    "index": dest,
                    "status": 429,
                    "cause": {"type": "es_rejected_execution_exception"},
                }));
            }
            Ok(report)
        })
    }

    fn await_consistency(&self) -> StoreFuture<'_, ()> {
        self.inner_store.await_consistency()
    }

    fn await_healthy(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.before(None).await?;
            self.inner_store.await_healthy().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::simulation::SimulatedRng;
    use crate::store::InMemoryIndexStore;

    #[tokio::test]
    async fn test_no_faults_passes_through() {
        let memory = InMemoryIndexStore::new();
        let store = SimulatedIndexStore::new(
            memory.clone(),
            SimulatedRng::new(42),
            SimulatedStoreConfig::no_faults(),
        );

        for i in 0..50 {
            store.create_index(&format!("orders-{}", i)).await.unwrap();
        }
        assert_eq!(memory.snapshot().index_names().len(), 50);
        let stats = store.stats();
        assert_eq!(stats.calls, 50);
        assert_eq!(stats.injected(), 0);
    }

    #[tokio::test]
    async fn test_faults_are_injected_as_unavailable() {
        let config =
            SimulatedStoreConfig::no_faults().with_fault(faults::CREATE_INDEX_FAIL, 0.5);
        let memory = InMemoryIndexStore::new();
        let store = SimulatedIndexStore::new(memory.clone(), SimulatedRng::new(7), config);

        let mut failures = 0;
        for i in 0..200 {
            match store.create_index(&format!("orders-{}", i)).await {
                Ok(_) => {}
                Err(err) => {
                    assert!(matches!(err, StoreError::Unavailable(_)));
                    failures += 1;
                }
            }
        }
        assert!(failures > 50 && failures < 150, "failures: {}", failures);
        assert_eq!(memory.snapshot().index_names().len(), 200 - failures);
    }

    #[tokio::test]
    async fn test_lost_ack_applies_write() {
        let config = SimulatedStoreConfig::no_faults().with_fault(faults::LOST_ACK, 1.0);
        let memory = InMemoryIndexStore::new();
        let store = SimulatedIndexStore::new(memory.clone(), SimulatedRng::new(1), config);

        assert!(store.create_index("orders-1").await.is_err());
        assert!(memory.snapshot().has_index("orders-1"));
        assert_eq!(store.stats().lost_acks, 1);
    }

    #[tokio::test]
    async fn test_same_seed_same_faults() {
        async fn run(seed: u64) -> Vec<bool> {
            let store = SimulatedIndexStore::new(
                InMemoryIndexStore::new(),
                SimulatedRng::new(seed),
                SimulatedStoreConfig::high_chaos(),
            );
            let mut outcomes = Vec::new();
            for i in 0..100 {
                outcomes.push(store.create_index(&format!("orders-{}", i)).await.is_ok());
            }
            outcomes
        }

        assert_eq!(run(99).await, run(99).await);
    }
}
