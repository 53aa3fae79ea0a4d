//! Deterministic Simulation Testing for the orchestrator
//!
//! Shadow-state harness that drives random create/update/delete workloads
//! through [`IndexManager`] on top of a fault-injecting store, then checks
//! the cluster state against the guarantees of the workflows:
//!
//! - every alias binding points to an existing index
//! - an alias is bound to at most one index
//! - a failure leaves no orphan physical index behind unless it reported
//!   rollback errors, a dependency failure or a timeout
//! - a failed update with a clean rollback leaves the alias where it was
//! - a successful templated operation leaves its template in place
//!
//! ```text
//! for seed in 0..1000 {
//!     let mut harness = OrchestratorDSTHarness::new(OrchestratorDSTConfig::moderate(seed));
//!     harness.run(100).await;
//!     assert!(harness.result().is_success(), "{}", harness.result().summary());
//! }
//! ```

use crate::clock::{Clock, SimulatedClock};
use crate::config::ManagerConfig;
use crate::error::{ErrorKind, IndexError};
use crate::io::simulation::SimulatedRng;
use crate::io::Rng;
use crate::naming::LogicalName;
use crate::orchestrator::{CreateOptions, IndexManager, UpdateOptions};
use crate::store::{
    ClusterState, InMemoryIndexStore, SimulatedIndexStore, SimulatedStoreConfig,
    SimulatedStoreStats,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Configuration for orchestrator DST
#[derive(Debug, Clone)]
pub struct OrchestratorDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Index store fault configuration
    pub store_config: SimulatedStoreConfig,
    /// Number of distinct logical names the workload draws from
    pub names: usize,
    /// Probability that a create/update carries a template
    pub template_probability: f64,
    /// Simulated time between two operations
    pub step_ms: u64,
    /// Documents written into each freshly created index
    pub documents_per_index: usize,
}

impl Default for OrchestratorDSTConfig {
    fn default() -> Self {
        OrchestratorDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            names: 4,
            template_probability: 0.3,
            step_ms: 1_000,
            documents_per_index: 3,
        }
    }
}

impl OrchestratorDSTConfig {
    pub fn new(seed: u64) -> Self {
        OrchestratorDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no fault injection
    pub fn calm(seed: u64) -> Self {
        OrchestratorDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        OrchestratorDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::default(),
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        OrchestratorDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            template_probability: 0.5,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorOperation {
    Create { name: String, templated: bool },
    Update { name: String, templated: bool },
    Delete { name: String },
}

impl OrchestratorOperation {
    pub fn name(&self) -> &str {
        match self {
            OrchestratorOperation::Create { name, .. }
            | OrchestratorOperation::Update { name, .. }
            | OrchestratorOperation::Delete { name } => name,
        }
    }

    fn templated(&self) -> bool {
        match self {
            OrchestratorOperation::Create { templated, .. }
            | OrchestratorOperation::Update { templated, .. } => *templated,
            OrchestratorOperation::Delete { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Success { index: String },
    Failed { kind: ErrorKind, message: String },
}

/// Recorded operation for history tracking
#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub id: u64,
    pub operation: OrchestratorOperation,
    pub outcome: OperationOutcome,
    pub timestamp_ms: u64,
}

/// Workload generator
pub struct OrchestratorWorkload {
    rng: SimulatedRng,
    config: OrchestratorDSTConfig,
}

impl OrchestratorWorkload {
    pub fn new(config: OrchestratorDSTConfig) -> Self {
        OrchestratorWorkload {
            rng: SimulatedRng::new(config.seed),
            config,
        }
    }

    pub fn next_operation(&mut self) -> OrchestratorOperation {
        let name = format!("logs{}", self.rng.gen_range(0, self.config.names as u64));
        let templated = self.rng.gen_bool(self.config.template_probability);

        match self.rng.gen_range(0, 10) {
            0..=3 => OrchestratorOperation::Create { name, templated },
            4..=7 => OrchestratorOperation::Update { name, templated },
            _ => OrchestratorOperation::Delete { name },
        }
    }
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct OrchestratorDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub successful_operations: u64,
    /// Failed operations (expected under faults or for invalid sequences)
    pub failed_operations: u64,
    /// Failures whose rollback itself failed
    pub rollback_failures: u64,
    pub store_stats: SimulatedStoreStats,
    pub invariant_violations: Vec<String>,
    pub history: Vec<RecordedOperation>,
}

impl OrchestratorDSTResult {
    pub fn new(seed: u64) -> Self {
        OrchestratorDSTResult {
            seed,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            rollback_failures: 0,
            store_stats: SimulatedStoreStats::default(),
            invariant_violations: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} ok, {} failed, {} with rollback errors), {} faults injected, {} violations",
            self.seed,
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.rollback_failures,
            self.store_stats.injected(),
            self.invariant_violations.len()
        )
    }
}

type DSTStore = SimulatedIndexStore<InMemoryIndexStore, SimulatedRng>;

/// Main DST harness for the orchestrator
pub struct OrchestratorDSTHarness {
    config: OrchestratorDSTConfig,
    clock: SimulatedClock,
    store: Arc<DSTStore>,
    inner_store: InMemoryIndexStore,
    manager: IndexManager<DSTStore>,
    workload: OrchestratorWorkload,
    result: OrchestratorDSTResult,
    /// Orphans explained by a reported rollback or cleanup failure
    known_orphans: BTreeSet<String>,
}

impl OrchestratorDSTHarness {
    pub fn new(config: OrchestratorDSTConfig) -> Self {
        let clock = SimulatedClock::new(1_520_000_000_000);
        let inner_store = InMemoryIndexStore::new();
        // Different seed for the store than for the workload
        let rng = SimulatedRng::new(config.seed.wrapping_add(1));
        let store = Arc::new(SimulatedIndexStore::new(
            inner_store.clone(),
            rng,
            config.store_config.clone(),
        ));
        let manager = IndexManager::builder_shared(store.clone())
            .clock(clock.clone())
            .config(ManagerConfig::test())
            .build();

        OrchestratorDSTHarness {
            workload: OrchestratorWorkload::new(config.clone()),
            result: OrchestratorDSTResult::new(config.seed),
            config,
            clock,
            store,
            inner_store,
            manager,
            known_orphans: BTreeSet::new(),
        }
    }

    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.workload.next_operation();
            self.execute_operation(op).await;
            self.clock.advance_ms(self.config.step_ms);
        }
        self.result.store_stats = self.store.stats();
    }

    async fn execute_operation(&mut self, op: OrchestratorOperation) {
        self.result.total_operations += 1;
        let op_id = self.result.total_operations;
        let before = self.inner_store.snapshot();

        let template = op.templated().then(|| {
            json!({
                "settings": { "number_of_shards": 1 },
                "mappings": { "properties": { "op": { "type": "long" } } },
            })
        });
        let outcome = match &op {
            OrchestratorOperation::Create { name, .. } => {
                let options = CreateOptions {
                    template: template.clone(),
                };
                self.manager.create(name, options).await.map(|o| o.index)
            }
            OrchestratorOperation::Update { name, .. } => {
                let mut options = UpdateOptions::new();
                options.template = template.clone();
                self.manager.update(name, options).await.map(|o| o.index)
            }
            OrchestratorOperation::Delete { name } => {
                self.manager.delete(name).await.map(|o| o.index)
            }
        };

        let after = self.inner_store.snapshot();
        self.check_invariants(op_id, &op, &outcome, &before, &after);

        let recorded = match outcome {
            Ok(index) => {
                self.result.successful_operations += 1;
                if matches!(op, OrchestratorOperation::Create { .. }) {
                    self.seed_documents(op_id, &index);
                }
                OperationOutcome::Success { index }
            }
            Err(err) => {
                self.result.failed_operations += 1;
                if !err.rollback_errors().is_empty() {
                    self.result.rollback_failures += 1;
                }
                OperationOutcome::Failed {
                    kind: err.kind(),
                    message: err.message().to_string(),
                }
            }
        };
        self.result.history.push(RecordedOperation {
            id: op_id,
            operation: op,
            outcome: recorded,
            timestamp_ms: self.clock_ms(),
        });
    }

    fn seed_documents(&self, op_id: u64, index: &str) {
        let documents: Vec<Value> = (0..self.config.documents_per_index)
            .map(|i| json!({ "op": op_id, "n": i }))
            .collect();
        let _ = self
            .inner_store
            .with_state(|state| state.insert_documents(index, documents));
    }

    fn clock_ms(&self) -> u64 {
        self.clock.now().as_millis()
    }

    fn violation(&mut self, op_id: u64, op: &OrchestratorOperation, message: String) {
        self.result
            .invariant_violations
            .push(format!("op {} {:?}: {}", op_id, op, message));
    }

    fn check_invariants(
        &mut self,
        op_id: u64,
        op: &OrchestratorOperation,
        outcome: &Result<String, IndexError>,
        before: &ClusterState,
        after: &ClusterState,
    ) {
        // Invariants 1 and 2: bindings are sound
        for alias in after.alias_names() {
            let bound = after.alias_indices(&alias);
            if bound.len() > 1 {
                self.violation(op_id, op, format!("alias {} bound to {:?}", alias, bound));
            }
            for index in bound {
                if !after.has_index(&index) {
                    self.violation(
                        op_id,
                        op,
                        format!("alias {} bound to missing index {}", alias, index),
                    );
                }
            }
        }

        // Invariant 3: no unexplained orphans
        let orphans = orphans(op.name(), after);
        let new_orphans: Vec<String> = orphans
            .into_iter()
            .filter(|index| !self.known_orphans.contains(index))
            .collect();
        if !new_orphans.is_empty() {
            let explained = match outcome {
                Ok(_) => false,
                Err(err) => {
                    !err.rollback_errors().is_empty()
                        || matches!(err.kind(), ErrorKind::DependencyFailure | ErrorKind::Timeout)
                }
            };
            if explained {
                self.known_orphans.extend(new_orphans);
            } else {
                self.violation(op_id, op, format!("orphan indices {:?}", new_orphans));
            }
        }

        let name = op.name();
        match (op, outcome) {
            (OrchestratorOperation::Create { templated, .. }, Ok(index)) => {
                if after.alias_indices(name) != vec![index.clone()] {
                    self.violation(op_id, op, format!("alias not bound to {}", index));
                }
                self.check_template(op_id, op, *templated, after);
            }
            (OrchestratorOperation::Update { templated, .. }, Ok(index)) => {
                if after.alias_indices(name) != vec![index.clone()] {
                    self.violation(op_id, op, format!("alias not bound to {}", index));
                }
                if let [source] = before.alias_indices(name).as_slice() {
                    if after.has_index(source) {
                        self.violation(op_id, op, format!("source index {} survived", source));
                    }
                    let expected = before.documents(source).map_or(0, <[Value]>::len);
                    let copied = after.documents(index).map_or(0, <[Value]>::len);
                    if copied != expected {
                        self.violation(
                            op_id,
                            op,
                            format!("{} of {} documents reindexed", copied, expected),
                        );
                    }
                }
                self.check_template(op_id, op, *templated, after);
            }
            (OrchestratorOperation::Delete { .. }, Ok(index)) => {
                if after.has_index(index) {
                    self.violation(op_id, op, format!("index {} survived deletion", index));
                }
            }
            // Invariant 4: a cleanly rolled back update did not move the alias
            (OrchestratorOperation::Update { .. }, Err(err)) => {
                let switched = err.ops().is_some_and(|ops| ops.contains("switch"));
                let previous = before.alias_indices(name);
                if err.rollback_errors().is_empty()
                    && !switched
                    && previous.len() == 1
                    && after.alias_indices(name) != previous
                {
                    self.violation(
                        op_id,
                        op,
                        format!(
                            "alias moved from {:?} to {:?} after {}",
                            previous,
                            after.alias_indices(name),
                            err
                        ),
                    );
                }
            }
            (_, Err(err)) if err.kind() == ErrorKind::Validation => {
                self.violation(op_id, op, format!("unexpected validation error: {}", err));
            }
            _ => {}
        }
    }

    // Invariant 5
    fn check_template(
        &mut self,
        op_id: u64,
        op: &OrchestratorOperation,
        templated: bool,
        after: &ClusterState,
    ) {
        if templated && after.template(op.name()).is_none() {
            self.violation(op_id, op, "template missing after success".to_string());
        }
    }

    pub fn result(&self) -> &OrchestratorDSTResult {
        &self.result
    }

    pub fn into_result(self) -> OrchestratorDSTResult {
        self.result
    }
}

/// Physical indices of `name` that no alias points to
fn orphans(name: &str, state: &ClusterState) -> Vec<String> {
    let Ok(logical) = LogicalName::parse(name) else {
        return Vec::new();
    };
    let bound = state.alias_indices(name);
    state
        .index_names()
        .into_iter()
        .filter(|index| logical.owns(index) && !bound.contains(index))
        .collect()
}

/// Run a batch of DST tests with different seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> OrchestratorDSTConfig,
) -> Vec<OrchestratorDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = OrchestratorDSTHarness::new(config_fn(seed));
        harness.run(ops_per_run).await;
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[OrchestratorDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_ok: u64 = results.iter().map(|r| r.successful_operations).sum();
    let total_faults: u64 = results.iter().map(|r| r.store_stats.injected()).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops ({} ok), {} faults injected",
        passed, total, total_ops, total_ok, total_faults
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}
