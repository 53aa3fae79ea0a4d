//! Orchestrator DST Tests
//!
//! Deterministic simulation tests (FoundationDB-style, seed-based) for the
//! create/update/delete workflows. Each seed drives a random workload over a
//! fault-injecting index store and checks the cluster state after every
//! operation.
//!
//! ## Test Categories
//!
//! - **Calm tests**: No faults, verify basic correctness
//! - **Moderate tests**: Some faults, verify rollback
//! - **Chaos tests**: Many faults, stress test

use index_lifecycle::dst::{
    run_dst_batch, summarize_batch, OrchestratorDSTConfig, OrchestratorDSTHarness,
};

// =============================================================================
// Single Seed Tests
// =============================================================================

#[tokio::test]
async fn test_orchestrator_dst_single_calm() {
    let mut harness = OrchestratorDSTHarness::new(OrchestratorDSTConfig::calm(12345));
    harness.run(300).await;

    let result = harness.result();
    println!("{}", result.summary());

    assert!(
        result.is_success(),
        "Calm mode should not violate invariants: {:?}",
        result.invariant_violations
    );
    assert_eq!(result.total_operations, 300);
    assert_eq!(result.rollback_failures, 0);
}

#[tokio::test]
async fn test_orchestrator_dst_single_chaos() {
    let mut harness = OrchestratorDSTHarness::new(OrchestratorDSTConfig::chaos(99999));
    harness.run(200).await;

    let result = harness.result();
    println!("{}", result.summary());
    println!("Store stats: {:?}", result.store_stats);

    assert!(
        result.is_success(),
        "Invariants must hold under chaos: {:?}",
        result.invariant_violations
    );
    assert!(result.store_stats.injected() > 0);
}

// =============================================================================
// Multi-Seed Batch Tests (DST)
// =============================================================================

#[tokio::test]
async fn test_orchestrator_dst_batch_calm() {
    let results = run_dst_batch(1000, 10, 100, OrchestratorDSTConfig::calm).await;
    println!("{}", summarize_batch(&results));

    assert!(results.iter().all(|r| r.is_success()), "All calm runs should pass");
}

#[tokio::test]
async fn test_orchestrator_dst_batch_moderate() {
    let results = run_dst_batch(2000, 20, 100, OrchestratorDSTConfig::moderate).await;
    let summary = summarize_batch(&results);
    println!("{}", summary);

    assert!(results.iter().all(|r| r.is_success()), "{}", summary);
}

#[tokio::test]
async fn test_orchestrator_dst_batch_chaos() {
    let results = run_dst_batch(3000, 20, 100, OrchestratorDSTConfig::chaos).await;
    let summary = summarize_batch(&results);
    println!("{}", summary);

    assert!(results.iter().all(|r| r.is_success()), "{}", summary);
    let faults: u64 = results.iter().map(|r| r.store_stats.injected()).sum();
    assert!(faults > 0, "chaos should inject faults");
}

// =============================================================================
// Stress Tests (ignored by default)
// =============================================================================

#[tokio::test]
#[ignore]
async fn test_orchestrator_dst_stress_1000_seeds() {
    let results = run_dst_batch(10_000, 1000, 200, OrchestratorDSTConfig::chaos).await;
    let summary = summarize_batch(&results);
    println!("{}", summary);

    assert!(results.iter().all(|r| r.is_success()), "{}", summary);
}
