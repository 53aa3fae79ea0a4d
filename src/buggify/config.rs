//! Per-fault probability configuration.

use super::faults::index_store;
use std::collections::HashMap;

/// Fault probabilities keyed by fault id
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Probability per fault id
    pub probabilities: HashMap<String, f64>,
    /// Multiplier applied to every configured probability
    pub global_multiplier: f64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultConfig {
    /// No fault configured
    pub fn new() -> Self {
        FaultConfig {
            probabilities: HashMap::new(),
            global_multiplier: 1.0,
        }
    }

    /// Every index store fault at a low rate
    pub fn moderate() -> Self {
        let mut config = Self::new();
        config
            .set(index_store::UNREACHABLE, 0.005)
            .set(index_store::EXISTS_FAIL, 0.01)
            .set(index_store::CREATE_INDEX_FAIL, 0.01)
            .set(index_store::DELETE_INDEX_FAIL, 0.01)
            .set(index_store::PUT_TEMPLATE_FAIL, 0.01)
            .set(index_store::DELETE_TEMPLATE_FAIL, 0.01)
            .set(index_store::ALIAS_WRITE_FAIL, 0.01)
            .set(index_store::RESOLVE_ALIAS_FAIL, 0.01)
            .set(index_store::REINDEX_FAIL, 0.02)
            .set(index_store::REINDEX_PARTIAL, 0.01)
            .set(index_store::LOST_ACK, 0.005);
        config
    }

    /// The moderate rates, four times over
    pub fn chaos() -> Self {
        FaultConfig {
            global_multiplier: 4.0,
            ..Self::moderate()
        }
    }

    pub fn set(&mut self, fault_id: &str, probability: f64) -> &mut Self {
        self.probabilities
            .insert(fault_id.to_string(), probability.clamp(0.0, 1.0));
        self
    }

    /// Effective probability for a fault id
    pub fn get(&self, fault_id: &str) -> f64 {
        self.probabilities
            .get(fault_id)
            .map(|p| (p * self.global_multiplier).clamp(0.0, 1.0))
            .unwrap_or(0.0)
    }
}
