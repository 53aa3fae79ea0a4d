//! BUGGIFY - Deterministic Fault Injection
//!
//! Every call into the index store is a potential fault site. A fault site
//! asks `buggify!` whether to fail; the probability comes from the
//! [`FaultConfig`] of the simulated component and the draw from its seeded
//! RNG, so a failing simulation seed replays the exact same fault sequence.
//!
//! # Usage
//!
//! ```ignore
//! use crate::buggify::faults::index_store as faults;
//!
//! if buggify!(&mut rng, &config.faults, faults::CREATE_INDEX_FAIL) {
//!     return Err(StoreError::unavailable("simulated create_index failure"));
//! }
//! ```

pub mod config;
pub mod faults;

pub use config::FaultConfig;

use crate::io::Rng;

/// Core buggify check, called by the macro.
///
/// Unconfigured faults never trigger and never consume randomness.
#[inline]
pub fn should_buggify<R: Rng>(rng: &mut R, config: &FaultConfig, fault_id: &str) -> bool {
    let probability = config.get(fault_id);
    if probability <= 0.0 {
        return false;
    }
    rng.gen_range(0, 1_000_000) < (probability * 1_000_000.0) as u64
}

/// BUGGIFY macro - the main interface for fault injection
#[macro_export]
macro_rules! buggify {
    ($rng:expr, $config:expr, $fault_id:expr) => {
        $crate::buggify::should_buggify($rng, $config, $fault_id)
    };
}

#[cfg(test)]
mod tests {
    use super::faults::index_store;
    use super::*;
    use crate::io::simulation::SimulatedRng;

    #[test]
    fn test_unconfigured_fault_never_triggers() {
        let config = FaultConfig::new();
        let mut rng = SimulatedRng::new(3);

        for _ in 0..1000 {
            assert!(!buggify!(&mut rng, &config, index_store::CREATE_INDEX_FAIL));
        }
    }

    #[test]
    fn test_certain_and_impossible_faults() {
        let mut config = FaultConfig::new();
        config
            .set(index_store::LOST_ACK, 1.0)
            .set(index_store::REINDEX_FAIL, 0.0);
        let mut rng = SimulatedRng::new(5);

        let triggered = (0..100)
            .filter(|_| buggify!(&mut rng, &config, index_store::LOST_ACK))
            .count();
        assert_eq!(triggered, 100);
        assert!(!(0..100).any(|_| buggify!(&mut rng, &config, index_store::REINDEX_FAIL)));
    }

    #[test]
    fn test_moderate_rate() {
        let config = FaultConfig::moderate();
        let mut rng = SimulatedRng::new(11);

        let triggered = (0..10_000)
            .filter(|_| buggify!(&mut rng, &config, index_store::REINDEX_FAIL))
            .count();
        // 2% of 10k draws
        assert!(triggered > 100 && triggered < 300, "triggered: {}", triggered);
    }

    #[test]
    fn test_same_seed_same_faults() {
        let config = FaultConfig::chaos();
        let draws = |seed| {
            let mut rng = SimulatedRng::new(seed);
            (0..200)
                .map(|_| buggify!(&mut rng, &config, index_store::UNREACHABLE))
                .collect::<Vec<_>>()
        };
        assert_eq!(draws(42), draws(42));
    }
}
