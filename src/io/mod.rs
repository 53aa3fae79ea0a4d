//! Randomness abstraction for simulation tests.
//!
//! Fault injection (`buggify`) and the simulation harness only ever draw
//! random numbers through [`Rng`], so a simulation run is fully determined
//! by its seed.

pub mod simulation;

/// Source of randomness
pub trait Rng: Send {
    fn next_u64(&mut self) -> u64;

    /// Returns true with the given probability (clamped to [0, 1])
    fn gen_bool(&mut self, probability: f64) -> bool;

    /// Uniform value in `[min, max)`, or `min` when the range is empty
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}
