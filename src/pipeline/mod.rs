// src/pipeline/mod.rs
//
// Event pipeline: wires the decision modules (zone cache, crossing
// tracker, movement guard, validator) to their side effects (records,
// device commands, notification fan-out).

pub mod engine;
pub mod metrics;

pub use engine::Engine;
