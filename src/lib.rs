pub mod checkpoint;
pub mod data;
pub mod model;
pub mod training;
pub mod utils;

/// Seed for the backend RNG so runs are reproducible.
pub const SEED: u64 = 11;
