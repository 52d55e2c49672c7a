// Mnema atoms layer: pure data types, ids, and the canonical error enum.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.

pub mod error;
pub mod ids;
pub mod types;
