//! Storage layer
//!
//! Repository traits for resources, delivery configs, artifacts, diff
//! fingerprints and pauses, plus an in-memory backend implementing all of
//! them.

mod memory;
mod traits;

pub use memory::InMemoryStorage;
pub use traits::*;
