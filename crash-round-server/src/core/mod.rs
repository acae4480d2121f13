//! Core primitives.
//!
//! Exact money arithmetic and seed hashing. Nothing here touches floats
//! except at the wire boundary.

pub mod hash;
pub mod money;

// Re-export core types
pub use hash::{hex_prefix_value, sha256_hex, SeedHasher};
pub use money::{Amount, Multiplier};
