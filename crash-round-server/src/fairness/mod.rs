//! Provably Fair Crash Points
//!
//! The server commits to a secret seed before betting opens, mixes in the
//! players' seeds, and reveals the secret after the crash so every round can
//! be re-derived independently.
//!
//! - [`generator`]: seed commitment and crash point derivation
//! - [`verify`]: independent recomputation of a revealed round
//! - [`simulate`]: distribution summary over many rounds

pub mod generator;
pub mod simulate;
pub mod verify;

pub use generator::{
    compute_game_hash, crash_point_from_hash, crash_point_from_prefix, CrashCurve, CrashOutcome,
    CrashPointGenerator, OsSeedSource, SeedMaterial, SeedSource, ServerSeed,
};
pub use simulate::{simulate_rounds, SimulationReport};
pub use verify::{verify_round, RoundReveal, VerificationError, VerifiedRound};
