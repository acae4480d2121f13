//! Round Verification
//!
//! Anyone holding the revealed seeds can recompute a round's crash point.
//! This module is that recomputation, used by the server's own tests and
//! by auditors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hash::sha256_hex;
use crate::core::money::Multiplier;
use crate::fairness::generator::{compute_game_hash, crash_point_from_hash, CrashCurve, CrashOutcome};

/// Everything published about a round after it crashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReveal {
    /// Secret half of the commitment.
    pub server_seed: String,
    /// Commitment broadcast before betting.
    pub hashed_server_seed: String,
    /// Accumulated client seed.
    pub client_seed: String,
    /// Game hash as claimed by the server (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_hash: Option<String>,
    /// Crash point broadcast during the round.
    pub final_crash_point: Multiplier,
}

/// Ways a reveal can fail to match.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// `sha256(server_seed)` differs from the published commitment.
    #[error("server seed does not match commitment {expected}")]
    CommitmentMismatch {
        /// Published commitment.
        expected: String,
        /// Hash of the revealed seed.
        computed: String,
    },

    /// Claimed game hash differs from the recomputed one.
    #[error("game hash mismatch: expected {expected}, computed {computed}")]
    GameHashMismatch {
        /// Claimed hash.
        expected: String,
        /// Recomputed hash.
        computed: String,
    },

    /// Crash point differs from the recomputed one.
    #[error("crash point mismatch: expected {expected}, computed {computed}")]
    CrashPointMismatch {
        /// Broadcast crash point.
        expected: Multiplier,
        /// Recomputed crash point.
        computed: Multiplier,
    },

    /// Game hash could not be interpreted.
    #[error("malformed game hash")]
    MalformedHash,
}

/// Successful verification output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRound {
    /// Recomputed game hash.
    pub game_hash: String,
    /// Recomputed crash outcome.
    pub outcome: CrashOutcome,
}

/// Recompute and check a revealed round.
pub fn verify_round(reveal: &RoundReveal, curve: &CrashCurve) -> Result<VerifiedRound, VerificationError> {
    // 1. Commitment
    let computed_commitment = sha256_hex(&reveal.server_seed);
    if computed_commitment != reveal.hashed_server_seed {
        return Err(VerificationError::CommitmentMismatch {
            expected: reveal.hashed_server_seed.clone(),
            computed: computed_commitment,
        });
    }

    // 2. Game hash
    let game_hash = compute_game_hash(&reveal.server_seed, &reveal.client_seed);
    if let Some(claimed) = &reveal.game_hash {
        if !claimed.eq_ignore_ascii_case(&game_hash) {
            return Err(VerificationError::GameHashMismatch {
                expected: claimed.clone(),
                computed: game_hash,
            });
        }
    }

    // 3. Crash point
    let outcome = crash_point_from_hash(&game_hash, curve).map_err(|_| VerificationError::MalformedHash)?;
    if outcome.final_crash_point != reveal.final_crash_point {
        return Err(VerificationError::CrashPointMismatch {
            expected: reveal.final_crash_point,
            computed: outcome.final_crash_point,
        });
    }

    Ok(VerifiedRound { game_hash, outcome })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::generator::CrashPointGenerator;
    use proptest::prelude::*;

    fn play_round(client_seed: &str) -> RoundReveal {
        let mut generator = CrashPointGenerator::default();
        let seed = generator.generate_server_seed();
        let game_hash = generator.generate_game_hash(client_seed).unwrap();
        let outcome = generator.calculate_crash_point().unwrap();

        RoundReveal {
            server_seed: seed.server_seed,
            hashed_server_seed: seed.hashed_server_seed,
            client_seed: client_seed.to_string(),
            game_hash: Some(game_hash),
            final_crash_point: outcome.final_crash_point,
        }
    }

    #[test]
    fn test_round_trip_verifies() {
        let reveal = play_round("alice-seedbob-seed");
        let verified = verify_round(&reveal, &CrashCurve::default()).unwrap();
        assert_eq!(verified.outcome.final_crash_point, reveal.final_crash_point);
        assert_eq!(Some(verified.game_hash), reveal.game_hash);
    }

    #[test]
    fn test_swapped_server_seed_fails() {
        let mut reveal = play_round("family");
        reveal.server_seed = "0".repeat(64);
        assert!(matches!(
            verify_round(&reveal, &CrashCurve::default()),
            Err(VerificationError::CommitmentMismatch { .. })
        ));
    }

    #[test]
    fn test_altered_client_seed_fails() {
        let mut reveal = play_round("family");
        reveal.client_seed = "families".into();
        assert!(matches!(
            verify_round(&reveal, &CrashCurve::default()),
            Err(VerificationError::GameHashMismatch { .. })
        ));
    }

    #[test]
    fn test_altered_crash_point_fails() {
        let mut reveal = play_round("family");
        reveal.final_crash_point = Multiplier::from_hundredths(reveal.final_crash_point.hundredths() + 1);
        assert!(matches!(
            verify_round(&reveal, &CrashCurve::default()),
            Err(VerificationError::CrashPointMismatch { .. })
        ));
    }

    #[test]
    fn test_reveal_json_shape() {
        let reveal = play_round("family");
        let json = serde_json::to_string(&reveal).unwrap();
        assert!(json.contains("\"serverSeed\""));
        assert!(json.contains("\"finalCrashPoint\""));
        let parsed: RoundReveal = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, reveal);
    }

    proptest! {
        #[test]
        fn prop_fairness_round_trip(server_seed in "[0-9a-f]{64}", client_seed in "[a-zA-Z0-9]{1,48}") {
            let curve = CrashCurve::default();
            let mut generator = CrashPointGenerator::new(curve);
            let seed = generator.load_server_seed(server_seed);
            generator.generate_game_hash(&client_seed).unwrap();
            let outcome = generator.calculate_crash_point().unwrap();

            let reveal = RoundReveal {
                server_seed: seed.server_seed,
                hashed_server_seed: seed.hashed_server_seed,
                client_seed,
                game_hash: None,
                final_crash_point: outcome.final_crash_point,
            };
            let verified = verify_round(&reveal, &curve).unwrap();
            prop_assert_eq!(verified.outcome, outcome);
        }
    }
}
