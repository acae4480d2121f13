//! Crash Point Generator
//!
//! Commit-reveal crash multiplier derivation:
//!
//! ```text
//! server_seed  = hex(32 random bytes)                 (secret until crash)
//! hashed_seed  = sha256_hex(server_seed)              (published first)
//! game_hash    = sha256_hex(server_seed ‖ client_seed)
//! h            = first 13 hex chars of game_hash      (52 bits)
//! r            = h / 2^52                              ∈ [0, 1)
//! raw          = clamp(1 / r, 1.00, MAX)              (r = 0 → MAX)
//! final        = max(1.00, raw × (1 − edge))
//! ```
//!
//! Everything after the hash is integer math in hundredths, so a verifier on
//! any platform reproduces the exact same crash point.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::GameConfig;
use crate::core::hash::{hex_prefix_value, sha256_hex, SeedHasher};
use crate::core::money::{div_round_half_up, Multiplier};
use crate::error::{GameError, GameResult};

/// Hex characters of the game hash read as the random value.
pub const HASH_PREFIX_HEX_LEN: usize = 13;

/// Bits carried by the prefix (4 per hex character).
pub const HASH_PREFIX_BITS: u32 = (HASH_PREFIX_HEX_LEN * 4) as u32;

/// Random bytes in a server seed.
pub const SERVER_SEED_BYTES: usize = 32;

/// Shape of the crash distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashCurve {
    /// Upper clamp for the raw crash point.
    pub max_crash_point: Multiplier,
    /// House edge in basis points.
    pub house_edge_bps: u32,
}

impl Default for CrashCurve {
    fn default() -> Self {
        Self {
            max_crash_point: Multiplier::from_whole(10_000),
            house_edge_bps: 100,
        }
    }
}

impl From<&GameConfig> for CrashCurve {
    fn from(config: &GameConfig) -> Self {
        Self {
            max_crash_point: config.max_crash_point,
            house_edge_bps: config.house_edge_bps,
        }
    }
}

/// Raw and house-adjusted crash points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashOutcome {
    /// Crash point before the house edge.
    pub raw_crash_point: Multiplier,
    /// Crash point the round actually stops at.
    pub final_crash_point: Multiplier,
}

/// Map a 52-bit hash prefix onto the crash curve.
///
/// `prefix == 0` is the only value where `1 / r` is undefined; it maps to the
/// maximum so the result is always finite.
pub fn crash_point_from_prefix(prefix: u64, curve: &CrashCurve) -> CrashOutcome {
    let max = curve.max_crash_point.max(Multiplier::ONE);

    let raw = if prefix == 0 {
        max
    } else {
        // 100 / r == 100 * 2^52 / h, rounded to the hundredth
        let numerator = 100i128 << HASH_PREFIX_BITS;
        let hundredths = div_round_half_up(numerator, prefix as i128);
        let hundredths = u64::try_from(hundredths).unwrap_or(u64::MAX);
        Multiplier::from_hundredths(hundredths).clamp(Multiplier::ONE, max)
    };

    let final_crash_point = raw
        .less_basis_points(curve.house_edge_bps)
        .clamp(Multiplier::ONE, max);

    CrashOutcome {
        raw_crash_point: raw,
        final_crash_point,
    }
}

/// Derive the crash outcome straight from a game hash.
pub fn crash_point_from_hash(game_hash: &str, curve: &CrashCurve) -> GameResult<CrashOutcome> {
    let prefix = hex_prefix_value(game_hash, HASH_PREFIX_HEX_LEN)
        .ok_or(GameError::InvalidState("game hash is not a hex digest"))?;
    Ok(crash_point_from_prefix(prefix, curve))
}

/// `sha256_hex(server_seed ‖ client_seed)`
pub fn compute_game_hash(server_seed: &str, client_seed: &str) -> String {
    let mut hasher = SeedHasher::new();
    hasher.update_str(server_seed).update_str(client_seed);
    hasher.finalize_hex()
}

/// Fresh server seed and its commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSeed {
    /// Secret seed, revealed after the crash.
    pub server_seed: String,
    /// SHA-256 of the seed, published before betting.
    pub hashed_server_seed: String,
}

/// Round-scoped generator data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedMaterial {
    /// Secret server seed.
    pub server_seed: Option<String>,
    /// Published commitment.
    pub hashed_server_seed: Option<String>,
    /// Client seed the game hash was computed with.
    pub client_seed: Option<String>,
    /// Combined hash.
    pub game_hash: Option<String>,
    /// Crash point before the house edge.
    pub raw_crash_point: Option<Multiplier>,
    /// Crash point after the house edge.
    pub final_crash_point: Option<Multiplier>,
}

/// Where server seeds come from.
pub trait SeedSource: Send {
    fn next_server_seed(&mut self) -> String;
}

/// 32 bytes from the OS RNG, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn next_server_seed(&mut self) -> String {
        let mut bytes = [0u8; SERVER_SEED_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

impl<F> SeedSource for F
where
    F: FnMut() -> String + Send,
{
    fn next_server_seed(&mut self) -> String {
        self()
    }
}

/// Stateful generator, one round at a time.
pub struct CrashPointGenerator {
    curve: CrashCurve,
    source: Box<dyn SeedSource>,
    data: SeedMaterial,
}

impl Default for CrashPointGenerator {
    fn default() -> Self {
        Self::new(CrashCurve::default())
    }
}

impl std::fmt::Debug for CrashPointGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashPointGenerator")
            .field("curve", &self.curve)
            .field("hashed_server_seed", &self.data.hashed_server_seed)
            .finish_non_exhaustive()
    }
}

impl CrashPointGenerator {
    /// Create a generator drawing seeds from the OS RNG.
    pub fn new(curve: CrashCurve) -> Self {
        Self::with_source(curve, Box::new(OsSeedSource))
    }

    /// Create a generator with a custom seed source.
    pub fn with_source(curve: CrashCurve, source: Box<dyn SeedSource>) -> Self {
        Self {
            curve,
            source,
            data: SeedMaterial::default(),
        }
    }

    /// Curve in use.
    pub fn curve(&self) -> &CrashCurve {
        &self.curve
    }

    /// Current round-scoped data.
    pub fn data(&self) -> &SeedMaterial {
        &self.data
    }

    /// Generate and cache a fresh server seed.
    ///
    /// Anything derived from a previous seed is discarded.
    pub fn generate_server_seed(&mut self) -> ServerSeed {
        let seed = self.source.next_server_seed();
        self.load_server_seed(seed)
    }

    /// Cache a known server seed (replay and tests).
    pub fn load_server_seed(&mut self, server_seed: String) -> ServerSeed {
        let hashed_server_seed = sha256_hex(&server_seed);
        self.data = SeedMaterial {
            server_seed: Some(server_seed.clone()),
            hashed_server_seed: Some(hashed_server_seed.clone()),
            ..SeedMaterial::default()
        };
        ServerSeed {
            server_seed,
            hashed_server_seed,
        }
    }

    /// Combine the cached server seed with the client seed.
    pub fn generate_game_hash(&mut self, client_seed: &str) -> GameResult<String> {
        if client_seed.trim().is_empty() {
            return Err(GameError::InvalidState("client seed was not provided"));
        }
        let server_seed = self
            .data
            .server_seed
            .as_deref()
            .ok_or(GameError::InvalidState("server seed must be generated before game hash"))?;

        let game_hash = compute_game_hash(server_seed, client_seed);
        self.data.client_seed = Some(client_seed.to_string());
        self.data.game_hash = Some(game_hash.clone());
        self.data.raw_crash_point = None;
        self.data.final_crash_point = None;
        Ok(game_hash)
    }

    /// Derive and cache the crash point from the cached game hash.
    pub fn calculate_crash_point(&mut self) -> GameResult<CrashOutcome> {
        let game_hash = self
            .data
            .game_hash
            .as_deref()
            .ok_or(GameError::InvalidState("game hash must be generated before crash point"))?;

        let outcome = crash_point_from_hash(game_hash, &self.curve)?;
        self.data.raw_crash_point = Some(outcome.raw_crash_point);
        self.data.final_crash_point = Some(outcome.final_crash_point);
        Ok(outcome)
    }

    /// Clear every round-scoped field.
    pub fn reset(&mut self) {
        self.data = SeedMaterial::default();
    }
}
