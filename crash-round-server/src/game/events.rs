//! Round Events
//!
//! Everything the state machine announces to all connections. Serialized as
//! `{"event": "<name>", "payload": {...}}`. Broadcasts carry round-level
//! data only, never a single player's balance.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::money::{Amount, Multiplier};
use crate::ledger::model::RoundOutcome;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all_fields = "camelCase")]
pub enum RoundEvent {
    /// New round created; seeds are being prepared.
    #[serde(rename = "round.phase.preparing")]
    Preparing { round_id: Uuid },

    /// Commitment to this round's server seed.
    #[serde(rename = "round.hashedSeedCommitted")]
    HashedSeedCommitted { round_id: Uuid, hashed_server_seed: String },

    #[serde(rename = "round.phase.betting")]
    Betting { round_id: Uuid, closes_in_ms: u64 },

    #[serde(rename = "round.phase.running")]
    Running { round_id: Uuid },

    #[serde(rename = "round.multiplier.tick")]
    MultiplierTick { current_multiplier: Multiplier },

    #[serde(rename = "round.phase.crashed")]
    Crashed { round_id: Uuid, final_crash_point: Multiplier },

    /// Everything needed to recompute the crash point.
    #[serde(rename = "round.seedRevealed")]
    SeedRevealed {
        round_id: Uuid,
        server_seed: String,
        hashed_server_seed: String,
        client_seed: String,
        game_hash: String,
    },

    #[serde(rename = "round.summary")]
    Summary {
        round_id: Uuid,
        final_crash_point: Multiplier,
        total_players: u32,
        total_staked: Amount,
        total_payout: Amount,
        /// `None` when the round took no bets.
        outcome: Option<RoundOutcome>,
    },

    #[serde(rename = "round.countdown")]
    Countdown { seconds_remaining: f64 },

    /// Round aborted. The message is generic on purpose.
    #[serde(rename = "round.error")]
    Error { message: String },
}

impl RoundEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            RoundEvent::Preparing { .. } => "round.phase.preparing",
            RoundEvent::HashedSeedCommitted { .. } => "round.hashedSeedCommitted",
            RoundEvent::Betting { .. } => "round.phase.betting",
            RoundEvent::Running { .. } => "round.phase.running",
            RoundEvent::MultiplierTick { .. } => "round.multiplier.tick",
            RoundEvent::Crashed { .. } => "round.phase.crashed",
            RoundEvent::SeedRevealed { .. } => "round.seedRevealed",
            RoundEvent::Summary { .. } => "round.summary",
            RoundEvent::Countdown { .. } => "round.countdown",
            RoundEvent::Error { .. } => "round.error",
        }
    }

    /// High-frequency events, skipped by verbose logging.
    pub fn is_tick(&self) -> bool {
        matches!(self, RoundEvent::MultiplierTick { .. } | RoundEvent::Countdown { .. })
    }
}
