//! Round State Definitions
//!
//! The in-memory round owned by the state machine. Bet and cashout
//! processors mutate it under the same lock the state machine uses for
//! phase changes, so gating and recording never race.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::money::{Amount, Multiplier};
use crate::error::{GameError, GameResult};
use crate::ledger::model::{BetStatus, RoundAnalytics, RoundOutcome};
use crate::ledger::transactions::{BetReceipt, CashoutReceipt};

// =============================================================================
// ROUND PHASE
// =============================================================================

/// Round lifecycle. Strictly sequential:
///
/// ```text
/// Preparing -> Betting -> Running -> Crashed -> (countdown) -> Preparing
///      \__________\__________\______ Error -> (countdown) --/
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundPhase {
    Preparing,
    Betting,
    Running,
    Crashed,
    /// Round aborted; nothing is accepted until the next round.
    Error,
}

impl RoundPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundPhase::Preparing => "PREPARING",
            RoundPhase::Betting => "BETTING",
            RoundPhase::Running => "RUNNING",
            RoundPhase::Crashed => "CRASHED",
            RoundPhase::Error => "ERROR",
        }
    }
}

// =============================================================================
// CLIENT SEEDS
// =============================================================================

/// One player's contribution to a round's client seed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSeedContribution {
    pub username: String,
    pub client_seed: String,
}

/// Client seed material gathered for a future round.
///
/// Only the first `max` non-blank contributions are kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeedPool {
    max: usize,
    combined: String,
    details: Vec<ClientSeedContribution>,
}

impl SeedPool {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            combined: String::new(),
            details: Vec::new(),
        }
    }

    /// Fold a contribution in. Returns `false` if it was ignored.
    pub fn contribute(&mut self, username: &str, client_seed: &str) -> bool {
        let seed = client_seed.trim();
        if seed.is_empty() || self.details.len() >= self.max {
            return false;
        }
        self.combined.push_str(seed);
        self.details.push(ClientSeedContribution {
            username: username.to_string(),
            client_seed: seed.to_string(),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.details.len()
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    /// Final client seed, falling back to `default` when nobody contributed.
    pub fn resolve(self, default: &str) -> (String, Vec<ClientSeedContribution>) {
        if self.details.is_empty() {
            (default.to_string(), Vec::new())
        } else {
            (self.combined, self.details)
        }
    }
}

// =============================================================================
// BET SUMMARY
// =============================================================================

/// A bet as tracked by the live round.
///
/// Ids are kept out of serialized views so one player's bet can't be cashed
/// out by another connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BetSummary {
    #[serde(skip)]
    pub bet_id: Uuid,
    #[serde(skip)]
    pub user_id: String,
    pub username: String,
    pub stake: Amount,
    pub status: BetStatus,
    pub cashout_multiplier: Option<Multiplier>,
    pub payout: Option<Amount>,
}

// =============================================================================
// ROUND
// =============================================================================

/// Live round state.
#[derive(Clone, Debug)]
pub struct Round {
    pub round_id: Uuid,
    pub phase: RoundPhase,
    /// Bets are accepted only while this is set (and phase is `Betting`).
    pub betting_open: bool,

    /// Secret until the crash.
    pub server_seed: Option<String>,
    pub hashed_server_seed: String,
    pub client_seed: String,
    pub client_seed_details: Vec<ClientSeedContribution>,
    pub game_hash: Option<String>,
    pub raw_crash_point: Option<Multiplier>,
    pub final_crash_point: Option<Multiplier>,

    /// Non-decreasing while `Running`.
    pub current_multiplier: Multiplier,

    pub bets: Vec<BetSummary>,
    pub total_staked: Amount,
    pub total_payout: Amount,

    /// Client seeds offered by this round's bettors, used by the next round.
    pub next_seeds: SeedPool,

    pub created_at: DateTime<Utc>,
}

impl Round {
    /// Fresh round in `Preparing`.
    pub fn new(round_id: Uuid, hashed_server_seed: String, max_client_seeds: usize) -> Self {
        Self {
            round_id,
            phase: RoundPhase::Preparing,
            betting_open: false,
            server_seed: None,
            hashed_server_seed,
            client_seed: String::new(),
            client_seed_details: Vec::new(),
            game_hash: None,
            raw_crash_point: None,
            final_crash_point: None,
            current_multiplier: Multiplier::ONE,
            bets: Vec::new(),
            total_staked: Amount::ZERO,
            total_payout: Amount::ZERO,
            next_seeds: SeedPool::new(max_client_seeds),
            created_at: Utc::now(),
        }
    }

    /// Placeholder before the first round starts.
    pub fn idle() -> Self {
        let mut round = Self::new(Uuid::nil(), String::new(), 0);
        round.phase = RoundPhase::Error;
        round
    }

    #[inline]
    pub fn accepts_bets(&self) -> bool {
        self.phase == RoundPhase::Betting && self.betting_open
    }

    #[inline]
    pub fn accepts_cashouts(&self) -> bool {
        self.phase == RoundPhase::Running
    }

    /// Add an accepted bet and fold in the bettor's client seed.
    pub fn record_bet(&mut self, receipt: &BetReceipt, client_seed: Option<&str>) {
        self.bets.push(BetSummary {
            bet_id: receipt.bet_id,
            user_id: receipt.user_id.clone(),
            username: receipt.username.clone(),
            stake: receipt.stake,
            status: BetStatus::Active,
            cashout_multiplier: None,
            payout: None,
        });
        self.total_staked += receipt.stake;
        if let Some(seed) = client_seed {
            self.next_seeds.contribute(&receipt.username, seed);
        }
    }

    /// Mark a bet cashed out.
    pub fn record_cashout(&mut self, receipt: &CashoutReceipt) {
        if let Some(bet) = self.bets.iter_mut().find(|b| b.bet_id == receipt.bet_id) {
            bet.status = BetStatus::CashedOut;
            bet.cashout_multiplier = Some(receipt.multiplier);
            bet.payout = Some(receipt.payout);
        }
        self.total_payout += receipt.payout;
    }

    pub fn has_bet(&self, bet_id: Uuid) -> bool {
        self.bets.iter().any(|b| b.bet_id == bet_id)
    }

    /// Mark every still-active bet with `status`.
    pub fn close_active_bets(&mut self, status: BetStatus) {
        for bet in self.bets.iter_mut().filter(|b| b.status == BetStatus::Active) {
            bet.status = status;
            if status == BetStatus::Busted {
                bet.payout = Some(Amount::ZERO);
            }
        }
    }

    /// Mark the listed bets refunded, leaving the rest untouched.
    pub fn mark_refunded(&mut self, bet_ids: &[Uuid]) {
        for bet in self.bets.iter_mut().filter(|b| bet_ids.contains(&b.bet_id)) {
            bet.status = BetStatus::Refunded;
        }
    }

    /// Analytics row for this round, once its seeds are fixed.
    pub fn to_analytics(&self) -> GameResult<RoundAnalytics> {
        let missing = || GameError::InvalidState("round seeds are not fixed");
        let now = Utc::now();
        Ok(RoundAnalytics {
            round_id: self.round_id,
            server_seed: self.server_seed.clone().ok_or_else(missing)?,
            hashed_server_seed: self.hashed_server_seed.clone(),
            client_seed: self.client_seed.clone(),
            client_seed_details: self.client_seed_details.clone(),
            game_hash: self.game_hash.clone().ok_or_else(missing)?,
            raw_crash_point: self.raw_crash_point.ok_or_else(missing)?,
            final_crash_point: self.final_crash_point.ok_or_else(missing)?,
            total_players: self.bets.len() as u32,
            total_staked: self.total_staked,
            total_payout: self.total_payout,
            total_profit: Amount::ZERO,
            outcome: RoundOutcome::Pending,
            phase: self.phase,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(username: &str, stake: i64) -> BetReceipt {
        BetReceipt {
            bet_id: Uuid::new_v4(),
            user_id: format!("id-{}", username),
            username: username.to_string(),
            stake: Amount::from_units(stake),
            balance: Amount::ZERO,
        }
    }

    #[test]
    fn test_seed_pool_keeps_first_contributors() {
        let mut pool = SeedPool::new(3);
        assert!(pool.contribute("a", "one"));
        assert!(!pool.contribute("b", "   "));
        assert!(pool.contribute("c", " two "));
        assert!(pool.contribute("d", "three"));
        assert!(!pool.contribute("e", "four"));
        assert_eq!(pool.len(), 3);

        let (seed, details) = pool.resolve("family");
        assert_eq!(seed, "onetwothree");
        assert_eq!(details[1].username, "c");
    }

    #[test]
    fn test_empty_pool_uses_default() {
        let (seed, details) = SeedPool::new(3).resolve("family");
        assert_eq!(seed, "family");
        assert!(details.is_empty());
    }

    #[test]
    fn test_gates() {
        let mut round = Round::new(Uuid::new_v4(), "h".into(), 3);
        assert!(!round.accepts_bets());
        round.phase = RoundPhase::Betting;
        assert!(!round.accepts_bets());
        round.betting_open = true;
        assert!(round.accepts_bets());
        assert!(!round.accepts_cashouts());
        round.phase = RoundPhase::Running;
        assert!(!round.accepts_bets());
        assert!(round.accepts_cashouts());
        assert!(!Round::idle().accepts_bets());
    }

    #[test]
    fn test_record_bet_and_cashout() {
        let mut round = Round::new(Uuid::new_v4(), "h".into(), 3);
        let a = receipt("alice", 100);
        let b = receipt("bob", 50);
        round.record_bet(&a, Some("seed-a"));
        round.record_bet(&b, None);
        assert_eq!(round.total_staked, Amount::from_units(150));
        assert_eq!(round.next_seeds.len(), 1);

        round.record_cashout(&CashoutReceipt {
            bet_id: a.bet_id,
            user_id: a.user_id.clone(),
            multiplier: Multiplier::from_hundredths(150),
            payout: Amount::from_units(150),
            balance: Amount::from_units(150),
        });
        round.close_active_bets(BetStatus::Busted);

        assert_eq!(round.total_payout, Amount::from_units(150));
        assert_eq!(round.bets[0].status, BetStatus::CashedOut);
        assert_eq!(round.bets[1].status, BetStatus::Busted);
        assert_eq!(round.bets[1].payout, Some(Amount::ZERO));
    }

    #[test]
    fn test_mark_refunded_only_touches_listed_bets() {
        let mut round = Round::new(Uuid::new_v4(), "h".into(), 3);
        let a = receipt("alice", 100);
        let b = receipt("bob", 50);
        round.record_bet(&a, None);
        round.record_bet(&b, None);

        round.mark_refunded(&[b.bet_id]);

        assert_eq!(round.bets[0].status, BetStatus::Active);
        assert_eq!(round.bets[1].status, BetStatus::Refunded);
    }

    #[test]
    fn test_analytics_requires_seeds() {
        let mut round = Round::new(Uuid::new_v4(), "h".into(), 3);
        assert!(round.to_analytics().is_err());

        round.server_seed = Some("s".into());
        round.game_hash = Some("g".into());
        round.raw_crash_point = Some(Multiplier::from_whole(2));
        round.final_crash_point = Some(Multiplier::from_hundredths(198));
        round.record_bet(&receipt("alice", 10), None);
        let row = round.to_analytics().unwrap();
        assert_eq!(row.total_players, 1);
        assert_eq!(row.outcome, RoundOutcome::Pending);
    }

    #[test]
    fn test_summary_hides_ids() {
        let mut round = Round::new(Uuid::new_v4(), "h".into(), 3);
        round.record_bet(&receipt("alice", 10), None);
        let json = serde_json::to_value(&round.bets[0]).unwrap();
        assert!(json.get("betId").is_none());
        assert!(json.get("userId").is_none());
        assert_eq!(json["username"], "alice");
    }
}
