//! Persisted records: accounts, bets, round analytics and refund summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::money::{Amount, Multiplier};
use crate::error::{GameError, GameResult};
use crate::game::state::{ClientSeedContribution, RoundPhase};

/// Account standing. Only `Active` accounts may bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Locked,
    Suspended,
}

/// Player account as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub user_id: String,
    pub username: String,
    /// Never negative.
    pub balance: Amount,
    pub status: AccountStatus,
}

impl Account {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, balance: Amount) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            balance,
            status: AccountStatus::Active,
        }
    }
}

/// Bet lifecycle. `Active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BetStatus {
    Active,
    CashedOut,
    Busted,
    Refunded,
}

impl BetStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BetStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub bet_id: Uuid,
    pub user_id: String,
    pub round_id: Uuid,
    pub stake: Amount,
    pub status: BetStatus,
    pub cashout_multiplier: Option<Multiplier>,
    pub payout: Option<Amount>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    /// New `Active` bet.
    pub fn new(user_id: impl Into<String>, round_id: Uuid, stake: Amount) -> Self {
        Self {
            bet_id: Uuid::new_v4(),
            user_id: user_id.into(),
            round_id,
            stake,
            status: BetStatus::Active,
            cashout_multiplier: None,
            payout: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Move to a terminal state. A bet leaves `Active` exactly once.
    fn settle(&mut self, to: BetStatus) -> GameResult<()> {
        if self.status.is_terminal() {
            return Err(GameError::AlreadySettled);
        }
        self.status = to;
        self.settled_at = Some(Utc::now());
        Ok(())
    }

    pub fn cash_out(&mut self, multiplier: Multiplier) -> GameResult<Amount> {
        self.settle(BetStatus::CashedOut)?;
        let payout = multiplier.apply(self.stake);
        self.cashout_multiplier = Some(multiplier);
        self.payout = Some(payout);
        Ok(payout)
    }

    pub fn bust(&mut self) -> GameResult<()> {
        self.settle(BetStatus::Busted)?;
        self.payout = Some(Amount::ZERO);
        Ok(())
    }

    pub fn refund(&mut self) -> GameResult<()> {
        self.settle(BetStatus::Refunded)
    }
}

/// House result of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundOutcome {
    Pending,
    Profit,
    Loss,
    BreakEven,
}

/// One row per round that accepted bets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundAnalytics {
    pub round_id: Uuid,
    pub server_seed: String,
    pub hashed_server_seed: String,
    pub client_seed: String,
    pub client_seed_details: Vec<ClientSeedContribution>,
    pub game_hash: String,
    pub raw_crash_point: Multiplier,
    pub final_crash_point: Multiplier,
    pub total_players: u32,
    pub total_staked: Amount,
    pub total_payout: Amount,
    /// `total_staked - total_payout`, from the house side.
    pub total_profit: Amount,
    pub outcome: RoundOutcome,
    pub phase: RoundPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoundAnalytics {
    /// Fix `total_profit` and `outcome` from the current totals.
    pub fn classify(&mut self) {
        self.total_profit = self.total_staked - self.total_payout;
        self.outcome = match self.total_payout.cmp(&self.total_staked) {
            std::cmp::Ordering::Greater => RoundOutcome::Loss,
            std::cmp::Ordering::Equal => RoundOutcome::BreakEven,
            std::cmp::Ordering::Less => RoundOutcome::Profit,
        };
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundDetail {
    pub user_id: String,
    pub bet_id: Uuid,
    pub amount: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Success,
    Partial,
    Failed,
}

/// Outcome of refunding a round whose analytics could not be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundSummary {
    pub round_id: Uuid,
    pub status: RefundStatus,
    pub total_staked: Amount,
    pub total_refunded: Amount,
    pub number_of_users_to_refund: usize,
    pub number_of_users_refunded: usize,
    pub successful_refunds: Vec<RefundDetail>,
    pub failed_refunds: Vec<RefundDetail>,
    pub errors: Vec<String>,
    pub message: String,
}

impl RefundSummary {
    pub(crate) fn new(round_id: Uuid, to_refund: usize, total_staked: Amount) -> Self {
        Self {
            round_id,
            status: RefundStatus::Partial,
            total_staked,
            total_refunded: Amount::ZERO,
            number_of_users_to_refund: to_refund,
            number_of_users_refunded: 0,
            successful_refunds: Vec::new(),
            failed_refunds: Vec::new(),
            errors: Vec::new(),
            message: String::new(),
        }
    }

    /// Set `status` and `message` from the counters.
    pub(crate) fn finish(&mut self) {
        let (status, message) = if self.number_of_users_refunded == self.number_of_users_to_refund {
            (RefundStatus::Success, "All refunds processed successfully".to_string())
        } else if self.number_of_users_refunded == 0 {
            (RefundStatus::Failed, "All refunds failed".to_string())
        } else {
            (
                RefundStatus::Partial,
                format!(
                    "{} out of {} refunds processed successfully",
                    self.number_of_users_refunded, self.number_of_users_to_refund
                ),
            )
        };
        self.status = status;
        self.message = message;
    }
}
