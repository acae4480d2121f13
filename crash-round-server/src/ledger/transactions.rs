//! Ledger Operations
//!
//! Every balance change happens in the same store transaction as the bet
//! change it pays for. A failed transaction leaves balances untouched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::money::{Amount, Multiplier};
use crate::error::{GameError, GameResult};
use crate::game::state::RoundPhase;
use crate::ledger::model::{
    Account, AccountStatus, Bet, BetStatus, RefundDetail, RefundStatus, RefundSummary, RoundAnalytics,
};
use crate::ledger::store::Store;

/// Result of an accepted bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BetReceipt {
    pub bet_id: Uuid,
    pub user_id: String,
    pub username: String,
    pub stake: Amount,
    /// Balance after the debit.
    pub balance: Amount,
}

/// Result of a settled cashout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutReceipt {
    pub bet_id: Uuid,
    pub user_id: String,
    pub multiplier: Multiplier,
    pub payout: Amount,
    /// Balance after the credit.
    pub balance: Amount,
}

/// End-of-round settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Bets moved from `Active` to `Busted`.
    pub busted: usize,
    /// Classified analytics row, if the round had one.
    pub analytics: Option<RoundAnalytics>,
}

/// Attempts and spacing for persistence retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub delay: Duration,
}

/// How storing round analytics ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsOutcome {
    Saved { attempts: u32 },
    /// Every attempt failed; the round's active bets were refunded.
    Refunded(RefundSummary),
}

/// Run a synchronous store operation until it succeeds or the policy runs out.
pub async fn with_retry<T, F>(policy: RetryPolicy, what: &str, mut op: F) -> GameResult<(T, u32)>
where
    F: FnMut() -> GameResult<T>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if attempt > policy.max_retries => return Err(e),
            Err(e) => {
                warn!("{} failed (attempt {}/{}): {}", what, attempt, policy.max_retries + 1, e);
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

/// Bet, cashout and round bookkeeping against a [`Store`].
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Debit `stake` and open an `Active` bet in `round_id`.
    pub fn place_bet(&self, user_id: &str, stake: Amount, round_id: Uuid) -> GameResult<BetReceipt> {
        if !stake.is_positive() {
            return Err(GameError::Validation("Stake must be positive".into()));
        }

        let receipt = self.store.transaction(|tx| {
            let account = tx.account_mut(user_id).ok_or(GameError::NotFound("User"))?;
            if account.status != AccountStatus::Active {
                return Err(GameError::Validation("Account is not active".into()));
            }
            account.balance = account
                .balance
                .checked_debit(stake)
                .ok_or(GameError::InsufficientFunds)?;
            let balance = account.balance;
            let username = account.username.clone();

            let bet = Bet::new(user_id, round_id, stake);
            let bet_id = bet.bet_id;
            tx.insert_bet(bet)?;

            Ok(BetReceipt {
                bet_id,
                user_id: user_id.to_string(),
                username,
                stake,
                balance,
            })
        })?;

        debug!("Bet {} placed by {} for {}", receipt.bet_id, user_id, stake);
        Ok(receipt)
    }

    /// Settle an `Active` bet of `round_id` at `multiplier`.
    pub fn cashout(&self, bet_id: Uuid, round_id: Uuid, multiplier: Multiplier) -> GameResult<CashoutReceipt> {
        let receipt = self.store.transaction(|tx| {
            let bet = tx
                .bet_mut(bet_id)
                .filter(|bet| bet.round_id == round_id)
                .ok_or(GameError::NotFound("Bet"))?;
            let payout = bet.cash_out(multiplier)?;
            let user_id = bet.user_id.clone();

            let account = tx.account_mut(&user_id).ok_or(GameError::NotFound("User"))?;
            account.balance += payout;
            let balance = account.balance;

            let row = tx
                .round_analytics_mut(round_id)
                .ok_or_else(|| GameError::PersistenceFailure(format!("no analytics for round {}", round_id)))?;
            row.total_payout += payout;
            row.updated_at = Utc::now();

            Ok(CashoutReceipt {
                bet_id,
                user_id,
                multiplier,
                payout,
                balance,
            })
        })?;

        debug!("Bet {} cashed out at {} for {}", bet_id, multiplier, receipt.payout);
        Ok(receipt)
    }

    /// Insert the analytics row for a round once.
    pub fn save_round_analytics(&self, analytics: &RoundAnalytics) -> GameResult<()> {
        self.store.transaction(|tx| tx.insert_round_analytics(analytics.clone()))
    }

    /// Store analytics, refunding the round if every attempt fails.
    pub async fn persist_round_analytics(&self, analytics: &RoundAnalytics, policy: RetryPolicy) -> AnalyticsOutcome {
        match with_retry(policy, "Saving round analytics", || self.save_round_analytics(analytics)).await {
            Ok(((), attempts)) => AnalyticsOutcome::Saved { attempts },
            Err(e) => {
                error!("Round {} analytics could not be stored: {}", analytics.round_id, e);
                let summary = self.refund_round(analytics.round_id);
                error!(
                    "Refund summary for round {}: {} ({} of {} refunded, {} total)",
                    summary.round_id,
                    summary.message,
                    summary.number_of_users_refunded,
                    summary.number_of_users_to_refund,
                    summary.total_refunded
                );
                AnalyticsOutcome::Refunded(summary)
            }
        }
    }

    /// Bust every remaining `Active` bet and classify the round, atomically.
    pub fn settle_round(&self, round_id: Uuid) -> GameResult<Settlement> {
        let settlement = self.store.transaction(|tx| {
            let mut busted = 0;
            for bet_id in tx.round_bet_ids(round_id) {
                if let Some(bet) = tx.bet_mut(bet_id) {
                    if bet.status == BetStatus::Active {
                        bet.bust()?;
                        busted += 1;
                    }
                }
            }

            let analytics = tx.round_analytics_mut(round_id).map(|row| {
                row.classify();
                row.phase = RoundPhase::Crashed;
                row.clone()
            });
            Ok(Settlement { busted, analytics })
        })?;

        if let Some(row) = &settlement.analytics {
            info!(
                "Round {} settled: {} busted, staked {}, paid {}, {:?}",
                round_id, settlement.busted, row.total_staked, row.total_payout, row.outcome
            );
        }
        Ok(settlement)
    }

    /// Refund each `Active` bet of a round in its own transaction.
    pub fn refund_round(&self, round_id: Uuid) -> RefundSummary {
        let active: GameResult<Vec<(Uuid, String, Amount)>> = self.store.read(|view| {
            view.round_bet_ids(round_id)
                .into_iter()
                .filter_map(|id| view.bet(id))
                .filter(|bet| bet.status == BetStatus::Active)
                .map(|bet| (bet.bet_id, bet.user_id.clone(), bet.stake))
                .collect()
        });

        let active = match active {
            Ok(active) => active,
            Err(e) => {
                let mut summary = RefundSummary::new(round_id, 0, Amount::ZERO);
                summary.status = RefundStatus::Failed;
                summary.message = e.to_string();
                summary.errors.push(e.to_string());
                return summary;
            }
        };

        let total: Amount = active.iter().map(|(_, _, stake)| *stake).sum();
        let mut summary = RefundSummary::new(round_id, active.len(), total);

        for (bet_id, user_id, stake) in active {
            let result = self.store.transaction(|tx| {
                tx.bet_mut(bet_id).ok_or(GameError::NotFound("Bet"))?.refund()?;
                let account = tx.account_mut(&user_id).ok_or(GameError::NotFound("User"))?;
                account.balance += stake;
                Ok(())
            });

            let mut detail = RefundDetail {
                user_id,
                bet_id,
                amount: stake,
                error: None,
            };
            match result {
                Ok(()) => {
                    summary.total_refunded += stake;
                    summary.number_of_users_refunded += 1;
                    summary.successful_refunds.push(detail);
                }
                Err(e) => {
                    warn!("Refund of bet {} failed: {}", bet_id, e);
                    detail.error = Some(e.to_string());
                    summary.errors.push(e.to_string());
                    summary.failed_refunds.push(detail);
                }
            }
        }

        summary.finish();
        summary
    }

    pub fn account(&self, user_id: &str) -> GameResult<Option<Account>> {
        self.store.read(|view| view.account(user_id).cloned())
    }

    pub fn bet(&self, bet_id: Uuid) -> GameResult<Option<Bet>> {
        self.store.read(|view| view.bet(bet_id).cloned())
    }

    pub fn round_analytics(&self, round_id: Uuid) -> GameResult<Option<RoundAnalytics>> {
        self.store.read(|view| view.round_analytics(round_id).cloned())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ledger::model::RoundOutcome;
    use crate::ledger::store::MemoryStore;

    pub(crate) fn sample_analytics(round_id: Uuid) -> RoundAnalytics {
        RoundAnalytics {
            round_id,
            server_seed: "seed".into(),
            hashed_server_seed: "hash".into(),
            client_seed: "family".into(),
            client_seed_details: Vec::new(),
            game_hash: "game".into(),
            raw_crash_point: Multiplier::from_whole(2),
            final_crash_point: Multiplier::from_hundredths(198),
            total_players: 0,
            total_staked: Amount::ZERO,
            total_payout: Amount::ZERO,
            total_profit: Amount::ZERO,
            outcome: RoundOutcome::Pending,
            phase: RoundPhase::Betting,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn setup(accounts: &[(&str, i64)]) -> (Arc<MemoryStore>, Ledger) {
        let store = Arc::new(MemoryStore::with_accounts(
            accounts
                .iter()
                .map(|(id, units)| Account::new(*id, format!("user-{}", id), Amount::from_units(*units))),
        ));
        let ledger = Ledger::new(store.clone());
        (store, ledger)
    }

    fn balance(ledger: &Ledger, user_id: &str) -> Amount {
        ledger.account(user_id).unwrap().unwrap().balance
    }

    const NO_WAIT: RetryPolicy = RetryPolicy {
        max_retries: 3,
        delay: Duration::ZERO,
    };

    #[test]
    fn test_place_bet_debits() {
        let (_, ledger) = setup(&[("u1", 100)]);
        let round = Uuid::new_v4();
        let receipt = ledger.place_bet("u1", Amount::from_units(40), round).unwrap();
        assert_eq!(receipt.balance, Amount::from_units(60));
        assert_eq!(receipt.username, "user-u1");
        assert_eq!(balance(&ledger, "u1"), Amount::from_units(60));

        let bet = ledger.bet(receipt.bet_id).unwrap().unwrap();
        assert_eq!(bet.status, BetStatus::Active);
        assert_eq!(bet.round_id, round);
    }

    #[test]
    fn test_place_bet_errors_leave_balance() {
        let (store, ledger) = setup(&[("u1", 20)]);
        let round = Uuid::new_v4();

        assert_eq!(
            ledger.place_bet("u1", Amount::from_units(30), round),
            Err(GameError::InsufficientFunds)
        );
        assert_eq!(
            ledger.place_bet("ghost", Amount::from_units(1), round),
            Err(GameError::NotFound("User"))
        );
        assert!(matches!(
            ledger.place_bet("u1", Amount::ZERO, round),
            Err(GameError::Validation(_))
        ));

        let mut locked = Account::new("u1", "user-u1", Amount::from_units(20));
        locked.status = AccountStatus::Locked;
        store.upsert_account(locked).unwrap();
        assert!(matches!(
            ledger.place_bet("u1", Amount::from_units(5), round),
            Err(GameError::Validation(_))
        ));
        assert_eq!(balance(&ledger, "u1"), Amount::from_units(20));
    }

    #[test]
    fn test_cashout_pays_and_settles_once() {
        let (_, ledger) = setup(&[("u1", 100)]);
        let round = Uuid::new_v4();
        let bet = ledger.place_bet("u1", Amount::from_units(100), round).unwrap();
        let mut row = sample_analytics(round);
        row.total_staked = Amount::from_units(100);
        ledger.save_round_analytics(&row).unwrap();

        let receipt = ledger.cashout(bet.bet_id, round, Multiplier::from_hundredths(150)).unwrap();
        assert_eq!(receipt.payout, Amount::from_units(150));
        assert_eq!(receipt.balance, Amount::from_units(150));
        assert_eq!(
            ledger.round_analytics(round).unwrap().unwrap().total_payout,
            Amount::from_units(150)
        );

        assert_eq!(
            ledger.cashout(bet.bet_id, round, Multiplier::from_hundredths(200)),
            Err(GameError::AlreadySettled)
        );
        assert_eq!(balance(&ledger, "u1"), Amount::from_units(150));
    }

    #[test]
    fn test_cashout_is_scoped_to_round() {
        let (_, ledger) = setup(&[("u1", 100)]);
        let round = Uuid::new_v4();
        let bet = ledger.place_bet("u1", Amount::from_units(10), round).unwrap();
        assert_eq!(
            ledger.cashout(bet.bet_id, Uuid::new_v4(), Multiplier::ONE),
            Err(GameError::NotFound("Bet"))
        );
        assert_eq!(
            ledger.cashout(Uuid::new_v4(), round, Multiplier::ONE),
            Err(GameError::NotFound("Bet"))
        );
    }

    #[test]
    fn test_cashout_without_analytics_rolls_back() {
        let (_, ledger) = setup(&[("u1", 100)]);
        let round = Uuid::new_v4();
        let bet = ledger.place_bet("u1", Amount::from_units(10), round).unwrap();
        assert!(matches!(
            ledger.cashout(bet.bet_id, round, Multiplier::from_whole(2)),
            Err(GameError::PersistenceFailure(_))
        ));
        assert_eq!(ledger.bet(bet.bet_id).unwrap().unwrap().status, BetStatus::Active);
        assert_eq!(balance(&ledger, "u1"), Amount::from_units(90));
    }

    #[test]
    fn test_settle_round_busts_remaining() {
        let (_, ledger) = setup(&[("u1", 100), ("u2", 100)]);
        let round = Uuid::new_v4();
        let a = ledger.place_bet("u1", Amount::from_units(50), round).unwrap();
        let b = ledger.place_bet("u2", Amount::from_units(50), round).unwrap();
        let mut row = sample_analytics(round);
        row.total_staked = Amount::from_units(100);
        ledger.save_round_analytics(&row).unwrap();
        ledger.cashout(a.bet_id, round, Multiplier::from_whole(3)).unwrap();

        let settlement = ledger.settle_round(round).unwrap();
        assert_eq!(settlement.busted, 1);
        let row = settlement.analytics.unwrap();
        assert_eq!(row.outcome, RoundOutcome::Loss);
        assert_eq!(row.total_profit, Amount::from_units(-50));
        assert_eq!(row.phase, RoundPhase::Crashed);

        assert_eq!(ledger.bet(b.bet_id).unwrap().unwrap().status, BetStatus::Busted);
        assert_eq!(ledger.bet(a.bet_id).unwrap().unwrap().status, BetStatus::CashedOut);
        assert_eq!(ledger.cashout(b.bet_id, round, Multiplier::ONE), Err(GameError::AlreadySettled));
    }

    #[test]
    fn test_balance_conservation() {
        let (_, ledger) = setup(&[("u1", 500), ("u2", 500), ("u3", 500)]);
        let round = Uuid::new_v4();
        let bets: Vec<_> = ["u1", "u2", "u3"]
            .iter()
            .map(|u| ledger.place_bet(u, Amount::from_cents(12_345), round).unwrap())
            .collect();
        let mut row = sample_analytics(round);
        row.total_staked = Amount::from_cents(3 * 12_345);
        ledger.save_round_analytics(&row).unwrap();
        ledger.cashout(bets[0].bet_id, round, Multiplier::from_hundredths(137)).unwrap();
        ledger.cashout(bets[1].bet_id, round, Multiplier::from_hundredths(101)).unwrap();
        let settlement = ledger.settle_round(round).unwrap();
        let row = settlement.analytics.unwrap();

        let total: Amount = ["u1", "u2", "u3"].iter().map(|u| balance(&ledger, u)).sum();
        assert_eq!(total, Amount::from_units(1500) - row.total_staked + row.total_payout);
    }

    #[tokio::test]
    async fn test_analytics_failure_refunds_all_bets() {
        let (store, ledger) = setup(&[("u1", 100), ("u2", 100), ("u3", 100)]);
        let round = Uuid::new_v4();
        let bets: Vec<_> = ["u1", "u2", "u3"]
            .iter()
            .map(|u| ledger.place_bet(u, Amount::from_units(10), round).unwrap())
            .collect();

        store.set_fail_analytics_writes(true);
        let outcome = ledger.persist_round_analytics(&sample_analytics(round), NO_WAIT).await;

        let AnalyticsOutcome::Refunded(summary) = outcome else {
            panic!("expected refund");
        };
        assert_eq!(store.analytics_write_attempts(), 4);
        assert_eq!(summary.status, RefundStatus::Success);
        assert_eq!(summary.number_of_users_to_refund, 3);
        assert_eq!(summary.number_of_users_refunded, 3);
        assert_eq!(summary.total_refunded, Amount::from_units(30));
        for bet in bets {
            assert_eq!(ledger.bet(bet.bet_id).unwrap().unwrap().status, BetStatus::Refunded);
        }
        for user in ["u1", "u2", "u3"] {
            assert_eq!(balance(&ledger, user), Amount::from_units(100));
        }
    }

    #[tokio::test]
    async fn test_analytics_saved_after_transient_failure() {
        let (store, ledger) = setup(&[]);
        store.fail_next_commits(2);
        let outcome = ledger
            .persist_round_analytics(&sample_analytics(Uuid::new_v4()), NO_WAIT)
            .await;
        assert_eq!(outcome, AnalyticsOutcome::Saved { attempts: 3 });
    }

    #[test]
    fn test_partial_refund_reports_failures() {
        let (store, ledger) = setup(&[("u1", 100), ("u2", 100)]);
        let round = Uuid::new_v4();
        ledger.place_bet("u1", Amount::from_units(10), round).unwrap();
        ledger.place_bet("u2", Amount::from_units(10), round).unwrap();

        store.fail_next_commits(1);
        let summary = ledger.refund_round(round);
        assert_eq!(summary.status, RefundStatus::Partial);
        assert_eq!(summary.number_of_users_refunded, 1);
        assert_eq!(summary.failed_refunds.len(), 1);
        assert_eq!(summary.errors.len(), 1);
    }
}
