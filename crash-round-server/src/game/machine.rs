//! Round State Machine
//!
//! Single authority over round progression. One task runs
//! [`RoundStateMachine::run`] and is the only writer of `Round::phase`.
//!
//! ```text
//! PREPARING  reconcile aborted rounds, seed commit, carry client seeds,
//!     │      deal crash point
//!     │
//! BETTING    gate open until timeout or advance_betting()
//!     │      gate closed -> bet queue drained -> analytics (retry/refund)
//! RUNNING    multiplier clock, one tick per interval
//!     │
//! CRASHED    reveal, cashout queue drained -> settle (retry) -> summary
//!     │
//! countdown  crash pause, then secondsRemaining every step
//!     └──► PREPARING
//! ```
//!
//! Any error aborts the round: a generic `round.error` goes out and the loop
//! continues with the countdown. A settlement that runs out of retries, or
//! refunds that fail, are retried at the start of every later PREPARING until
//! the ledger accepts them. Timers live inside the phase futures, so
//! dropping a phase (abort or shutdown) drops its timers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Notify, RwLock};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::core::money::{Amount, Multiplier};
use crate::error::{GameError, GameResult};
use crate::fairness::{CrashCurve, CrashPointGenerator, SeedSource};
use crate::game::events::RoundEvent;
use crate::game::queue::OperationQueue;
use crate::game::state::{Round, RoundPhase, SeedPool};
use crate::game::tick::{MultiplierClock, TickResult};
use crate::ledger::model::{BetStatus, RefundStatus};
use crate::ledger::transactions::{
    with_retry, AnalyticsOutcome, BetReceipt, CashoutReceipt, Ledger, RetryPolicy,
};

/// Bet placement request as queued.
#[derive(Debug, Clone)]
pub struct BetRequest {
    pub user_id: String,
    pub stake: Amount,
    pub round_id: Uuid,
    pub client_seed: Option<String>,
}

/// Cashout request as queued.
#[derive(Debug, Clone)]
pub struct CashoutRequest {
    pub bet_id: Uuid,
    pub round_id: Uuid,
}

pub type BetQueue = OperationQueue<BetRequest, BetReceipt>;
pub type CashoutQueue = OperationQueue<CashoutRequest, CashoutReceipt>;

/// Past crash point, newest first in [`CrashHistory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashRecord {
    pub round_id: Uuid,
    pub final_crash_point: Multiplier,
}

/// Bounded list of recent crash points.
#[derive(Debug, Clone, Default)]
pub struct CrashHistory {
    capacity: usize,
    entries: VecDeque<CrashRecord>,
}

impl CrashHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: CrashRecord) {
        self.entries.push_front(record);
        self.entries.truncate(self.capacity);
    }

    /// Newest first.
    pub fn to_vec(&self) -> Vec<CrashRecord> {
        self.entries.iter().copied().collect()
    }
}

/// Everything the state machine and the manager share.
#[derive(Clone)]
pub struct RoundContext {
    pub config: Arc<GameConfig>,
    pub round: Arc<RwLock<Round>>,
    pub ledger: Ledger,
    pub bet_queue: BetQueue,
    pub cashout_queue: CashoutQueue,
    pub events: broadcast::Sender<RoundEvent>,
    pub history: Arc<RwLock<CrashHistory>>,
    pub advance: Arc<Notify>,
    pub shutdown: watch::Sender<bool>,
}

impl RoundContext {
    fn emit(&self, event: RoundEvent) {
        if !event.is_tick() {
            debug!("Broadcasting {}", event.name());
        }
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.analytics_max_retries,
            delay: self.config.analytics_retry_delay,
        }
    }
}

/// Ledger work an aborted round left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unreconciled {
    /// Settlement ran out of retries; bets are still `Active`.
    Settle(Uuid),
    /// Some refunds failed; their bets are still `Active`.
    Refund(Uuid),
}

/// Drives rounds until shutdown.
pub struct RoundStateMachine {
    ctx: RoundContext,
    generator: CrashPointGenerator,
    unreconciled: Vec<Unreconciled>,
}

impl RoundStateMachine {
    pub fn new(ctx: RoundContext, seeds: Box<dyn SeedSource>) -> Self {
        let curve = CrashCurve::from(ctx.config.as_ref());
        Self {
            ctx,
            generator: CrashPointGenerator::with_source(curve, seeds),
            unreconciled: Vec::new(),
        }
    }

    /// Run rounds back to back until shutdown is signalled.
    pub async fn run(mut self) {
        let mut shutdown = self.ctx.shutdown.subscribe();
        info!("Round loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let crashed = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.play_round() => match result {
                    Ok(()) => true,
                    Err(e) => {
                        self.abort_round(e).await;
                        false
                    }
                },
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.countdown(crashed) => {}
            }
        }

        info!("Round loop stopped");
    }

    #[instrument(skip(self))]
    async fn play_round(&mut self) -> GameResult<()> {
        let round_id = self.prepare().await?;
        self.betting(round_id).await?;
        let crash_point = self.running(round_id).await?;
        self.crashed(round_id, crash_point).await
    }

    // -------------------------------------------------------------------------
    // PREPARING
    // -------------------------------------------------------------------------

    async fn prepare(&mut self) -> GameResult<Uuid> {
        // Bets queued for the previous round must have landed before its
        // client seeds are carried over.
        self.ctx.bet_queue.wait_drained().await;
        self.reconcile();

        let round_id = Uuid::new_v4();
        self.generator.reset();
        let seed = self.generator.generate_server_seed();

        let carried: SeedPool = {
            let mut round = self.ctx.round.write().await;
            let carried = std::mem::take(&mut round.next_seeds);
            *round = Round::new(round_id, seed.hashed_server_seed.clone(), self.ctx.config.max_client_seeds);
            carried
        };
        info!("Round {} preparing", round_id);

        self.ctx.emit(RoundEvent::Preparing { round_id });
        self.ctx.emit(RoundEvent::HashedSeedCommitted {
            round_id,
            hashed_server_seed: seed.hashed_server_seed,
        });

        let (client_seed, details) = carried.resolve(&self.ctx.config.default_client_seed);
        let game_hash = self.generator.generate_game_hash(&client_seed)?;
        let outcome = self.generator.calculate_crash_point()?;
        debug!("Round {} dealt from {} client seed contribution(s)", round_id, details.len());

        let mut round = self.ctx.round.write().await;
        round.server_seed = Some(seed.server_seed);
        round.client_seed = client_seed;
        round.client_seed_details = details;
        round.game_hash = Some(game_hash);
        round.raw_crash_point = Some(outcome.raw_crash_point);
        round.final_crash_point = Some(outcome.final_crash_point);
        Ok(round_id)
    }

    /// Retry settlements and refunds left over from aborted rounds. Failures
    /// stay queued for the next PREPARING and never abort the new round.
    fn reconcile(&mut self) {
        if self.unreconciled.is_empty() {
            return;
        }

        let ledger = &self.ctx.ledger;
        self.unreconciled.retain(|pending| match *pending {
            Unreconciled::Settle(round_id) => match ledger.settle_round(round_id) {
                Ok(settlement) => {
                    info!("Round {} settled late: {} busted", round_id, settlement.busted);
                    false
                }
                Err(e) => {
                    warn!("Round {} still unsettled: {}", round_id, e);
                    true
                }
            },
            Unreconciled::Refund(round_id) => {
                let summary = ledger.refund_round(round_id);
                if summary.status == RefundStatus::Success {
                    info!(
                        "Round {} refunds completed late: {} refunded",
                        round_id, summary.total_refunded
                    );
                    false
                } else {
                    warn!(
                        "Round {} refunds still outstanding: {}",
                        round_id, summary.message
                    );
                    true
                }
            }
        });
    }

    // -------------------------------------------------------------------------
    // BETTING
    // -------------------------------------------------------------------------

    async fn betting(&mut self, round_id: Uuid) -> GameResult<()> {
        let duration = self.ctx.config.betting_duration;

        // Register for advance_betting() before anyone can learn betting opened.
        let advance = self.ctx.advance.clone();
        let advanced = advance.notified();
        tokio::pin!(advanced);
        advanced.as_mut().enable();

        {
            let mut round = self.ctx.round.write().await;
            round.phase = RoundPhase::Betting;
            round.betting_open = true;
        }
        info!("Round {} betting open for {:?}", round_id, duration);
        self.ctx.emit(RoundEvent::Betting {
            round_id,
            closes_in_ms: duration.as_millis() as u64,
        });

        tokio::select! {
            _ = sleep(duration) => {}
            _ = &mut advanced => debug!("Betting advanced early"),
        }

        self.ctx.round.write().await.betting_open = false;
        self.ctx.bet_queue.wait_drained().await;

        let analytics = {
            let round = self.ctx.round.read().await;
            if round.bets.is_empty() {
                None
            } else {
                Some(round.to_analytics()?)
            }
        };

        let Some(analytics) = analytics else {
            debug!("Round {} has no bets", round_id);
            return Ok(());
        };

        info!(
            "Round {} betting closed: {} bets, {} staked",
            round_id, analytics.total_players, analytics.total_staked
        );

        match self
            .ctx
            .ledger
            .persist_round_analytics(&analytics, self.ctx.retry_policy())
            .await
        {
            AnalyticsOutcome::Saved { attempts } => {
                if attempts > 1 {
                    warn!("Round {} analytics stored after {} attempts", round_id, attempts);
                }
                Ok(())
            }
            AnalyticsOutcome::Refunded(summary) => {
                let refunded: Vec<Uuid> = summary.successful_refunds.iter().map(|r| r.bet_id).collect();
                self.ctx.round.write().await.mark_refunded(&refunded);
                if summary.status != RefundStatus::Success {
                    warn!(
                        "Round {} has {} refund(s) to retry",
                        round_id,
                        summary.number_of_users_to_refund - summary.number_of_users_refunded
                    );
                    self.unreconciled.push(Unreconciled::Refund(round_id));
                }
                Err(GameError::PersistenceFailure(format!(
                    "round analytics not stored; {}",
                    summary.message
                )))
            }
        }
    }

    // -------------------------------------------------------------------------
    // RUNNING
    // -------------------------------------------------------------------------

    async fn running(&mut self, round_id: Uuid) -> GameResult<Multiplier> {
        let crash_point = {
            let mut round = self.ctx.round.write().await;
            let crash_point = round
                .final_crash_point
                .ok_or(GameError::InvalidState("crash point not dealt"))?;
            round.phase = RoundPhase::Running;
            round.current_multiplier = Multiplier::ONE;
            crash_point
        };
        info!("Round {} running", round_id);
        self.ctx.emit(RoundEvent::Running { round_id });

        let mut clock = MultiplierClock::new(crash_point, self.ctx.config.growth_rate_ppm);
        let mut ticker = interval(self.ctx.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let step = clock.tick();

            {
                // Last multiplier and the phase flip land together so no
                // cashout sees a value at or past the crash.
                let mut round = self.ctx.round.write().await;
                round.current_multiplier = step.multiplier();
                if step.is_crashed() {
                    round.phase = RoundPhase::Crashed;
                }
            }

            match step {
                TickResult::Climbing(current_multiplier) => {
                    self.ctx.emit(RoundEvent::MultiplierTick { current_multiplier });
                }
                TickResult::Crashed(_) => break,
            }
        }

        info!("Round {} crashed at {} after {} ticks", round_id, crash_point, clock.ticks());
        Ok(crash_point)
    }

    // -------------------------------------------------------------------------
    // CRASHED
    // -------------------------------------------------------------------------

    async fn crashed(&mut self, round_id: Uuid, final_crash_point: Multiplier) -> GameResult<()> {
        self.ctx.emit(RoundEvent::Crashed {
            round_id,
            final_crash_point,
        });

        let reveal = {
            let round = self.ctx.round.read().await;
            RoundEvent::SeedRevealed {
                round_id,
                server_seed: round.server_seed.clone().unwrap_or_default(),
                hashed_server_seed: round.hashed_server_seed.clone(),
                client_seed: round.client_seed.clone(),
                game_hash: round.game_hash.clone().unwrap_or_default(),
            }
        };
        self.ctx.emit(reveal);

        self.ctx.history.write().await.push(CrashRecord {
            round_id,
            final_crash_point,
        });

        self.ctx.cashout_queue.wait_drained().await;

        let has_bets = !self.ctx.round.read().await.bets.is_empty();
        let outcome = if has_bets {
            let ledger = &self.ctx.ledger;
            let settled =
                with_retry(self.ctx.retry_policy(), "Settling round", || ledger.settle_round(round_id)).await;
            match settled {
                Ok((settlement, _)) => settlement.analytics.map(|row| row.outcome),
                Err(e) => {
                    self.unreconciled.push(Unreconciled::Settle(round_id));
                    return Err(e);
                }
            }
        } else {
            None
        };

        let summary = {
            let mut round = self.ctx.round.write().await;
            round.close_active_bets(BetStatus::Busted);
            RoundEvent::Summary {
                round_id,
                final_crash_point,
                total_players: round.bets.len() as u32,
                total_staked: round.total_staked,
                total_payout: round.total_payout,
                outcome,
            }
        };
        self.ctx.emit(summary);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // ABORT / COUNTDOWN
    // -------------------------------------------------------------------------

    async fn abort_round(&mut self, cause: GameError) {
        let round_id = {
            let mut round = self.ctx.round.write().await;
            round.phase = RoundPhase::Error;
            round.betting_open = false;
            round.round_id
        };
        error!("Round {} aborted: {}", round_id, cause);
        self.generator.reset();
        self.ctx.emit(RoundEvent::Error {
            message: cause.public_message(),
        });
    }

    async fn countdown(&mut self, after_crash: bool) {
        if after_crash {
            sleep(self.ctx.config.crash_pause).await;
        }

        let step = self.ctx.config.countdown_step;
        let total = self.ctx.config.countdown_duration;
        let steps = (total.as_millis() / step.as_millis().max(1)) as u32;

        let mut ticker = interval(step);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        for remaining in (0..=steps).rev() {
            ticker.tick().await;
            let left = step * remaining;
            self.ctx.emit(RoundEvent::Countdown {
                seconds_remaining: round_tenths(left),
            });
        }
    }
}

fn round_tenths(d: Duration) -> f64 {
    (d.as_millis() as f64 / 100.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded_newest_first() {
        let mut history = CrashHistory::new(3);
        for n in 1..=5u64 {
            history.push(CrashRecord {
                round_id: Uuid::nil(),
                final_crash_point: Multiplier::from_whole(n),
            });
        }
        let points: Vec<_> = history.to_vec().iter().map(|r| r.final_crash_point).collect();
        assert_eq!(
            points,
            vec![Multiplier::from_whole(5), Multiplier::from_whole(4), Multiplier::from_whole(3)]
        );
    }

    #[test]
    fn test_round_tenths() {
        assert_eq!(round_tenths(Duration::from_millis(4000)), 4.0);
        assert_eq!(round_tenths(Duration::from_millis(2300)), 2.3);
        assert_eq!(round_tenths(Duration::ZERO), 0.0);
    }
}
