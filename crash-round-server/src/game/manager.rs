//! Game Manager
//!
//! Public boundary of the round server. Bet and cashout requests are gated
//! on the round phase, funnelled through their operation queues, and the
//! caller gets its own result back. Round events go to every subscriber.

use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::core::money::{Amount, Multiplier};
use crate::error::{GameError, GameResult};
use crate::fairness::{OsSeedSource, SeedSource};
use crate::game::events::RoundEvent;
use crate::game::machine::{
    BetQueue, BetRequest, CashoutQueue, CashoutRequest, CrashHistory, CrashRecord, RoundContext, RoundStateMachine,
};
use crate::game::queue::{OperationQueue, Processor};
use crate::game::state::{BetSummary, Round, RoundPhase};
use crate::ledger::store::Store;
use crate::ledger::transactions::{BetReceipt, CashoutReceipt, Ledger};

/// Inbound bet.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceBet {
    pub user_id: String,
    pub stake: Amount,
    pub client_seed: Option<String>,
}

/// What a freshly connected client needs to render the game.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialData {
    pub round_id: Uuid,
    pub phase: RoundPhase,
    pub hashed_server_seed: String,
    pub current_multiplier: Multiplier,
    pub bets: Vec<BetSummary>,
    pub total_staked: Amount,
    /// Newest first.
    pub history: Vec<CrashRecord>,
}

/// Entry point for connections.
pub struct GameManager {
    ctx: RoundContext,
}

impl GameManager {
    /// Wire up queues and shared state. Call [`start`](Self::start) to run rounds.
    pub fn new(config: GameConfig, store: Arc<dyn Store>) -> Self {
        let config = Arc::new(config);
        let round = Arc::new(RwLock::new(Round::idle()));
        let ledger = Ledger::new(store);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (shutdown, _) = watch::channel(false);

        let bet_queue: BetQueue = OperationQueue::new(
            "bet",
            config.max_queue_backlog,
            bet_processor(round.clone(), ledger.clone()),
        );
        let cashout_queue: CashoutQueue = OperationQueue::new(
            "cashout",
            config.max_queue_backlog,
            cashout_processor(round.clone(), ledger.clone()),
        );

        let ctx = RoundContext {
            history: Arc::new(RwLock::new(CrashHistory::new(config.crash_history_len))),
            config,
            round,
            ledger,
            bet_queue,
            cashout_queue,
            events,
            advance: Arc::new(Notify::new()),
            shutdown,
        };
        Self { ctx }
    }

    /// Spawn the round loop with OS-random server seeds.
    pub fn start(&self) -> JoinHandle<()> {
        self.start_with_seeds(Box::new(OsSeedSource))
    }

    /// Spawn the round loop with a custom seed source.
    pub fn start_with_seeds(&self, seeds: Box<dyn SeedSource>) -> JoinHandle<()> {
        let machine = RoundStateMachine::new(self.ctx.clone(), seeds);
        tokio::spawn(machine.run())
    }

    /// Place a bet in the current round.
    pub async fn place_bet(&self, request: PlaceBet) -> GameResult<BetReceipt> {
        self.validate_bet(&request)?;

        let ticket = {
            let round = self.ctx.round.read().await;
            if !round.accepts_bets() {
                return Err(GameError::Validation("Betting is closed".into()));
            }
            self.ctx.bet_queue.submit(BetRequest {
                user_id: request.user_id,
                stake: request.stake,
                round_id: round.round_id,
                client_seed: request.client_seed,
            })?
        };
        ticket.wait().await
    }

    /// Cash out an active bet at the current multiplier.
    pub async fn cashout(&self, bet_id: Uuid) -> GameResult<CashoutReceipt> {
        let ticket = {
            let round = self.ctx.round.read().await;
            if !round.accepts_cashouts() {
                return Err(GameError::Validation("Round is not running".into()));
            }
            if !round.has_bet(bet_id) {
                return Err(GameError::NotFound("Bet"));
            }
            self.ctx.cashout_queue.submit(CashoutRequest {
                bet_id,
                round_id: round.round_id,
            })?
        };
        ticket.wait().await
    }

    /// End the betting window now.
    pub fn advance_betting(&self) {
        self.ctx.advance.notify_waiters();
    }

    /// Stop the round loop after the current await point.
    pub fn shutdown(&self) {
        info!("Game manager shutting down");
        self.ctx.shutdown.send_replace(true);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.ctx.events.subscribe()
    }

    pub async fn initial_data(&self) -> InitialData {
        let history = self.ctx.history.read().await.to_vec();
        let round = self.ctx.round.read().await;
        InitialData {
            round_id: round.round_id,
            phase: round.phase,
            hashed_server_seed: round.hashed_server_seed.clone(),
            current_multiplier: round.current_multiplier,
            bets: round.bets.clone(),
            total_staked: round.total_staked,
            history,
        }
    }

    pub async fn phase(&self) -> RoundPhase {
        self.ctx.round.read().await.phase
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ctx.ledger
    }

    pub fn config(&self) -> &GameConfig {
        &self.ctx.config
    }

    fn validate_bet(&self, request: &PlaceBet) -> GameResult<()> {
        let config = &self.ctx.config;
        if request.user_id.trim().is_empty() {
            return Err(GameError::Validation("User id is required".into()));
        }
        if request.stake < config.min_stake || request.stake > config.max_stake {
            return Err(GameError::Validation(format!(
                "Stake must be between {} and {}",
                config.min_stake, config.max_stake
            )));
        }
        Ok(())
    }
}

impl Drop for GameManager {
    fn drop(&mut self) {
        self.ctx.shutdown.send_replace(true);
    }
}

/// Debit and record one bet. Runs with the round write lock held so the
/// state machine can't swap rounds mid-bet.
fn bet_processor(round: Arc<RwLock<Round>>, ledger: Ledger) -> Processor<BetRequest, BetReceipt> {
    Arc::new(move |request: BetRequest| {
        let round = round.clone();
        let ledger = ledger.clone();
        async move {
            let mut round = round.write().await;
            if round.round_id != request.round_id {
                return Err(GameError::Validation("Betting is closed".into()));
            }
            let receipt = ledger.place_bet(&request.user_id, request.stake, request.round_id)?;
            round.record_bet(&receipt, request.client_seed.as_deref());
            debug!("Round {} now has {} bets", round.round_id, round.bets.len());
            Ok(receipt)
        }
        .boxed()
    })
}

/// Settle one cashout at the live multiplier, still under the round lock so
/// the multiplier can't move and the round can't crash mid-settlement.
fn cashout_processor(round: Arc<RwLock<Round>>, ledger: Ledger) -> Processor<CashoutRequest, CashoutReceipt> {
    Arc::new(move |request: CashoutRequest| {
        let round = round.clone();
        let ledger = ledger.clone();
        async move {
            let mut round = round.write().await;
            if round.round_id != request.round_id || !round.accepts_cashouts() {
                return Err(GameError::Validation("Round has already crashed".into()));
            }
            let receipt = ledger.cashout(request.bet_id, request.round_id, round.current_multiplier)?;
            round.record_cashout(&receipt);
            Ok(receipt)
        }
        .boxed()
    })
}
