//! Round Logic Module
//!
//! Everything that drives a live round.
//!
//! ## Module Structure
//!
//! - `state`: Live round, bets, client seed pool
//! - `tick`: Multiplier clock
//! - `events`: Round events broadcast to every connection
//! - `queue`: FIFO operation queues for bets and cashouts
//! - `machine`: Round state machine (sole phase writer)
//! - `manager`: Public boundary used by connections

pub mod state;
pub mod tick;
pub mod events;
pub mod queue;
pub mod machine;
pub mod manager;

// Re-export key types
pub use state::{BetSummary, ClientSeedContribution, Round, RoundPhase, SeedPool};
pub use tick::{MultiplierClock, TickResult};
pub use events::RoundEvent;
pub use queue::{OperationQueue, Processor, QueueTicket};
pub use machine::{CrashHistory, CrashRecord, RoundContext, RoundStateMachine};
pub use manager::{GameManager, InitialData, PlaceBet};
