//! # Crash Round Server
//!
//! Provably fair crash game rounds: commit a server seed, take bets, run a
//! multiplier up to a pre-committed crash point, settle, reveal.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASH ROUND SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Money and hashing primitives              │
//! │  ├── money.rs    - Amount / Multiplier in hundredths         │
//! │  └── hash.rs     - SHA-256 hex helpers                       │
//! │                                                              │
//! │  fairness/       - Provably fair crash points                │
//! │  ├── generator.rs- Seed commit, game hash, crash point       │
//! │  ├── verify.rs   - Independent round verification            │
//! │  └── simulate.rs - Distribution simulation                   │
//! │                                                              │
//! │  ledger/         - Accounts, bets, analytics                 │
//! │  ├── model.rs    - Persisted records                         │
//! │  ├── store.rs    - Transactional store                       │
//! │  └── transactions.rs - Bet, cashout, settle, refund          │
//! │                                                              │
//! │  game/           - Live rounds                               │
//! │  ├── state.rs    - Round, bets, client seed pool             │
//! │  ├── tick.rs     - Multiplier clock                          │
//! │  ├── events.rs   - Round broadcasts                          │
//! │  ├── queue.rs    - FIFO operation queues                     │
//! │  ├── machine.rs  - Round state machine                       │
//! │  └── manager.rs  - Public boundary                           │
//! │                                                              │
//! │  network/        - WebSocket transport                       │
//! │  ├── server.rs   - Connection handling                       │
//! │  └── protocol.rs - Message types                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness Guarantee
//!
//! The crash point of a round is fixed by `sha256(server_seed || client_seed)`
//! before betting opens. `sha256(server_seed)` is published first and the
//! seed itself after the crash, so anyone can recompute the outcome with
//! [`fairness::verify_round`].

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod fairness;
pub mod game;
pub mod ledger;
pub mod network;

// Re-export commonly used types
pub use config::{ConfigError, GameConfig};
pub use core::money::{Amount, Multiplier};
pub use error::{GameError, GameResult};
pub use fairness::{CrashCurve, CrashPointGenerator};
pub use game::manager::{GameManager, PlaceBet};
pub use ledger::store::{MemoryStore, Store};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
