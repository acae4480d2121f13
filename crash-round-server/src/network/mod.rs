//! Network Layer
//!
//! WebSocket server for player connections. Round logic lives in `game/`;
//! this layer only parses, routes and forwards.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use server::{GameServer, GameServerError};
