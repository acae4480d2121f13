//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::money::{Amount, Multiplier};
use crate::error::GameError;
use crate::game::events::RoundEvent;
use crate::game::manager::InitialData;
use crate::ledger::transactions::{BetReceipt, CashoutReceipt};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Place a bet in the current round.
    #[serde(rename = "bet.place")]
    PlaceBet {
        user_id: String,
        /// Decimal stake, at most two decimals.
        stake: f64,
        client_request_id: String,
        #[serde(default)]
        client_seed: Option<String>,
    },

    /// Cash out a bet while the round is running.
    #[serde(rename = "bet.cashout")]
    Cashout { bet_id: Uuid, client_request_id: String },

    /// Ping for latency measurement.
    #[serde(rename = "ping")]
    Ping { timestamp: u64 },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to one client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "bet.place.success")]
    PlaceBetSuccess {
        client_request_id: String,
        bet_id: Uuid,
        balance: Amount,
    },

    #[serde(rename = "bet.place.error")]
    PlaceBetError { client_request_id: String, message: String },

    #[serde(rename = "bet.cashout.success")]
    CashoutSuccess {
        client_request_id: String,
        payout: Amount,
        multiplier: Multiplier,
        balance: Amount,
    },

    #[serde(rename = "bet.cashout.error")]
    CashoutError { client_request_id: String, message: String },

    /// Snapshot sent once on connect.
    #[serde(rename = "initialData")]
    InitialData(InitialData),

    /// A round broadcast, forwarded as-is.
    #[serde(rename = "round")]
    Round(RoundEvent),

    /// Pong response.
    #[serde(rename = "pong")]
    Pong { timestamp: u64, server_time: u64 },

    /// Connection-level error.
    #[serde(rename = "error")]
    Error(ServerError),

    /// Server is shutting down.
    #[serde(rename = "shutdown")]
    Shutdown { reason: String },
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unparsable or unknown message.
    InvalidInput,
    /// Connection limit reached.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl ServerMessage {
    /// Reply to a `bet.place`.
    pub fn bet_placed(client_request_id: String, result: Result<BetReceipt, GameError>) -> Self {
        match result {
            Ok(receipt) => ServerMessage::PlaceBetSuccess {
                client_request_id,
                bet_id: receipt.bet_id,
                balance: receipt.balance,
            },
            Err(e) => ServerMessage::PlaceBetError {
                client_request_id,
                message: e.public_message(),
            },
        }
    }

    /// Reply to a `bet.cashout`.
    pub fn cashed_out(client_request_id: String, result: Result<CashoutReceipt, GameError>) -> Self {
        match result {
            Ok(receipt) => ServerMessage::CashoutSuccess {
                client_request_id,
                payout: receipt.payout,
                multiplier: receipt.multiplier,
                balance: receipt.balance,
            },
            Err(e) => ServerMessage::CashoutError {
                client_request_id,
                message: e.public_message(),
            },
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn to_value(msg: &ServerMessage) -> Value {
        serde_json::from_str(&msg.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_parse_place_bet() {
        let msg = ClientMessage::from_json(
            r#"{"type":"bet.place","userId":"u1","stake":12.5,"clientRequestId":"r-1","clientSeed":"lucky"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::PlaceBet {
                user_id: "u1".into(),
                stake: 12.5,
                client_request_id: "r-1".into(),
                client_seed: Some("lucky".into()),
            }
        );

        // clientSeed is optional
        let msg = ClientMessage::from_json(r#"{"type":"bet.place","userId":"u1","stake":10,"clientRequestId":"r-2"}"#)
            .unwrap();
        assert!(matches!(msg, ClientMessage::PlaceBet { client_seed: None, .. }));
    }

    #[test]
    fn test_parse_cashout_and_ping() {
        let bet_id = Uuid::new_v4();
        let text = json!({"type": "bet.cashout", "betId": bet_id, "clientRequestId": "r-3"}).to_string();
        assert_eq!(
            ClientMessage::from_json(&text).unwrap(),
            ClientMessage::Cashout {
                bet_id,
                client_request_id: "r-3".into()
            }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"ping","timestamp":42}"#).unwrap(),
            ClientMessage::Ping { timestamp: 42 }
        );
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert!(ClientMessage::from_json(r#"{"type":"bet.steal","betId":"x"}"#).is_err());
    }

    #[test]
    fn test_bet_replies() {
        let ok = ServerMessage::bet_placed(
            "r-1".into(),
            Ok(BetReceipt {
                bet_id: Uuid::nil(),
                user_id: "u1".into(),
                username: "alice".into(),
                stake: Amount::from_units(10),
                balance: Amount::from_cents(9_050),
            }),
        );
        let value = to_value(&ok);
        assert_eq!(value["type"], "bet.place.success");
        assert_eq!(value["clientRequestId"], "r-1");
        assert_eq!(value["balance"], 90.5);

        let err = ServerMessage::bet_placed("r-2".into(), Err(GameError::InsufficientFunds));
        let value = to_value(&err);
        assert_eq!(value["type"], "bet.place.error");
        assert_eq!(value["message"], "Insufficient balance");
    }

    #[test]
    fn test_internal_errors_are_generic() {
        let msg = ServerMessage::cashed_out(
            "r-9".into(),
            Err(GameError::PersistenceFailure("disk on fire".into())),
        );
        let value = to_value(&msg);
        assert_eq!(value["type"], "bet.cashout.error");
        assert!(!value["message"].as_str().unwrap().contains("disk"));
    }

    #[test]
    fn test_round_event_is_wrapped() {
        let msg = ServerMessage::Round(RoundEvent::Countdown { seconds_remaining: 3.2 });
        let value = to_value(&msg);
        assert_eq!(value["type"], "round");
        assert_eq!(value["event"], "round.countdown");
        assert_eq!(value["payload"]["secondsRemaining"], 3.2);
    }

    #[test]
    fn test_error_codes() {
        let value = to_value(&ServerMessage::error(ErrorCode::InvalidInput, "Invalid message format"));
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "invalid_input");
    }
}
