//! Game Error Taxonomy
//!
//! Every failure a caller, the round driver or the ledger can observe.
//! Validation and domain errors are returned to the originating caller only;
//! `PersistenceFailure` and `Operational` are the round driver's concern.

use thiserror::Error;

/// Errors produced by the crash game core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// Bad stake or payload, rejected before queueing.
    #[error("{0}")]
    Validation(String),

    /// Stake exceeds the account balance.
    #[error("Insufficient balance")]
    InsufficientFunds,

    /// User or bet is missing.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Bet has already reached a terminal state.
    #[error("Bet already settled")]
    AlreadySettled,

    /// Operation queue backlog is full.
    #[error("Queue capacity exceeded ({backlog} pending)")]
    CapacityExceeded {
        /// Backlog size at rejection time.
        backlog: usize,
    },

    /// Generator or state machine used out of order.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Transaction aborted or analytics could not be stored.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// Unexpected failure; the current round is aborted.
    #[error("Operational error: {0}")]
    Operational(String),
}

impl GameError {
    /// True for errors that only concern the calling player.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InsufficientFunds
                | Self::NotFound(_)
                | Self::AlreadySettled
                | Self::CapacityExceeded { .. }
        )
    }

    /// Message safe to show to the player.
    ///
    /// Internal failures are collapsed into a generic message so storage
    /// details never leak over the wire.
    pub fn public_message(&self) -> String {
        match self {
            Self::PersistenceFailure(_) | Self::Operational(_) | Self::InvalidState(_) => {
                "Something went wrong on our end. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result alias used across the crate.
pub type GameResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors() {
        assert!(GameError::InsufficientFunds.is_caller_error());
        assert!(GameError::NotFound("Bet").is_caller_error());
        assert!(GameError::CapacityExceeded { backlog: 10 }.is_caller_error());
        assert!(!GameError::PersistenceFailure("disk".into()).is_caller_error());
        assert!(!GameError::Operational("boom".into()).is_caller_error());
    }

    #[test]
    fn test_public_message_hides_internals() {
        let err = GameError::PersistenceFailure("write conflict on bets".into());
        assert!(!err.public_message().contains("write conflict"));

        assert_eq!(GameError::NotFound("User").public_message(), "User not found");
        assert_eq!(GameError::InsufficientFunds.public_message(), "Insufficient balance");
    }
}
