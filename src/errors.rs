/******************************************************************************
 *                                                                            *
 * Typed error taxonomy for the gameplay core. The error kind is the API      *
 * contract; the message is a human-readable string rendered at the reducer   *
 * boundary. Request reducers recover nothing: any GameError rolls the        *
 * transaction back and reaches the client as "<kind>: <message>".            *
 *                                                                            *
 ******************************************************************************/

use thiserror::Error;

pub type GameResult<T> = Result<T, GameError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GameError {
    /// Malformed coordinates, missing fields, out-of-range values.
    #[error("{0}")]
    Validation(String),

    /// Entity does not exist or is soft-deleted.
    #[error("{0}")]
    NotFound(String),

    /// Tier too low, biome inaccessible, non-owner action, missing grant.
    #[error("{0}")]
    Forbidden(String),

    /// Item already in use, claim race lost, battery already destroyed.
    #[error("{0}")]
    Conflict(String),

    /// A distance precondition failed. Carries actual and maximum meters.
    #[error("too far away: {actual_m:.0} m (max {max_m:.0} m)")]
    TooFar { actual_m: f64, max_m: f64 },

    /// Operation attempted before its cooldown expired.
    #[error("on cooldown for another {remaining_secs} s")]
    Cooldown { remaining_secs: u64 },

    /// Battery depleted, tool out of uses.
    #[error("{0}")]
    InsufficientCharge(String),

    /// Store errors and other faults the caller cannot act on.
    #[error("{0}")]
    Internal(String),
}

impl GameError {
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::Validation(_) => "validation",
            GameError::NotFound(_) => "not_found",
            GameError::Forbidden(_) => "forbidden",
            GameError::Conflict(_) => "conflict",
            GameError::TooFar { .. } => "too_far",
            GameError::Cooldown { .. } => "cooldown",
            GameError::InsufficientCharge(_) => "insufficient_charge",
            GameError::Internal(_) => "internal",
        }
    }
}

/// Reducers must return `Result<(), String>`; this keeps the kind visible
/// to clients that only see the flattened message.
impl From<GameError> for String {
    fn from(err: GameError) -> String {
        format!("{}: {}", err.kind(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_per_variant() {
        assert_eq!(GameError::Validation("x".into()).kind(), "validation");
        assert_eq!(GameError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(GameError::Forbidden("x".into()).kind(), "forbidden");
        assert_eq!(GameError::Conflict("x".into()).kind(), "conflict");
        assert_eq!(
            GameError::TooFar { actual_m: 120.0, max_m: 50.0 }.kind(),
            "too_far"
        );
        assert_eq!(GameError::Cooldown { remaining_secs: 7 }.kind(), "cooldown");
        assert_eq!(
            GameError::InsufficientCharge("x".into()).kind(),
            "insufficient_charge"
        );
        assert_eq!(GameError::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn flattened_message_carries_kind_and_payload() {
        let msg: String = GameError::TooFar { actual_m: 120.4, max_m: 50.0 }.into();
        assert_eq!(msg, "too_far: too far away: 120 m (max 50 m)");

        let msg: String = GameError::Cooldown { remaining_secs: 42 }.into();
        assert!(msg.starts_with("cooldown:"));
        assert!(msg.contains("42"));
    }
}
