//! Engine error taxonomy.
//!
//! Every user-visible failure carries a stable code (distinct from the display
//! message) so callers can branch on kind without parsing free text.

use crate::money::Amount;
use uuid::Uuid;

/// Root error type for all settlement-engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Both external entropy sources and the local fallback failed.
    #[error("External entropy unavailable: {0}")]
    ExternalEntropyUnavailable(String),

    /// A stake would take the balance below zero. Rejected before mutation.
    #[error("Insufficient balance: have {available}, need {required}")]
    InsufficientBalance {
        available: Amount,
        required: Amount,
    },

    /// Operation targeted a round in the terminal `Settled` state.
    #[error("Round {0} is already closed")]
    RoundAlreadyClosed(Uuid),

    /// Settlement was already applied for this round; no balances changed.
    #[error("Round {0} is already settled")]
    AlreadySettled(Uuid),

    /// Optimistic-lock retries exhausted on a shared resource.
    #[error("Concurrency conflict on {resource} after {attempts} attempts")]
    ConcurrencyConflict { resource: String, attempts: u32 },

    /// Game parameters that must never reach the resolver (weights not
    /// summing to 100, empty item list, zero segments).
    #[error("Malformed outcome input: {0}")]
    MalformedOutcomeInput(String),

    /// Round state transition not permitted from the current status.
    #[error("Invalid transition for round {round_id}: {detail}")]
    InvalidTransition { round_id: Uuid, detail: String },

    #[error("Unknown round: {0}")]
    UnknownRound(Uuid),

    #[error("Unknown user: {0}")]
    UnknownUser(Uuid),

    #[error("Unknown pool: {0}")]
    UnknownPool(String),

    /// The pool crashed and a fresh epoch commitment has not been issued yet.
    #[error("Pool {0} is awaiting a new epoch seed")]
    PoolAwaitingSeed(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl EngineError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::ExternalEntropyUnavailable(_) => "ENTROPY_UNAVAILABLE",
            EngineError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            EngineError::RoundAlreadyClosed(_) => "ROUND_CLOSED",
            EngineError::AlreadySettled(_) => "ALREADY_SETTLED",
            EngineError::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            EngineError::MalformedOutcomeInput(_) => "MALFORMED_INPUT",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::UnknownRound(_) => "UNKNOWN_ROUND",
            EngineError::UnknownUser(_) => "UNKNOWN_USER",
            EngineError::UnknownPool(_) => "UNKNOWN_POOL",
            EngineError::PoolAwaitingSeed(_) => "POOL_AWAITING_SEED",
            EngineError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
        }
    }

    /// True for failures the caller may retry from identical inputs.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::ConcurrencyConflict { .. } | EngineError::StorageUnavailable(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
