//! Error taxonomy shared by the field, sharing, session and protocol layers.
//!
//! Transport- and orchestration-level errors (`NetworkTransient`, `SessionTimeout`,
//! `LedgerRejected`, ...) live closer to where they are raised; this module only
//! covers the errors that `mpc` itself can produce.

use thiserror::Error;

use crate::PartyId;

/// Errors produced by field arithmetic, secret sharing, sessions and the
/// protocol engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Division by the additive identity.
    #[error("division by zero")]
    DivisionByZero,

    /// Attempted to invert an element with no multiplicative inverse (i.e. zero,
    /// since the field's modulus is prime every other element is invertible).
    #[error("element is not invertible")]
    NotInvertible,

    /// Total capacity across all three parties is below the requested order size.
    #[error("insufficient capacity: have {available}, need {required}")]
    InsufficientCapacity { available: String, required: String },

    /// A named share was already set for this session; shares are write-once.
    #[error("share `{0}` was already set for this session")]
    ShareAlreadySet(String),

    /// No session exists for the given identifier.
    #[error("no session for id `{0}`")]
    UnknownSession(String),

    /// No share named `name` has been stored yet for the session.
    #[error("no share named `{name}` in session `{session_id}`")]
    UnknownShare { session_id: String, name: String },

    /// A protocol phase did not complete within its allotted time.
    #[error("session timed out during {phase}")]
    SessionTimeout { phase: &'static str },

    /// The settlement leader found a signature whose amount disagreed with
    /// the allocation it is supposed to authorise.
    #[error("signature for party {party} claims amount {signed}, allocation is {allocated}")]
    SignatureMismatch {
        party: PartyId,
        signed: String,
        allocated: String,
    },

    /// The settlement leader is missing a signature for a party with a
    /// non-zero allocation.
    #[error("missing settlement signature for party {0}")]
    MissingSignature(PartyId),
}

/// Non-fatal warning raised when a replicated-sharing overlap check fails.
///
/// In the honest-but-curious setting this does not abort reconstruction: the
/// value is still recovered from the non-overlapping shares, but callers
/// should surface this to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructionMismatch {
    pub party_a: PartyId,
    pub party_b: PartyId,
}

impl std::fmt::Display for ReconstructionMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "overlap element disagreed between party {} and party {} during reconstruction",
            self.party_a, self.party_b
        )
    }
}
