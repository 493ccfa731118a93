//! # Error Types
//!
//! All error types for the jig runtime.
//!
//! ## Taxonomy
//!
//! | Error | Raised by | Rollback scope |
//! |-------|-----------|----------------|
//! | `Validation` | argument/option checks | none (nothing was mutated) |
//! | `PrivacyViolation` / `ImmutabilityViolation` | accessor dispatch | current call |
//! | `StateConflict` | record time, publish, import | current call or whole queue |
//! | `Network` | ledger collaborators | whole queue |

use thiserror::Error;

// =============================================================================
// JIG ERRORS
// =============================================================================

/// Errors surfaced by the runtime to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JigError {
    /// Malformed arguments or options.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A private member was accessed from outside its type lineage.
    #[error("privacy violation: {class}.{member} is private")]
    PrivacyViolation {
        /// Class owning the member.
        class: String,
        /// Field or method name.
        member: String,
    },

    /// A protected member was mutated.
    #[error("immutability violation: {member}: {reason}")]
    ImmutabilityViolation {
        /// Field name.
        member: String,
        /// Why the write was refused.
        reason: String,
    },

    /// Stale read, divergent input location or duplicate reference mismatch.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Failure reported by a ledger collaborator.
    #[error("network failure: {0}")]
    Network(#[from] LedgerError),

    /// An internal method changed state when invoked from outside a jig.
    #[error("internal method misuse: {method} changed state outside a jig context")]
    InternalMethodMisuse {
        /// Method name.
        method: String,
    },

    /// The declared jig output count does not match the transaction.
    #[error("jig count mismatch: declared {declared}, found {actual}")]
    CountMismatch {
        /// Count in the payload.
        declared: usize,
        /// Count observed.
        actual: usize,
    },

    /// Replaying the actions did not reproduce the payload.
    #[error("payload mismatch: replay does not reproduce the transaction")]
    PayloadMismatch,

    /// Handle does not resolve to a live object.
    #[error("unknown object: {0}")]
    UnknownObject(String),

    /// A method body raised an error.
    #[error("revert: {0}")]
    Revert(String),

    /// Sandboxed evaluation failed.
    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),

    /// State cache failure.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Broken bookkeeping. Never expected in a healthy runtime.
    #[error("internal error: {0}")]
    Internal(String),
}

impl JigError {
    /// Error raised by a method body.
    pub fn revert(reason: impl Into<String>) -> Self {
        Self::Revert(reason.into())
    }

    /// Shorthand for [`JigError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Shorthand for [`JigError::StateConflict`].
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::StateConflict(reason.into())
    }

    /// Returns true if the same operation may succeed when retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(LedgerError::Unavailable(_) | LedgerError::Timeout)
        )
    }

    /// Returns true if this error, raised during publish, invalidates every
    /// queued pending transaction and not only the failing one.
    #[must_use]
    pub fn rolls_back_queue(&self) -> bool {
        matches!(
            self,
            Self::StateConflict(_)
                | Self::Network(_)
                | Self::CountMismatch { .. }
                | Self::PayloadMismatch
                | Self::Cache(_)
                | Self::Internal(_)
        )
    }
}

// =============================================================================
// LEDGER ERRORS
// =============================================================================

/// Errors from the ledger client, purse and owner collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Transaction unknown to the ledger.
    #[error("transaction not found: {0}")]
    NotFound(String),

    /// Broadcast rejected by the network.
    #[error("broadcast rejected: {0}")]
    Rejected(String),

    /// Funding failed.
    #[error("payment failed: {0}")]
    Payment(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Ledger service unreachable.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// Request timed out.
    #[error("ledger request timeout")]
    Timeout,
}

// =============================================================================
// CACHE ERRORS
// =============================================================================

/// Errors from the state cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A different state was already stored for this location.
    #[error("conflicting state for location {0}")]
    Conflict(String),

    /// Stored state could not be decoded.
    #[error("corrupted cache entry for {location}: {reason}")]
    Corrupted {
        /// Location key.
        location: String,
        /// Decoder message.
        reason: String,
    },
}

// =============================================================================
// EVALUATOR ERRORS
// =============================================================================

/// Errors from the sandboxed evaluator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// No definition is known for this source text.
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// A dependency named by the source is missing from the environment.
    #[error("missing dependency: {0}")]
    MissingDependency(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jig_error_display() {
        let err = JigError::PrivacyViolation {
            class: "Dragon".to_string(),
            member: "secret".to_string(),
        };
        assert_eq!(err.to_string(), "privacy violation: Dragon.secret is private");

        let err = JigError::CountMismatch {
            declared: 2,
            actual: 1,
        };
        assert_eq!(err.to_string(), "jig count mismatch: declared 2, found 1");
    }

    #[test]
    fn test_ledger_error_conversion() {
        let err: JigError = LedgerError::Rejected("double spend".to_string()).into();
        assert!(matches!(err, JigError::Network(_)));
        assert!(err.rolls_back_queue());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(JigError::Network(LedgerError::Timeout).is_retryable());
        assert!(!JigError::revert("nope").is_retryable());
        assert!(!JigError::validation("bad").rolls_back_queue());
    }
}
