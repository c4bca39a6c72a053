//! Error taxonomy for the auditchain ledger.
//!
//! Every fallible ledger operation returns `LedgerResult<T>`.  Variants carry
//! enough context for an operator to act on them without re-running the
//! failing call.

use thiserror::Error;

/// The unified error type for the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A required field is missing or malformed.  Raised before hashing; the
    /// caller must fix the entry and resubmit.
    #[error("invalid audit entry: {reason}")]
    InvalidEntry { reason: String },

    /// A read or verification request was malformed (bad range, bad start).
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Another writer advanced the chain head first and the bounded retry
    /// budget was exhausted.
    #[error("append lost the race for the chain head after {attempts} attempt(s)")]
    ConcurrentAppendConflict { attempts: u32 },

    /// The store could not confirm that a write reached durable storage.
    ///
    /// The chain head is not advanced.  Retrying with the same entry id is
    /// safe: the append path deduplicates on caller-supplied ids.
    #[error("durability failure: {reason}")]
    DurabilityFailure { reason: String },

    /// The requested entry, trace, or range does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Verification detected tampering.  Never corrected automatically.
    #[error("chain broken at entry '{entry_id}' (sequence {sequence}): {reason}")]
    ChainBroken {
        entry_id: String,
        sequence: u64,
        reason: String,
    },

    /// A persisted record could not be read or decoded.
    #[error("storage error: {reason}")]
    Storage { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl LedgerError {
    /// True for failures the append path retries on its own: head conflicts
    /// and unconfirmed writes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrentAppendConflict { .. } | LedgerError::DurabilityFailure { .. }
        )
    }

    /// Shorthand for a `NotFound` describing an entry id.
    pub fn entry_not_found(id: &str) -> Self {
        LedgerError::NotFound {
            what: format!("audit entry '{id}'"),
        }
    }
}

/// Convenience alias used throughout the auditchain crates.
pub type LedgerResult<T> = Result<T, LedgerError>;
