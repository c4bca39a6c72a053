//! Trait seams of the ledger.
//!
//! - `ChainStore`     write-once persistence (memory, filesystem, SQLite)
//! - `ChainVerifier`  read-only integrity walker over a store
//! - `AppendObserver` post-persistence hook for integrity events
//!
//! `Ledger` wires them together.  Nothing above `ChainStore` can update or
//! delete a persisted entry because the trait offers no way to do so.

use auditchain_contracts::{
    chain::{IntegrityEvent, VerificationResult, VerifyStart},
    entry::AuditEntry,
    error::{LedgerError, LedgerResult},
};

/// Durable, write-once storage for linked entries.
///
/// Implementations must be safe to share across threads.  Reads must never
/// observe a partially written entry: an entry is either fully visible or
/// absent.
pub trait ChainStore: Send + Sync {
    /// Persist one linked entry.
    ///
    /// Must not return `Ok` until the entry is durable (fsynced or
    /// committed); the head manager treats `Ok` as permission to advance the
    /// chain tip.
    ///
    /// Returns `ConcurrentAppendConflict` when the entry's sequence or id is
    /// already taken, and `DurabilityFailure` when the write cannot be
    /// confirmed.
    fn append(&self, entry: &AuditEntry) -> LedgerResult<()>;

    /// Fetch one entry by id.  `NotFound` if absent.
    fn get(&self, id: &str) -> LedgerResult<AuditEntry>;

    /// Entries with `from <= sequence < from + count`, ascending.
    ///
    /// Only entries that exist are returned; a well-formed chain has no gaps
    /// so the result is contiguous.
    fn get_by_sequence_range(&self, from: u64, count: u64) -> LedgerResult<Vec<AuditEntry>>;

    /// Highest persisted sequence, or 0 for an empty chain.
    fn last_sequence(&self) -> LedgerResult<u64>;

    /// Every entry sharing `trace_id`, ascending by sequence.  Empty when none.
    fn get_by_trace_id(&self, trace_id: &str) -> LedgerResult<Vec<AuditEntry>>;

    /// Short backend name for logs and summaries.
    fn backend_name(&self) -> &'static str;

    /// Like `get`, but a missing entry is `Ok(None)`.
    fn find(&self, id: &str) -> LedgerResult<Option<AuditEntry>> {
        match self.get(id) {
            Ok(entry) => Ok(Some(entry)),
            Err(LedgerError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The entry at `sequence`, if persisted.
    fn get_by_sequence(&self, sequence: u64) -> LedgerResult<Option<AuditEntry>> {
        Ok(self
            .get_by_sequence_range(sequence, 1)?
            .into_iter()
            .find(|e| e.sequence == sequence))
    }
}

/// Proves or disproves chain integrity over a bounded range.
///
/// Implementations are read-only and must not take the append lock.
pub trait ChainVerifier: Send + Sync {
    /// Walk forward from `start` for at most `limit` entries.
    ///
    /// A detected break is reported in the returned `VerificationResult`
    /// (`valid = false`), not as an error.  Errors are reserved for failures
    /// to read the chain at all, or a start point that does not exist.
    fn verify(
        &self,
        store: &dyn ChainStore,
        start: &VerifyStart,
        limit: u64,
    ) -> LedgerResult<VerificationResult>;
}

/// Receives an event for every durably persisted entry.
///
/// Called synchronously after the chain head has advanced, never before.
/// Observers see an immutable event and cannot affect the chain.
pub trait AppendObserver: Send + Sync {
    fn on_append(&self, event: &IntegrityEvent);
}
