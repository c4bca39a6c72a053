//! The ledger facade: the one mutating entry point plus the read surface.
//!
//!   draft → validate → [append section: link → persist → advance head] → observers
//!
//! Reads, verification and summaries go straight to the store and the
//! published head; none of them take the append section.

use std::sync::Arc;

use tracing::{debug, info, warn};

use auditchain_contracts::{
    chain::{ChainHead, ChainSummary, IntegrityEvent, VerificationResult, VerifyStart},
    entry::{AuditEntry, AuditEntryDraft},
    error::{LedgerError, LedgerResult},
};

use crate::{
    config::LedgerConfig,
    head::ChainHeadManager,
    traits::{AppendObserver, ChainStore, ChainVerifier},
};

/// A single logical audit chain.
///
/// Build one per deployment at startup and share it; it owns the
/// `ChainHeadManager` and therefore the only mutable chain state.
pub struct Ledger {
    head: ChainHeadManager,
    verifier: Box<dyn ChainVerifier>,
    observers: Vec<Arc<dyn AppendObserver>>,
    max_limit: u64,
}

impl Ledger {
    /// Wire a ledger over `store`, recovering the chain head from it.
    pub fn open(
        store: Arc<dyn ChainStore>,
        verifier: Box<dyn ChainVerifier>,
        config: &LedgerConfig,
    ) -> LedgerResult<Self> {
        config.validate()?;
        let head = ChainHeadManager::recover(store, config.append.max_attempts)?;
        Ok(Self {
            head,
            verifier,
            observers: Vec::new(),
            max_limit: config.verify.max_limit,
        })
    }

    /// Register an observer for integrity events.
    pub fn with_observer(mut self, observer: Arc<dyn AppendObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Append one entry.
    ///
    /// Returns the persisted entry with its assigned `sequence`,
    /// `previous_hash` and `current_hash`.  If the draft carries an id that
    /// is already persisted, the existing entry is returned and no event is
    /// emitted.  Observers run only after the store has confirmed the write
    /// and the head has advanced.
    pub fn append(&self, draft: &AuditEntryDraft) -> LedgerResult<AuditEntry> {
        let outcome = self.head.append(draft)?;

        if outcome.is_new() && !self.observers.is_empty() {
            let event = IntegrityEvent::from(outcome.entry());
            for observer in &self.observers {
                observer.on_append(&event);
            }
        }

        Ok(outcome.into_entry())
    }

    pub fn get(&self, id: &str) -> LedgerResult<AuditEntry> {
        debug!(entry_id = %id, "get entry");
        self.store().get(id)
    }

    /// Every entry of one trace, ascending.  `NotFound` when the trace has
    /// no entries.
    pub fn get_by_trace_id(&self, trace_id: &str) -> LedgerResult<Vec<AuditEntry>> {
        let entries = self.store().get_by_trace_id(trace_id)?;
        if entries.is_empty() {
            return Err(LedgerError::NotFound {
                what: format!("trace '{trace_id}'"),
            });
        }
        Ok(entries)
    }

    /// Up to `count` entries starting at sequence `from`, ascending.
    ///
    /// `count` is capped at the configured `verify.max_limit`.  A start
    /// beyond the committed tip is `NotFound`.
    pub fn get_by_sequence_range(&self, from: u64, count: u64) -> LedgerResult<Vec<AuditEntry>> {
        if from == 0 {
            return Err(LedgerError::InvalidArgument {
                reason: "sequences start at 1".to_string(),
            });
        }
        if count == 0 {
            return Err(LedgerError::InvalidArgument {
                reason: "count must be at least 1".to_string(),
            });
        }

        let last = self.store().last_sequence()?;
        if from > last {
            return Err(LedgerError::NotFound {
                what: format!("sequence {from} (chain tip is {last})"),
            });
        }

        let count = count.min(self.max_limit).min(last - from + 1);
        self.store().get_by_sequence_range(from, count)
    }

    /// Verify up to `limit` entries from `start`.
    ///
    /// A detected break comes back as `valid = false`; use
    /// `VerificationResult::into_result` to turn it into
    /// `LedgerError::ChainBroken`.
    pub fn verify(&self, start: &VerifyStart, limit: u64) -> LedgerResult<VerificationResult> {
        if limit == 0 {
            return Err(LedgerError::InvalidArgument {
                reason: "verification limit must be at least 1".to_string(),
            });
        }
        let limit = limit.min(self.max_limit);

        let result = self.verifier.verify(self.store().as_ref(), start, limit)?;

        if result.valid {
            info!(
                start = %start,
                checked = result.checked_count,
                "chain verification passed"
            );
        } else {
            warn!(
                start = %start,
                checked = result.checked_count,
                first_broken_id = ?result.first_broken_id,
                first_broken_sequence = ?result.first_broken_sequence,
                message = %result.message,
                "chain verification FAILED"
            );
        }
        Ok(result)
    }

    /// Entry count and the committed tip.
    pub fn chain_summary(&self) -> LedgerResult<ChainSummary> {
        let head = self.head.current_head()?;
        let genesis_hash = if head.is_genesis() {
            None
        } else {
            self.store().get_by_sequence(1)?.map(|e| e.current_hash)
        };

        Ok(ChainSummary {
            total_entries: head.last_sequence,
            head_sequence: head.last_sequence,
            head_hash: head.last_hash,
            genesis_hash,
            backend: self.store().backend_name().to_string(),
        })
    }

    pub fn current_head(&self) -> LedgerResult<ChainHead> {
        self.head.current_head()
    }

    /// Re-read the tip from the store.
    pub fn refresh_head(&self) -> LedgerResult<ChainHead> {
        self.head.refresh()
    }

    fn store(&self) -> &Arc<dyn ChainStore> {
        self.head.store()
    }
}

/// Logs every integrity event at info level under the
/// `auditchain::integrity` target.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl AppendObserver for TracingObserver {
    fn on_append(&self, event: &IntegrityEvent) {
        info!(
            target: "auditchain::integrity",
            entry_id = %event.entry_id,
            sequence = event.sequence,
            trace_id = %event.trace_id,
            action = %event.action,
            resource = %event.resource,
            previous_hash = %event.previous_hash,
            current_hash = %event.current_hash,
            "integrity event"
        );
    }
}
