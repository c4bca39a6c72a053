//! In-memory implementation of `ChainStore`.
//!
//! `MemoryChainStore` keeps entries in a `Vec` indexed by sequence, plus an
//! id index, behind one `RwLock`.  Nothing survives the process; use it for
//! tests, dry runs and as the reference backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use tracing::{debug, warn};

use auditchain_contracts::{
    entry::AuditEntry,
    error::{LedgerError, LedgerResult},
};
use auditchain_core::traits::ChainStore;

// ── Internal state ────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    /// `entries[i].sequence == i + 1`.
    entries: Vec<AuditEntry>,
    /// id → index into `entries`.
    by_id: HashMap<String, usize>,
}

// ── Public store ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryChainStore {
    state: RwLock<MemoryState>,
    /// Remaining appends to reject with `DurabilityFailure`.
    fail_appends: AtomicU32,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` appends with `DurabilityFailure` without storing
    /// anything.
    pub fn fail_next_appends(&self, n: u32) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> LedgerResult<usize> {
        Ok(self.state.read().map_err(|_| poisoned())?.entries.len())
    }

    pub fn is_empty(&self) -> LedgerResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Overwrite a stored entry in place, bypassing every append check.
    #[cfg(test)]
    pub(crate) fn tamper(&self, sequence: u64, f: impl FnOnce(&mut AuditEntry)) {
        let mut state = self.state.write().unwrap();
        let idx = (sequence - 1) as usize;
        f(&mut state.entries[idx]);
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn poisoned() -> LedgerError {
    LedgerError::Storage {
        reason: "memory store lock poisoned".to_string(),
    }
}

impl ChainStore for MemoryChainStore {
    fn append(&self, entry: &AuditEntry) -> LedgerResult<()> {
        if self.take_injected_failure() {
            warn!(entry_id = %entry.id, sequence = entry.sequence, "injected durability failure");
            return Err(LedgerError::DurabilityFailure {
                reason: "injected failure: entry not stored".to_string(),
            });
        }

        let mut state = self.state.write().map_err(|_| poisoned())?;

        let expected = state.entries.len() as u64 + 1;
        if entry.sequence != expected {
            debug!(
                entry_id = %entry.id,
                sequence = entry.sequence,
                expected,
                "sequence already taken"
            );
            return Err(LedgerError::ConcurrentAppendConflict { attempts: 1 });
        }
        if state.by_id.contains_key(&entry.id) {
            debug!(entry_id = %entry.id, "id already taken");
            return Err(LedgerError::ConcurrentAppendConflict { attempts: 1 });
        }

        let idx = state.entries.len();
        state.by_id.insert(entry.id.clone(), idx);
        state.entries.push(entry.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> LedgerResult<AuditEntry> {
        let state = self.state.read().map_err(|_| poisoned())?;
        state
            .by_id
            .get(id)
            .map(|&idx| state.entries[idx].clone())
            .ok_or_else(|| LedgerError::entry_not_found(id))
    }

    fn get_by_sequence_range(&self, from: u64, count: u64) -> LedgerResult<Vec<AuditEntry>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        if from == 0 || count == 0 {
            return Ok(Vec::new());
        }
        let start = (from - 1).min(state.entries.len() as u64) as usize;
        let end = from
            .saturating_sub(1)
            .saturating_add(count)
            .min(state.entries.len() as u64) as usize;
        Ok(state.entries[start..end].to_vec())
    }

    fn last_sequence(&self) -> LedgerResult<u64> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.entries.len() as u64)
    }

    fn get_by_trace_id(&self, trace_id: &str) -> LedgerResult<Vec<AuditEntry>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.trace_id == trace_id)
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
