//! Minimal `ChainStore` used by this crate's unit tests.

use std::sync::{Arc, Barrier, Mutex};

use auditchain_contracts::{
    entry::AuditEntry,
    error::{LedgerError, LedgerResult},
};

use crate::traits::ChainStore;

#[derive(Default)]
pub(crate) struct VecStore {
    inner: Mutex<Inner>,
    hold: Mutex<Option<AppendHold>>,
}

/// Parks the next `append` between two barriers, outside the store lock.
pub(crate) struct AppendHold {
    pub(crate) entered: Arc<Barrier>,
    pub(crate) release: Arc<Barrier>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<AuditEntry>,
    fail_appends: u32,
    conflict_appends: u32,
    persist_then_fail: bool,
    fail_tip_reads: u32,
}

impl VecStore {
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub(crate) fn all(&self) -> Vec<AuditEntry> {
        self.inner.lock().unwrap().entries.clone()
    }

    pub(crate) fn fail_next_appends(&self, n: u32) {
        self.inner.lock().unwrap().fail_appends = n;
    }

    pub(crate) fn conflict_next_appends(&self, n: u32) {
        self.inner.lock().unwrap().conflict_appends = n;
    }

    pub(crate) fn persist_then_fail_next(&self) {
        self.inner.lock().unwrap().persist_then_fail = true;
    }

    /// Make the next `n` calls to `last_sequence` fail.
    pub(crate) fn fail_next_tip_reads(&self, n: u32) {
        self.inner.lock().unwrap().fail_tip_reads = n;
    }

    /// Block the next `append` until the test releases it.
    pub(crate) fn hold_next_append(&self) -> (Arc<Barrier>, Arc<Barrier>) {
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        *self.hold.lock().unwrap() = Some(AppendHold {
            entered: entered.clone(),
            release: release.clone(),
        });
        (entered, release)
    }

    /// Overwrite a stored entry in place, bypassing the append path.
    pub(crate) fn tamper(&self, sequence: u64, f: impl FnOnce(&mut AuditEntry)) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| e.sequence == sequence)
            .unwrap();
        f(entry);
    }
}

impl ChainStore for VecStore {
    fn append(&self, entry: &AuditEntry) -> LedgerResult<()> {
        let hold = self.hold.lock().unwrap().take();
        if let Some(hold) = hold {
            hold.entered.wait();
            hold.release.wait();
        }

        let mut inner = self.inner.lock().unwrap();

        if inner.fail_appends > 0 {
            inner.fail_appends -= 1;
            return Err(LedgerError::DurabilityFailure {
                reason: "simulated write failure".into(),
            });
        }
        if inner.conflict_appends > 0 {
            inner.conflict_appends -= 1;
            return Err(LedgerError::ConcurrentAppendConflict { attempts: 1 });
        }
        if entry.sequence != inner.entries.len() as u64 + 1
            || inner.entries.iter().any(|e| e.id == entry.id)
        {
            return Err(LedgerError::ConcurrentAppendConflict { attempts: 1 });
        }

        inner.entries.push(entry.clone());

        if inner.persist_then_fail {
            inner.persist_then_fail = false;
            return Err(LedgerError::DurabilityFailure {
                reason: "simulated lost acknowledgement".into(),
            });
        }
        Ok(())
    }

    fn get(&self, id: &str) -> LedgerResult<AuditEntry> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| LedgerError::entry_not_found(id))
    }

    fn get_by_sequence_range(&self, from: u64, count: u64) -> LedgerResult<Vec<AuditEntry>> {
        let end = from.saturating_add(count);
        Ok(self
            .inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.sequence >= from && e.sequence < end)
            .cloned()
            .collect())
    }

    fn last_sequence(&self) -> LedgerResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_tip_reads > 0 {
            inner.fail_tip_reads -= 1;
            return Err(LedgerError::Storage {
                reason: "simulated read failure".into(),
            });
        }
        Ok(inner
            .entries
            .iter()
            .map(|e| e.sequence)
            .max()
            .unwrap_or(0))
    }

    fn get_by_trace_id(&self, trace_id: &str) -> LedgerResult<Vec<AuditEntry>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.trace_id == trace_id)
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "vec"
    }
}
