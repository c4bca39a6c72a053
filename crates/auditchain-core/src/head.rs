//! The chain head and the serialized append path.
//!
//! `ChainHeadManager` is the only owner of the mutable chain tip.  One
//! instance is built at startup and shared by reference; there is no global
//! head.
//!
//! Two locks, with different jobs:
//!
//! - `section` serializes appends.  Only one link/persist/advance sequence
//!   runs at a time in this process.
//! - `head` publishes the committed tip.  It is written once per successful
//!   append, after the store confirms durability, so `current_head()` never
//!   waits for an in-flight append and never sees an uncommitted tip.
//!
//! Writers in other processes sharing the same store are caught by the
//! store's uniqueness guarantees (`ConcurrentAppendConflict`); the append
//! path then re-reads the tip from the store and relinks, up to a bounded
//! number of attempts.

use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tracing::{debug, info, warn};

use auditchain_contracts::{
    chain::ChainHead,
    entry::{generate_entry_id, AuditEntry, AuditEntryDraft},
    error::{LedgerError, LedgerResult},
};

use crate::{chain::link, traits::ChainStore};

/// Attempts per append when no configuration overrides it.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What `ChainHeadManager::append` did with a draft.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// The draft was linked and this call persisted it.
    Persisted(AuditEntry),
    /// An entry with the draft's id already existed; nothing was written.
    Existing(AuditEntry),
}

impl AppendOutcome {
    pub fn entry(&self) -> &AuditEntry {
        match self {
            AppendOutcome::Persisted(e) | AppendOutcome::Existing(e) => e,
        }
    }

    pub fn into_entry(self) -> AuditEntry {
        match self {
            AppendOutcome::Persisted(e) | AppendOutcome::Existing(e) => e,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, AppendOutcome::Persisted(_))
    }
}

/// Sole authority for the chain tip and the serialization point for appends.
pub struct ChainHeadManager {
    store: Arc<dyn ChainStore>,
    section: Mutex<()>,
    head: RwLock<ChainHead>,
    max_attempts: u32,
}

impl ChainHeadManager {
    /// Build a manager, recovering the tip from `store`.
    ///
    /// An empty store yields the genesis head.  Otherwise the entry at the
    /// store's highest sequence supplies the hash.
    pub fn recover(store: Arc<dyn ChainStore>, max_attempts: u32) -> LedgerResult<Self> {
        let head = read_head(store.as_ref())?;

        info!(
            backend = store.backend_name(),
            last_sequence = head.last_sequence,
            last_hash = %head.last_hash,
            "chain head recovered"
        );

        Ok(Self {
            store,
            section: Mutex::new(()),
            head: RwLock::new(head),
            max_attempts: max_attempts.max(1),
        })
    }

    /// The store this manager appends to.
    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    /// The last committed tip.
    pub fn current_head(&self) -> LedgerResult<ChainHead> {
        self.head
            .read()
            .map(|h| h.clone())
            .map_err(|_| poisoned("chain head"))
    }

    /// Re-read the tip from the store, e.g. after another process appended.
    pub fn refresh(&self) -> LedgerResult<ChainHead> {
        let _section = self.section.lock().map_err(|_| poisoned("append section"))?;
        let head = read_head(self.store.as_ref())?;
        self.publish(head.clone())?;
        Ok(head)
    }

    /// Link `draft` to the current tip and persist it.
    ///
    /// Steps, all inside the append section:
    ///
    /// 1. Validate the draft (`InvalidEntry`; nothing is hashed).
    /// 2. If the caller supplied an id that is already persisted, return
    ///    that entry unchanged.
    /// 3. Link against the published head and hand the entry to the store.
    /// 4. On success, publish the new head and return the entry.
    /// 5. On a conflict or durability failure, check whether the entry
    ///    landed anyway, re-read the tip from the store and relink.  After
    ///    `max_attempts` the last failure is surfaced.
    ///
    /// The head only moves after the store confirms a write.  A failed
    /// append leaves nothing visible.
    pub fn append(&self, draft: &AuditEntryDraft) -> LedgerResult<AppendOutcome> {
        draft.validate()?;

        let _section = self.section.lock().map_err(|_| poisoned("append section"))?;

        if let Some(id) = &draft.id {
            if let Some(existing) = self.store.find(id)? {
                debug!(
                    entry_id = %id,
                    sequence = existing.sequence,
                    "entry id already persisted, returning existing entry"
                );
                return Ok(AppendOutcome::Existing(existing));
            }
        }

        // Generated once so every retry links the same id.
        let id = draft.id.clone().unwrap_or_else(generate_entry_id);
        let mut head = self.current_head()?;
        let mut last_error: Option<LedgerError> = None;

        for attempt in 1..=self.max_attempts {
            let entry = link(draft, &id, &head, Utc::now());

            match self.store.append(&entry) {
                Ok(()) => {
                    self.publish(ChainHead::from_entry(&entry))?;
                    info!(
                        entry_id = %entry.id,
                        sequence = entry.sequence,
                        current_hash = %entry.current_hash,
                        attempt,
                        "audit entry appended"
                    );
                    return Ok(AppendOutcome::Persisted(entry));
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        entry_id = %id,
                        sequence = entry.sequence,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "append attempt failed, re-reading chain head"
                    );

                    head = match read_head(self.store.as_ref()) {
                        Ok(fresh) => fresh,
                        Err(refresh_err) => {
                            warn!(
                                entry_id = %id,
                                attempt,
                                error = %refresh_err,
                                "could not re-read chain head, abandoning append"
                            );
                            return Err(e);
                        }
                    };
                    self.publish(head.clone())?;

                    // An unconfirmed write may still have landed, and a
                    // concurrent writer may have persisted the same id.
                    if let Some(existing) = self.store.find(&id)? {
                        let ours = existing.sequence == entry.sequence
                            && existing.current_hash == entry.current_hash;
                        info!(
                            entry_id = %id,
                            sequence = existing.sequence,
                            ours,
                            "entry found after failed attempt, treating append as complete"
                        );
                        return Ok(if ours {
                            AppendOutcome::Persisted(existing)
                        } else {
                            AppendOutcome::Existing(existing)
                        });
                    }

                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        match last_error {
            Some(e @ LedgerError::DurabilityFailure { .. }) => Err(e),
            _ => Err(LedgerError::ConcurrentAppendConflict {
                attempts: self.max_attempts,
            }),
        }
    }

    fn publish(&self, head: ChainHead) -> LedgerResult<()> {
        let mut guard = self.head.write().map_err(|_| poisoned("chain head"))?;
        *guard = head;
        Ok(())
    }
}

/// The tip as recorded by the store itself.
pub fn read_head(store: &dyn ChainStore) -> LedgerResult<ChainHead> {
    let last = store.last_sequence()?;
    if last == 0 {
        return Ok(ChainHead::genesis());
    }
    match store.get_by_sequence(last)? {
        Some(entry) => Ok(ChainHead::from_entry(&entry)),
        None => Err(LedgerError::Storage {
            reason: format!("store reports last sequence {last} but the entry is missing"),
        }),
    }
}

fn poisoned(what: &str) -> LedgerError {
    LedgerError::Storage {
        reason: format!("{what} lock poisoned"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use auditchain_contracts::entry::{Outcome, Severity, GENESIS_HASH};

    use super::*;
    use crate::test_support::VecStore;

    fn draft(id: &str) -> AuditEntryDraft {
        AuditEntryDraft::new("trace", "svc", "report.generate", "report", Outcome::Success, Severity::Info)
            .with_id(id)
    }

    fn manager(store: &Arc<VecStore>, attempts: u32) -> ChainHeadManager {
        ChainHeadManager::recover(store.clone(), attempts).unwrap()
    }

    #[test]
    fn empty_store_recovers_genesis() {
        let store = Arc::new(VecStore::default());
        let mgr = manager(&store, 3);
        assert_eq!(mgr.current_head().unwrap(), ChainHead::genesis());
    }

    #[test]
    fn append_advances_head() {
        let store = Arc::new(VecStore::default());
        let mgr = manager(&store, 3);

        let a = mgr.append(&draft("e1")).unwrap().into_entry();
        let b = mgr.append(&draft("e2")).unwrap().into_entry();

        assert_eq!(a.sequence, 1);
        assert_eq!(a.previous_hash, GENESIS_HASH);
        assert_eq!(b.sequence, 2);
        assert_eq!(b.previous_hash, a.current_hash);
        assert_eq!(mgr.current_head().unwrap(), ChainHead::from_entry(&b));
    }

    #[test]
    fn invalid_draft_is_rejected_before_store() {
        let store = Arc::new(VecStore::default());
        let mgr = manager(&store, 3);

        let mut bad = draft("e1");
        bad.resource = String::new();

        assert!(matches!(mgr.append(&bad), Err(LedgerError::InvalidEntry { .. })));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn same_id_appends_once() {
        let store = Arc::new(VecStore::default());
        let mgr = manager(&store, 3);

        let first = mgr.append(&draft("dup")).unwrap();
        let second = mgr.append(&draft("dup")).unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.entry(), second.entry());
        assert_eq!(store.len(), 1);
        assert_eq!(mgr.current_head().unwrap().last_sequence, 1);
    }

    #[test]
    fn system_ids_are_assigned_and_unique() {
        let store = Arc::new(VecStore::default());
        let mgr = manager(&store, 3);

        let mut d = draft("x");
        d.id = None;
        let a = mgr.append(&d).unwrap().into_entry();
        let b = mgr.append(&d).unwrap().into_entry();

        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn durability_failure_leaves_head_unchanged() {
        let store = Arc::new(VecStore::default());
        let mgr = manager(&store, 2);
        let a = mgr.append(&draft("e1")).unwrap().into_entry();

        store.fail_next_appends(2);
        let err = mgr.append(&draft("e2")).unwrap_err();

        assert!(matches!(err, LedgerError::DurabilityFailure { .. }));
        assert_eq!(mgr.current_head().unwrap(), ChainHead::from_entry(&a));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn durability_failure_is_retried_within_budget() {
        let store = Arc::new(VecStore::default());
        let mgr = manager(&store, 3);

        store.fail_next_appends(2);
        let a = mgr.append(&draft("e1")).unwrap().into_entry();

        assert_eq!(a.sequence, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unconfirmed_write_that_landed_is_not_duplicated() {
        let store = Arc::new(VecStore::default());
        let mgr = manager(&store, 3);

        store.persist_then_fail_next();
        let a = mgr.append(&draft("e1")).unwrap().into_entry();

        assert_eq!(a.sequence, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(mgr.current_head().unwrap(), ChainHead::from_entry(&a));
    }

    #[test]
    fn failed_head_refresh_keeps_the_append_error() {
        let store = Arc::new(VecStore::default());
        let mgr = manager(&store, 3);
        let a = mgr.append(&draft("e1")).unwrap().into_entry();

        store.fail_next_appends(1);
        store.fail_next_tip_reads(1);
        let err = mgr.append(&draft("e2")).unwrap_err();

        assert!(matches!(err, LedgerError::DurabilityFailure { .. }));
        assert_eq!(mgr.current_head().unwrap(), ChainHead::from_entry(&a));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn stale_writer_relinks_against_fresh_head() {
        let store = Arc::new(VecStore::default());
        let stale = manager(&store, 3);
        let other = manager(&store, 3);

        let a = other.append(&draft("e1")).unwrap().into_entry();
        // `stale` still believes the chain is empty.
        assert!(stale.current_head().unwrap().is_genesis());

        let b = stale.append(&draft("e2")).unwrap().into_entry();
        assert_eq!(b.sequence, 2);
        assert_eq!(b.previous_hash, a.current_hash);
    }

    #[test]
    fn exhausted_conflicts_surface_as_conflict() {
        let store = Arc::new(VecStore::default());
        let mgr = manager(&store, 2);

        store.conflict_next_appends(5);
        let err = mgr.append(&draft("e1")).unwrap_err();

        assert!(matches!(err, LedgerError::ConcurrentAppendConflict { attempts: 2 }));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn concurrent_appends_are_gapless() {
        let store = Arc::new(VecStore::default());
        let mgr = Arc::new(manager(&store, 3));

        std::thread::scope(|s| {
            for t in 0..8 {
                let mgr = mgr.clone();
                s.spawn(move || {
                    for i in 0..25 {
                        mgr.append(&draft(&format!("t{t}-{i}"))).unwrap();
                    }
                });
            }
        });

        let entries = store.all();
        let seqs: HashSet<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(entries.len(), 200);
        assert_eq!(seqs, (1..=200).collect::<HashSet<u64>>());
        for pair in entries.windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].current_hash);
        }
    }

    #[test]
    fn refresh_picks_up_external_appends() {
        let store = Arc::new(VecStore::default());
        let a_mgr = manager(&store, 3);
        let b_mgr = manager(&store, 3);

        let e = a_mgr.append(&draft("e1")).unwrap().into_entry();
        assert!(b_mgr.current_head().unwrap().is_genesis());
        assert_eq!(b_mgr.refresh().unwrap(), ChainHead::from_entry(&e));
    }
}
