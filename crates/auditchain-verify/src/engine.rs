//! Hash-chain verifier for the auditchain ledger.
//!
//! `HashChainVerifier` implements the `ChainVerifier` trait from
//! `auditchain-core`.  For every entry in the walked range it checks, in
//! order:
//!
//! 1. **Continuity**: the entry's sequence is the one expected next.  A
//!    missing sequence is reported against the entry that follows the gap.
//! 2. **Linkage**: `previous_hash` equals the stored `current_hash` of the
//!    predecessor, or `GENESIS` at sequence 1.
//! 3. **Content**: the recomputed hash equals the stored `current_hash`.
//!
//! The walk stops at the first failure.  Nothing is repaired; a break is
//! evidence and is reported as found.

use tracing::debug;

use auditchain_contracts::{
    chain::{VerificationResult, VerifyStart},
    entry::{AuditEntry, GENESIS_HASH},
    error::{LedgerError, LedgerResult},
};
use auditchain_core::{
    chain::compute_hash,
    traits::{ChainStore, ChainVerifier},
};

/// Entries fetched from the store per read.
pub const DEFAULT_BATCH_SIZE: u64 = 256;

/// Read-only verifier over any `ChainStore`.
pub struct HashChainVerifier {
    batch_size: u64,
}

impl HashChainVerifier {
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override how many entries are read from the store at a time.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Resolve `start` to a sequence number against a tip snapshot.
    fn resolve_start(
        &self,
        store: &dyn ChainStore,
        start: &VerifyStart,
        tip: u64,
    ) -> LedgerResult<u64> {
        let from = match start {
            VerifyStart::Sequence(0) => 1,
            VerifyStart::Sequence(seq) => *seq,
            VerifyStart::EntryId(id) => store.get(id)?.sequence,
        };
        if tip > 0 && from > tip {
            return Err(LedgerError::NotFound {
                what: format!("{start} (chain tip is sequence {tip})"),
            });
        }
        Ok(from)
    }

    /// The hash the entry at `from` must link to, or `None` if its
    /// predecessor is missing.
    fn expected_previous(&self, store: &dyn ChainStore, from: u64) -> LedgerResult<Option<String>> {
        if from <= 1 {
            return Ok(Some(GENESIS_HASH.to_string()));
        }
        Ok(store.get_by_sequence(from - 1)?.map(|e| e.current_hash))
    }
}

impl Default for HashChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// The first failed check for `entry`, if any.
fn check_entry(
    entry: &AuditEntry,
    expected_sequence: u64,
    expected_previous: Option<&str>,
) -> Option<String> {
    if entry.sequence != expected_sequence {
        return Some(format!(
            "sequence gap: expected {expected_sequence}, found {}",
            entry.sequence
        ));
    }

    let Some(expected_previous) = expected_previous else {
        return Some(format!(
            "predecessor at sequence {} is missing",
            expected_sequence - 1
        ));
    };
    if entry.previous_hash != expected_previous {
        return Some(format!(
            "previous_hash mismatch: expected '{expected_previous}', found '{}'",
            entry.previous_hash
        ));
    }

    let recomputed = compute_hash(entry, &entry.previous_hash);
    if entry.current_hash != recomputed {
        return Some(format!(
            "current_hash mismatch: stored '{}', computed '{recomputed}'",
            entry.current_hash
        ));
    }

    None
}

impl ChainVerifier for HashChainVerifier {
    fn verify(
        &self,
        store: &dyn ChainStore,
        start: &VerifyStart,
        limit: u64,
    ) -> LedgerResult<VerificationResult> {
        // Entries committed after this read are outside the walk.
        let tip = store.last_sequence()?;
        let from = self.resolve_start(store, start, tip)?;

        if tip == 0 {
            return Ok(VerificationResult::valid(from, 0, "chain is empty"));
        }

        let mut expected_previous = self.expected_previous(store, from)?;
        let mut expected_sequence = from;
        let mut checked: u64 = 0;
        let mut cursor = from;

        debug!(from, tip, limit, "verification started");

        'walk: while checked < limit && cursor <= tip {
            let want = self.batch_size.min(tip - cursor + 1);
            let batch = store.get_by_sequence_range(cursor, want)?;
            cursor += want;

            for entry in &batch {
                checked += 1;

                if let Some(reason) =
                    check_entry(entry, expected_sequence, expected_previous.as_deref())
                {
                    return Ok(VerificationResult::broken(
                        from,
                        checked,
                        &entry.id,
                        entry.sequence,
                        reason,
                    ));
                }

                expected_previous = Some(entry.current_hash.clone());
                expected_sequence = entry.sequence + 1;

                if checked == limit {
                    break 'walk;
                }
            }

            debug!(checked, cursor, "verification batch done");
        }

        Ok(VerificationResult::valid(
            from,
            checked,
            format!("{checked} entries verified from sequence {from}"),
        ))
    }
}
