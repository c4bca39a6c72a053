//! Hash-chain linking.
//!
//!   current_hash = hex(SHA-256(canonicalize(entry, previous_hash)))
//!
//! Everything here is pure: no I/O, no shared state, no failure modes.
//! Draft validation happens before anything reaches this module.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use auditchain_contracts::{
    chain::ChainHead,
    entry::{normalize_timestamp, AuditEntry, AuditEntryDraft},
};

use crate::canonical::canonicalize;

/// SHA-256 of canonical bytes as a lowercase 64-character hex string.
pub fn link_hash(canonical: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    hex::encode(hasher.finalize())
}

/// The hash `entry` must carry when linked against `previous_hash`.
pub fn compute_hash(entry: &AuditEntry, previous_hash: &str) -> String {
    link_hash(&canonicalize(entry, previous_hash))
}

/// Link a draft against `head`.
///
/// Assigns `sequence = head.last_sequence + 1`, `previous_hash =
/// head.last_hash`, the ledger's `created_at`, and the resulting
/// `current_hash`.  The event `timestamp` defaults to `created_at`.  Both
/// timestamps are truncated to microseconds so the stored values are exactly
/// the hashed values.
///
/// The returned entry is not yet persisted.
pub fn link(
    draft: &AuditEntryDraft,
    id: &str,
    head: &ChainHead,
    created_at: DateTime<Utc>,
) -> AuditEntry {
    let created_at = normalize_timestamp(created_at);
    let timestamp = draft.timestamp.map(normalize_timestamp).unwrap_or(created_at);

    let mut entry = AuditEntry {
        id: id.to_string(),
        sequence: head.next_sequence(),
        trace_id: draft.trace_id.clone(),
        actor_id: draft.actor_id.clone(),
        actor_type: draft.actor_type.clone(),
        source_ip: draft.source_ip.clone(),
        user_agent: draft.user_agent.clone(),
        action: draft.action.clone(),
        resource: draft.resource.clone(),
        resource_id: draft.resource_id.clone(),
        operation: draft.operation.clone(),
        outcome: draft.outcome,
        severity: draft.severity,
        payload: draft.payload.clone(),
        metadata: draft.metadata.clone(),
        timestamp,
        created_at,
        previous_hash: head.last_hash.clone(),
        current_hash: String::new(),
    };
    entry.current_hash = compute_hash(&entry, &entry.previous_hash);
    entry
}

/// True when `entry.current_hash` matches its recomputed hash.
pub fn hash_matches(entry: &AuditEntry) -> bool {
    entry.current_hash == compute_hash(entry, &entry.previous_hash)
}
