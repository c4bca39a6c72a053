//! Chain-level metadata: the head pointer, summaries, verification results,
//! and the event surfaced after each durable append.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entry::{AuditEntry, GENESIS_HASH},
    error::{LedgerError, LedgerResult},
};

/// The tip of the chain: hash and sequence of the last persisted entry.
///
/// For an empty chain the head is `ChainHead::genesis()`, whose hash is the
/// sentinel the first entry links to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub last_hash: String,
    pub last_sequence: u64,
}

impl ChainHead {
    /// The head of an empty chain.
    pub fn genesis() -> Self {
        Self {
            last_hash: GENESIS_HASH.to_string(),
            last_sequence: 0,
        }
    }

    /// The head after `entry` is committed.
    pub fn from_entry(entry: &AuditEntry) -> Self {
        Self {
            last_hash: entry.current_hash.clone(),
            last_sequence: entry.sequence,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.last_sequence == 0
    }

    /// Sequence the next appended entry will receive.
    pub fn next_sequence(&self) -> u64 {
        self.last_sequence + 1
    }
}

impl Default for ChainHead {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Compact description of the whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSummary {
    pub total_entries: u64,
    pub head_sequence: u64,
    pub head_hash: String,
    /// `current_hash` of the entry at sequence 1, when the chain is non-empty.
    pub genesis_hash: Option<String>,
    /// Name of the backing store.
    pub backend: String,
}

/// Where a verification walk begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStart {
    Sequence(u64),
    EntryId(String),
}

impl Default for VerifyStart {
    fn default() -> Self {
        VerifyStart::Sequence(1)
    }
}

impl fmt::Display for VerifyStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyStart::Sequence(seq) => write!(f, "sequence {seq}"),
            VerifyStart::EntryId(id) => write!(f, "entry '{id}'"),
        }
    }
}

impl From<u64> for VerifyStart {
    fn from(seq: u64) -> Self {
        VerifyStart::Sequence(seq)
    }
}

impl From<&str> for VerifyStart {
    fn from(id: &str) -> Self {
        VerifyStart::EntryId(id.to_string())
    }
}

/// The outcome of walking a range of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Sequence the walk started at.
    pub checked_from: u64,
    /// Entries examined, including the broken one if any.
    pub checked_count: u64,
    pub valid: bool,
    /// Id of the first entry that failed a check.
    pub first_broken_id: Option<String>,
    /// Sequence of the first entry that failed a check.
    pub first_broken_sequence: Option<u64>,
    pub message: String,
}

impl VerificationResult {
    pub fn valid(checked_from: u64, checked_count: u64, message: impl Into<String>) -> Self {
        Self {
            checked_from,
            checked_count,
            valid: true,
            first_broken_id: None,
            first_broken_sequence: None,
            message: message.into(),
        }
    }

    pub fn broken(
        checked_from: u64,
        checked_count: u64,
        entry_id: impl Into<String>,
        sequence: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            checked_from,
            checked_count,
            valid: false,
            first_broken_id: Some(entry_id.into()),
            first_broken_sequence: Some(sequence),
            message: message.into(),
        }
    }

    /// Turn a failed verification into `LedgerError::ChainBroken`.
    pub fn into_result(self) -> LedgerResult<Self> {
        if self.valid {
            return Ok(self);
        }
        Err(LedgerError::ChainBroken {
            entry_id: self.first_broken_id.unwrap_or_default(),
            sequence: self.first_broken_sequence.unwrap_or_default(),
            reason: self.message,
        })
    }
}

/// Notification emitted after an entry is durably persisted.
///
/// Messaging adapters publish this; the ledger never emits one before the
/// store confirms the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityEvent {
    pub entry_id: String,
    pub sequence: u64,
    pub trace_id: String,
    pub action: String,
    pub resource: String,
    pub previous_hash: String,
    pub current_hash: String,
    pub created_at: DateTime<Utc>,
}

impl From<&AuditEntry> for IntegrityEvent {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            entry_id: entry.id.clone(),
            sequence: entry.sequence,
            trace_id: entry.trace_id.clone(),
            action: entry.action.clone(),
            resource: entry.resource.clone(),
            previous_hash: entry.previous_hash.clone(),
            current_hash: entry.current_hash.clone(),
            created_at: entry.created_at,
        }
    }
}
