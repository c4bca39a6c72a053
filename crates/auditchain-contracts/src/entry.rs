//! Audit entry types.
//!
//! An entry starts life as an `AuditEntryDraft`: everything the submitting
//! component controls, with no position in the chain.  The ledger links the
//! draft against the current chain head, producing an `AuditEntry` with a
//! sequence number and both hashes.  Once the store confirms the write the
//! entry is immutable.  There is no update or delete path; a correction is a
//! new entry that references the one it corrects.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// The `previous_hash` of the first entry in every chain.
pub const GENESIS_HASH: &str = "GENESIS";

/// Upper bound on caller-supplied entry ids, in bytes.
pub const MAX_ID_LEN: usize = 256;

/// Years an RFC3339 timestamp can carry.  Anything outside would be stored
/// in a form that cannot be parsed back.
pub const TIMESTAMP_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

/// Metadata key set by `AuditEntryDraft::correcting`.
pub const CORRECTS_ID_KEY: &str = "corrects_id";

/// Metadata key set by `AuditEntryDraft::correcting`.
pub const CORRECTS_SEQUENCE_KEY: &str = "corrects_sequence";

/// How the audited action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
}

impl Outcome {
    /// The wire / canonical spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Partial => "partial",
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            "partial" => Ok(Outcome::Partial),
            other => Err(LedgerError::InvalidEntry {
                reason: format!("unknown outcome '{other}'"),
            }),
        }
    }
}

/// Operator-facing importance of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// The wire / canonical spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(LedgerError::InvalidEntry {
                reason: format!("unknown severity '{other}'"),
            }),
        }
    }
}

/// Truncate a timestamp to the microsecond precision the ledger stores and
/// hashes.
pub fn normalize_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// A fresh system-assigned entry id.
pub fn generate_entry_id() -> String {
    Uuid::new_v4().to_string()
}

// ── Draft ─────────────────────────────────────────────────────────────────────

/// A candidate entry as submitted by a producing component.
///
/// Only `trace_id`, `actor_id`, `action`, `resource`, `outcome` and
/// `severity` are required.  When `id` is absent the ledger assigns a UUID;
/// when `timestamp` is absent the ledger uses the link time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntryDraft {
    /// Caller-chosen unique id.  Supplying one makes `append` idempotent.
    #[serde(default)]
    pub id: Option<String>,

    pub trace_id: String,
    pub actor_id: String,
    #[serde(default)]
    pub actor_type: Option<String>,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,

    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    pub outcome: Outcome,
    pub severity: Severity,

    /// Business data.  Key order is irrelevant to the hash.
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,

    /// Annotations.  Key order is irrelevant to the hash.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    /// Event time.  Defaults to the time the entry is linked.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AuditEntryDraft {
    /// Build a draft with the minimal required fields.
    pub fn new(
        trace_id: impl Into<String>,
        actor_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        outcome: Outcome,
        severity: Severity,
    ) -> Self {
        Self {
            id: None,
            trace_id: trace_id.into(),
            actor_id: actor_id.into(),
            actor_type: None,
            source_ip: None,
            user_agent: None,
            action: action.into(),
            resource: resource.into(),
            resource_id: None,
            operation: None,
            outcome,
            severity,
            payload: BTreeMap::new(),
            metadata: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_actor_type(mut self, actor_type: impl Into<String>) -> Self {
        self.actor_type = Some(actor_type.into());
        self
    }

    pub fn with_source_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Mark this draft as a compensating entry for `original`.
    ///
    /// History is never rewritten; the correction is linked to the entry it
    /// supersedes through metadata so readers can follow it.
    pub fn correcting(mut self, original: &AuditEntry) -> Self {
        self.metadata
            .insert(CORRECTS_ID_KEY.to_string(), Value::String(original.id.clone()));
        self.metadata.insert(
            CORRECTS_SEQUENCE_KEY.to_string(),
            Value::from(original.sequence),
        );
        self
    }

    /// Check required fields.
    ///
    /// Returns `LedgerError::InvalidEntry` naming the first offending field.
    pub fn validate(&self) -> LedgerResult<()> {
        let required = [
            ("trace_id", &self.trace_id),
            ("actor_id", &self.actor_id),
            ("action", &self.action),
            ("resource", &self.resource),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(LedgerError::InvalidEntry {
                    reason: format!("required field '{name}' is empty"),
                });
            }
        }

        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(LedgerError::InvalidEntry {
                    reason: "supplied id is empty".to_string(),
                });
            }
            if id.len() > MAX_ID_LEN {
                return Err(LedgerError::InvalidEntry {
                    reason: format!("id is {} bytes, limit is {MAX_ID_LEN}", id.len()),
                });
            }
        }

        if let Some(ts) = &self.timestamp {
            if !TIMESTAMP_YEARS.contains(&ts.year()) {
                return Err(LedgerError::InvalidEntry {
                    reason: format!("timestamp year {} is outside 0000-9999", ts.year()),
                });
            }
        }

        if self.payload.keys().any(|k| k.is_empty()) {
            return Err(LedgerError::InvalidEntry {
                reason: "payload contains an empty key".to_string(),
            });
        }
        if self.metadata.keys().any(|k| k.is_empty()) {
            return Err(LedgerError::InvalidEntry {
                reason: "metadata contains an empty key".to_string(),
            });
        }

        Ok(())
    }
}

// ── Persisted entry ───────────────────────────────────────────────────────────

/// A linked audit entry.
///
/// Between linking and the store's confirmation this value is internal to
/// the append path; every `AuditEntry` a caller can observe is persisted.
/// Modifying any field invalidates `current_hash`, which verification
/// detects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique id, caller-supplied or a system-assigned UUID.
    pub id: String,

    /// Position in the chain, starting at 1.  Gapless.
    pub sequence: u64,

    pub trace_id: String,
    pub actor_id: String,
    #[serde(default)]
    pub actor_type: Option<String>,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,

    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    pub outcome: Outcome,
    pub severity: Severity,

    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    /// Event time, microsecond precision, UTC.
    pub timestamp: DateTime<Utc>,

    /// Time the ledger linked the entry, microsecond precision, UTC.
    pub created_at: DateTime<Utc>,

    /// `current_hash` of the predecessor, or `GENESIS_HASH`.
    pub previous_hash: String,

    /// Lowercase hex SHA-256 over the canonical form of every other field.
    pub current_hash: String,
}

impl AuditEntry {
    /// True for the first entry of a chain.
    pub fn is_genesis(&self) -> bool {
        self.sequence == 1
    }

    /// The id of the entry this one corrects, if it is a correction.
    pub fn corrects(&self) -> Option<&str> {
        self.metadata.get(CORRECTS_ID_KEY).and_then(Value::as_str)
    }
}
