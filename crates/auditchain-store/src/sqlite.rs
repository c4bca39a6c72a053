//! SQLite implementation of `ChainStore`.
//!
//! One `audit_entries` table.  `sequence` and `entry_id` carry UNIQUE
//! constraints, so a racing writer (another manager or another process on
//! the same file) loses with a constraint violation, mapped to
//! `ConcurrentAppendConflict`.  `BEFORE UPDATE` and `BEFORE DELETE` triggers
//! abort every mutation of a stored row.
//!
//! The database runs in WAL mode with `synchronous = FULL`, so a committed
//! insert is durable when `append` returns.  Reads use their own connection
//! and never queue behind the writer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde_json::Value;
use tracing::{debug, info, warn};

use auditchain_contracts::{
    entry::{AuditEntry, Outcome, Severity},
    error::{LedgerError, LedgerResult},
};
use auditchain_core::{canonical::format_timestamp, traits::ChainStore};

/// Tables, indices and append-only triggers.
const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS audit_entries (
        pk            INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id      TEXT    NOT NULL UNIQUE,
        sequence      INTEGER NOT NULL UNIQUE,
        trace_id      TEXT    NOT NULL,
        actor_id      TEXT    NOT NULL,
        actor_type    TEXT,
        source_ip     TEXT,
        user_agent    TEXT,
        action        TEXT    NOT NULL,
        resource      TEXT    NOT NULL,
        resource_id   TEXT,
        operation     TEXT,
        outcome       TEXT    NOT NULL,
        severity      TEXT    NOT NULL,
        payload       TEXT    NOT NULL,
        metadata      TEXT    NOT NULL,
        timestamp     TEXT    NOT NULL,
        created_at    TEXT    NOT NULL,
        previous_hash TEXT    NOT NULL,
        current_hash  TEXT    NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_audit_entries_trace_id ON audit_entries(trace_id);

    CREATE TRIGGER IF NOT EXISTS audit_entries_no_update
    BEFORE UPDATE ON audit_entries
    BEGIN
        SELECT RAISE(ABORT, 'audit_entries is append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS audit_entries_no_delete
    BEFORE DELETE ON audit_entries
    BEGIN
        SELECT RAISE(ABORT, 'audit_entries is append-only');
    END;
";

/// Column list shared by every SELECT; `row_to_raw` reads them in order.
const ENTRY_COLUMNS: &str = "entry_id, sequence, trace_id, actor_id, actor_type, source_ip, \
     user_agent, action, resource, resource_id, operation, outcome, severity, payload, \
     metadata, timestamp, created_at, previous_hash, current_hash";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteChainStore {
    path: PathBuf,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl SqliteChainStore {
    /// Open (or create) the ledger database at `path`.
    ///
    /// Enables WAL mode with full synchronous commits and creates the schema
    /// if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::Storage {
                reason: format!("failed to create '{}': {e}", parent.display()),
            })?;
        }

        let writer = open_connection(&path)?;
        writer
            .pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| open_err(&path, "set WAL mode", e))?;
        writer
            .pragma_update(None, "synchronous", "FULL")
            .map_err(|e| open_err(&path, "set synchronous", e))?;
        writer
            .execute_batch(SCHEMA_SQL)
            .map_err(|e| open_err(&path, "create schema", e))?;

        let reader = open_connection(&path)?;
        reader
            .pragma_update(None, "query_only", true)
            .map_err(|e| open_err(&path, "set query_only", e))?;

        let last: i64 = reader
            .query_row("SELECT COALESCE(MAX(sequence), 0) FROM audit_entries", [], |row| {
                row.get(0)
            })
            .map_err(|e| open_err(&path, "read last sequence", e))?;

        info!(path = %path.display(), last_sequence = last, "sqlite store opened");

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| LedgerError::Storage {
            reason: "sqlite writer lock poisoned".to_string(),
        })
    }

    fn reader(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.reader.lock().map_err(|_| LedgerError::Storage {
            reason: "sqlite reader lock poisoned".to_string(),
        })
    }

    fn query_entries(&self, sql: &str, params: impl rusqlite::Params) -> LedgerResult<Vec<AuditEntry>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(sql).map_err(read_err)?;
        let rows = stmt
            .query_map(params, row_to_raw)
            .map_err(read_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_err)?;
        rows.into_iter().map(RawEntry::into_entry).collect()
    }
}

impl ChainStore for SqliteChainStore {
    fn append(&self, entry: &AuditEntry) -> LedgerResult<()> {
        let sequence = i64::try_from(entry.sequence).map_err(|_| LedgerError::DurabilityFailure {
            reason: format!("sequence {} does not fit the sequence column", entry.sequence),
        })?;
        let payload = encode_map(&entry.payload)?;
        let metadata = encode_map(&entry.metadata)?;

        let conn = self.writer()?;
        let result = conn.execute(
            &format!(
                "INSERT INTO audit_entries ({ENTRY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
            ),
            params![
                entry.id,
                sequence,
                entry.trace_id,
                entry.actor_id,
                entry.actor_type,
                entry.source_ip,
                entry.user_agent,
                entry.action,
                entry.resource,
                entry.resource_id,
                entry.operation,
                entry.outcome.as_str(),
                entry.severity.as_str(),
                payload,
                metadata,
                format_timestamp(&entry.timestamp),
                format_timestamp(&entry.created_at),
                entry.previous_hash,
                entry.current_hash,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => {
                debug!(
                    entry_id = %entry.id,
                    sequence = entry.sequence,
                    error = %e,
                    "sequence or id already taken"
                );
                Err(LedgerError::ConcurrentAppendConflict { attempts: 1 })
            }
            Err(e) => {
                warn!(entry_id = %entry.id, sequence = entry.sequence, error = %e, "insert failed");
                Err(LedgerError::DurabilityFailure {
                    reason: format!("failed to insert entry '{}': {e}", entry.id),
                })
            }
        }
    }

    fn get(&self, id: &str) -> LedgerResult<AuditEntry> {
        let raw = {
            let conn = self.reader()?;
            conn.query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM audit_entries WHERE entry_id = ?1"),
                params![id],
                row_to_raw,
            )
            .optional()
            .map_err(read_err)?
        };
        match raw {
            Some(raw) => raw.into_entry(),
            None => Err(LedgerError::entry_not_found(id)),
        }
    }

    fn get_by_sequence_range(&self, from: u64, count: u64) -> LedgerResult<Vec<AuditEntry>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let from = i64::try_from(from).unwrap_or(i64::MAX);
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        self.query_entries(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_entries
                 WHERE sequence >= ?1 ORDER BY sequence ASC LIMIT ?2"
            ),
            params![from, count],
        )
        .map(|entries| {
            let end = (from as u64).saturating_add(count as u64);
            entries.into_iter().take_while(|e| e.sequence < end).collect()
        })
    }

    fn last_sequence(&self) -> LedgerResult<u64> {
        let conn = self.reader()?;
        let last: i64 = conn
            .query_row("SELECT COALESCE(MAX(sequence), 0) FROM audit_entries", [], |row| {
                row.get(0)
            })
            .map_err(read_err)?;
        Ok(last.max(0) as u64)
    }

    fn get_by_trace_id(&self, trace_id: &str) -> LedgerResult<Vec<AuditEntry>> {
        self.query_entries(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_entries
                 WHERE trace_id = ?1 ORDER BY sequence ASC"
            ),
            params![trace_id],
        )
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

// ── Row decoding ──────────────────────────────────────────────────────────────

/// A row as SQLite hands it back, before the string columns are parsed.
struct RawEntry {
    id: String,
    sequence: i64,
    trace_id: String,
    actor_id: String,
    actor_type: Option<String>,
    source_ip: Option<String>,
    user_agent: Option<String>,
    action: String,
    resource: String,
    resource_id: Option<String>,
    operation: Option<String>,
    outcome: String,
    severity: String,
    payload: String,
    metadata: String,
    timestamp: String,
    created_at: String,
    previous_hash: String,
    current_hash: String,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        sequence: row.get(1)?,
        trace_id: row.get(2)?,
        actor_id: row.get(3)?,
        actor_type: row.get(4)?,
        source_ip: row.get(5)?,
        user_agent: row.get(6)?,
        action: row.get(7)?,
        resource: row.get(8)?,
        resource_id: row.get(9)?,
        operation: row.get(10)?,
        outcome: row.get(11)?,
        severity: row.get(12)?,
        payload: row.get(13)?,
        metadata: row.get(14)?,
        timestamp: row.get(15)?,
        created_at: row.get(16)?,
        previous_hash: row.get(17)?,
        current_hash: row.get(18)?,
    })
}

impl RawEntry {
    fn into_entry(self) -> LedgerResult<AuditEntry> {
        let corrupt = |what: &str, detail: String| LedgerError::Storage {
            reason: format!("corrupt {what} in row '{}': {detail}", self.id),
        };

        let sequence = u64::try_from(self.sequence)
            .map_err(|_| corrupt("sequence", self.sequence.to_string()))?;
        let outcome: Outcome = self
            .outcome
            .parse()
            .map_err(|e: LedgerError| corrupt("outcome", e.to_string()))?;
        let severity: Severity = self
            .severity
            .parse()
            .map_err(|e: LedgerError| corrupt("severity", e.to_string()))?;
        let payload: BTreeMap<String, Value> =
            serde_json::from_str(&self.payload).map_err(|e| corrupt("payload", e.to_string()))?;
        let metadata: BTreeMap<String, Value> =
            serde_json::from_str(&self.metadata).map_err(|e| corrupt("metadata", e.to_string()))?;
        let timestamp = parse_timestamp(&self.timestamp).map_err(|e| corrupt("timestamp", e))?;
        let created_at = parse_timestamp(&self.created_at).map_err(|e| corrupt("created_at", e))?;

        Ok(AuditEntry {
            id: self.id,
            sequence,
            trace_id: self.trace_id,
            actor_id: self.actor_id,
            actor_type: self.actor_type,
            source_ip: self.source_ip,
            user_agent: self.user_agent,
            action: self.action,
            resource: self.resource,
            resource_id: self.resource_id,
            operation: self.operation,
            outcome,
            severity,
            payload,
            metadata,
            timestamp,
            created_at,
            previous_hash: self.previous_hash,
            current_hash: self.current_hash,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("'{s}': {e}"))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn open_connection(path: &Path) -> LedgerResult<Connection> {
    let conn = Connection::open(path).map_err(|e| open_err(path, "open database", e))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| open_err(path, "set busy timeout", e))?;
    Ok(conn)
}

fn encode_map(map: &BTreeMap<String, Value>) -> LedgerResult<String> {
    serde_json::to_string(map).map_err(|e| LedgerError::DurabilityFailure {
        reason: format!("failed to encode map column: {e}"),
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

fn open_err(path: &Path, what: &str, e: rusqlite::Error) -> LedgerError {
    LedgerError::Storage {
        reason: format!("failed to {what} for '{}': {e}", path.display()),
    }
}

fn read_err(e: rusqlite::Error) -> LedgerError {
    LedgerError::Storage {
        reason: format!("sqlite read failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use serde_json::json;

    use auditchain_contracts::{
        chain::VerifyStart,
        entry::{AuditEntryDraft, GENESIS_HASH},
    };
    use auditchain_core::{config::LedgerConfig, ledger::Ledger};
    use auditchain_verify::HashChainVerifier;

    use super::*;

    fn draft(id: &str, trace: &str) -> AuditEntryDraft {
        AuditEntryDraft::new(trace, "billing", "invoice.void", "invoice/88", Outcome::Success, Severity::High)
            .with_id(id)
            .with_payload("amount_cents", json!(1999))
            .with_payload("lines", json!([{"sku": "A-1", "qty": 2}]))
            .with_source_ip("10.0.0.4")
    }

    fn ledger_at(path: &Path) -> Ledger {
        let store = Arc::new(SqliteChainStore::open(path).unwrap());
        Ledger::open(store, Box::new(HashChainVerifier::new()), &LedgerConfig::default()).unwrap()
    }

    #[test]
    fn round_trip_preserves_the_hash() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_at(&dir.path().join("ledger.db"));

        let appended = ledger.append(&draft("e1", "t")).unwrap();
        let read = ledger.get("e1").unwrap();

        assert_eq!(read, appended);
        assert!(auditchain_core::hash_matches(&read));
        assert_eq!(read.previous_hash, GENESIS_HASH);
    }

    #[test]
    fn reopen_recovers_the_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let last = {
            let ledger = ledger_at(&path);
            ledger.append(&draft("e1", "t")).unwrap();
            ledger.append(&draft("e2", "t")).unwrap()
        };

        let ledger = ledger_at(&path);
        assert_eq!(ledger.current_head().unwrap().last_hash, last.current_hash);

        let next = ledger.append(&draft("e3", "t")).unwrap();
        assert_eq!(next.sequence, 3);
        assert_eq!(next.previous_hash, last.current_hash);
    }

    #[test]
    fn out_of_range_timestamp_never_reaches_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = ledger_at(&path);
            ledger.append(&draft("e1", "t")).unwrap();
            let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
            assert!(matches!(
                ledger.append(&draft("e2", "t").with_timestamp(far)),
                Err(LedgerError::InvalidEntry { .. })
            ));
        }

        let ledger = ledger_at(&path);
        assert_eq!(ledger.current_head().unwrap().last_sequence, 1);
        assert!(ledger.get("e1").is_ok());
        assert!(ledger.verify(&VerifyStart::default(), 10).unwrap().valid);
    }

    #[test]
    fn float_payload_verifies_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = ledger_at(&path);
            ledger
                .append(&draft("e1", "t").with_payload("ratio", json!(1.0715660391465826e-75)))
                .unwrap();
            ledger
                .append(&draft("e2", "t").with_payload("ratio", json!(0.1 + 0.2)))
                .unwrap();
        }

        let ledger = ledger_at(&path);
        let result = ledger.verify(&VerifyStart::default(), 10).unwrap();
        assert!(result.valid, "{}", result.message);
        assert_eq!(result.checked_count, 2);
    }

    #[test]
    fn rows_cannot_be_updated_or_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteChainStore::open(dir.path().join("ledger.db")).unwrap());
        let ledger = Ledger::open(
            store.clone(),
            Box::new(HashChainVerifier::new()),
            &LedgerConfig::default(),
        )
        .unwrap();
        ledger.append(&draft("e1", "t")).unwrap();

        let conn = store.writer().unwrap();
        let update = conn.execute("UPDATE audit_entries SET actor_id = 'mallory'", []);
        assert!(update.unwrap_err().to_string().contains("append-only"));
        let delete = conn.execute("DELETE FROM audit_entries", []);
        assert!(delete.unwrap_err().to_string().contains("append-only"));
    }

    #[test]
    fn duplicate_sequence_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let ledger = ledger_at(&path);
        let first = ledger.append(&draft("e1", "t")).unwrap();

        let store = SqliteChainStore::open(&path).unwrap();
        let mut rival = first.clone();
        rival.id = "rival".into();
        assert!(matches!(
            store.append(&rival),
            Err(LedgerError::ConcurrentAppendConflict { .. })
        ));

        let mut same_id = first;
        same_id.sequence = 2;
        assert!(matches!(
            store.append(&same_id),
            Err(LedgerError::ConcurrentAppendConflict { .. })
        ));
    }

    #[test]
    fn two_writers_share_one_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let a = ledger_at(&path);
        let b = ledger_at(&path);

        let a1 = a.append(&draft("a1", "t")).unwrap();
        let b1 = b.append(&draft("b1", "t")).unwrap();
        assert_eq!(b1.sequence, 2);
        assert_eq!(b1.previous_hash, a1.current_hash);

        let result = b.verify(&VerifyStart::default(), 10).unwrap();
        assert!(result.valid, "{}", result.message);
    }

    #[test]
    fn trace_and_range_queries() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_at(&dir.path().join("ledger.db"));
        for (id, trace) in [("e1", "t-a"), ("e2", "t-b"), ("e3", "t-a"), ("e4", "t-a")] {
            ledger.append(&draft(id, trace)).unwrap();
        }

        let trace: Vec<String> = ledger
            .get_by_trace_id("t-a")
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(trace, vec!["e1", "e3", "e4"]);

        let range: Vec<u64> = ledger
            .get_by_sequence_range(2, 2)
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(range, vec![2, 3]);
    }

    #[test]
    fn tampered_row_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let ledger = ledger_at(&path);
        ledger.append(&draft("e1", "t")).unwrap();
        ledger.append(&draft("e2", "t")).unwrap();
        ledger.append(&draft("e3", "t")).unwrap();

        // Someone with direct database access removes the guard first.
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "DROP TRIGGER audit_entries_no_update;
             UPDATE audit_entries SET payload = '{\"amount_cents\":1}' WHERE entry_id = 'e2';",
        )
        .unwrap();

        let result = ledger.verify(&VerifyStart::from("e1"), 3).unwrap();
        assert!(!result.valid);
        assert_eq!(result.first_broken_id.as_deref(), Some("e2"));
        assert_eq!(result.first_broken_sequence, Some(2));
    }
}
