//! Deterministic byte encoding of an entry, used as hash input.
//!
//! The output is compact JSON with a fixed field order:
//!
//!   id, sequence, trace_id, actor_id, actor_type, source_ip, user_agent,
//!   action, resource, resource_id, operation, outcome, severity, payload,
//!   metadata, timestamp, created_at, previous_hash
//!
//! Object keys inside `payload`, `metadata` and any nested JSON value are
//! sorted here, byte-wise, rather than relying on the map type serde_json was
//! built with.  Absent optional strings are written as `""` and empty maps as
//! `{}`, so "missing" and "explicitly empty" hash identically.  Timestamps are
//! RFC3339 UTC with exactly six fractional digits.
//!
//! `current_hash` is never part of the encoding.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use auditchain_contracts::entry::AuditEntry;

/// Encode `entry` linked against `previous_hash`.
///
/// The entry's own `previous_hash` and `current_hash` fields are ignored;
/// the verifier passes the stored `previous_hash` explicitly, the append path
/// passes the head it linked against.
pub fn canonicalize(entry: &AuditEntry, previous_hash: &str) -> Vec<u8> {
    let mut out = CanonicalWriter::new();

    out.field_str("id", &entry.id);
    out.field_raw("sequence", &entry.sequence.to_string());
    out.field_str("trace_id", &entry.trace_id);
    out.field_str("actor_id", &entry.actor_id);
    out.field_opt("actor_type", entry.actor_type.as_deref());
    out.field_opt("source_ip", entry.source_ip.as_deref());
    out.field_opt("user_agent", entry.user_agent.as_deref());
    out.field_str("action", &entry.action);
    out.field_str("resource", &entry.resource);
    out.field_opt("resource_id", entry.resource_id.as_deref());
    out.field_opt("operation", entry.operation.as_deref());
    out.field_str("outcome", entry.outcome.as_str());
    out.field_str("severity", entry.severity.as_str());
    out.field_map("payload", &entry.payload);
    out.field_map("metadata", &entry.metadata);
    out.field_str("timestamp", &format_timestamp(&entry.timestamp));
    out.field_str("created_at", &format_timestamp(&entry.created_at));
    out.field_str("previous_hash", previous_hash);

    out.finish()
}

/// RFC3339, UTC, microsecond precision, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ── Writer ────────────────────────────────────────────────────────────────────

struct CanonicalWriter {
    buf: String,
    fields: usize,
}

impl CanonicalWriter {
    fn new() -> Self {
        Self {
            buf: String::from("{"),
            fields: 0,
        }
    }

    fn key(&mut self, name: &str) {
        if self.fields > 0 {
            self.buf.push(',');
        }
        self.fields += 1;
        write_string(&mut self.buf, name);
        self.buf.push(':');
    }

    fn field_str(&mut self, name: &str, value: &str) {
        self.key(name);
        write_string(&mut self.buf, value);
    }

    fn field_opt(&mut self, name: &str, value: Option<&str>) {
        self.field_str(name, value.unwrap_or(""));
    }

    fn field_raw(&mut self, name: &str, raw: &str) {
        self.key(name);
        self.buf.push_str(raw);
    }

    fn field_map(&mut self, name: &str, map: &BTreeMap<String, Value>) {
        self.key(name);
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        self.buf.push('{');
        for (i, k) in keys.into_iter().enumerate() {
            if i > 0 {
                self.buf.push(',');
            }
            write_string(&mut self.buf, k);
            self.buf.push(':');
            write_value(&mut self.buf, &map[k]);
        }
        self.buf.push('}');
    }

    fn finish(mut self) -> Vec<u8> {
        self.buf.push('}');
        self.buf.into_bytes()
    }
}

/// JSON string literal with serde_json's escaping.
fn write_string(buf: &mut String, s: &str) {
    buf.push_str(&Value::String(s.to_owned()).to_string());
}

fn write_value(buf: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            buf.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_string(buf, k);
                buf.push(':');
                write_value(buf, &map[k.as_str()]);
            }
            buf.push('}');
        }
        Value::Array(items) => {
            buf.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_value(buf, item);
            }
            buf.push(']');
        }
        // null, bool, number, string: serde_json's compact form is already
        // deterministic.
        scalar => buf.push_str(&scalar.to_string()),
    }
}
