//! # auditchain-contracts
//!
//! Shared entry types, chain metadata, and the error taxonomy for the
//! auditchain ledger.
//!
//! Every crate in the workspace imports from here.  Apart from draft
//! validation this crate holds no logic, only data definitions.

pub mod chain;
pub mod entry;
pub mod error;

pub use chain::{ChainHead, ChainSummary, IntegrityEvent, VerificationResult, VerifyStart};
pub use entry::{AuditEntry, AuditEntryDraft, Outcome, Severity, GENESIS_HASH};
pub use error::{LedgerError, LedgerResult};

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike, Utc};
    use serde_json::json;

    use super::*;
    use entry::{normalize_timestamp, MAX_ID_LEN};

    fn draft() -> AuditEntryDraft {
        AuditEntryDraft::new(
            "trace-1",
            "alice",
            "policy.update",
            "policy/42",
            Outcome::Success,
            Severity::Medium,
        )
    }

    // ── Draft validation ─────────────────────────────────────────────────────

    #[test]
    fn minimal_draft_is_valid() {
        assert!(draft().validate().is_ok());
    }

    #[test]
    fn blank_required_field_is_rejected() {
        let mut d = draft();
        d.actor_id = "   ".to_string();

        match d.validate() {
            Err(LedgerError::InvalidEntry { reason }) => {
                assert!(reason.contains("actor_id"), "reason should name the field: {reason}");
            }
            other => panic!("expected InvalidEntry, got {:?}", other),
        }
    }

    #[test]
    fn empty_or_oversized_id_is_rejected() {
        assert!(matches!(
            draft().with_id("").validate(),
            Err(LedgerError::InvalidEntry { .. })
        ));
        assert!(matches!(
            draft().with_id("x".repeat(MAX_ID_LEN + 1)).validate(),
            Err(LedgerError::InvalidEntry { .. })
        ));
        assert!(draft().with_id("x".repeat(MAX_ID_LEN)).validate().is_ok());
    }

    #[test]
    fn empty_map_key_is_rejected() {
        let d = draft().with_payload("", json!(1));
        assert!(matches!(d.validate(), Err(LedgerError::InvalidEntry { .. })));

        let d = draft().with_metadata("", json!("x"));
        assert!(matches!(d.validate(), Err(LedgerError::InvalidEntry { .. })));
    }

    #[test]
    fn timestamp_outside_rfc3339_years_is_rejected() {
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        match draft().with_timestamp(far).validate() {
            Err(LedgerError::InvalidEntry { reason }) => assert!(reason.contains("10000"), "{reason}"),
            other => panic!("expected InvalidEntry, got {:?}", other),
        }

        let before_year_zero = Utc.with_ymd_and_hms(-1, 12, 31, 23, 59, 59).unwrap();
        assert!(matches!(
            draft().with_timestamp(before_year_zero).validate(),
            Err(LedgerError::InvalidEntry { .. })
        ));

        let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        assert!(draft().with_timestamp(last).validate().is_ok());
    }

    #[test]
    fn draft_json_defaults_optional_fields() {
        let d: AuditEntryDraft = serde_json::from_value(json!({
            "trace_id": "t",
            "actor_id": "a",
            "action": "mine.start",
            "resource": "rig/7",
            "outcome": "partial",
            "severity": "high"
        }))
        .unwrap();

        assert_eq!(d.id, None);
        assert_eq!(d.outcome, Outcome::Partial);
        assert_eq!(d.severity, Severity::High);
        assert!(d.payload.is_empty());
        assert!(d.timestamp.is_none());
    }

    // ── Enums ────────────────────────────────────────────────────────────────

    #[test]
    fn outcome_and_severity_parse_their_wire_names() {
        for o in [Outcome::Success, Outcome::Failure, Outcome::Partial] {
            assert_eq!(o.as_str().parse::<Outcome>().unwrap(), o);
        }
        for s in [
            Severity::Info,
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(s.as_str().parse::<Severity>().unwrap(), s);
        }
        assert!("fatal".parse::<Severity>().is_err());
    }

    // ── Timestamps ───────────────────────────────────────────────────────────

    #[test]
    fn normalize_truncates_to_microseconds() {
        let ts = Utc
            .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .unwrap()
            .with_nanosecond(123_456_789)
            .unwrap();

        assert_eq!(normalize_timestamp(ts).nanosecond(), 123_456_000);
    }

    // ── Chain metadata ───────────────────────────────────────────────────────

    #[test]
    fn genesis_head_points_at_sentinel() {
        let head = ChainHead::genesis();
        assert_eq!(head.last_hash, GENESIS_HASH);
        assert_eq!(head.last_sequence, 0);
        assert_eq!(head.next_sequence(), 1);
        assert!(head.is_genesis());
    }

    #[test]
    fn broken_result_converts_to_chain_broken() {
        let result = VerificationResult::broken(1, 2, "e2", 2, "hash mismatch");
        match result.into_result() {
            Err(LedgerError::ChainBroken { entry_id, sequence, .. }) => {
                assert_eq!(entry_id, "e2");
                assert_eq!(sequence, 2);
            }
            other => panic!("expected ChainBroken, got {:?}", other),
        }

        assert!(VerificationResult::valid(1, 3, "ok").into_result().is_ok());
    }

    #[test]
    fn only_conflict_and_durability_are_retryable() {
        assert!(LedgerError::ConcurrentAppendConflict { attempts: 3 }.is_retryable());
        assert!(LedgerError::DurabilityFailure { reason: "disk".into() }.is_retryable());
        assert!(!LedgerError::entry_not_found("x").is_retryable());
        assert!(!LedgerError::ChainBroken {
            entry_id: "x".into(),
            sequence: 1,
            reason: "r".into()
        }
        .is_retryable());
    }

    #[test]
    fn verify_start_conversions() {
        assert_eq!(VerifyStart::from(4), VerifyStart::Sequence(4));
        assert_eq!(VerifyStart::from("e1"), VerifyStart::EntryId("e1".into()));
        assert_eq!(VerifyStart::default(), VerifyStart::Sequence(1));
    }
}
