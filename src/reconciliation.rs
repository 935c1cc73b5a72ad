// ⚖️ Reconciliation Engine - bring one member in line with the cert feed
//
// Per member:
//   fetch -> (removed upstream? delete and stop)
//   -> BEGIN
//        names, sync timestamp, inactive flag, network ban open/close,
//        join date, affiliation state, ATC / previous / pilot ratings,
//        instructor-only qualifications dropped on downgrade
//   -> COMMIT, or ROLLBACK on the first error
//
// Nothing that goes wrong for one member escapes reconcile_member; the
// outcome says what happened and the batch moves on.

use crate::classifier::{classify_atc, classify_pilot, is_instructor_or_above};
use crate::db::{self, Event, EVENT_ACTOR};
use crate::entities::ban::{AUTOMATED_DETECTION_NOTE, AUTOMATED_DETECTION_REASON};
use crate::entities::{AffiliationState, Ban, BanType, QualificationKind, StateResolver};
use crate::error::{FeedError, ReconcileError};
use crate::feed::{ExternalRecord, FeedClient, StatusLookup};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

// ============================================================================
// CHANGE LOG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub field: String,
    pub old: String,
    pub new: String,
}

/// Field-level diff observed while syncing one member
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeLog {
    pub member_id: i64,
    entries: Vec<ChangeEntry>,
}

impl ChangeLog {
    pub fn new(member_id: i64) -> Self {
        ChangeLog {
            member_id,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, field: &str, old: impl ToString, new: impl ToString) {
        self.entries.push(ChangeEntry {
            field: field.to_string(),
            old: old.to_string(),
            new: new.to_string(),
        });
    }

    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.field.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug)]
pub enum MemberOutcome {
    /// Transaction committed (possibly with an empty change log)
    Synced(ChangeLog),

    /// Account gone upstream; local record deleted
    Removed,

    /// Feed unavailable; nothing touched, member stays due
    FetchFailed(FeedError),

    /// Local update failed; everything for this member rolled back
    Failed(ReconcileError),
}

impl MemberOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, MemberOutcome::Synced(_))
    }

    pub fn changes(&self) -> Option<&ChangeLog> {
        match self {
            MemberOutcome::Synced(changes) => Some(changes),
            _ => None,
        }
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine<F, S> {
    feed: F,
    resolver: S,

    /// Account credited as instigator of bans this engine opens
    system_account_id: i64,
}

impl<F: FeedClient, S: StateResolver> ReconciliationEngine<F, S> {
    pub fn new(feed: F, resolver: S, system_account_id: i64) -> Self {
        ReconciliationEngine {
            feed,
            resolver,
            system_account_id,
        }
    }

    /// Sync one member against the feed. Never panics and never propagates.
    pub fn reconcile_member(
        &self,
        conn: &mut Connection,
        member_id: i64,
        now: DateTime<Utc>,
    ) -> MemberOutcome {
        let record = match self.feed.fetch_status(member_id) {
            Ok(StatusLookup::Found(record)) => record,
            Ok(StatusLookup::Removed) => return self.remove_member(conn, member_id, now),
            Err(e) => {
                warn!(member_id, error = %e, "Cert data not retrieved, will retry next run");
                return MemberOutcome::FetchFailed(e);
            }
        };
        debug!(member_id, rating = record.rating, "Cert data retrieved");

        let tx = match conn.transaction() {
            Ok(tx) => tx,
            Err(e) => {
                error!(member_id, error = %e, "Could not begin transaction");
                return MemberOutcome::Failed(e.into());
            }
        };

        match self.apply(&tx, member_id, &record, now) {
            Ok(changes) => match tx.commit() {
                Ok(()) => {
                    debug!(member_id, changes = changes.len(), "Committed");
                    MemberOutcome::Synced(changes)
                }
                Err(e) => {
                    error!(member_id, error = %e, "Commit failed");
                    MemberOutcome::Failed(e.into())
                }
            },
            Err(e) => {
                // no commit follows a rollback
                if let Err(rollback_err) = tx.rollback() {
                    warn!(member_id, error = %rollback_err, "Rollback reported an error");
                }
                error!(member_id, error = %e, "Cert update rolled back");
                MemberOutcome::Failed(e)
            }
        }
    }

    fn remove_member(&self, conn: &Connection, member_id: i64, now: DateTime<Utc>) -> MemberOutcome {
        let result = db::delete_member(conn, member_id).and_then(|deleted| {
            let event = Event::new(
                "member_removed",
                "member",
                &member_id.to_string(),
                serde_json::json!({ "reason": "no longer exists in cert feed", "deleted": deleted }),
                EVENT_ACTOR,
                now,
            );
            db::insert_event(conn, &event)
        });

        match result {
            Ok(()) => {
                info!(member_id, "No longer exists in cert feed, deleted");
                MemberOutcome::Removed
            }
            Err(e) => {
                let detail = format!("{e:#}");
                error!(member_id, error = %detail, "Could not delete removed member");
                MemberOutcome::Failed(e.into())
            }
        }
    }

    /// All mutations for one member. Runs inside the caller's transaction.
    fn apply(
        &self,
        tx: &Connection,
        member_id: i64,
        record: &ExternalRecord,
        now: DateTime<Utc>,
    ) -> Result<ChangeLog, ReconcileError> {
        let mut member =
            db::load_member(tx, member_id)?.ok_or(ReconcileError::MemberNotFound(member_id))?;
        let mut changes = ChangeLog::new(member_id);

        // Names: only overwrite with something non-empty
        if let Some(first) = record.name_first.as_deref() {
            if first != member.name_first {
                changes.record("name_first", &member.name_first, first);
                member.name_first = first.to_string();
            }
        }
        if let Some(last) = record.name_last.as_deref() {
            if last != member.name_last {
                changes.record("name_last", &member.name_last, last);
                member.name_last = last.to_string();
            }
        }
        member.cert_checked_at = Some(now);

        let old_status = member.status;
        member.status = member.status.with_inactive(record.rating < 0);
        if member.status != old_status {
            changes.record("status", old_status, member.status);
        }

        // Network ban lifecycle: at most one active network ban at a time
        match db::active_network_ban(tx, member_id)? {
            None if record.is_suspended() => {
                let ban = Ban {
                    id: 0,
                    member_id,
                    ban_type: BanType::Network,
                    reason: AUTOMATED_DETECTION_REASON.to_string(),
                    reason_extra: Some(AUTOMATED_DETECTION_NOTE.to_string()),
                    instigator_id: self.system_account_id,
                    period_start: now,
                    period_finish: None,
                    period_secs: None,
                };
                let ban_id = db::insert_ban(tx, &ban)?;
                info!(member_id, ban_id, "Network ban opened");
                changes.record("network_ban", "None", "Active");
            }
            Some(mut ban) if record.rating > 0 => {
                ban.close(now);
                db::save_ban_period(tx, &ban)?;
                info!(member_id, ban_id = ban.id, "Network ban expired");
                changes.record("network_ban", "Active", "Expired");
            }
            _ => {}
        }

        if let Some(registered_at) = record.registered_at {
            if member.joined_at != Some(registered_at) {
                let old = member
                    .joined_at
                    .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                changes.record("joined_at", old, registered_at.format("%Y-%m-%d %H:%M:%S"));
                member.joined_at = Some(registered_at);
            }
        }

        let old_state = member.state;
        member.state = self.resolver.determine(
            old_state,
            record.region.as_deref(),
            record.division.as_deref(),
        );
        if member.state != old_state {
            changes.record("state", old_state, member.state);
        }

        // Instructor ratings (I1/I2) are only recognised for division members
        let restricted_instructor =
            matches!(record.rating, 8 | 9) && member.state != AffiliationState::Division;
        if restricted_instructor {
            debug!(member_id, rating = record.rating, "Instructor rating outside division, not granted");
        } else {
            let spec = classify_atc(record.rating);
            if spec.is_known() {
                // training grants are reported against the held ATC rating
                let previous = db::latest_qualification(tx, member_id, QualificationKind::Atc)?;
                if db::add_qualification(tx, member_id, &spec, now)? {
                    let old = previous.map(|q| q.code).unwrap_or_else(|| "None".to_string());
                    changes.record("atc_rating", old, spec.code);
                }
            }
        }

        if is_instructor_or_above(record.rating) {
            match self.feed.fetch_previous_rating(member_id) {
                Ok(Some(previous_rating)) => {
                    let spec = classify_atc(previous_rating);
                    if spec.is_known() && db::add_qualification(tx, member_id, &spec, now)? {
                        changes.record("atc_rating", "Previous", spec.code);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(member_id, error = %e, "Previous rating not retrieved, skipping");
                }
            }
        } else {
            for kind in QualificationKind::TRAINING {
                for removed in db::delete_qualifications_of_kind(tx, member_id, kind)? {
                    changes.record(kind.as_str(), removed.code, "Removed");
                }
            }
        }

        for spec in classify_pilot(record.pilot_rating) {
            if db::add_qualification(tx, member_id, &spec, now)? {
                changes.record("pilot_rating", "n/a", spec.code);
            }
        }

        db::update_member(tx, &member)?;

        if !changes.is_empty() {
            let event = Event::new(
                "member_synced",
                "member",
                &member_id.to_string(),
                serde_json::json!({ "changes": changes.entries() }),
                EVENT_ACTOR,
                now,
            );
            db::insert_event(tx, &event)?;
        }

        Ok(changes)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_atc;
    use crate::db::{
        active_network_ban, add_qualification, get_events_for_entity, insert_ban, insert_member, load_bans,
        load_member, setup_database,
    };
    use crate::entities::{HomeDivisionResolver, Member, QualificationSpec};
    use crate::feed::fake::StaticFeed;
    use crate::feed::RecordKind;
    use chrono::{Duration, TimeZone};

    const SYSTEM_ACCOUNT: i64 = 707070;
    const CID: i64 = 1_234_567;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 3, 0, 0).unwrap()
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        insert_member(&conn, &Member::new(CID, "Old", "Name")).unwrap();
        conn
    }

    fn status_fields<'a>(rating: &'a str, pilot: &'a str, division: &'a str) -> Vec<(&'a str, &'a str)> {
        vec![
            ("name_first", "Jane"),
            ("name_last", "Doe"),
            ("email", "[hidden]"),
            ("rating", rating),
            ("pilotrating", pilot),
            ("regdate", "2012-05-01 18:22:10"),
            ("region", "EUR"),
            ("division", division),
        ]
    }

    fn engine(feed: &StaticFeed) -> ReconciliationEngine<&StaticFeed, HomeDivisionResolver> {
        ReconciliationEngine::new(feed, HomeDivisionResolver::new("EUR", "GBR"), SYSTEM_ACCOUNT)
    }

    fn codes(member: &Member, kind: QualificationKind) -> Vec<String> {
        member
            .qualifications
            .iter()
            .filter(|q| q.kind == kind)
            .map(|q| q.code.clone())
            .collect()
    }

    #[test]
    fn test_first_sync_applies_everything() {
        let mut conn = test_conn();
        let feed = StaticFeed::new().with_status(CID, &status_fields("3", "1", "GBR"));

        let outcome = engine(&feed).reconcile_member(&mut conn, CID, t0());
        let changes = outcome.changes().expect("synced").clone();

        let member = load_member(&conn, CID).unwrap().unwrap();
        assert_eq!((member.name_first.as_str(), member.name_last.as_str()), ("Jane", "Doe"));
        assert_eq!(member.cert_checked_at, Some(t0()));
        assert_eq!(member.state, AffiliationState::Division);
        assert!(member.joined_at.is_some());
        assert_eq!(codes(&member, QualificationKind::Atc), vec!["S2"]);
        assert_eq!(codes(&member, QualificationKind::Pilot), vec!["P1"]);

        let fields: Vec<&str> = changes.fields().collect();
        assert_eq!(
            fields,
            vec!["name_first", "name_last", "joined_at", "state", "atc_rating", "pilot_rating"]
        );

        let events = get_events_for_entity(&conn, "member", &CID.to_string()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "member_synced");
        // not instructor-track, so no previous-rating lookup
        assert_eq!(feed.calls_for(RecordKind::PreviousRating), 0);
    }

    #[test]
    fn test_second_run_is_a_no_op_apart_from_timestamp() {
        let mut conn = test_conn();
        let feed = StaticFeed::new().with_status(CID, &status_fields("5", "5", "GBR"));
        let engine = engine(&feed);

        assert!(engine.reconcile_member(&mut conn, CID, t0()).is_synced());
        let first = load_member(&conn, CID).unwrap().unwrap();

        let later = t0() + Duration::hours(1);
        let outcome = engine.reconcile_member(&mut conn, CID, later);
        assert!(outcome.changes().unwrap().is_empty());

        let second = load_member(&conn, CID).unwrap().unwrap();
        assert_eq!(second.qualifications, first.qualifications);
        assert_eq!(second.cert_checked_at, Some(later));

        let events = get_events_for_entity(&conn, "member", &CID.to_string()).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_fetch_failure_touches_nothing() {
        let mut conn = test_conn();
        let feed = StaticFeed::new();

        let outcome = engine(&feed).reconcile_member(&mut conn, CID, t0());
        assert!(matches!(outcome, MemberOutcome::FetchFailed(FeedError::Transport(_))));

        let member = load_member(&conn, CID).unwrap().unwrap();
        assert_eq!(member.cert_checked_at, None);
        assert_eq!(member.name_first, "Old");
    }

    #[test]
    fn test_removed_upstream_deletes_member() {
        let mut conn = test_conn();
        add_qualification(&conn, CID, &classify_atc(3), t0()).unwrap();
        let feed = StaticFeed::new().with_status(
            CID,
            &[("name_first", ""), ("name_last", ""), ("email", "[hidden]")],
        );

        let outcome = engine(&feed).reconcile_member(&mut conn, CID, t0());
        assert!(matches!(outcome, MemberOutcome::Removed));
        assert!(load_member(&conn, CID).unwrap().is_none());

        let events = get_events_for_entity(&conn, "member", &CID.to_string()).unwrap();
        assert_eq!(events[0].event_type, "member_removed");
    }

    #[test]
    fn test_suspension_opens_exactly_one_network_ban() {
        let mut conn = test_conn();
        let feed = StaticFeed::new().with_status(CID, &status_fields("0", "0", "GBR"));
        let engine = engine(&feed);

        let outcome = engine.reconcile_member(&mut conn, CID, t0());
        assert!(outcome.changes().unwrap().fields().any(|f| f == "network_ban"));
        let rerun = engine.reconcile_member(&mut conn, CID, t0() + Duration::hours(1));
        assert!(rerun.changes().unwrap().is_empty());

        let bans = load_bans(&conn, CID).unwrap();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].ban_type, BanType::Network);
        assert_eq!(bans[0].period_finish, None);
        assert_eq!(bans[0].instigator_id, SYSTEM_ACCOUNT);
        assert_eq!(bans[0].period_start, t0());
        assert_eq!(bans[0].reason, AUTOMATED_DETECTION_REASON);
    }

    #[test]
    fn test_reinstatement_closes_network_ban() {
        let mut conn = test_conn();
        let start = t0() - Duration::days(3);
        insert_ban(
            &conn,
            &Ban {
                id: 0,
                member_id: CID,
                ban_type: BanType::Network,
                reason: AUTOMATED_DETECTION_REASON.to_string(),
                reason_extra: None,
                instigator_id: SYSTEM_ACCOUNT,
                period_start: start,
                period_finish: None,
                period_secs: None,
            },
        )
        .unwrap();
        let feed = StaticFeed::new().with_status(CID, &status_fields("2", "0", "GBR"));

        engine(&feed).reconcile_member(&mut conn, CID, t0());

        let member = load_member(&conn, CID).unwrap().unwrap();
        assert!(active_network_ban(&conn, CID).unwrap().is_none());
        let ban = &member.bans[0];
        assert_eq!(ban.period_finish, Some(t0()));
        assert!(ban.period_finish.unwrap() >= ban.period_start);
        assert_eq!(ban.period_secs, Some(3 * 24 * 3600));
    }

    #[test]
    fn test_inactive_rating_sets_flag() {
        let mut conn = test_conn();
        let feed = StaticFeed::new().with_status(CID, &status_fields("-1", "0", "GBR"));

        let outcome = engine(&feed).reconcile_member(&mut conn, CID, t0());
        assert!(outcome.changes().unwrap().fields().any(|f| f == "status"));

        let member = load_member(&conn, CID).unwrap().unwrap();
        assert!(member.status.is_inactive());
        assert!(member.bans.is_empty());
        assert!(codes(&member, QualificationKind::Atc).is_empty());
    }

    #[test]
    fn test_instructor_outside_division_skips_atc_grant_only() {
        let mut conn = test_conn();
        let feed = StaticFeed::new()
            .with_status(CID, &status_fields("9", "3", "EUD"))
            .with_previous_rating(CID, 5);

        engine(&feed).reconcile_member(&mut conn, CID, t0());

        let member = load_member(&conn, CID).unwrap().unwrap();
        assert_eq!(member.state, AffiliationState::Region);
        assert!(codes(&member, QualificationKind::AtcTraining).is_empty());
        assert_eq!(codes(&member, QualificationKind::Atc), vec!["C1"]);
        assert_eq!(codes(&member, QualificationKind::Pilot), vec!["P1", "P2"]);
    }

    #[test]
    fn test_instructor_in_division_gets_rating_and_previous() {
        let mut conn = test_conn();
        let feed = StaticFeed::new()
            .with_status(CID, &status_fields("8", "0", "GBR"))
            .with_previous_rating(CID, 7);

        let outcome = engine(&feed).reconcile_member(&mut conn, CID, t0());

        let member = load_member(&conn, CID).unwrap().unwrap();
        assert_eq!(codes(&member, QualificationKind::AtcTraining), vec!["I1"]);
        assert_eq!(codes(&member, QualificationKind::Atc), vec!["C3"]);
        let atc_rows = outcome.changes().unwrap().fields().filter(|f| *f == "atc_rating").count();
        assert_eq!(atc_rows, 2);
    }

    #[test]
    fn test_instructor_grant_reports_held_atc_rating() {
        let mut conn = test_conn();
        add_qualification(&conn, CID, &classify_atc(7), t0() - Duration::days(400)).unwrap();
        let feed = StaticFeed::new()
            .with_status(CID, &status_fields("8", "0", "GBR"))
            .with_previous_rating(CID, 7);

        let outcome = engine(&feed).reconcile_member(&mut conn, CID, t0());

        let rows: Vec<_> = outcome
            .changes()
            .unwrap()
            .entries()
            .iter()
            .filter(|e| e.field == "atc_rating")
            .map(|e| (e.old.as_str(), e.new.as_str()))
            .collect();
        assert_eq!(rows, vec![("C3", "I1")]);
    }

    #[test]
    fn test_previous_rating_failure_is_not_fatal() {
        let mut conn = test_conn();
        let feed = StaticFeed::new().with_status(CID, &status_fields("8", "0", "GBR"));

        let outcome = engine(&feed).reconcile_member(&mut conn, CID, t0());

        assert!(outcome.is_synced());
        assert_eq!(feed.calls_for(RecordKind::PreviousRating), 1);
    }

    #[test]
    fn test_downgrade_removes_training_and_admin_qualifications() {
        let mut conn = test_conn();
        for spec in [
            classify_atc(7),
            classify_atc(8),
            classify_atc(11),
            QualificationSpec {
                kind: QualificationKind::PilotTraining,
                code: "FI",
                name: "Flight Instructor",
                network_value: 0,
            },
        ] {
            add_qualification(&conn, CID, &spec, t0() - Duration::days(100)).unwrap();
        }
        let feed = StaticFeed::new().with_status(CID, &status_fields("3", "0", "GBR"));

        let outcome = engine(&feed).reconcile_member(&mut conn, CID, t0());

        let member = load_member(&conn, CID).unwrap().unwrap();
        for kind in QualificationKind::TRAINING {
            assert!(codes(&member, kind).is_empty(), "{kind} should be cleared");
        }
        assert_eq!(codes(&member, QualificationKind::Atc), vec!["C3", "S2"]);

        let removed: Vec<&str> = outcome
            .changes()
            .unwrap()
            .entries()
            .iter()
            .filter(|e| e.new == "Removed")
            .map(|e| e.old.as_str())
            .collect();
        assert_eq!(removed, vec!["I1", "FI", "SUP"]);
    }

    #[test]
    fn test_blank_names_do_not_overwrite() {
        let mut conn = test_conn();
        let feed = StaticFeed::new().with_status(
            CID,
            &[("name_first", "  "), ("name_last", "Doe"), ("rating", "1")],
        );

        engine(&feed).reconcile_member(&mut conn, CID, t0());

        let member = load_member(&conn, CID).unwrap().unwrap();
        assert_eq!(member.name_first, "Old");
        assert_eq!(member.name_last, "Doe");
    }

    #[test]
    fn test_mutation_failure_rolls_back_everything() {
        let mut conn = test_conn();
        conn.execute_batch(
            "CREATE TRIGGER reject_qualifications BEFORE INSERT ON qualifications
             BEGIN SELECT RAISE(ABORT, 'qualification writes disabled'); END;",
        )
        .unwrap();
        // suspension opens a ban before the pilot grant fails
        let feed = StaticFeed::new().with_status(CID, &status_fields("0", "1", "GBR"));

        let outcome = engine(&feed).reconcile_member(&mut conn, CID, t0());
        assert!(matches!(outcome, MemberOutcome::Failed(ReconcileError::Storage(_))));

        let member = load_member(&conn, CID).unwrap().unwrap();
        assert!(member.bans.is_empty());
        assert_eq!(member.cert_checked_at, None);
        assert_eq!(member.name_first, "Old");
        assert_eq!(member.state, AffiliationState::NotRegistered);
    }

    #[test]
    fn test_unknown_local_member_fails_cleanly() {
        let mut conn = test_conn();
        let feed = StaticFeed::new().with_status(42, &status_fields("1", "0", "GBR"));

        let outcome = engine(&feed).reconcile_member(&mut conn, 42, t0());
        assert!(matches!(outcome, MemberOutcome::Failed(ReconcileError::MemberNotFound(42))));
    }
}
