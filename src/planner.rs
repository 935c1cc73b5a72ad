// 🗓️ Member Selection Planner - who is due for a cert sync
//
// Each tier is a predicate over (last_login, cert_checked_at, status).
// The predicate exists twice: as SQL for selection and as `SyncTier::matches`
// for callers and tests that hold members in memory. Both must agree.

use crate::db::format_timestamp;
use crate::entities::{Member, MemberStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::fmt;
use std::str::FromStr;

/// Hard ceiling on members per run, whatever the caller asks for
pub const MAX_BATCH_CEILING: usize = 10_000;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

pub fn clamp_batch_size(requested: usize) -> usize {
    requested.min(MAX_BATCH_CEILING)
}

// ============================================================================
// SYNC TIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTier {
    /// Logged in within 30 days, or never synced
    Hourly,
    /// Synced over 23 hours ago and logged in within 90 days
    Daily,
    /// Synced over 6 days ago and logged in within 180 days
    Weekly,
    /// Synced over 25 days ago, never logged in, plain active status
    Monthly,
    /// Everyone
    Full,
}

impl FromStr for SyncTier {
    type Err = String;

    /// Only the first letter counts: "h", "hourly" and "hx" are all Hourly.
    /// Anything unrecognised (including "all") is a full run.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tier = match s.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('h') => SyncTier::Hourly,
            Some('d') => SyncTier::Daily,
            Some('w') => SyncTier::Weekly,
            Some('m') => SyncTier::Monthly,
            _ => SyncTier::Full,
        };
        Ok(tier)
    }
}

impl fmt::Display for SyncTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncTier::Hourly => "Hourly",
            SyncTier::Daily => "Daily",
            SyncTier::Weekly => "Weekly",
            SyncTier::Monthly => "Monthly",
            SyncTier::Full => "Full",
        };
        f.write_str(name)
    }
}

/// The columns a tier predicate looks at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberActivity {
    pub last_login: Option<DateTime<Utc>>,
    pub cert_checked_at: Option<DateTime<Utc>>,
    pub status: MemberStatus,
}

impl From<&Member> for MemberActivity {
    fn from(member: &Member) -> Self {
        MemberActivity {
            last_login: member.last_login,
            cert_checked_at: member.cert_checked_at,
            status: member.status,
        }
    }
}

impl SyncTier {
    fn login_window(&self) -> Option<Duration> {
        match self {
            SyncTier::Hourly => Some(Duration::days(30)),
            SyncTier::Daily => Some(Duration::days(90)),
            SyncTier::Weekly => Some(Duration::days(180)),
            SyncTier::Monthly | SyncTier::Full => None,
        }
    }

    fn staleness(&self) -> Option<Duration> {
        match self {
            SyncTier::Daily => Some(Duration::hours(23)),
            SyncTier::Weekly => Some(Duration::days(6)),
            SyncTier::Monthly => Some(Duration::days(25)),
            SyncTier::Hourly | SyncTier::Full => None,
        }
    }

    /// In-memory form of the selection predicate
    pub fn matches(&self, activity: &MemberActivity, now: DateTime<Utc>) -> bool {
        let logged_in_since = |window: Duration| {
            activity.last_login.is_some_and(|login| login >= now - window)
        };
        let checked_before = |age: Duration| {
            activity
                .cert_checked_at
                .is_some_and(|checked| checked <= now - age)
        };

        match self {
            SyncTier::Hourly => {
                logged_in_since(Duration::days(30)) || activity.cert_checked_at.is_none()
            }
            SyncTier::Daily => checked_before(Duration::hours(23)) && logged_in_since(Duration::days(90)),
            SyncTier::Weekly => checked_before(Duration::days(6)) && logged_in_since(Duration::days(180)),
            SyncTier::Monthly => {
                checked_before(Duration::days(25))
                    && activity.last_login.is_none()
                    && activity.status == MemberStatus::ACTIVE
            }
            SyncTier::Full => true,
        }
    }

    /// SQL form of the selection predicate plus its bound values
    fn where_clause(&self, now: DateTime<Utc>) -> (&'static str, Vec<Value>) {
        let login_cutoff = self
            .login_window()
            .map(|window| Value::Text(format_timestamp(now - window)));
        let checked_cutoff = self
            .staleness()
            .map(|age| Value::Text(format_timestamp(now - age)));

        match self {
            SyncTier::Hourly => (
                "WHERE last_login >= ?1 OR cert_checked_at IS NULL",
                login_cutoff.into_iter().collect(),
            ),
            SyncTier::Daily | SyncTier::Weekly => (
                "WHERE cert_checked_at <= ?1 AND last_login >= ?2",
                checked_cutoff.into_iter().chain(login_cutoff).collect(),
            ),
            SyncTier::Monthly => (
                "WHERE cert_checked_at <= ?1 AND last_login IS NULL AND status = 0",
                checked_cutoff.into_iter().collect(),
            ),
            SyncTier::Full => ("", Vec::new()),
        }
    }
}

// ============================================================================
// PLANNING
// ============================================================================

/// Select up to `requested` (clamped) member ids due under `tier`,
/// least recently synced first (never-synced before everything else).
pub fn plan_batch(
    conn: &Connection,
    tier: SyncTier,
    requested: usize,
    now: DateTime<Utc>,
) -> Result<Vec<i64>> {
    let limit = clamp_batch_size(requested);
    let (clause, mut values) = tier.where_clause(now);

    let sql = format!(
        "SELECT id FROM members {clause}
         ORDER BY cert_checked_at ASC, id ASC
         LIMIT ?{}",
        values.len() + 1
    );
    values.push(Value::Integer(limit as i64));

    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params_from_iter(values.iter()), |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()
        .with_context(|| format!("Failed to plan {tier} batch"))?;

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_member, setup_database};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn seed(
        conn: &Connection,
        id: i64,
        login_hours_ago: Option<i64>,
        checked_hours_ago: Option<i64>,
        status: i64,
    ) -> Member {
        let mut member = Member::new(id, "Test", "Member");
        member.last_login = login_hours_ago.map(|h| now() - Duration::hours(h));
        member.cert_checked_at = checked_hours_ago.map(|h| now() - Duration::hours(h));
        member.status = MemberStatus(status);
        insert_member(conn, &member).unwrap();
        member
    }

    #[test]
    fn test_tier_parsing_uses_first_letter() {
        assert_eq!("hourly".parse::<SyncTier>().unwrap(), SyncTier::Hourly);
        assert_eq!("D".parse::<SyncTier>().unwrap(), SyncTier::Daily);
        assert_eq!("weekly".parse::<SyncTier>().unwrap(), SyncTier::Weekly);
        assert_eq!("m".parse::<SyncTier>().unwrap(), SyncTier::Monthly);
        assert_eq!("all".parse::<SyncTier>().unwrap(), SyncTier::Full);
        assert_eq!("".parse::<SyncTier>().unwrap(), SyncTier::Full);
    }

    #[test]
    fn test_clamp_batch_size() {
        assert_eq!(clamp_batch_size(50), 50);
        assert_eq!(clamp_batch_size(10_000), 10_000);
        assert_eq!(clamp_batch_size(250_000), MAX_BATCH_CEILING);
    }

    #[test]
    fn test_hourly_selects_recent_logins_and_never_synced() {
        let conn = test_conn();
        seed(&conn, 900001, Some(24), Some(2), 0); // recent login
        seed(&conn, 900002, Some(24 * 45), Some(2), 0); // stale login
        seed(&conn, 900003, None, None, 0); // never synced

        let ids = plan_batch(&conn, SyncTier::Hourly, 100, now()).unwrap();
        assert_eq!(ids, vec![900003, 900001]);
    }

    #[test]
    fn test_daily_boundary_is_inclusive() {
        let conn = test_conn();
        seed(&conn, 900001, Some(1), Some(23), 0);
        seed(&conn, 900002, Some(1), Some(22), 0);

        let ids = plan_batch(&conn, SyncTier::Daily, 100, now()).unwrap();
        assert_eq!(ids, vec![900001]);
    }

    #[test]
    fn test_monthly_requires_no_login_and_active_status() {
        let conn = test_conn();
        seed(&conn, 900001, None, Some(24 * 30), 0);
        seed(&conn, 900002, Some(24 * 300), Some(24 * 30), 0);
        seed(&conn, 900003, None, Some(24 * 30), MemberStatus::INACTIVE);
        seed(&conn, 900004, None, None, 0);

        let ids = plan_batch(&conn, SyncTier::Monthly, 100, now()).unwrap();
        assert_eq!(ids, vec![900001]);
    }

    #[test]
    fn test_full_orders_oldest_first_and_limits() {
        let conn = test_conn();
        seed(&conn, 900001, None, Some(1), 0);
        seed(&conn, 900002, None, Some(100), 0);
        seed(&conn, 900003, None, None, 0);
        seed(&conn, 900004, None, Some(50), 0);

        let ids = plan_batch(&conn, SyncTier::Full, 3, now()).unwrap();
        assert_eq!(ids, vec![900003, 900002, 900004]);
    }

    fn arb_member() -> impl Strategy<Value = (Option<i64>, Option<i64>, i64)> {
        // whole hours keep every boundary exactly representable
        (
            proptest::option::of(0i64..24 * 400),
            proptest::option::of(0i64..24 * 60),
            prop_oneof![Just(0i64), Just(MemberStatus::INACTIVE)],
        )
    }

    fn arb_tier() -> impl Strategy<Value = SyncTier> {
        prop_oneof![
            Just(SyncTier::Hourly),
            Just(SyncTier::Daily),
            Just(SyncTier::Weekly),
            Just(SyncTier::Monthly),
            Just(SyncTier::Full),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn sql_selection_matches_predicate(
            members in proptest::collection::vec(arb_member(), 0..40),
            tier in arb_tier(),
            requested in 1usize..60,
        ) {
            let conn = test_conn();
            let seeded: Vec<Member> = members
                .iter()
                .enumerate()
                .map(|(i, &(login, checked, status))| seed(&conn, 900_000 + i as i64, login, checked, status))
                .collect();

            let mut expected: Vec<&Member> = seeded
                .iter()
                .filter(|m| tier.matches(&MemberActivity::from(*m), now()))
                .collect();
            expected.sort_by(|a, b| a.cert_checked_at.cmp(&b.cert_checked_at).then(a.id.cmp(&b.id)));
            let expected: Vec<i64> = expected.into_iter().take(requested).map(|m| m.id).collect();

            let ids = plan_batch(&conn, tier, requested, now()).unwrap();

            prop_assert!(ids.len() <= clamp_batch_size(requested));
            prop_assert_eq!(ids, expected);
        }
    }
}
