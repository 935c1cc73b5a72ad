use crate::entities::{
    AffiliationState, Ban, BanType, Member, MemberStatus, Qualification, QualificationKind,
    QualificationSpec,
};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Actor recorded on audit events written by the cert update job
pub const EVENT_ACTOR: &str = "cert_update";

// ============================================================================
// TIMESTAMP ENCODING
// ============================================================================

/// Fixed-width RFC 3339 (microseconds, `Z`), so lexical order == time order.
/// The planner compares these strings directly in SQL.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn required_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {raw}").into(),
        )
    })
}

fn optional_timestamp(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.and_then(|s| parse_timestamp(&s)))
}

fn parsed_text<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases silently keep "memory"
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY,
            name_first TEXT NOT NULL DEFAULT '',
            name_last TEXT NOT NULL DEFAULT '',
            email TEXT,
            status INTEGER NOT NULL DEFAULT 0,
            state INTEGER NOT NULL DEFAULT 0,
            last_login TEXT,
            cert_checked_at TEXT,
            joined_at TEXT
        );

        CREATE TABLE IF NOT EXISTS qualifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id INTEGER NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            code TEXT NOT NULL,
            network_value INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (member_id, kind, code)
        );

        CREATE TABLE IF NOT EXISTS bans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id INTEGER NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            ban_type TEXT NOT NULL,
            reason TEXT NOT NULL,
            reason_extra TEXT,
            instigator_id INTEGER NOT NULL,
            period_start TEXT NOT NULL,
            period_finish TEXT,
            period_secs INTEGER
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_members_cert_checked ON members(cert_checked_at);
        CREATE INDEX IF NOT EXISTS idx_members_last_login ON members(last_login);
        CREATE INDEX IF NOT EXISTS idx_qualifications_latest
            ON qualifications(member_id, kind, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_bans_member ON bans(member_id, ban_type);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);",
    )
    .context("Failed to create schema")?;

    Ok(())
}

// ============================================================================
// MEMBERS
// ============================================================================

const MEMBER_COLUMNS: &str = "id, name_first, name_last, email, status, state,
                              last_login, cert_checked_at, joined_at";

fn map_member(row: &Row) -> rusqlite::Result<Member> {
    Ok(Member {
        id: row.get(0)?,
        name_first: row.get(1)?,
        name_last: row.get(2)?,
        email: row.get(3)?,
        status: MemberStatus(row.get(4)?),
        state: AffiliationState::from_code(row.get(5)?),
        last_login: optional_timestamp(row, 6)?,
        cert_checked_at: optional_timestamp(row, 7)?,
        joined_at: optional_timestamp(row, 8)?,
        qualifications: Vec::new(),
        bans: Vec::new(),
    })
}

/// Members are created by account registration; this exists for imports and tests.
pub fn insert_member(conn: &Connection, member: &Member) -> Result<()> {
    conn.execute(
        "INSERT INTO members (id, name_first, name_last, email, status, state,
                              last_login, cert_checked_at, joined_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            member.id,
            member.name_first,
            member.name_last,
            member.email,
            member.status.0,
            member.state.code(),
            member.last_login.map(format_timestamp),
            member.cert_checked_at.map(format_timestamp),
            member.joined_at.map(format_timestamp),
        ],
    )
    .with_context(|| format!("Failed to insert member {}", member.id))?;

    Ok(())
}

/// Load a member with qualifications and bans
pub fn load_member(conn: &Connection, id: i64) -> Result<Option<Member>> {
    let member = conn
        .query_row(
            &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = ?1"),
            [id],
            map_member,
        )
        .optional()?;

    let Some(mut member) = member else {
        return Ok(None);
    };

    member.qualifications = load_qualifications(conn, id)?;
    member.bans = load_bans(conn, id)?;

    Ok(Some(member))
}

/// Persist the member's scalar fields (children are written separately)
pub fn update_member(conn: &Connection, member: &Member) -> Result<()> {
    let updated = conn.execute(
        "UPDATE members
         SET name_first = ?2, name_last = ?3, email = ?4, status = ?5, state = ?6,
             last_login = ?7, cert_checked_at = ?8, joined_at = ?9
         WHERE id = ?1",
        params![
            member.id,
            member.name_first,
            member.name_last,
            member.email,
            member.status.0,
            member.state.code(),
            member.last_login.map(format_timestamp),
            member.cert_checked_at.map(format_timestamp),
            member.joined_at.map(format_timestamp),
        ],
    )?;

    anyhow::ensure!(updated == 1, "member {} vanished during update", member.id);
    Ok(())
}

/// Delete a member; qualifications and bans cascade
pub fn delete_member(conn: &Connection, id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM members WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

// ============================================================================
// QUALIFICATIONS
// ============================================================================

fn map_qualification(row: &Row) -> rusqlite::Result<Qualification> {
    Ok(Qualification {
        id: row.get(0)?,
        member_id: row.get(1)?,
        kind: parsed_text(row, 2)?,
        code: row.get(3)?,
        network_value: row.get(4)?,
        created_at: required_timestamp(row, 5)?,
    })
}

pub fn load_qualifications(conn: &Connection, member_id: i64) -> Result<Vec<Qualification>> {
    let mut stmt = conn.prepare(
        "SELECT id, member_id, kind, code, network_value, created_at
         FROM qualifications
         WHERE member_id = ?1
         ORDER BY created_at ASC, id ASC",
    )?;

    let qualifications = stmt
        .query_map([member_id], map_qualification)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(qualifications)
}

/// Most recent qualification of a kind (by creation time, then insertion order)
pub fn latest_qualification(
    conn: &Connection,
    member_id: i64,
    kind: QualificationKind,
) -> Result<Option<Qualification>> {
    let qualification = conn
        .query_row(
            "SELECT id, member_id, kind, code, network_value, created_at
             FROM qualifications
             WHERE member_id = ?1 AND kind = ?2
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            params![member_id, kind.as_str()],
            map_qualification,
        )
        .optional()?;

    Ok(qualification)
}

pub fn has_qualification(conn: &Connection, member_id: i64, spec: &QualificationSpec) -> Result<bool> {
    let held: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM qualifications WHERE member_id = ?1 AND kind = ?2 AND code = ?3
         )",
        params![member_id, spec.kind.as_str(), spec.code],
        |row| row.get(0),
    )?;
    Ok(held)
}

/// Grant a qualification. Returns false (and writes nothing) if the member has
/// ever held this kind and code, not only when it is the latest of its kind.
pub fn add_qualification(
    conn: &Connection,
    member_id: i64,
    spec: &QualificationSpec,
    now: DateTime<Utc>,
) -> Result<bool> {
    anyhow::ensure!(spec.is_known(), "refusing to grant unknown qualification");

    if has_qualification(conn, member_id, spec)? {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO qualifications (member_id, kind, code, network_value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            member_id,
            spec.kind.as_str(),
            spec.code,
            spec.network_value,
            format_timestamp(now),
        ],
    )
    .with_context(|| format!("Failed to grant {} to member {}", spec.code, member_id))?;

    Ok(true)
}

/// Remove every qualification of a kind, returning what was removed
pub fn delete_qualifications_of_kind(
    conn: &Connection,
    member_id: i64,
    kind: QualificationKind,
) -> Result<Vec<Qualification>> {
    let removed: Vec<Qualification> = load_qualifications(conn, member_id)?
        .into_iter()
        .filter(|q| q.kind == kind)
        .collect();

    if !removed.is_empty() {
        conn.execute(
            "DELETE FROM qualifications WHERE member_id = ?1 AND kind = ?2",
            params![member_id, kind.as_str()],
        )?;
    }

    Ok(removed)
}

// ============================================================================
// BANS
// ============================================================================

const BAN_COLUMNS: &str = "id, member_id, ban_type, reason, reason_extra, instigator_id,
                           period_start, period_finish, period_secs";

fn map_ban(row: &Row) -> rusqlite::Result<Ban> {
    Ok(Ban {
        id: row.get(0)?,
        member_id: row.get(1)?,
        ban_type: parsed_text::<BanType>(row, 2)?,
        reason: row.get(3)?,
        reason_extra: row.get(4)?,
        instigator_id: row.get(5)?,
        period_start: required_timestamp(row, 6)?,
        period_finish: optional_timestamp(row, 7)?,
        period_secs: row.get(8)?,
    })
}

pub fn load_bans(conn: &Connection, member_id: i64) -> Result<Vec<Ban>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BAN_COLUMNS} FROM bans WHERE member_id = ?1 ORDER BY period_start ASC, id ASC"
    ))?;

    let bans = stmt
        .query_map([member_id], map_ban)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(bans)
}

pub fn active_network_ban(conn: &Connection, member_id: i64) -> Result<Option<Ban>> {
    let ban = conn
        .query_row(
            &format!(
                "SELECT {BAN_COLUMNS} FROM bans
                 WHERE member_id = ?1 AND ban_type = ?2 AND period_finish IS NULL
                 ORDER BY period_start DESC, id DESC
                 LIMIT 1"
            ),
            params![member_id, BanType::Network.as_str()],
            map_ban,
        )
        .optional()?;

    Ok(ban)
}

/// Insert a ban; `ban.id` is ignored and the new row id returned
pub fn insert_ban(conn: &Connection, ban: &Ban) -> Result<i64> {
    conn.execute(
        "INSERT INTO bans (member_id, ban_type, reason, reason_extra, instigator_id,
                           period_start, period_finish, period_secs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            ban.member_id,
            ban.ban_type.as_str(),
            ban.reason,
            ban.reason_extra,
            ban.instigator_id,
            format_timestamp(ban.period_start),
            ban.period_finish.map(format_timestamp),
            ban.period_secs,
        ],
    )
    .with_context(|| format!("Failed to insert ban for member {}", ban.member_id))?;

    Ok(conn.last_insert_rowid())
}

/// Write back a ban's finish time and duration (the only in-place ban update)
pub fn save_ban_period(conn: &Connection, ban: &Ban) -> Result<()> {
    conn.execute(
        "UPDATE bans SET period_finish = ?2, period_secs = ?3 WHERE id = ?1",
        params![ban.id, ban.period_finish.map(format_timestamp), ban.period_secs],
    )?;
    Ok(())
}

// ============================================================================
// EVENT LOG
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            format_timestamp(event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: required_timestamp(row, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}
