// 🔁 Cert Update Job - batch and forced single-member runs
//
// Strictly sequential: one member is fully committed or rolled back before
// the next starts. Only a missing member in forced mode is an error here;
// per-member failures are logged and counted.

use crate::db;
use crate::entities::StateResolver;
use crate::error::ReconcileError;
use crate::feed::FeedClient;
use crate::planner::{clamp_batch_size, plan_batch, SyncTier};
use crate::reconciliation::{MemberOutcome, ReconciliationEngine};
use crate::report::{format_batch_summary, format_member_table, BatchReport};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub tier: SyncTier,
    pub max_members: usize,
    /// Ids below this are legacy/system accounts and are passed over
    pub min_member_id: i64,
}

fn log_outcome(position: usize, member_id: i64, outcome: &MemberOutcome) {
    match outcome {
        MemberOutcome::Synced(changes) => {
            info!(member_id, "\n{}", format_member_table(position, changes));
        }
        MemberOutcome::Removed => {
            info!(member_id, "#{position} {member_id} no longer exists in cert feed - deleted");
        }
        MemberOutcome::FetchFailed(e) => {
            warn!(member_id, "#{position} {member_id} cert data *NOT* retrieved: {e}");
        }
        MemberOutcome::Failed(e) => {
            error!(member_id, "#{position} {member_id} rolled back: {e}");
        }
    }
}

/// Plan a batch for `options.tier` and reconcile each member in order.
/// `clock` supplies "now" for planning and for each member's update.
pub fn run_batch<F, S, C>(
    conn: &mut Connection,
    engine: &ReconciliationEngine<F, S>,
    options: &BatchOptions,
    clock: C,
) -> Result<BatchReport>
where
    F: FeedClient,
    S: StateResolver,
    C: Fn() -> DateTime<Utc>,
{
    let limit = clamp_batch_size(options.max_members);
    info!(tier = %options.tier, limit, "{} cron.", options.tier);

    let member_ids = plan_batch(conn, options.tier, limit, clock())?;
    let mut report = BatchReport::default();

    if member_ids.is_empty() {
        info!("No members to process.");
        return Ok(report);
    }
    info!("{} retrieved.", member_ids.len());

    for (index, &member_id) in member_ids.iter().enumerate() {
        if member_id < options.min_member_id {
            report.record_skipped();
            continue;
        }

        let outcome = engine.reconcile_member(conn, member_id, clock());
        log_outcome(index + 1, member_id, &outcome);
        report.record(&outcome);
    }

    info!("{}", format_batch_summary(&report));
    Ok(report)
}

/// Forced mode: sync exactly one member, bypassing the planner and the
/// reserved-id filter. Fails only if the member does not exist locally.
pub fn run_single<F, S>(
    conn: &mut Connection,
    engine: &ReconciliationEngine<F, S>,
    member_id: i64,
    now: DateTime<Utc>,
) -> Result<MemberOutcome, ReconcileError>
where
    F: FeedClient,
    S: StateResolver,
{
    if db::load_member(conn, member_id)?.is_none() {
        return Err(ReconcileError::MemberNotFound(member_id));
    }

    let outcome = engine.reconcile_member(conn, member_id, now);
    log_outcome(1, member_id, &outcome);
    Ok(outcome)
}
