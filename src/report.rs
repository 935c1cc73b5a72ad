// 📋 Change Reporter - human-readable run output
//
// Purely presentational. One fixed-width table per member plus a summary
// line per batch.

use crate::reconciliation::{ChangeLog, MemberOutcome};
use serde::Serialize;

const FIELD_WIDTH: usize = 20;
const VALUE_WIDTH: usize = 30;
/// "| " + field + " | " + old + " | " + new + " |"
pub const TABLE_WIDTH: usize = FIELD_WIDTH + 2 * VALUE_WIDTH + 10;

fn fit(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        format!("{value:<width$}")
    } else {
        let cut: String = value.chars().take(width - 1).collect();
        format!("{cut}~")
    }
}

pub fn format_row(field: &str, old: &str, new: &str) -> String {
    format!(
        "| {} | {} | {} |",
        fit(field, FIELD_WIDTH),
        fit(old, VALUE_WIDTH),
        fit(new, VALUE_WIDTH)
    )
}

pub fn rule_line() -> String {
    "-".repeat(TABLE_WIDTH)
}

/// Table of every change recorded for one member.
/// `position` is 1-based within the batch.
pub fn format_member_table(position: usize, changes: &ChangeLog) -> String {
    let mut lines = vec![
        format!("#{position} Processing {:<9}", changes.member_id),
        rule_line(),
        format_row("Data Field", "Old Value", "New Value"),
    ];

    if changes.is_empty() {
        lines.push(format_row("(no changes)", "", ""));
    } else {
        lines.extend(
            changes
                .entries()
                .iter()
                .map(|entry| format_row(&entry.field, &entry.old, &entry.new)),
        );
    }

    lines.push(rule_line());
    lines.join("\n")
}

// ============================================================================
// BATCH REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Members the job attempted (skipped reserved accounts excluded)
    pub processed: usize,
    pub synced: usize,
    /// Synced members whose change log was non-empty
    pub changed: usize,
    pub removed: usize,
    pub fetch_failed: usize,
    pub failed: usize,
    /// Reserved/system accounts passed over
    pub skipped: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: &MemberOutcome) {
        self.processed += 1;
        match outcome {
            MemberOutcome::Synced(changes) => {
                self.synced += 1;
                if !changes.is_empty() {
                    self.changed += 1;
                }
            }
            MemberOutcome::Removed => self.removed += 1,
            MemberOutcome::FetchFailed(_) => self.fetch_failed += 1,
            MemberOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }
}

pub fn format_batch_summary(report: &BatchReport) -> String {
    format!(
        "Processed {} members ({} synced, {} changed, {} removed, {} fetch failures, {} rolled back, {} skipped).",
        report.processed,
        report.synced,
        report.changed,
        report.removed,
        report.fetch_failed,
        report.failed,
        report.skipped
    )
}
