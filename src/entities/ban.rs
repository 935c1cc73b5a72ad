// 🚫 Ban Entity - local record of a suspension
//
// A ban is active while period_finish is None. Network bans mirror the
// member's suspension on the cert feed and are opened/closed only by the
// cert update job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BanType {
    /// Issued by division staff
    Local,

    /// Mirrors a suspension on the network
    Network,
}

impl BanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanType::Local => "local",
            BanType::Network => "network",
        }
    }
}

impl FromStr for BanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(BanType::Local),
            "network" => Ok(BanType::Network),
            other => Err(format!("unknown ban type: {other}")),
        }
    }
}

/// Reason recorded on bans opened by the cert update job
pub const AUTOMATED_DETECTION_REASON: &str = "automated_detection";
pub const AUTOMATED_DETECTION_NOTE: &str = "Network ban discovered via cert update.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ban {
    pub id: i64,
    pub member_id: i64,
    pub ban_type: BanType,
    pub reason: String,
    pub reason_extra: Option<String>,
    pub instigator_id: i64,
    pub period_start: DateTime<Utc>,
    pub period_finish: Option<DateTime<Utc>>,
    /// Whole seconds between start and finish, set when the ban closes
    pub period_secs: Option<i64>,
}

impl Ban {
    /// Close the ban at `at`, never earlier than its start
    pub fn close(&mut self, at: DateTime<Utc>) {
        let finish = at.max(self.period_start);
        self.period_finish = Some(finish);
        self.period_secs = Some((finish - self.period_start).num_seconds());
    }
}
