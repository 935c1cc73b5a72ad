// 🎓 Qualification Entity - ratings held by a member
//
// A qualification row is never updated in place: it is either granted
// (inserted) or removed (deleted). The most recent one of a kind is the
// member's "current" rating of that kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// QUALIFICATION KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualificationKind {
    /// Controller rating (OBS .. C3)
    Atc,

    /// Controller instructor ratings
    AtcTraining,

    /// Pilot rating (P1 .. P5)
    Pilot,

    /// Pilot instructor ratings
    PilotTraining,

    /// Network staff ratings (SUP, ADM)
    Admin,
}

impl QualificationKind {
    /// Kinds that are only valid while the member holds an instructor-track rating
    pub const TRAINING: [QualificationKind; 3] = [
        QualificationKind::AtcTraining,
        QualificationKind::PilotTraining,
        QualificationKind::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualificationKind::Atc => "atc",
            QualificationKind::AtcTraining => "training_atc",
            QualificationKind::Pilot => "pilot",
            QualificationKind::PilotTraining => "training_pilot",
            QualificationKind::Admin => "admin",
        }
    }
}

impl fmt::Display for QualificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atc" => Ok(QualificationKind::Atc),
            "training_atc" => Ok(QualificationKind::AtcTraining),
            "pilot" => Ok(QualificationKind::Pilot),
            "training_pilot" => Ok(QualificationKind::PilotTraining),
            "admin" => Ok(QualificationKind::Admin),
            other => Err(format!("unknown qualification kind: {other}")),
        }
    }
}

// ============================================================================
// QUALIFICATION SPEC (classifier output)
// ============================================================================

/// What the classifier says a network code means. Not yet tied to a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualificationSpec {
    pub kind: QualificationKind,
    pub code: &'static str,
    pub name: &'static str,
    /// Value as published by the network (rating code or pilot bit)
    pub network_value: i32,
}

impl QualificationSpec {
    pub const UNKNOWN_CODE: &'static str = "NONE";

    /// The "unknown/none" qualification for codes the network should not send
    pub fn unknown(kind: QualificationKind, network_value: i32) -> Self {
        QualificationSpec {
            kind,
            code: Self::UNKNOWN_CODE,
            name: "Unknown",
            network_value,
        }
    }

    /// Unknown qualifications are reported but never granted
    pub fn is_known(&self) -> bool {
        self.code != Self::UNKNOWN_CODE
    }
}

// ============================================================================
// QUALIFICATION (held by a member)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Qualification {
    pub id: i64,
    pub member_id: i64,
    pub kind: QualificationKind,
    pub code: String,
    pub network_value: i32,
    pub created_at: DateTime<Utc>,
}
