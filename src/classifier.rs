// 🏷️ Qualification Classifier - network rating codes as data
//
// Pure lookups from the numeric codes the cert feed publishes to the
// qualifications the division records. Total over i32: anything outside the
// documented ranges classifies as the unknown/none qualification.

use crate::entities::{QualificationKind, QualificationSpec};

// ============================================================================
// ATC RATINGS
// ============================================================================

/// First rating on the instructor track (I1)
pub const INSTRUCTOR_RATING: i32 = 8;

/// Rating code meaning the account is suspended network-wide
pub const SUSPENDED_RATING: i32 = 0;

const ATC_TABLE: &[(i32, QualificationKind, &str, &str)] = &[
    (1, QualificationKind::Atc, "OBS", "Observer"),
    (2, QualificationKind::Atc, "S1", "Tower Trainee"),
    (3, QualificationKind::Atc, "S2", "Tower Controller"),
    (4, QualificationKind::Atc, "S3", "Senior Student"),
    (5, QualificationKind::Atc, "C1", "Enroute Controller"),
    (6, QualificationKind::Atc, "C2", "Senior Controller (C2)"),
    (7, QualificationKind::Atc, "C3", "Senior Controller"),
    (8, QualificationKind::AtcTraining, "I1", "Instructor"),
    (9, QualificationKind::AtcTraining, "I2", "Instructor (I2)"),
    (10, QualificationKind::AtcTraining, "I3", "Senior Instructor"),
    (11, QualificationKind::Admin, "SUP", "Supervisor"),
    (12, QualificationKind::Admin, "ADM", "Administrator"),
];

/// Classify a network ATC rating code.
///
/// -1 (inactive) and 0 (suspended) carry no rating and, like any code not in
/// the table, yield the unknown qualification.
pub fn classify_atc(rating: i32) -> QualificationSpec {
    ATC_TABLE
        .iter()
        .find(|(value, ..)| *value == rating)
        .map(|&(network_value, kind, code, name)| QualificationSpec {
            kind,
            code,
            name,
            network_value,
        })
        .unwrap_or_else(|| QualificationSpec::unknown(QualificationKind::Atc, rating))
}

pub fn is_instructor_or_above(rating: i32) -> bool {
    rating >= INSTRUCTOR_RATING
}

// ============================================================================
// PILOT RATINGS
// ============================================================================

const PILOT_TABLE: &[(i32, &str, &str)] = &[
    (1, "P1", "Online Pilot"),
    (2, "P2", "Flight Fundamentals"),
    (4, "P3", "VFR Pilot"),
    (8, "P4", "IFR Pilot"),
    (16, "P5", "Advanced IFR Pilot"),
];

/// Classify a pilot rating bitmask. Each set, known bit is one qualification;
/// unknown bits are ignored.
pub fn classify_pilot(bits: i32) -> Vec<QualificationSpec> {
    if bits <= 0 {
        return Vec::new();
    }

    PILOT_TABLE
        .iter()
        .filter(|(bit, ..)| bits & bit != 0)
        .map(|&(bit, code, name)| QualificationSpec {
            kind: QualificationKind::Pilot,
            code,
            name,
            network_value: bit,
        })
        .collect()
}
