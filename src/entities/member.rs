// 👤 Member Entity - a network account known to the division
//
// Identity: the network-assigned CID (never changes)
// Values: names, status, state, join date (overwritten from the cert feed)
// Children: qualifications and bans, loaded eagerly with the member

use super::ban::Ban;
use super::qualification::Qualification;
use super::state::AffiliationState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// MEMBER STATUS
// ============================================================================

/// Status bit flags. Zero means an ordinary active account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemberStatus(pub i64);

impl MemberStatus {
    pub const ACTIVE: MemberStatus = MemberStatus(0);
    pub const INACTIVE: i64 = 0b0001;

    pub fn is_inactive(&self) -> bool {
        self.0 & Self::INACTIVE != 0
    }

    pub fn with_inactive(self, inactive: bool) -> Self {
        if inactive {
            MemberStatus(self.0 | Self::INACTIVE)
        } else {
            MemberStatus(self.0 & !Self::INACTIVE)
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_inactive() {
            f.write_str("Inactive")
        } else {
            f.write_str("Active")
        }
    }
}

// ============================================================================
// MEMBER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Network-assigned identifier (CID)
    pub id: i64,

    pub name_first: String,
    pub name_last: String,
    pub email: Option<String>,

    pub status: MemberStatus,
    pub state: AffiliationState,

    pub last_login: Option<DateTime<Utc>>,
    /// Last successful cert sync (None = never synced)
    pub cert_checked_at: Option<DateTime<Utc>>,
    /// Network registration date
    pub joined_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub qualifications: Vec<Qualification>,
    #[serde(default)]
    pub bans: Vec<Ban>,
}

impl Member {
    pub fn new(id: i64, name_first: impl Into<String>, name_last: impl Into<String>) -> Self {
        Member {
            id,
            name_first: name_first.into(),
            name_last: name_last.into(),
            email: None,
            status: MemberStatus::ACTIVE,
            state: AffiliationState::NotRegistered,
            last_login: None,
            cert_checked_at: None,
            joined_at: None,
            qualifications: Vec::new(),
            bans: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_inactive_flag() {
        let status = MemberStatus::ACTIVE.with_inactive(true);
        assert!(status.is_inactive());
        assert_eq!(status.to_string(), "Inactive");

        let status = status.with_inactive(false);
        assert_eq!(status, MemberStatus::ACTIVE);
        assert_eq!(status.to_string(), "Active");
    }
}
