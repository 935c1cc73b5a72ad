// 🌍 Affiliation State - where a member sits relative to the division
//
// Determined from the (region, division) pair the feed publishes. The rule
// is a collaborator behind StateResolver so deployments for other divisions
// can plug in their own.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffiliationState {
    NotRegistered,
    Division,
    Region,
    International,
    Visitor,
    Transfer,
}

impl AffiliationState {
    pub fn code(&self) -> i32 {
        match self {
            AffiliationState::NotRegistered => 0,
            AffiliationState::Division => 1,
            AffiliationState::Region => 2,
            AffiliationState::International => 3,
            AffiliationState::Visitor => 4,
            AffiliationState::Transfer => 5,
        }
    }

    /// Unknown codes fall back to NotRegistered
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => AffiliationState::Division,
            2 => AffiliationState::Region,
            3 => AffiliationState::International,
            4 => AffiliationState::Visitor,
            5 => AffiliationState::Transfer,
            _ => AffiliationState::NotRegistered,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AffiliationState::NotRegistered => "Not Registered",
            AffiliationState::Division => "Division",
            AffiliationState::Region => "Region",
            AffiliationState::International => "International",
            AffiliationState::Visitor => "Visitor",
            AffiliationState::Transfer => "Transfer",
        }
    }
}

impl fmt::Display for AffiliationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes a member's state from the feed's region/division codes.
pub trait StateResolver {
    fn determine(
        &self,
        current: AffiliationState,
        region: Option<&str>,
        division: Option<&str>,
    ) -> AffiliationState;
}

/// Home division -> Division, home region -> Region, elsewhere -> International.
#[derive(Debug, Clone)]
pub struct HomeDivisionResolver {
    pub home_region: String,
    pub home_division: String,
}

impl HomeDivisionResolver {
    pub fn new(home_region: impl Into<String>, home_division: impl Into<String>) -> Self {
        HomeDivisionResolver {
            home_region: home_region.into(),
            home_division: home_division.into(),
        }
    }
}

impl StateResolver for HomeDivisionResolver {
    fn determine(
        &self,
        current: AffiliationState,
        region: Option<&str>,
        division: Option<&str>,
    ) -> AffiliationState {
        let in_region = region.is_some_and(|r| r.eq_ignore_ascii_case(&self.home_region));
        let in_division = division.is_some_and(|d| d.eq_ignore_ascii_case(&self.home_division));

        let computed = if in_region && in_division {
            AffiliationState::Division
        } else if in_region {
            AffiliationState::Region
        } else if region.is_none() && division.is_none() {
            AffiliationState::NotRegistered
        } else {
            AffiliationState::International
        };

        // Visiting/transferring is granted by the reference workflow, not the feed
        match current {
            AffiliationState::Visitor | AffiliationState::Transfer
                if computed != AffiliationState::Division =>
            {
                current
            }
            _ => computed,
        }
    }
}
