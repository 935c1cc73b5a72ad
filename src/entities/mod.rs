// Entity Models
//
// Member is the aggregate root. Qualifications and bans only exist attached
// to a member and are deleted with it.

pub mod ban;
pub mod member;
pub mod qualification;
pub mod state;

pub use ban::{Ban, BanType};
pub use member::{Member, MemberStatus};
pub use qualification::{Qualification, QualificationKind, QualificationSpec};
pub use state::{AffiliationState, HomeDivisionResolver, StateResolver};
