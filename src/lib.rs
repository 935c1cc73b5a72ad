// Cert Sync - Core Library
// Reconciles local member records against the network cert feed

pub mod classifier;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod feed;
pub mod job;
pub mod planner;
pub mod reconciliation;
pub mod report;

// Re-export commonly used types
pub use classifier::{classify_atc, classify_pilot};
pub use config::SyncConfig;
pub use db::{open_database, setup_database, Event};
pub use entities::{
    AffiliationState, Ban, BanType, HomeDivisionResolver, Member, MemberStatus, Qualification,
    QualificationKind, QualificationSpec, StateResolver,
};
pub use error::{FeedError, ReconcileError};
pub use feed::{ExternalRecord, FeedClient, HttpFeedClient, RecordKind, StatusLookup};
pub use job::{run_batch, run_single, BatchOptions};
pub use planner::{plan_batch, SyncTier, DEFAULT_BATCH_SIZE, MAX_BATCH_CEILING};
pub use reconciliation::{ChangeLog, MemberOutcome, ReconciliationEngine};
pub use report::{format_batch_summary, format_member_table, BatchReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
