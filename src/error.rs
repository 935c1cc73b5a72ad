// Error taxonomy for the cert update job
//
// FeedError      -> the member is skipped and retried next run
// ReconcileError -> the member's transaction is rolled back (or, for
//                   MemberNotFound, a forced run exits non-zero)

use thiserror::Error;

/// Failure to obtain a usable record from the cert feed.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed transport error: {0}")]
    Transport(String),

    #[error("feed returned HTTP {status}")]
    Status { status: u16 },

    #[error("feed response is not valid XML: {0}")]
    Parse(String),

    #[error("feed record field `{field}` is unusable: {reason}")]
    Malformed { field: &'static str, reason: String },
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FeedError::Status {
                status: status.as_u16(),
            },
            None => FeedError::Transport(err.to_string()),
        }
    }
}

/// Failure while applying (or locating) a member's local state.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("member {0} not found")]
    MemberNotFound(i64),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}
