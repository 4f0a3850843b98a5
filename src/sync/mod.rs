//! Incremental activity synchronization.
//!
//! One sync cycle reads the previously persisted summary records, walks
//! the remote activity search page by page until it reaches something it
//! already knows ([`engine`]), then persists the refreshed summary list
//! and fans out the configured per-activity detail fetches ([`details`]).

pub mod details;
pub mod engine;
#[cfg(test)]
pub mod testing;

use thiserror::Error;

pub use details::update_activities;
pub use engine::collect_new_activities;

use crate::client::ClientError;
use crate::storage::StorageError;

/// The identifier field every summary record must carry; the sync is
/// keyed on it.
pub const ACTIVITY_ID: &str = "activityId";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("expected an array of activities from {0}")]
    UnexpectedResponse(String),

    #[error("stored state at {0} is not an array of activities")]
    InvalidStoredState(String),

    #[error("stored activity at index {0} has no integer activityId")]
    InvalidStoredActivity(usize),
}
