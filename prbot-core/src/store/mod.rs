//! Storage abstraction for the reviewer pool.
//!
//! The balancer only ever reads the whole pool and writes the whole pool back,
//! so `ReviewerStore` has exactly those two operations. Implementations:
//!
//! - [`InMemoryStore`]: held in memory, lost on restart.
//! - [`SqliteStore`]: persistent, survives restarts.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::reviewer::Reviewer;

/// Errors raised by a reviewer store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend failed while performing `operation`.
    #[error("storage error during {operation}: {message}")]
    Storage { operation: String, message: String },

    /// Persisted data could not be decoded.
    #[error("corrupt data in {what}")]
    Corruption { what: String },

    /// A reviewer record violates the pool invariants.
    #[error("invalid reviewer: {reason}")]
    InvalidReviewer { reason: String },
}

impl StoreError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }

    pub fn invalid_reviewer(reason: impl Into<String>) -> Self {
        Self::InvalidReviewer {
            reason: reason.into(),
        }
    }
}

/// Whole-pool persistence for reviewers.
///
/// There is no per-reviewer partial update: callers read everything, mutate
/// their copy, and write everything back.
#[async_trait]
pub trait ReviewerStore: Send + Sync {
    /// Read every reviewer, in the store's natural order.
    async fn read_all(&self) -> Result<Vec<Reviewer>, StoreError>;

    /// Persist the given reviewers as one unit.
    ///
    /// Each stored reviewer named in `reviewers` takes the given workload and
    /// contact handle. Names with no stored record are skipped, so a reviewer
    /// removed between a read and this write stays removed. Records not present
    /// in the slice are left untouched. Either every record is written or none is.
    async fn write_all(&self, reviewers: &[Reviewer]) -> Result<(), StoreError>;
}

/// Check the invariants every stored pool must satisfy.
pub(crate) fn validate_pool(reviewers: &[Reviewer]) -> Result<(), StoreError> {
    let mut seen = std::collections::HashSet::new();
    for reviewer in reviewers {
        if reviewer.name.trim().is_empty() {
            return Err(StoreError::invalid_reviewer("name must not be empty"));
        }
        if !seen.insert(reviewer.name.as_str()) {
            return Err(StoreError::invalid_reviewer(format!(
                "duplicate name '{}'",
                reviewer.name
            )));
        }
    }
    Ok(())
}
