//! In-memory implementation of `ReviewerStore`.
//!
//! All state is held in memory and lost on restart. Used by tests and by
//! deployments that seed their pool at startup.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{validate_pool, ReviewerStore, StoreError};
use crate::reviewer::Reviewer;

/// In-memory reviewer store.
///
/// Keeps reviewers in insertion order inside a `RwLock`.
pub struct InMemoryStore {
    reviewers: RwLock<Vec<Reviewer>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            reviewers: RwLock::new(Vec::new()),
        }
    }

    /// Create a store seeded with the given pool.
    pub fn with_reviewers(reviewers: Vec<Reviewer>) -> Result<Self, StoreError> {
        validate_pool(&reviewers)?;
        Ok(Self {
            reviewers: RwLock::new(reviewers),
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReviewerStore for InMemoryStore {
    async fn read_all(&self) -> Result<Vec<Reviewer>, StoreError> {
        let reviewers = self.reviewers.read().await;
        Ok(reviewers.clone())
    }

    async fn write_all(&self, updated: &[Reviewer]) -> Result<(), StoreError> {
        validate_pool(updated)?;

        let mut reviewers = self.reviewers.write().await;
        for reviewer in updated {
            if let Some(existing) = reviewers.iter_mut().find(|r| r.name == reviewer.name) {
                *existing = reviewer.clone();
            }
        }
        Ok(())
    }
}
