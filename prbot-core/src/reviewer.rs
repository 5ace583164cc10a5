use serde::{Deserialize, Serialize};

/// A person eligible for review assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reviewer {
    /// Source-control login, unique across the pool.
    pub name: String,
    /// Accumulated effort score.
    pub workload: u64,
    /// Chat handle used to mention the reviewer in notifications.
    pub contact_handle: String,
}

impl Reviewer {
    pub fn new(name: impl Into<String>, workload: u64, contact_handle: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workload,
            contact_handle: contact_handle.into(),
        }
    }
}

/// Stable-sort a pool ascending by workload.
///
/// Reviewers with equal workload keep their relative order.
pub fn sort_by_workload(pool: &mut [Reviewer]) {
    pool.sort_by_key(|r| r.workload);
}

/// The smallest workload in the pool, or `None` for an empty pool.
pub fn min_workload(pool: &[Reviewer]) -> Option<u64> {
    pool.iter().map(|r| r.workload).min()
}
