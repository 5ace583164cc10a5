//! Least-loaded reviewer selection.
//!
//! Every assignment reads the whole pool, credits the chosen reviewer with the
//! pull request's score, and writes the whole pool back. Once even the
//! least-loaded reviewer has reached [`REBALANCE_THRESHOLD`], the threshold is
//! subtracted from everyone so workloads stay bounded without changing who is
//! ahead of whom.

use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::reviewer::{min_workload, sort_by_workload, Reviewer};
use crate::score::ChangeSize;
use crate::store::{ReviewerStore, StoreError};

/// Workload at which the whole pool is shifted down.
pub const REBALANCE_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    #[error("no reviewers in the pool")]
    EmptyPool,

    #[error("no eligible reviewer: '{excluded}' is the only reviewer in the pool")]
    NoEligibleReviewer { excluded: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a balanced assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// The chosen reviewer as they were before this assignment was credited.
    pub assignee: Reviewer,
    /// The whole pool after crediting and rebalancing, ascending by workload.
    pub pool: Vec<Reviewer>,
    /// Score credited to the assignee.
    pub score: u64,
    /// Whether the threshold was subtracted from the pool.
    pub rebalanced: bool,
}

/// Select, credit and rebalance without touching any store.
///
/// The assignee is the least-loaded reviewer whose name differs from
/// `exclude`; ties go to whoever comes first in `pool`.
pub fn plan_assignment(
    mut pool: Vec<Reviewer>,
    score: u64,
    exclude: Option<&str>,
    threshold: u64,
) -> Result<Assignment, BalancerError> {
    if pool.is_empty() {
        return Err(BalancerError::EmptyPool);
    }

    sort_by_workload(&mut pool);

    // After the stable sort the first eligible entry is the minimum.
    let index = pool
        .iter()
        .position(|r| exclude != Some(r.name.as_str()))
        .ok_or_else(|| BalancerError::NoEligibleReviewer {
            excluded: exclude.unwrap_or_default().to_string(),
        })?;

    let assignee = pool[index].clone();
    pool[index].workload = pool[index].workload.saturating_add(score);

    sort_by_workload(&mut pool);
    let rebalanced = rebalance(&mut pool, threshold);

    Ok(Assignment {
        assignee,
        pool,
        score,
        rebalanced,
    })
}

/// Shift every workload down by whole multiples of `threshold` once the
/// minimum has reached it. Returns whether anything was subtracted.
///
/// A pool whose minimum lies in `[threshold, 2 * threshold)` is shifted exactly
/// once; larger minimums only arise from externally seeded pools.
pub fn rebalance(pool: &mut [Reviewer], threshold: u64) -> bool {
    if threshold == 0 {
        return false;
    }

    let Some(min) = min_workload(pool) else {
        return false;
    };
    if min < threshold {
        return false;
    }

    // Every workload is >= min >= shift, so no subtraction can underflow.
    let shift = min - min % threshold;
    for reviewer in pool.iter_mut() {
        reviewer.workload -= shift;
    }
    true
}

/// Store-backed reviewer balancer.
///
/// Assignments are serialized through an internal lock so that two concurrent
/// calls in the same process can never both read the same pool and overwrite
/// each other's credit. Processes sharing one store are not coordinated.
pub struct ReviewerBalancer {
    store: Arc<dyn ReviewerStore>,
    threshold: u64,
    assign_lock: Mutex<()>,
}

impl ReviewerBalancer {
    pub fn new(store: Arc<dyn ReviewerStore>) -> Self {
        Self::with_threshold(store, REBALANCE_THRESHOLD)
    }

    pub fn with_threshold(store: Arc<dyn ReviewerStore>, threshold: u64) -> Self {
        Self {
            store,
            threshold,
            assign_lock: Mutex::new(()),
        }
    }

    /// Assign `score` to the least-loaded reviewer other than `exclude`.
    pub async fn assign(
        &self,
        score: u64,
        exclude: Option<&str>,
    ) -> Result<Assignment, BalancerError> {
        let _guard = self.assign_lock.lock().await;

        let pool = self.store.read_all().await?;
        debug!("Read {} reviewers from store", pool.len());

        let assignment = match plan_assignment(pool, score, exclude, self.threshold) {
            Ok(assignment) => assignment,
            Err(e) => {
                warn!("Could not select a reviewer: {}", e);
                return Err(e);
            }
        };

        if assignment.rebalanced {
            info!(
                "Rebalanced reviewer pool, minimum workload is now {}",
                assignment.pool.first().map(|r| r.workload).unwrap_or(0)
            );
        }

        self.store.write_all(&assignment.pool).await?;

        info!(
            "Assigned score {} to {} (workload before: {})",
            score, assignment.assignee.name, assignment.assignee.workload
        );
        Ok(assignment)
    }

    /// Score a change and assign it, keeping the author off their own review.
    pub async fn assign_change(
        &self,
        change: ChangeSize,
        author: Option<&str>,
    ) -> Result<Assignment, BalancerError> {
        let score = change.score();
        debug!(
            "Change of +{} -{} scored {}",
            change.additions.unwrap_or(0),
            change.deletions.unwrap_or(0),
            score
        );
        self.assign(score, author).await
    }

    /// Pick a reviewer uniformly at random. Nothing is credited or persisted.
    pub async fn pick_random(&self) -> Result<Reviewer, BalancerError> {
        let mut pool = self.store.read_all().await?;
        if pool.is_empty() {
            warn!("Could not pick a random reviewer: pool is empty");
            return Err(BalancerError::EmptyPool);
        }

        let index = rand::rng().random_range(0..pool.len());
        let reviewer = pool.swap_remove(index);
        info!("Randomly picked reviewer {}", reviewer.name);
        Ok(reviewer)
    }

    /// Current pool, ascending by workload.
    pub async fn pool(&self) -> Result<Vec<Reviewer>, BalancerError> {
        let mut pool = self.store.read_all().await?;
        sort_by_workload(&mut pool);
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(entries: &[(&str, u64)]) -> Vec<Reviewer> {
        entries
            .iter()
            .map(|(name, workload)| Reviewer::new(*name, *workload, format!("{}-chat", name)))
            .collect()
    }

    fn workloads(pool: &[Reviewer]) -> Vec<(&str, u64)> {
        pool.iter().map(|r| (r.name.as_str(), r.workload)).collect()
    }

    fn balancer_with(entries: &[(&str, u64)]) -> (Arc<InMemoryStore>, ReviewerBalancer) {
        let store = Arc::new(InMemoryStore::with_reviewers(pool(entries)).unwrap());
        let balancer = ReviewerBalancer::new(store.clone());
        (store, balancer)
    }

    /// Store whose reads or writes always fail.
    struct FailingStore {
        inner: InMemoryStore,
        fail_reads: bool,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ReviewerStore for FailingStore {
        async fn read_all(&self) -> Result<Vec<Reviewer>, StoreError> {
            if self.fail_reads {
                return Err(StoreError::storage("read_all", "connection refused"));
            }
            self.inner.read_all().await
        }

        async fn write_all(&self, _reviewers: &[Reviewer]) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::storage("write_all", "throttled"))
        }
    }

    #[tokio::test]
    async fn test_least_loaded_gets_the_work() {
        let (store, balancer) = balancer_with(&[("alice", 200), ("bob", 300)]);

        let assignment = balancer.assign(50, None).await.unwrap();

        assert_eq!(assignment.assignee, Reviewer::new("alice", 200, "alice-chat"));
        assert_eq!(workloads(&assignment.pool), vec![("alice", 250), ("bob", 300)]);
        assert!(!assignment.rebalanced);
        assert_eq!(
            workloads(&store.read_all().await.unwrap()),
            vec![("alice", 250), ("bob", 300)]
        );
    }

    #[tokio::test]
    async fn test_below_threshold_no_rebalance() {
        let (_store, balancer) = balancer_with(&[("alice", 980), ("bob", 995)]);

        let assignment = balancer.assign(10, None).await.unwrap();

        assert_eq!(assignment.assignee.name, "alice");
        assert_eq!(assignment.assignee.workload, 980);
        assert_eq!(workloads(&assignment.pool), vec![("alice", 990), ("bob", 995)]);
        assert!(!assignment.rebalanced);
    }

    #[tokio::test]
    async fn test_rebalance_waits_for_new_minimum() {
        // alice crosses the threshold, but bob (999) is still below it
        let (_store, balancer) = balancer_with(&[("alice", 995), ("bob", 999)]);

        let assignment = balancer.assign(10, None).await.unwrap();

        assert_eq!(assignment.assignee.name, "alice");
        assert_eq!(assignment.assignee.workload, 995);
        assert_eq!(workloads(&assignment.pool), vec![("bob", 999), ("alice", 1005)]);
        assert!(!assignment.rebalanced);
    }

    #[tokio::test]
    async fn test_rebalance_when_minimum_reaches_threshold() {
        let (store, balancer) = balancer_with(&[("alice", 995), ("bob", 1200)]);

        let assignment = balancer.assign(10, None).await.unwrap();

        assert_eq!(assignment.assignee.name, "alice");
        assert!(assignment.rebalanced);
        assert_eq!(workloads(&assignment.pool), vec![("alice", 5), ("bob", 200)]);
        assert_eq!(
            workloads(&store.read_all().await.unwrap()),
            vec![("alice", 5), ("bob", 200)]
        );
    }

    #[tokio::test]
    async fn test_rebalance_exactly_at_threshold() {
        let (_store, balancer) = balancer_with(&[("alice", 990), ("bob", 1000)]);

        let assignment = balancer.assign(10, None).await.unwrap();

        assert!(assignment.rebalanced);
        assert_eq!(workloads(&assignment.pool), vec![("alice", 0), ("bob", 0)]);
    }

    #[tokio::test]
    async fn test_sole_reviewer_excluded() {
        let (store, balancer) = balancer_with(&[("alice", 1)]);

        let result = balancer.assign(10, Some("alice")).await;

        assert_eq!(
            result,
            Err(BalancerError::NoEligibleReviewer {
                excluded: "alice".to_string()
            })
        );
        // Nothing was credited
        assert_eq!(workloads(&store.read_all().await.unwrap()), vec![("alice", 1)]);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let (_store, balancer) = balancer_with(&[]);

        assert_eq!(balancer.assign(10, None).await, Err(BalancerError::EmptyPool));
        assert_eq!(balancer.pick_random().await, Err(BalancerError::EmptyPool));
    }

    #[tokio::test]
    async fn test_author_is_skipped() {
        let (_store, balancer) = balancer_with(&[("alice", 100), ("bob", 300), ("carol", 200)]);

        let assignment = balancer.assign(50, Some("alice")).await.unwrap();

        assert_eq!(assignment.assignee.name, "carol");
        assert_eq!(
            workloads(&assignment.pool),
            vec![("alice", 100), ("carol", 250), ("bob", 300)]
        );
    }

    #[tokio::test]
    async fn test_exclusion_of_someone_else_is_irrelevant() {
        let (_store, balancer) = balancer_with(&[("alice", 100), ("bob", 300)]);

        let assignment = balancer.assign(50, Some("bob")).await.unwrap();
        assert_eq!(assignment.assignee.name, "alice");

        let assignment = balancer.assign(50, Some("mallory")).await.unwrap();
        assert_eq!(assignment.assignee.name, "alice");
    }

    #[tokio::test]
    async fn test_ties_go_to_read_order() {
        let (_store, balancer) = balancer_with(&[("bob", 100), ("alice", 100)]);

        let assignment = balancer.assign(1, None).await.unwrap();
        assert_eq!(assignment.assignee.name, "bob");

        let assignment = balancer.assign(1, None).await.unwrap();
        assert_eq!(assignment.assignee.name, "alice");
    }

    #[tokio::test]
    async fn test_excluded_tied_minimum_falls_through() {
        let (_store, balancer) = balancer_with(&[("alice", 100), ("bob", 100)]);

        let assignment = balancer.assign(1, Some("alice")).await.unwrap();
        assert_eq!(assignment.assignee.name, "bob");
    }

    #[tokio::test]
    async fn test_assign_change_scores_and_excludes_author() {
        let (_store, balancer) = balancer_with(&[("alice", 0), ("bob", 10)]);

        let change = ChangeSize::new(Some(3000), Some(3000));
        let assignment = balancer.assign_change(change, Some("alice")).await.unwrap();

        assert_eq!(assignment.assignee.name, "bob");
        assert_eq!(assignment.score, 2920);
        assert_eq!(workloads(&assignment.pool), vec![("alice", 0), ("bob", 2930)]);
    }

    #[tokio::test]
    async fn test_read_failure_is_surfaced() {
        let store = Arc::new(FailingStore {
            inner: InMemoryStore::new(),
            fail_reads: true,
            writes: AtomicUsize::new(0),
        });
        let balancer = ReviewerBalancer::new(store.clone());

        let result = balancer.assign(10, None).await;
        assert_eq!(
            result,
            Err(BalancerError::Store(StoreError::storage(
                "read_all",
                "connection refused"
            )))
        );
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);

        assert!(matches!(
            balancer.pick_random().await,
            Err(BalancerError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced() {
        let store = Arc::new(FailingStore {
            inner: InMemoryStore::with_reviewers(pool(&[("alice", 0)])).unwrap(),
            fail_reads: false,
            writes: AtomicUsize::new(0),
        });
        let balancer = ReviewerBalancer::new(store.clone());

        let result = balancer.assign(10, None).await;
        assert_eq!(
            result,
            Err(BalancerError::Store(StoreError::storage("write_all", "throttled")))
        );
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(workloads(&store.inner.read_all().await.unwrap()), vec![("alice", 0)]);
    }

    #[tokio::test]
    async fn test_pick_random_does_not_persist() {
        let (store, balancer) = balancer_with(&[("alice", 5), ("bob", 7)]);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(balancer.pick_random().await.unwrap().name);
        }

        // 2^-199 chance of a false failure
        assert_eq!(seen.len(), 2);
        assert_eq!(
            workloads(&store.read_all().await.unwrap()),
            vec![("alice", 5), ("bob", 7)]
        );
    }

    #[tokio::test]
    async fn test_pick_random_ignores_exclusion_rules() {
        let (_store, balancer) = balancer_with(&[("alice", 1)]);
        assert_eq!(balancer.pick_random().await.unwrap().name, "alice");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_assignments_do_not_lose_updates() {
        let (store, balancer) = balancer_with(&[("alice", 0), ("bob", 0), ("carol", 0)]);
        let balancer = Arc::new(balancer);

        let mut handles = Vec::new();
        for _ in 0..30 {
            let balancer = balancer.clone();
            handles.push(tokio::spawn(async move { balancer.assign(10, None).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let total: u64 = store.read_all().await.unwrap().iter().map(|r| r.workload).sum();
        assert_eq!(total, 300);
    }

    #[tokio::test]
    async fn test_pool_is_sorted() {
        let (_store, balancer) = balancer_with(&[("bob", 30), ("alice", 10), ("carol", 20)]);
        let names: Vec<String> = balancer
            .pool()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["alice", "carol", "bob"]);
    }

    #[test]
    fn test_rebalance_with_zero_threshold_is_noop() {
        let mut p = pool(&[("alice", 5)]);
        assert!(!rebalance(&mut p, 0));
        assert_eq!(p[0].workload, 5);
    }

    #[test]
    fn test_rebalance_of_seeded_pool_lands_below_threshold() {
        let mut p = pool(&[("alice", 2500), ("bob", 4000)]);
        assert!(rebalance(&mut p, 1000));
        assert_eq!(workloads(&p), vec![("alice", 500), ("bob", 2000)]);
    }

    fn arb_pool() -> impl Strategy<Value = Vec<Reviewer>> {
        proptest::collection::hash_map("[a-z]{1,6}", 0u64..5000, 1..10).prop_map(|m| {
            m.into_iter()
                .map(|(name, workload)| Reviewer::new(name.clone(), workload, name))
                .collect()
        })
    }

    proptest! {
        /// Property: after any assignment the pool minimum is below the threshold.
        #[test]
        fn minimum_below_threshold_after_assign(p in arb_pool(), score in 0u64..10_000) {
            let assignment = plan_assignment(p, score, None, REBALANCE_THRESHOLD).unwrap();
            prop_assert!(min_workload(&assignment.pool).unwrap() < REBALANCE_THRESHOLD);
        }

        /// Property: rebalancing preserves the ranking of reviewers.
        #[test]
        fn rebalance_preserves_order(mut p in arb_pool()) {
            sort_by_workload(&mut p);
            let before: Vec<String> = p.iter().map(|r| r.name.clone()).collect();
            let gaps_before: Vec<u64> = p.windows(2).map(|w| w[1].workload - w[0].workload).collect();

            rebalance(&mut p, REBALANCE_THRESHOLD);

            let after: Vec<String> = p.iter().map(|r| r.name.clone()).collect();
            let gaps_after: Vec<u64> = p.windows(2).map(|w| w[1].workload - w[0].workload).collect();
            prop_assert_eq!(before, after);
            prop_assert_eq!(gaps_before, gaps_after);
        }

        /// Property: the excluded least-loaded reviewer is never chosen while
        /// someone else is available.
        #[test]
        fn excluded_reviewer_never_assigned(p in arb_pool(), score in 0u64..10_000) {
            prop_assume!(p.len() >= 2);
            let mut sorted = p.clone();
            sort_by_workload(&mut sorted);
            let least_loaded = sorted[0].name.clone();

            let assignment = plan_assignment(p, score, Some(&least_loaded), REBALANCE_THRESHOLD).unwrap();
            prop_assert_ne!(assignment.assignee.name, least_loaded);
        }

        /// Property: the assignee had the minimum workload among eligible
        /// reviewers, and exactly the score (less any rebalancing) was added.
        #[test]
        fn assignee_was_least_loaded(p in arb_pool(), score in 0u64..10_000) {
            let before_total: u64 = p.iter().map(|r| r.workload).sum();
            let min_before = min_workload(&p).unwrap();
            let n = p.len() as u64;

            let assignment = plan_assignment(p, score, None, REBALANCE_THRESHOLD).unwrap();
            prop_assert_eq!(assignment.assignee.workload, min_before);

            let after_total: u64 = assignment.pool.iter().map(|r| r.workload).sum();
            prop_assert_eq!((before_total + score - after_total) % (n * REBALANCE_THRESHOLD), 0);
        }
    }
}
