pub mod balancer;
pub mod reviewer;
pub mod score;
pub mod store;

pub use balancer::{
    plan_assignment, rebalance, Assignment, BalancerError, ReviewerBalancer, REBALANCE_THRESHOLD,
};
pub use reviewer::Reviewer;
pub use score::{score, ChangeSize};
pub use store::{InMemoryStore, ReviewerStore, SqliteStore, StoreError};
