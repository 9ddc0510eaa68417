//! Review policies: commit-threshold, cron and branch-pattern triggers that
//! start code reviews.

pub mod domain;
pub mod engine;
pub(crate) mod sqlite;
pub mod store;

pub use domain::{
    CommitOutcome, CounterOutcome, NewReview, PolicyTrigger, Review, ReviewPolicy, ReviewPolicyFields,
    ReviewStatus, TriggerType,
};
pub use engine::{ReviewEngine, ReviewPlanBuilder};
pub use store::ReviewStore;
