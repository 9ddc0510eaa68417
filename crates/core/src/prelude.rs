//! Commonly-used types for embedding the store
//!
//! ```no_run
//! use runledger_core::prelude::*;
//!
//! # async fn demo() -> StoreResult<()> {
//! let store = SqliteStore::in_memory()?;
//! let cx = Context::new(TenantId::new());
//! let project = store.create_project(&cx, ProjectFields::named("demo")).await?;
//! # let _ = project;
//! # Ok(())
//! # }
//! ```

// Storage
pub use crate::config::RunledgerConfig;
pub use crate::context::Context;
pub use crate::error::{StoreError, StoreResult};
pub use crate::ids::*;
pub use crate::storage::SqliteStore;

// Store traits
pub use crate::concurrency::RefreshTokenStore;
pub use crate::entities::{
    BranchRuleRepository, FeatureRepository, MilestoneRepository, ProjectFields,
    ProjectRepository, RoadmapRepository,
};
pub use crate::events::{AuditStore, EventStore};
pub use crate::plan::PlanStore;
pub use crate::review::ReviewStore;
pub use crate::run::RunStore;

// Coordination
pub use crate::concurrency::ProcessPool;
pub use crate::events::TrajectoryRecorder;
pub use crate::plan::{RunDispatcher, Scheduler};
pub use crate::review::{ReviewEngine, ReviewPlanBuilder};
