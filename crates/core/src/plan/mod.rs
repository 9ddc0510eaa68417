//! Execution plans: a dependency graph of steps, each bound to one run.

pub mod dag;
pub mod domain;
pub mod scheduler;
pub(crate) mod sqlite;
pub mod store;

pub use dag::{DagError, DagNode, assign_rounds};
pub use domain::{
    ExecutionPlan, FailurePolicy, NewPlan, NewStep, PlanProtocol, PlanStatus, Step, StepStatus,
};
pub use scheduler::{DispatchError, DispatchReport, Dispatched, RunDispatcher, Scheduler};
pub use store::PlanStore;
