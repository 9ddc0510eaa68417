//! Run lifecycle: one agent execution's state machine plus its cost and
//! token accounting.

pub mod domain;
pub(crate) mod sqlite;
pub mod store;

pub use domain::{NewRun, Run, RunCompletion, RunProgress, RunStatus};
pub use store::RunStore;
