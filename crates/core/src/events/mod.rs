//! Append-only event ledger: agent trajectories and the audit trail.
//!
//! Events are never updated or deleted in place. Each event is numbered
//! within its scope (the run when it has one, else its task, else its agent)
//! from a counter row reserved in the same transaction as the insert.

pub(crate) mod cursor;
pub mod domain;
pub mod recorder;
pub(crate) mod sqlite;
pub mod store;

pub use domain::*;
pub use recorder::TrajectoryRecorder;
pub use store::{AuditStore, EventStore};
