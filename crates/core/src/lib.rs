//! Persistence and coordination core for multi-agent coding work: execution
//! plans and their scheduler, the run lifecycle, the append-only event
//! ledger, review policies and the versioned planning entities, all backed by
//! one tenant-scoped SQLite store.

mod macros;

pub mod error;
pub mod prelude;

pub mod config;
pub mod context;
pub mod db;
pub mod ids;
pub mod storage;

pub mod concurrency;
pub mod entities;
pub mod events;
pub mod plan;
pub mod review;
pub mod run;

pub use config::RunledgerConfig;
pub use context::Context;
pub use error::{ErrorKind, StoreError, StoreResult};
pub use storage::SqliteStore;
