//! SQLite plumbing: connection pool, schema and shared query helpers.

pub mod pool;
pub mod schema;
pub(crate) mod util;

pub use pool::Db;
pub use schema::init_schema;
