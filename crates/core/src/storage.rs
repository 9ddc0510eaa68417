//! Unified SQLite storage.
//!
//! A single [`SqliteStore`] implements every store trait in the crate over
//! one connection pool, so callers can hand the same value to the scheduler,
//! the review engine and the trajectory recorder.

use crate::config::{EventsConfig, RunledgerConfig};
use crate::context::Context;
use crate::db::Db;
use crate::db::schema::TENANT_TABLES;
use crate::db::util::write_tx;
use crate::error::StoreResult;
use rusqlite::{Connection, params};
use tracing::{info, instrument};

#[derive(Clone)]
pub struct SqliteStore {
    db: Db,
    events: EventsConfig,
}

impl SqliteStore {
    pub fn open(config: &RunledgerConfig) -> StoreResult<Self> {
        Ok(Self::from_db(
            Db::open(config.database.clone())?,
            config.events,
        ))
    }

    /// Private in-memory database, mostly for tests and dry runs.
    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self::from_db(Db::in_memory()?, EventsConfig::default()))
    }

    pub fn from_db(db: Db, events: EventsConfig) -> Self {
        Self { db, events }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub(crate) fn events_config(&self) -> &EventsConfig {
        &self.events
    }

    pub(crate) async fn run_blocking<F, R>(&self, cx: &Context, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Connection) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.db.run(cx, f).await
    }

    /// Delete every row owned by the context's tenant in one transaction.
    ///
    /// Returns the number of rows removed across all tables.
    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    pub async fn purge_tenant(&self, cx: &Context) -> StoreResult<usize> {
        let tenant = cx.tenant();
        let removed = self
            .run_blocking(cx, move |conn| {
                let tx = write_tx(conn)?;
                let mut removed = 0;
                for table in TENANT_TABLES {
                    removed += tx.execute(
                        &format!("DELETE FROM {table} WHERE tenant_id = ?1"),
                        params![tenant],
                    )?;
                }
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        info!(removed, "tenant purged");
        Ok(removed)
    }
}
