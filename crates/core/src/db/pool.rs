//! Bounded SQLite connection pool.
//!
//! Connections are handed to blocking closures on the tokio blocking pool.
//! A semaphore bounds how many are checked out at once; idle connections are
//! recycled once they exceed `max_lifetime` or fail a `SELECT 1` probe.
//! Cancelling the caller's [`Context`] aborts the wait for a connection and
//! interrupts whatever statement is running on it.

use crate::config::DatabaseConfig;
use crate::context::Context;
use crate::db::schema;
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use rusqlite::{Connection, InterruptHandle};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

/// Shared handle to the pool. Cloning is cheap.
#[derive(Clone)]
pub struct Db {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: DatabaseConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Slot>>,
}

struct Slot {
    conn: Option<Connection>,
    opened_at: Instant,
}

impl Slot {
    fn empty() -> Self {
        Self {
            conn: None,
            opened_at: Instant::now(),
        }
    }

    /// Returns a live connection, reopening it when expired or broken.
    fn connection(&mut self, config: &DatabaseConfig) -> StoreResult<&mut Connection> {
        // A private in-memory database lives and dies with its connection.
        if !config.is_in_memory() {
            let expired = config
                .max_lifetime()
                .is_some_and(|limit| self.opened_at.elapsed() >= limit);
            let stale = match &self.conn {
                Some(conn) => expired || !is_healthy(conn),
                None => false,
            };
            if stale {
                debug!(expired, "recycling sqlite connection");
                self.conn = None;
            }
        }

        if self.conn.is_none() {
            self.conn = Some(open_connection(config)?);
            self.opened_at = Instant::now();
        }

        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Internal("connection slot is empty".into()))
    }
}

fn is_healthy(conn: &Connection) -> bool {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
}

fn open_connection(config: &DatabaseConfig) -> StoreResult<Connection> {
    let mut conn = if config.is_in_memory() {
        Connection::open_in_memory()?
    } else {
        Connection::open(&config.path)?
    };

    conn.busy_timeout(config.busy_timeout())?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    if !config.is_in_memory() {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(%mode, "sqlite refused WAL journal mode");
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }

    schema::init_schema(&mut conn)?;
    Ok(conn)
}

impl Db {
    /// Open the pool and eagerly create `min_connections` connections.
    #[instrument(skip(config), fields(path = %config.path.display()))]
    pub fn open(config: DatabaseConfig) -> StoreResult<Self> {
        let mut config = config;
        if config.is_in_memory() {
            config.min_connections = 1;
            config.max_connections = 1;
        }
        let max = config.max_connections.max(1);
        let min = config.min_connections.clamp(1, max);

        let mut idle = Vec::with_capacity(max);
        for _ in 0..min {
            idle.push(Slot {
                conn: Some(open_connection(&config)?),
                opened_at: Instant::now(),
            });
        }
        debug!(min, max, "sqlite pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                permits: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(idle),
            }),
        })
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::open(DatabaseConfig::in_memory())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Connections currently free to check out.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Run `f` on a pooled connection inside the blocking thread pool.
    ///
    /// Returns [`StoreError::Cancelled`] if `cx` is cancelled while waiting
    /// for a connection. Cancelling while `f` runs interrupts the current
    /// statement; any open transaction is rolled back when it is dropped.
    pub async fn run<F, R>(&self, cx: &Context, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Connection) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        if cx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let permit = tokio::select! {
            biased;
            _ = cx.cancelled() => return Err(StoreError::Cancelled),
            permit = self.inner.permits.clone().acquire_owned() => permit
                .map_err(|_| StoreError::Internal("connection pool closed".into()))?,
        };

        let inner = self.inner.clone();
        let cancel = cx.cancellation_token().clone();
        let interrupt: Arc<Mutex<Option<InterruptHandle>>> = Arc::default();
        let registered = interrupt.clone();

        let mut task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut slot = inner.idle.lock().pop().unwrap_or_else(Slot::empty);
            let result = match slot.connection(&inner.config) {
                Ok(conn) => {
                    *registered.lock() = Some(conn.get_interrupt_handle());
                    if cancel.is_cancelled() {
                        Err(StoreError::Cancelled)
                    } else {
                        f(conn)
                    }
                }
                Err(e) => Err(e),
            };
            registered.lock().take();
            inner.idle.lock().push(slot);
            result
        });

        tokio::select! {
            joined = &mut task => joined?,
            _ = cx.cancelled() => {
                {
                    let handle = interrupt.lock();
                    if let Some(handle) = handle.as_ref() {
                        handle.interrupt();
                    }
                }
                // The closure owns the connection; wait for it to hand it back.
                task.await?
            }
        }
    }
}
