//! Small helpers shared by the SQLite repositories.

use crate::error::{StoreError, StoreResult};
use crate::ids::TenantId;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::fmt::Display;
use time::OffsetDateTime;

pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Begin a transaction that takes the write lock up front.
///
/// Read-then-write sequences must not start as deferred readers, or two
/// writers can deadlock upgrading their locks.
pub(crate) fn write_tx(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

pub(crate) fn to_millis(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_millis(ms: i64) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Integer, Box::new(e))
    })
}

/// Whether a row with `public_id` exists for the tenant.
pub(crate) fn row_exists<I: ToSql>(
    conn: &Connection,
    table: &str,
    id: &I,
    tenant: TenantId,
) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!("SELECT 1 FROM {table} WHERE public_id = ?1 AND tenant_id = ?2"),
        params![id, tenant],
        |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
}

/// NotFound unless the tenant owns the row.
pub(crate) fn ensure_owned<I: ToSql + Display>(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    id: &I,
    tenant: TenantId,
) -> StoreResult<()> {
    if row_exists(conn, table, id, tenant)? {
        Ok(())
    } else {
        Err(StoreError::not_found(entity, id))
    }
}

/// Explain why a versioned write touched no rows.
pub(crate) fn stale_write<I: ToSql + Display>(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    id: &I,
    tenant: TenantId,
    expected_version: i64,
) -> StoreError {
    match row_exists(conn, table, id, tenant) {
        Ok(true) => StoreError::Conflict(format!(
            "{entity} {id} was modified concurrently (expected version {expected_version})"
        )),
        Ok(false) => StoreError::not_found(entity, id),
        Err(e) => e.into(),
    }
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a JSON column inside a row mapper.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
