//! Single-use refresh tokens.
//!
//! Only the SHA-256 of a token is stored. Rotation deletes the presented
//! token and inserts its replacement in one write transaction, so of two
//! concurrent rotations of the same token exactly one finds the row.

use crate::context::Context;
use crate::db::util::{from_millis, now, to_millis, write_tx};
use crate::error::{StoreError, StoreResult};
use crate::ids::{TenantId, TokenId, UserId};
use crate::storage::SqliteStore;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: TokenId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A freshly minted token. `token` is the only copy of the plaintext.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub record: RefreshToken,
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn issue(&self, cx: &Context, user_id: UserId, ttl: Duration) -> StoreResult<IssuedToken>;

    /// Exchanges a valid token for a new one with a fresh `ttl`. Unknown,
    /// already rotated and expired tokens are all `NotFound`; an expired
    /// token is deleted on the way.
    async fn rotate(&self, cx: &Context, token: &str, ttl: Duration) -> StoreResult<IssuedToken>;

    async fn revoke(&self, cx: &Context, token: &str) -> StoreResult<()>;

    /// Returns how many tokens were removed.
    async fn revoke_all_for_user(&self, cx: &Context, user_id: UserId) -> StoreResult<usize>;
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn mint() -> String {
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    hex::encode(bytes)
}

fn token_not_found() -> StoreError {
    StoreError::not_found("refresh token", "<redacted>")
}

fn insert_token(
    conn: &Connection,
    tenant: TenantId,
    user_id: UserId,
    ttl: Duration,
) -> StoreResult<IssuedToken> {
    let token = mint();
    let created_at = now();
    let record = RefreshToken {
        id: TokenId::new(),
        tenant_id: tenant,
        user_id,
        expires_at: created_at + ttl,
        created_at,
    };
    conn.execute(
        "INSERT INTO refresh_tokens (public_id, tenant_id, user_id, token_hash, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id,
            tenant,
            user_id,
            hash_token(&token),
            to_millis(record.expires_at),
            record.created_at
        ],
    )?;
    Ok(IssuedToken { token, record })
}

fn validate_ttl(ttl: Duration) -> StoreResult<()> {
    if ttl <= Duration::ZERO {
        return Err(StoreError::Validation("token ttl must be positive".into()));
    }
    Ok(())
}

#[async_trait]
impl RefreshTokenStore for SqliteStore {
    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn issue(&self, cx: &Context, user_id: UserId, ttl: Duration) -> StoreResult<IssuedToken> {
        validate_ttl(ttl)?;
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| insert_token(conn, tenant, user_id, ttl))
            .await
    }

    #[instrument(skip(self, cx, token), fields(tenant = %cx.tenant()))]
    async fn rotate(&self, cx: &Context, token: &str, ttl: Duration) -> StoreResult<IssuedToken> {
        validate_ttl(ttl)?;
        let tenant = cx.tenant();
        let hash = hash_token(token);
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            let found: Option<(TokenId, UserId, i64)> = tx
                .query_row(
                    "SELECT public_id, user_id, expires_at FROM refresh_tokens
                     WHERE token_hash = ?1 AND tenant_id = ?2",
                    params![hash, tenant],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((id, user_id, expires_at)) = found else {
                return Err(token_not_found());
            };
            tx.execute("DELETE FROM refresh_tokens WHERE public_id = ?1", params![id])?;

            if from_millis(expires_at)? <= now() {
                tx.commit()?;
                warn!(token_id = %id, "expired refresh token presented");
                return Err(token_not_found());
            }

            let issued = insert_token(&tx, tenant, user_id, ttl)?;
            tx.commit()?;
            debug!(old = %id, new = %issued.record.id, "refresh token rotated");
            Ok(issued)
        })
        .await
    }

    #[instrument(skip(self, cx, token), fields(tenant = %cx.tenant()))]
    async fn revoke(&self, cx: &Context, token: &str) -> StoreResult<()> {
        let tenant = cx.tenant();
        let hash = hash_token(token);
        self.run_blocking(cx, move |conn| {
            let deleted = conn.execute(
                "DELETE FROM refresh_tokens WHERE token_hash = ?1 AND tenant_id = ?2",
                params![hash, tenant],
            )?;
            if deleted == 0 {
                return Err(token_not_found());
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn revoke_all_for_user(&self, cx: &Context, user_id: UserId) -> StoreResult<usize> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            Ok(conn.execute(
                "DELETE FROM refresh_tokens WHERE user_id = ?1 AND tenant_id = ?2",
                params![user_id, tenant],
            )?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_hash_is_sha256_hex() {
        let token = mint();
        assert_eq!(token.len(), 64);
        let hash = hash_token(&token);
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, token);
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn rotation_is_single_use() {
        let store = SqliteStore::in_memory().unwrap();
        let cx = Context::new(TenantId::new());
        let user = UserId::new();
        let first = store.issue(&cx, user, Duration::hours(1)).await.unwrap();

        let second = store
            .rotate(&cx, &first.token, Duration::hours(1))
            .await
            .unwrap();
        assert_ne!(second.token, first.token);
        assert_eq!(second.record.user_id, user);

        let reused = store
            .rotate(&cx, &first.token, Duration::hours(1))
            .await
            .unwrap_err();
        assert!(reused.is_not_found());

        let other = Context::new(TenantId::new());
        assert!(
            store
                .rotate(&other, &second.token, Duration::hours(1))
                .await
                .unwrap_err()
                .is_not_found()
        );

        store.revoke(&cx, &second.token).await.unwrap();
        assert!(store.revoke(&cx, &second.token).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn expired_tokens_are_removed_on_rotation() {
        let store = SqliteStore::in_memory().unwrap();
        let cx = Context::new(TenantId::new());
        let user = UserId::new();
        let stale = store
            .issue(&cx, user, Duration::milliseconds(1))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let err = store
            .rotate(&cx, &stale.token, Duration::hours(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        // Gone, not merely rejected.
        assert!(store.revoke(&cx, &stale.token).await.unwrap_err().is_not_found());

        store.issue(&cx, user, Duration::hours(1)).await.unwrap();
        store.issue(&cx, user, Duration::hours(1)).await.unwrap();
        assert_eq!(store.revoke_all_for_user(&cx, user).await.unwrap(), 2);
        assert!(
            store
                .issue(&cx, user, Duration::ZERO)
                .await
                .unwrap_err()
                .is_validation()
        );
    }
}
