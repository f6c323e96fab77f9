//! Shared lock table backing the single-flight build lock.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::application::lock::{LockError, LockStore};

pub struct PostgresLockStore {
    pool: PgPool,
}

impl PostgresLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PostgresLockStore {
    async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        // Insert wins; the upsert only fires when the previous holder's
        // TTL has lapsed, making steal-after-expiry atomic.
        let result = sqlx::query(
            r#"
            INSERT INTO kv_locks (key, owner, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
            SET owner = EXCLUDED.owner, expires_at = EXCLUDED.expires_at
            WHERE kv_locks.expires_at <= now()
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|err| LockError::Store(err.to_string()))?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError> {
        sqlx::query("DELETE FROM kv_locks WHERE key = $1 AND owner = $2")
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|err| LockError::Store(err.to_string()))?;
        Ok(())
    }
}
