use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    application::repos::{OutboxRepo, RepoError},
    domain::entities::OutboxRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    draft_id: Uuid,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            draft_id: row.draft_id,
            created_at: row.created_at,
            delivered_at: row.delivered_at,
        }
    }
}

#[async_trait]
impl OutboxRepo for PostgresRepositories {
    async fn list_undelivered(&self, limit: i64) -> Result<Vec<OutboxRecord>, RepoError> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, draft_id, created_at, delivered_at
            FROM notification_outbox
            WHERE delivered_at IS NULL
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_outbox
            SET delivered_at = $2
            WHERE id = $1 AND delivered_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
