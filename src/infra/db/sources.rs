use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    application::repos::{IngestionSourcesRepo, RepoError},
    domain::{entities::IngestionSourceRecord, types::SourceKind},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    label: String,
    feed_url: String,
    kind: SourceKind,
    enabled: bool,
    last_sync: Option<DateTime<Utc>>,
}

impl From<SourceRow> for IngestionSourceRecord {
    fn from(row: SourceRow) -> Self {
        Self {
            id: row.id,
            label: row.label,
            feed_url: row.feed_url,
            kind: row.kind,
            enabled: row.enabled,
            last_sync: row.last_sync,
        }
    }
}

#[async_trait]
impl IngestionSourcesRepo for PostgresRepositories {
    async fn list_enabled(
        &self,
        kind: SourceKind,
    ) -> Result<Vec<IngestionSourceRecord>, RepoError> {
        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, label, feed_url, kind, enabled, last_sync
            FROM ingestion_sources
            WHERE kind = $1 AND enabled
            ORDER BY label
            "#,
        )
        .bind(kind)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
