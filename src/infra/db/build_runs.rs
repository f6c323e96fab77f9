use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    application::repos::{BuildRunsRepo, RepoError},
    domain::{
        entities::BuildRunRecord,
        types::{BuildStatus, BuildTrigger},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct BuildRunRow {
    id: Uuid,
    requested_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    status: BuildStatus,
    build_dir: String,
    trigger: BuildTrigger,
    detail: Option<String>,
}

impl From<BuildRunRow> for BuildRunRecord {
    fn from(row: BuildRunRow) -> Self {
        Self {
            id: row.id,
            requested_at: row.requested_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            status: row.status,
            build_dir: row.build_dir,
            trigger: row.trigger,
            detail: row.detail,
        }
    }
}

#[async_trait]
impl BuildRunsRepo for PostgresRepositories {
    async fn create_run(&self, trigger: BuildTrigger) -> Result<Uuid, RepoError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO build_runs (id, status, "trigger")
            VALUES ($1, 'pending', $2)
            "#,
        )
        .bind(id)
        .bind(trigger)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(id)
    }

    async fn mark_running(&self, id: Uuid, build_dir: &str) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE build_runs
            SET status = 'running', started_at = now(), build_dir = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(build_dir)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn mark_finished(
        &self,
        id: Uuid,
        status: BuildStatus,
        detail: Option<&str>,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE build_runs
            SET status = $2, finished_at = now(), detail = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(detail)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn find_run(&self, id: Uuid) -> Result<Option<BuildRunRecord>, RepoError> {
        let row = sqlx::query_as::<_, BuildRunRow>(
            r#"
            SELECT id, requested_at, started_at, finished_at, status, build_dir, "trigger", detail
            FROM build_runs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn recent_runs(&self, limit: i64) -> Result<Vec<BuildRunRecord>, RepoError> {
        let rows = sqlx::query_as::<_, BuildRunRow>(
            r#"
            SELECT id, requested_at, started_at, finished_at, status, build_dir, "trigger", detail
            FROM build_runs
            ORDER BY requested_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
