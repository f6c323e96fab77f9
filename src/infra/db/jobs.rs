use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    application::repos::{JobsRepo, RepoError},
    domain::types::JobType,
};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl JobsRepo for PostgresRepositories {
    async fn enqueue_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<String, RepoError> {
        let id: String = sqlx::query_scalar(
            r#"
            SELECT (apalis.push_job($1, $2::json, $3, $4, $5, $6)).id
            "#,
        )
        .bind(job_type.as_str())
        .bind(payload)
        .bind("Pending")
        .bind(run_at)
        .bind(max_attempts)
        .bind(0i32)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(id)
    }
}
