//! Publish/unpublish intake.
//!
//! The CMS posts an event here whenever a page's live state changes;
//! each event becomes one durable build job. Coalescing is left to the
//! build lock: overlapping jobs resolve to one bake plus skipped runs.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    application::jobs::enqueue_build_job,
    application::repos::BuildRunsRepo,
    domain::types::BuildTrigger,
};

use super::HttpState;

#[derive(Debug, Deserialize)]
pub struct PageEventPayload {
    /// Site-relative path of the affected page, when the CMS knows it.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ManualBuildPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct EnqueuedResponse {
    job_id: String,
}

async fn enqueue(state: &HttpState, trigger: BuildTrigger, reason: Option<String>) -> Response {
    match enqueue_build_job(state.repositories.as_ref(), trigger, reason).await {
        Ok(job_id) => {
            info!(
                target = "portalbake::http::events",
                trigger = trigger.as_str(),
                %job_id,
                "build job enqueued"
            );
            (StatusCode::ACCEPTED, Json(EnqueuedResponse { job_id })).into_response()
        }
        Err(err) => {
            error!(
                target = "portalbake::http::events",
                trigger = trigger.as_str(),
                error = %err,
                "failed to enqueue build job"
            );
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

pub async fn page_published(
    State(state): State<HttpState>,
    Json(payload): Json<PageEventPayload>,
) -> Response {
    enqueue(&state, BuildTrigger::Publish, payload.path).await
}

pub async fn page_unpublished(
    State(state): State<HttpState>,
    Json(payload): Json<PageEventPayload>,
) -> Response {
    enqueue(&state, BuildTrigger::Unpublish, payload.path).await
}

pub async fn manual_build(
    State(state): State<HttpState>,
    payload: Option<Json<ManualBuildPayload>>,
) -> Response {
    let reason = payload.and_then(|Json(p)| p.reason);
    enqueue(&state, BuildTrigger::Manual, reason).await
}

pub async fn build_by_id(State(state): State<HttpState>, Path(id): Path<Uuid>) -> Response {
    let repo: &dyn BuildRunsRepo = state.repositories.as_ref();
    match repo.find_run(id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(
                target = "portalbake::http::events",
                %id,
                error = %err,
                "failed to load build run"
            );
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

pub async fn recent_builds(State(state): State<HttpState>) -> Response {
    let repo: &dyn BuildRunsRepo = state.repositories.as_ref();
    match repo.recent_runs(20).await {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => {
            error!(
                target = "portalbake::http::events",
                error = %err,
                "failed to list recent builds"
            );
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
