//! Event intake server.

mod events;
mod survey;

pub use survey::{DEFAULT_SURVEY_COOKIE, SurveyConfig, survey_cache_bypass};

use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use crate::infra::db::PostgresRepositories;

#[derive(Clone)]
pub struct HttpState {
    pub repositories: Arc<PostgresRepositories>,
}

pub fn build_router(state: HttpState, survey: SurveyConfig) -> Router {
    Router::new()
        .route("/events/page-published", post(events::page_published))
        .route("/events/page-unpublished", post(events::page_unpublished))
        .route("/builds", post(events::manual_build))
        .route("/builds/recent", get(events::recent_builds))
        .route("/builds/{id}", get(events::build_by_id))
        .layer(from_fn_with_state(survey, survey_cache_bypass))
        .with_state(state)
}
