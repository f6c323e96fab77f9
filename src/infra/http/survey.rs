//! Cache bypass for the task-completion survey cookie.
//!
//! Visitors without the survey cookie must reach the origin so the
//! cookie can be set; the `no-cache="Set-Cookie"` field tells the CDN
//! not to serve them a cached response that would skip it.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, header::{CACHE_CONTROL, COOKIE}},
    middleware::Next,
    response::Response,
};

pub const DEFAULT_SURVEY_COOKIE: &str = "dwf_task_completion_survey";

#[derive(Clone)]
pub struct SurveyConfig {
    pub cookie_name: String,
}

fn has_cookie(request: &Request<Body>, name: &str) -> bool {
    request
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .any(|pair| pair.trim().split('=').next() == Some(name))
}

pub async fn survey_cache_bypass(
    State(config): State<SurveyConfig>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let missing = !has_cookie(&request, &config.cookie_name);
    let mut response = next.run(request).await;
    if missing {
        response.headers_mut().insert(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache=\"Set-Cookie\""),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        let config = SurveyConfig {
            cookie_name: DEFAULT_SURVEY_COOKIE.to_string(),
        };
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(config, survey_cache_bypass))
    }

    #[tokio::test]
    async fn missing_cookie_disables_caching() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(CACHE_CONTROL).unwrap(),
            "no-cache=\"Set-Cookie\""
        );
    }

    #[tokio::test]
    async fn present_cookie_leaves_caching_alone() {
        let request = Request::builder()
            .uri("/")
            .header(COOKIE, format!("{DEFAULT_SURVEY_COOKIE}=seen; theme=dark"))
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert!(response.headers().get(CACHE_CONTROL).is_none());
    }

    #[tokio::test]
    async fn other_cookies_do_not_count() {
        let request = Request::builder()
            .uri("/")
            .header(COOKIE, "theme=dark")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get(CACHE_CONTROL).unwrap(),
            "no-cache=\"Set-Cookie\""
        );
    }
}
