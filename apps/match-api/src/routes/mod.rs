pub mod health;

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::matching::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // View lifecycle
        .route("/api/v1/views", post(handlers::handle_open_view))
        .route(
            "/api/v1/views/:view_id",
            delete(handlers::handle_close_view),
        )
        // Match reports
        .route(
            "/api/v1/views/:view_id/match-reports",
            get(handlers::handle_list_reports),
        )
        .route(
            "/api/v1/views/:view_id/match-reports/:job_id",
            get(handlers::handle_get_report),
        )
        .route(
            "/api/v1/views/:view_id/match-reports/:job_id/resolve",
            post(handlers::handle_resolve),
        )
        .route(
            "/api/v1/views/:view_id/match-reports/:job_id/vector",
            put(handlers::handle_patch_vector),
        )
        .route(
            "/api/v1/views/:view_id/vector-batch",
            post(handlers::handle_vector_batch),
        )
        // View-wide signals
        .route(
            "/api/v1/views/:view_id/active-jobs",
            post(handlers::handle_active_jobs),
        )
        .route(
            "/api/v1/views/:view_id/resume-changed",
            post(handlers::handle_resume_changed),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::resolution::testing::{vector, FakeBackend, Scripted};
    use crate::matching::views::ViewRegistry;
    use crate::score_client::{BackendFactory, LlmOutcome, ScoreBackend};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Vector-only backend: no LLM reports exist, vector score 64, batch scores for "a".
    struct FakeFactory;

    impl BackendFactory for FakeFactory {
        fn for_viewer(&self, _token: &str) -> Arc<dyn ScoreBackend> {
            let backend = FakeBackend::new(
                Scripted::Ok(LlmOutcome::NotFound),
                Scripted::Ok(vector(64.0)),
            );
            *backend.batch.lock() = HashMap::from([("a".to_string(), 12.0)]);
            Arc::new(backend)
        }
    }

    fn app() -> Router {
        build_router(AppState {
            views: ViewRegistry::new(Arc::new(FakeFactory), 8, Duration::from_secs(600)),
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer test-token");
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn open_view(app: &Router) -> String {
        let response = send(app, "POST", "/api/v1/views", None).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await["view_id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_open_view_requires_bearer_token() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/views")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_resolve_then_get() {
        let app = app();
        let view = open_view(&app).await;

        let missing = send(&app, "GET", &format!("/api/v1/views/{view}/match-reports/a"), None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let resolved = send(
            &app,
            "POST",
            &format!("/api/v1/views/{view}/match-reports/a/resolve"),
            None,
        )
        .await;
        assert_eq!(resolved.status(), StatusCode::OK);
        let body = json_body(resolved).await;
        assert_eq!(body["job_id"], "a");
        assert_eq!(body["score"], 64.0);
        assert_eq!(body["source"], "vector");
        assert_eq!(body["state"], "scored");
        assert_eq!(body["band"], "medium");
        assert_eq!(body["band_label"], "Good Match");
        assert_eq!(body["resolving"], false);

        let cached = send(&app, "GET", &format!("/api/v1/views/{view}/match-reports/a"), None).await;
        assert_eq!(cached.status(), StatusCode::OK);
        assert_eq!(json_body(cached).await["score"], 64.0);
    }

    #[tokio::test]
    async fn test_unknown_view_is_not_found() {
        let response = send(
            &app(),
            "POST",
            "/api/v1/views/00000000-0000-0000-0000-000000000000/match-reports/a/resolve",
            None,
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_view_rejects_other_viewers_token() {
        let app = app();
        let view = open_view(&app).await;

        let foreign = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/views/{view}/match-reports/a/resolve"))
                    .header(header::AUTHORIZATION, "Bearer someone-else")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

        let anonymous = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/views/{view}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let owner = send(&app, "GET", &format!("/api/v1/views/{view}/match-reports"), None).await;
        assert_eq!(owner.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_active_jobs_evicts_the_rest() {
        let app = app();
        let view = open_view(&app).await;
        for job in ["a", "b", "c"] {
            send(
                &app,
                "POST",
                &format!("/api/v1/views/{view}/match-reports/{job}/resolve"),
                None,
            )
            .await;
        }

        let response = send(
            &app,
            "POST",
            &format!("/api/v1/views/{view}/active-jobs"),
            Some(json!({ "job_ids": ["a", "c"] })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["dropped"], 1);
        assert_eq!(body["kept"], 2);

        let list = json_body(
            send(&app, "GET", &format!("/api/v1/views/{view}/match-reports"), None).await,
        )
        .await;
        let ids: Vec<&str> = list["reports"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["job_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_patch_vector_validates_and_applies() {
        let app = app();
        let view = open_view(&app).await;
        send(
            &app,
            "POST",
            &format!("/api/v1/views/{view}/match-reports/a/resolve"),
            None,
        )
        .await;

        let invalid = send(
            &app,
            "PUT",
            &format!("/api/v1/views/{view}/match-reports/a/vector"),
            Some(json!({ "score": 140.0, "confidence": "high" })),
        )
        .await;
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let patched = send(
            &app,
            "PUT",
            &format!("/api/v1/views/{view}/match-reports/a/vector"),
            Some(json!({ "score": 81.0, "confidence": "high" })),
        )
        .await;
        assert_eq!(patched.status(), StatusCode::OK);
        assert_eq!(json_body(patched).await["score"], 81.0);

        let absent = send(
            &app,
            "PUT",
            &format!("/api/v1/views/{view}/match-reports/zzz/vector"),
            Some(json!({ "score": 81.0, "confidence": "high" })),
        )
        .await;
        assert_eq!(absent.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_vector_batch_without_body_patches_cached_keys() {
        let app = app();
        let view = open_view(&app).await;
        send(
            &app,
            "POST",
            &format!("/api/v1/views/{view}/match-reports/a/resolve"),
            None,
        )
        .await;

        let response = send(&app, "POST", &format!("/api/v1/views/{view}/vector-batch"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["reports"][0]["score"], 12.0);
    }

    #[tokio::test]
    async fn test_resume_changed_refreshes_view() {
        let app = app();
        let view = open_view(&app).await;
        send(
            &app,
            "POST",
            &format!("/api/v1/views/{view}/match-reports/a/resolve"),
            None,
        )
        .await;

        let response = send(&app, "POST", &format!("/api/v1/views/{view}/resume-changed"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["reports"][0]["job_id"], "a");
    }

    #[tokio::test]
    async fn test_close_view() {
        let app = app();
        let view = open_view(&app).await;

        let closed = send(&app, "DELETE", &format!("/api/v1/views/{view}"), None).await;
        assert_eq!(closed.status(), StatusCode::NO_CONTENT);

        let gone = send(&app, "GET", &format!("/api/v1/views/{view}/match-reports"), None).await;
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }
}
