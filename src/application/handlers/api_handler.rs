use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::services::orchestrator::{Action, PipelineOrchestrator};
use crate::domain::errors::{ErrorBody, PipelineError};
use crate::rate_limit::{rate_limit_middleware, GlobalRateLimiter};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Action selector, from the query string or a JSON body
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ActionParams {
    pub action: Option<String>,
    pub category: Option<String>,
}

impl ActionParams {
    /// Body fields win over query fields
    fn merge(self, body: ActionParams) -> ActionParams {
        ActionParams {
            action: body.action.or(self.action),
            category: body.category.or(self.category),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub request_id: String,
    pub action: Action,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SuccessEnvelope {
    pub success: bool,
    pub data: Value,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
}

/// HTTP status for a failed request: 429 for the inbound throttle, 503 when
/// the caller may retry, 500 otherwise
pub fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        e if e.retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(error: &PipelineError, request_id: impl Into<String>) -> Response {
    let envelope = ErrorEnvelope {
        success: false,
        error: ErrorBody::from_error(error, request_id),
    };
    (status_for(error), Json(envelope)).into_response()
}

pub type AppState = Arc<PipelineOrchestrator>;

/// Build the public router
pub fn router(orchestrator: AppState, limiter: GlobalRateLimiter) -> Router {
    Router::new()
        .route(
            "/",
            get(handle_get).post(handle_post).options(handle_options),
        )
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// `GET /?action=...&category=...`
pub async fn handle_get(
    State(orchestrator): State<AppState>,
    Query(params): Query<ActionParams>,
) -> Response {
    dispatch(&orchestrator, params).await
}

/// `POST /` with an optional JSON body; query parameters fill the gaps
pub async fn handle_post(
    State(orchestrator): State<AppState>,
    Query(query): Query<ActionParams>,
    body: Bytes,
) -> Response {
    let params = if body.iter().all(|b| b.is_ascii_whitespace()) {
        query
    } else {
        match serde_json::from_slice::<ActionParams>(&body) {
            Ok(parsed) => query.merge(parsed),
            Err(e) => {
                let error = PipelineError::Validation(format!("Invalid JSON body: {}", e));
                return error_response(&error, Uuid::new_v4().to_string());
            }
        }
    };
    dispatch(&orchestrator, params).await
}

/// Pre-flight without CORS request headers
pub async fn handle_options() -> StatusCode {
    StatusCode::OK
}

async fn dispatch(orchestrator: &PipelineOrchestrator, params: ActionParams) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    let action = match params.action.as_deref() {
        Some(raw) => match raw.parse::<Action>() {
            Ok(action) => action,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Rejected request");
                return error_response(&e, request_id);
            }
        },
        None => {
            let e = PipelineError::Validation("Missing 'action' parameter".to_string());
            warn!(request_id = %request_id, "Rejected request without action");
            return error_response(&e, request_id);
        }
    };

    match orchestrator
        .handle(action, params.category.as_deref())
        .await
    {
        Ok(data) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            info!(
                request_id = %request_id,
                action = action.as_str(),
                duration_ms,
                "Request completed"
            );
            Json(SuccessEnvelope {
                success: true,
                data,
                meta: ResponseMeta {
                    request_id,
                    action,
                    duration_ms,
                },
            })
            .into_response()
        }
        Err(e) => {
            error!(
                request_id = %request_id,
                action = action.as_str(),
                code = e.code(),
                error = %e,
                "Request failed"
            );
            error_response(&e, request_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::test_support::MemoryCatalogStore;
    use crate::config::PipelineConfig;
    use crate::rate_limit::create_rate_limiter;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn app(requests_per_minute: u32) -> Router {
        let orchestrator = PipelineOrchestrator::new(
            PipelineConfig::default(),
            Arc::new(MemoryCatalogStore::default()),
        )
        .unwrap();
        router(Arc::new(orchestrator), create_rate_limiter(requests_per_minute))
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&PipelineError::network("connection reset")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&PipelineError::CircuitOpen {
                source_name: "catalog".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&PipelineError::Validation("bad".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&PipelineError::from_status(404)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&PipelineError::RateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_get_status_envelope() {
        let response = app(60)
            .oneshot(Request::get("/?action=status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["source"], "catalog");
        assert_eq!(body["meta"]["action"], "status");
    }

    #[tokio::test]
    async fn test_post_json_body() {
        let request = Request::post("/")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"action":"alerts"}"#))
            .unwrap();
        let response = app(60).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["generated"], 0);
    }

    #[tokio::test]
    async fn test_unknown_action_is_fatal() {
        let response = app(60)
            .oneshot(Request::get("/?action=drop").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["retryable"], false);
        assert!(body["error"]["requestId"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let request = Request::post("/").body(Body::from("{not json")).unwrap();
        let response = app(60).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_options_returns_ok_with_cors() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/")
            .header("origin", "https://dashboard.example.com")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = app(60).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_inbound_throttle() {
        let app = app(1);
        let first = app
            .clone()
            .oneshot(Request::get("/?action=status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(Request::get("/?action=status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(second).await;
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
        assert_eq!(body["error"]["retryable"], true);
    }
}
