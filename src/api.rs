use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::auth::{validate_bearer_token, BearerToken};
use crate::db::DirectoryStore;
use crate::error::AppError;
use crate::metrics;
use crate::schema::SchemaHandle;

/// Middleware to add request ID to all requests
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    request.extensions_mut().insert(request_id);

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        uri = %request.uri()
    );

    async move { next.run(request).await }
        .instrument(span)
        .await
}

/// Shared with the LDAP listeners, so a schema reload here is seen by the
/// next search on any connection.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn DirectoryStore>,
    pub schema: SchemaHandle,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Serialize)]
struct HealthStatus {
    status: String,
    storage: bool,
    timestamp: String,
}

#[derive(Serialize)]
struct SchemaSummary {
    syntaxes: usize,
    matching_rules: usize,
    attribute_types: usize,
    object_classes: usize,
}

// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Schema(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Storage(_) | AppError::Redis(_) | AppError::Pool(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage unavailable".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

// Health check
async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let healthy = match state.store.health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            error!("Storage health check failed: {}", e);
            false
        }
    };

    let health = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        storage: healthy,
        timestamp: Utc::now().to_rfc3339(),
    };

    let http_status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (http_status, Json(ApiResponse::success(health)))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

/// Rebuild the schema catalog from storage and swap it in atomically.
async fn reload_schema(State(state): State<ApiState>) -> Result<impl IntoResponse, AppError> {
    state.schema.reload(state.store.as_ref()).await?;
    let catalog = state.schema.current();
    info!(event = "schema_reloaded", "Schema reloaded through admin API");

    Ok(Json(ApiResponse::success(SchemaSummary {
        syntaxes: catalog.syntaxes().len(),
        matching_rules: catalog.matching_rules().len(),
        attribute_types: catalog.attribute_types().len(),
        object_classes: catalog.object_classes().len(),
    })))
}

/// Create the API router; admin routes require the bearer token.
pub fn create_router(state: ApiState, bearer_token: BearerToken) -> Router {
    let protected_routes = Router::new()
        .route("/admin/schema/reload", post(reload_schema))
        .layer(middleware::from_fn_with_state(
            bearer_token,
            validate_bearer_token,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .merge(protected_routes)
        .layer(middleware::from_fn(add_request_id))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .with_state(state)
}
