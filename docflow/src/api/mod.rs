//! HTTP API layer mapping engine operations onto routes.

mod documents;
mod workflow;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{self, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use docflow_core::{
    auth::IdentityResolver,
    events::Event,
    permissions::Capability,
    workflow::Action,
    Caller, Engine, Error, Role,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;
use uuid::Uuid;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub resolver: Option<Arc<dyn IdentityResolver>>,
}

/// Caller identity extracted from request headers.
#[derive(Clone, Debug)]
pub struct AuthContext(pub Caller);

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        if let (Some(resolver), Some(auth)) = (
            &state.resolver,
            headers.get("Authorization").and_then(|v| v.to_str().ok()),
        ) {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                if let Some(caller) = resolver.resolve(token).await {
                    return Ok(Self(caller));
                }
            }
        }
        let user = headers.get("X-User-Id").and_then(|v| v.to_str().ok());
        let role = headers
            .get("X-Role")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Role>().ok());
        match (user, role) {
            (Some(user_id), Some(role)) if !user_id.trim().is_empty() => {
                Ok(Self(Caller::new(user_id.trim(), role)))
            }
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_actions: Option<Vec<Action>>,
}

/// Engine error rendered as a JSON response.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, code, field, available_actions) = match self.0 {
            Error::Validation { field, .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION", Some(field), None)
            }
            Error::PermissionDenied(_) => (StatusCode::FORBIDDEN, "PERMISSION_DENIED", None, None),
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", None, None),
            Error::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", None, None),
            Error::WorkflowState { available, .. } => {
                (StatusCode::CONFLICT, "WORKFLOW_STATE", None, Some(available))
            }
            Error::Storage(_) | Error::Search(_) => {
                error!(error = %message, "engine failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", None, None)
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: message,
                code,
                field,
                available_actions,
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(documents::routes())
        .merge(workflow::routes())
        .route("/events", get(event_stream))
        .route("/health", get(|| async { "OK" }))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &value {
        req.headers_mut().insert("X-Request-ID", value.clone());
    }
    let mut response = next.run(req).await;
    if let Some(value) = value {
        response.headers_mut().insert("X-Request-ID", value);
    }
    response
}

/// Whether `caller` may observe `event`.
async fn visible(engine: &Engine, caller: &Caller, event: &Event) -> bool {
    if caller.role.is_admin() {
        return true;
    }
    if let Event::DocumentDeleted { .. } = event {
        return false;
    }
    if let Some(id) = event.document_id() {
        return engine.permissions.can(id, caller.role, Capability::Read).await;
    }
    if let Some(id) = event.request_id() {
        return engine.workflow.get(id, caller).await.is_ok();
    }
    false
}

async fn event_stream(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let rx = state.engine.events.subscribe();
    let engine = state.engine.clone();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(move |res| {
        let engine = engine.clone();
        let caller = caller.clone();
        async move {
            let event = res.ok()?;
            if !visible(&engine, &caller, &event).await {
                return None;
            }
            let data = serde_json::to_string(&event).ok()?;
            Some(Ok(sse::Event::default().data(data)))
        }
    });
    Sse::new(stream)
}
