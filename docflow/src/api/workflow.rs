use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use docflow_core::workflow::{Action, NewRequest, PendingStep, RequestView, StepOutcome, StepSpec};
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiResult, AppState, AuthContext};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/requests", get(list_requests).post(create_request))
        .route("/requests/{id}", get(get_request))
        .route("/requests/{id}/actions", get(available_actions))
        .route("/requests/{id}/steps", post(add_steps))
        .route(
            "/requests/{id}/steps/{step_id}/complete",
            post(complete_step),
        )
        .route("/requests/{id}/documents", post(attach_document))
        .route("/requests/{id}/reject", post(reject_request))
        .route("/steps/pending", get(pending_steps))
}

#[derive(Deserialize)]
struct AddStepsRequest {
    steps: Vec<StepSpec>,
}

#[derive(Deserialize, Default)]
struct CompleteRequest {
    comment: Option<String>,
    #[serde(default)]
    outcome: StepOutcome,
}

#[derive(Deserialize)]
struct AttachRequest {
    document_id: Uuid,
}

#[derive(Deserialize, Default)]
struct RejectRequest {
    comment: Option<String>,
}

async fn create_request(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Json(req): Json<NewRequest>,
) -> ApiResult<(StatusCode, Json<RequestView>)> {
    let view = state.engine.workflow.create_request(req, &caller).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_requests(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
) -> Json<Vec<RequestView>> {
    Json(state.engine.workflow.list(&caller).await)
}

async fn get_request(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RequestView>> {
    Ok(Json(state.engine.workflow.get(id, &caller).await?))
}

async fn available_actions(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Action>>> {
    Ok(Json(state.engine.workflow.available_actions(id, &caller).await?))
}

async fn add_steps(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AddStepsRequest>,
) -> ApiResult<Json<RequestView>> {
    Ok(Json(state.engine.workflow.add_steps(id, req.steps, &caller).await?))
}

async fn complete_step(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path((id, step_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<CompleteRequest>>,
) -> ApiResult<Json<RequestView>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let view = state
        .engine
        .workflow
        .complete_step(id, step_id, &caller, req.comment, req.outcome)
        .await?;
    Ok(Json(view))
}

async fn attach_document(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AttachRequest>,
) -> ApiResult<Json<RequestView>> {
    Ok(Json(
        state
            .engine
            .workflow
            .attach_document(id, req.document_id, &caller)
            .await?,
    ))
}

async fn reject_request(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
    body: Option<Json<RejectRequest>>,
) -> ApiResult<Json<RequestView>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    Ok(Json(state.engine.workflow.reject(id, &caller, req.comment).await?))
}

async fn pending_steps(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
) -> Json<Vec<PendingStep>> {
    Json(state.engine.workflow.pending_steps(&caller).await)
}
