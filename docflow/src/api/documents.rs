use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use docflow_core::{
    activity::DocumentMetrics,
    catalog::{
        CatalogStats, Category, DocumentPatch, DocumentView, Label, ListFilters, NewDocument,
        NewLabel, Page, Pager, Sort, SortKey, SortOrder,
    },
    permissions::PermissionRow,
    versions::{Consistency, DocumentVersion},
    Error,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiResult, AppState, AuthContext};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/documents", get(list_documents).post(create_document))
        .route(
            "/documents/{id}",
            get(get_document).put(update_document).delete(delete_document),
        )
        .route(
            "/documents/{id}/favorite",
            post(favorite_document).delete(unfavorite_document),
        )
        .route("/documents/{id}/share", post(share_document))
        .route(
            "/documents/{id}/permissions",
            get(get_permissions).put(set_permissions),
        )
        .route("/documents/{id}/versions", get(list_versions))
        .route("/documents/{id}/versions/verify", get(verify_versions))
        .route("/documents/{id}/versions/{n}", get(get_version))
        .route("/documents/{id}/metrics", get(document_metrics))
        .route("/documents/{id}/views", post(record_view))
        .route("/labels", get(list_labels).post(create_label))
        .route("/favorites", get(list_favorites))
        .route("/stats", get(catalog_stats))
}

#[derive(Deserialize)]
struct ListQuery {
    category: Option<Category>,
    search: Option<String>,
    /// Comma separated label names.
    labels: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
    #[serde(rename = "sortBy", alias = "sort_by")]
    sort_by: Option<SortKey>,
    #[serde(rename = "sortOrder", alias = "sort_order")]
    sort_order: Option<SortOrder>,
}

#[derive(Deserialize)]
struct ShareRequest {
    recipient: String,
}

#[derive(Deserialize)]
struct ViewRequest {
    session_duration: Option<u32>,
}

async fn list_documents(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Page>> {
    let filters = ListFilters {
        category: q.category,
        search: q.search.filter(|s| !s.trim().is_empty()),
        labels: q
            .labels
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
    };
    let pager = Pager::new(q.page, q.limit)?;
    let sort = Sort {
        key: q.sort_by.unwrap_or_default(),
        order: q.sort_order.unwrap_or_default(),
    };
    let page = state.engine.catalog.list(&caller, &filters, pager, sort).await?;
    Ok(Json(page))
}

async fn create_document(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Json(req): Json<NewDocument>,
) -> ApiResult<(StatusCode, Json<DocumentView>)> {
    let view = state.engine.catalog.create(req, &caller).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_document(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DocumentView>> {
    Ok(Json(state.engine.catalog.get(id, &caller).await?))
}

async fn update_document(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
    Json(patch): Json<DocumentPatch>,
) -> ApiResult<Json<DocumentView>> {
    Ok(Json(state.engine.catalog.update(id, patch, &caller).await?))
}

async fn delete_document(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.catalog.delete(id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn favorite_document(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.catalog.favorite(id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unfavorite_document(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.catalog.unfavorite(id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_favorites(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
) -> Json<Vec<DocumentView>> {
    Json(state.engine.catalog.list_favorites(&caller).await)
}

async fn share_document(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ShareRequest>,
) -> ApiResult<StatusCode> {
    state.engine.catalog.share(id, &caller, &req.recipient).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_permissions(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<PermissionRow>>> {
    Ok(Json(state.engine.permissions.permissions(id, &caller).await?))
}

async fn set_permissions(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
    Json(rows): Json<Vec<PermissionRow>>,
) -> ApiResult<StatusCode> {
    state.engine.permissions.set_permissions(id, rows, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_versions(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<DocumentVersion>>> {
    Ok(Json(state.engine.versions.history(id, &caller).await?))
}

async fn get_version(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path((id, n)): Path<(Uuid, u64)>,
) -> ApiResult<Json<DocumentVersion>> {
    Ok(Json(state.engine.versions.version(id, n, &caller).await?))
}

async fn verify_versions(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Consistency>> {
    if !caller.role.is_admin() {
        return Err(Error::denied("only admins may verify version history").into());
    }
    Ok(Json(state.engine.versions.verify(id).await?))
}

async fn document_metrics(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DocumentMetrics>> {
    Ok(Json(state.engine.activity.metrics(id, &caller).await?))
}

async fn record_view(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ViewRequest>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .activity
        .record_view(id, &caller, req.session_duration)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_labels(State(state): State<AppState>, _auth: AuthContext) -> Json<Vec<Label>> {
    Json(state.engine.catalog.list_labels().await)
}

async fn create_label(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
    Json(req): Json<NewLabel>,
) -> ApiResult<(StatusCode, Json<Label>)> {
    let label = state.engine.catalog.create_label(req, &caller).await?;
    Ok((StatusCode::CREATED, Json(label)))
}

async fn catalog_stats(
    State(state): State<AppState>,
    AuthContext(caller): AuthContext,
) -> ApiResult<Json<CatalogStats>> {
    Ok(Json(state.engine.catalog.stats(&caller).await?))
}
