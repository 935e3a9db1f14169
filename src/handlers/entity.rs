//! Generic entity CRUD handlers: the model is resolved from the path, the
//! caller from the bearer token, and everything else is delegated to the
//! permission-checked service.

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::model::ModelDef;
use crate::service::csv_io;
use crate::service::search::{BulkDeleteResponse, DeleteResponse, SearchRequest, SearchResult, SearchQuery};
use crate::service::CrudService;
use crate::state::AppState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

fn resolve_model<'a>(state: &'a AppState, table: &str) -> Result<&'a ModelDef, AppError> {
    state
        .registry
        .get(table)
        .filter(|m| m.exposed)
        .ok_or_else(|| AppError::NotFound(table.to_string()))
}

fn parse_id(id: &str) -> Result<i64, AppError> {
    id.parse().map_err(|_| AppError::BadRequest("invalid id".into()))
}

fn body_to_map(value: Value) -> Result<HashMap<String, Value>, AppError> {
    match value {
        Value::Object(m) => Ok(m.into_iter().collect()),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: u64,
    pub limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForceFlag {
    #[serde(default)]
    pub force: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(pagination): Query<Pagination>,
    user: CurrentUser,
) -> Result<Json<Vec<Value>>, AppError> {
    let model = resolve_model(&state, &table)?;
    let rows = CrudService::get_all(
        &state.pool,
        &state.registry,
        model,
        &user,
        pagination.skip,
        pagination.limit,
    )
    .await?;
    Ok(Json(rows))
}

pub async fn read(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    user: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let model = resolve_model(&state, &table)?;
    let id = parse_id(&id)?;
    let row = CrudService::get_one(&state.pool, &state.registry, model, &user, id).await?;
    Ok(Json(row))
}

pub async fn create(
    State(state): State<AppState>,
    Path(table): Path<String>,
    user: CurrentUser,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let model = resolve_model(&state, &table)?;
    let mut body = body_to_map(body)?;
    crate::schema::generate::strip_non_create_fields(model, &mut body);
    let row = CrudService::create(&state.pool, &state.registry, model, &user, body).await?;
    Ok((StatusCode::OK, Json(row)))
}

pub async fn update(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    user: CurrentUser,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let model = resolve_model(&state, &table)?;
    let id = parse_id(&id)?;
    let mut body = body_to_map(body)?;
    crate::schema::generate::strip_non_update_fields(model, &mut body);
    let row = CrudService::update(&state.pool, &state.registry, model, &user, id, body).await?;
    Ok(Json(row))
}

pub async fn delete_one(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    Query(force): Query<ForceFlag>,
    user: CurrentUser,
) -> Result<Json<DeleteResponse>, AppError> {
    let model = resolve_model(&state, &table)?;
    let id = parse_id(&id)?;
    let res = CrudService::delete(&state.pool, &state.registry, model, &user, id, force.force).await?;
    Ok(Json(res))
}

pub async fn search(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(pagination): Query<Pagination>,
    user: CurrentUser,
    body: Option<Json<SearchRequest>>,
) -> Result<Json<SearchResult>, AppError> {
    let model = resolve_model(&state, &table)?;
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let query = request.search.unwrap_or_default();
    let result = CrudService::search(
        &state.pool,
        &state.registry,
        model,
        &user,
        &query,
        request.order_by.as_ref(),
        pagination.skip,
        pagination.limit,
    )
    .await?;
    Ok(Json(result))
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(force): Query<ForceFlag>,
    user: CurrentUser,
    body: Option<Json<SearchRequest>>,
) -> Result<Json<BulkDeleteResponse>, AppError> {
    let model = resolve_model(&state, &table)?;
    let query = body
        .map(|Json(b)| b.search.unwrap_or_default())
        .unwrap_or_else(SearchQuery::default);
    let res = CrudService::bulk_delete(&state.pool, &state.registry, model, &user, &query, force.force).await?;
    Ok(Json(res))
}

pub async fn import_csv(
    State(state): State<AppState>,
    Path(table): Path<String>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<DeleteResponse>, AppError> {
    let model = resolve_model(&state, &table)?;
    let mut content: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {}", e)))?;
        content = Some(bytes.to_vec());
        break;
    }
    let content = content.ok_or_else(|| AppError::BadRequest("missing file field".into()))?;
    csv_io::import(&state.pool, &state.registry, model, &user, &content).await?;
    Ok(Json(DeleteResponse { success: true }))
}

pub async fn export_csv(
    State(state): State<AppState>,
    Path(table): Path<String>,
    user: CurrentUser,
    body: Option<Json<SearchRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let model = resolve_model(&state, &table)?;
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let query = request.search.unwrap_or_default();
    let csv = csv_io::export(
        &state.pool,
        &state.registry,
        model,
        &user,
        &query,
        request.order_by.as_ref(),
    )
    .await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment;filename=dataset.csv".to_string(),
            ),
        ],
        csv,
    ))
}
