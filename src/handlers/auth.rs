//! Authentication handlers: password login issuing a bearer token, and the
//! current-user endpoint.

use crate::auth::{self, CurrentUser};
use crate::error::AppError;
use crate::service::CrudService;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email address.
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[schema(value_type = Object)]
    pub user: Value,
}

pub async fn token(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let row: Option<(i64, Option<String>)> = sqlx::query_as(
        r#"SELECT id::bigint, hashed_password FROM "user"
           WHERE (username = $1 OR email = $1) AND active = TRUE"#,
    )
    .bind(&body.username)
    .fetch_optional(&state.pool)
    .await?;

    let invalid = || AppError::Unauthorized("incorrect username or password".into());
    let (user_id, hashed) = row.ok_or_else(invalid)?;
    let hashed = hashed.ok_or_else(invalid)?;
    if !auth::verify_password(&body.password, &hashed) {
        return Err(invalid());
    }

    let user = auth::load_user_by_id(&state.pool, user_id)
        .await?
        .ok_or_else(invalid)?;
    let access_token = auth::issue_token(&state.settings, user.id)?;
    let user_model = state
        .registry
        .get("user")
        .ok_or_else(|| AppError::Internal("user model not registered".into()))?;
    let profile = CrudService::fetch_expanded(&state.pool, &state.registry, user_model, user.id).await?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        user: profile,
    }))
}

pub async fn me(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>, AppError> {
    let user_model = state
        .registry
        .get("user")
        .ok_or_else(|| AppError::Internal("user model not registered".into()))?;
    let profile = CrudService::fetch_expanded(&state.pool, &state.registry, user_model, user.id).await?;
    Ok(Json(profile))
}
