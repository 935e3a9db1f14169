//! Shared application state for all routes.

use crate::model::ModelRegistry;
use crate::settings::Settings;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub registry: Arc<ModelRegistry>,
    pub settings: Arc<Settings>,
    /// OpenAPI document assembled once at startup from the registered models.
    pub openapi: Arc<serde_json::Value>,
}
