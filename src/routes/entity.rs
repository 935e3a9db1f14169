//! Entity CRUD routes. Parameterized paths let one router serve every
//! registered model; handlers resolve the model from the `:table` segment.
//! Static segments (`search`, `bulk_delete`, ...) take precedence over the
//! `:id` capture.

use crate::handlers::entity::{
    bulk_delete, create, delete_one, export_csv, import_csv, list, read, search, update,
};
use crate::state::AppState;
use axum::{routing::get, routing::post, Router};

pub fn entity_routes(state: AppState) -> Router {
    Router::new()
        .route("/:table", get(list).post(create))
        .route("/:table/search", post(search))
        .route("/:table/bulk_delete", post(bulk_delete))
        .route("/:table/import", post(import_csv))
        .route("/:table/export", post(export_csv))
        .route("/:table/:id", get(read).put(update).delete(delete_one))
        .with_state(state)
}
