//! Authentication routes.

use crate::handlers::auth::{me, token};
use crate::state::AppState;
use axum::{routing::get, routing::post, Router};

pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/token", post(token))
        .route("/me", get(me))
        .with_state(state)
}
