//! Chassis: model-driven REST backend library.
//!
//! Apps declare models (tables, columns, relationships); the library derives
//! request/response schemas, migrations, seed import, and permission-checked
//! CRUD endpoints from those declarations.

pub mod apps;
pub mod auth;
pub mod case;
pub mod cron;
pub mod error;
pub mod handlers;
pub mod migration;
pub mod model;
pub mod models;
pub mod routes;
pub mod schema;
pub mod seed;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;

pub use error::{AppError, ConfigError};
pub use migration::{apply_migrations, ensure_database_exists};
pub use model::{ColumnDef, ColumnType, ModelDef, ModelRegistry, RelationshipDef};
pub use routes::{auth_routes, common_routes, entity_routes};
pub use service::CrudService;
pub use settings::Settings;
pub use state::AppState;
