use axum::Router;
use chassis::schema::openapi;
use chassis::{apps, cron, migration, seed, AppState, Settings};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Arc::new(Settings::from_env());
    let registry = Arc::new(apps::build_registry(&settings)?);

    migration::ensure_database_exists(&settings.database_url).await?;
    let pool = connect_with_retry(&settings.database_url).await?;

    migration::apply_migrations(&pool, &registry).await?;
    let installed = apps::installed(&settings);
    seed::install_apps(&pool, &registry, &settings, &installed).await?;

    let jobs = Arc::new(cron::JobRegistry::builtin());
    tokio::spawn(cron::run_scheduler(pool.clone(), registry.clone(), jobs));

    let openapi = Arc::new(openapi::build_document(&registry));
    let state = AppState {
        pool,
        registry,
        settings: settings.clone(),
        openapi,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = Router::new()
        .merge(chassis::common_routes(state.clone()))
        .merge(chassis::auth_routes(state.clone()))
        .merge(chassis::entity_routes(state))
        .layer(axum::extract::DefaultBodyLimit::max(settings.upload_size_limit))
        .layer(RequestBodyLimitLayer::new(settings.upload_size_limit))
        .layer(cors);

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// The database container may still be starting; retry before giving up.
async fn connect_with_retry(database_url: &str) -> Result<sqlx::PgPool, sqlx::Error> {
    const ATTEMPTS: u32 = 30;
    let mut last_err = None;
    for attempt in 1..=ATTEMPTS {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "database not ready, retrying");
                last_err = Some(e);
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
        }
    }
    Err(last_err.expect("at least one attempt"))
}
