//! Runtime settings collected from the environment (.env supported via dotenvy).

use std::path::PathBuf;

/// Organization every deployment starts with; seed data and the public user
/// belong to it.
pub const DEFAULT_ORG_ID: i64 = 1;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub bind_addr: String,
    pub app_secret: String,
    pub access_token_expire_minutes: i64,
    pub default_org_id: i64,
    /// App names beyond the always-on core app, comma-separated in `INSTALLED_APPS`.
    pub installed_apps: Vec<String>,
    /// Root of the per-app seed CSV directories.
    pub data_dir: PathBuf,
    /// Request body cap in bytes, mainly for CSV import uploads.
    pub upload_size_limit: usize,
}

impl Settings {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            let host = std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".into());
            let port = std::env::var("DB_PORT").unwrap_or_else(|_| "5432".into());
            let name = std::env::var("DB_NAME").unwrap_or_else(|_| "chassis".into());
            let user = std::env::var("DB_USER").unwrap_or_else(|_| "postgres".into());
            let password = std::env::var("DB_PASSWORD").unwrap_or_default();
            format!("postgres://{}:{}@{}:{}/{}", user, password, host, port, name)
        });
        let installed_apps = std::env::var("INSTALLED_APPS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Settings {
            database_url,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into()),
            app_secret: std::env::var("APP_SECRET").unwrap_or_else(|_| "your-secret-key".into()),
            access_token_expire_minutes: std::env::var("ACCESS_TOKEN_EXPIRE_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60 * 24),
            default_org_id: DEFAULT_ORG_ID,
            installed_apps,
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            upload_size_limit: std::env::var("UPLOAD_SIZE_LIMIT_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(5)
                * 1024
                * 1024,
        }
    }
}
