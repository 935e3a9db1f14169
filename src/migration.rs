//! Apply the registered models to the database: CREATE TABLE, ADD COLUMN for
//! columns that appeared since the table was created, then foreign keys.
//! Order follows PostgreSQL dependencies: tables first, constraints last.

use crate::error::AppError;
use crate::model::{ColumnDef, ColumnType, ModelDef, ModelRegistry};
use sqlx::ConnectOptions;
use sqlx::PgPool;
use std::str::FromStr;

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn column_ddl(model: &ModelDef, col: &ColumnDef) -> String {
    let is_surrogate_pk = !model.junction && col.name == model.pk_columns[0];
    if is_surrogate_pk {
        return format!("{} SERIAL", quote(&col.name));
    }
    let mut def = format!("{} {}", quote(&col.name), col.ty.pg_type());
    if !col.nullable {
        def.push_str(" NOT NULL");
    }
    if col.has_default {
        if let Some(default) = default_expr(col) {
            def.push_str(" DEFAULT ");
            def.push_str(&default);
        }
    }
    if col.unique {
        def.push_str(" UNIQUE");
    }
    if let ColumnType::Enum(values) = &col.ty {
        let list = values.iter().map(|v| quote_literal(v)).collect::<Vec<_>>().join(", ");
        def.push_str(&format!(" CHECK ({} IN ({}))", quote(&col.name), list));
    }
    def
}

/// Database-side defaults for defaulted columns. The conventions are fixed:
/// timestamps default to NOW(), `system` to false, `active` to true, numeric
/// and json defaults to their zero values.
fn default_expr(col: &ColumnDef) -> Option<String> {
    Some(match (&col.ty, col.name.as_str()) {
        (ColumnType::DateTime, _) => "NOW()".to_string(),
        (ColumnType::Boolean, "active" | "allow_public_signup") => "TRUE".to_string(),
        (ColumnType::Boolean, _) => "FALSE".to_string(),
        (ColumnType::Integer | ColumnType::BigInt, "access_token_expire_minutes") => "1440".to_string(),
        (ColumnType::Integer | ColumnType::BigInt, _) => "1".to_string(),
        (ColumnType::Float, _) => "0".to_string(),
        (ColumnType::Json, _) => "'[]'::jsonb".to_string(),
        (ColumnType::Enum(values), _) => quote_literal(values.first()?),
        (ColumnType::Text, _) => return None,
    })
}

/// CREATE TABLE statement for one model.
pub fn create_table_sql(model: &ModelDef) -> String {
    let mut defs: Vec<String> = model.columns.iter().map(|c| column_ddl(model, c)).collect();
    let pk = model.pk_columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
    defs.push(format!("PRIMARY KEY ({})", pk));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        quote(&model.table),
        defs.join(",\n  ")
    )
}

/// Apply every registered model: create missing tables, add missing columns
/// to existing ones, then add foreign keys (tolerated when already present).
pub async fn apply_migrations(pool: &PgPool, registry: &ModelRegistry) -> Result<(), AppError> {
    for model in registry.iter() {
        let sql = create_table_sql(model);
        tracing::debug!(table = %model.table, "ensuring table");
        sqlx::query(&sql).execute(pool).await?;

        for col in &model.columns {
            let is_surrogate_pk = !model.junction && col.name == model.pk_columns[0];
            if is_surrogate_pk {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
                quote(&model.table),
                column_ddl(model, col)
            );
            sqlx::query(&sql).execute(pool).await?;
        }
    }

    for model in registry.iter() {
        for (col, target) in model.foreign_keys() {
            let constraint = format!("fk_{}_{}", model.table, col.name);
            let sql = format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} (id)",
                quote(&model.table),
                quote(&constraint),
                quote(&col.name),
                quote(target)
            );
            // fails when the constraint already exists; that is fine
            let _ = sqlx::query(&sql).execute(pool).await;
        }
    }
    Ok(())
}

/// Ensure the database in `database_url` exists; create it if not. Connects
/// to the default `postgres` database to run CREATE DATABASE. Call before
/// creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await.map_err(AppError::Db)?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await
        .map_err(AppError::Db)?;
    if !exists.0 {
        sqlx::query(&format!("CREATE DATABASE {}", quote(&db_name)))
            .execute(&mut conn)
            .await
            .map_err(AppError::Db)?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    let admin_url = format!("{}postgres", base);
    Ok((admin_url, db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, ColumnType, ModelDef};

    #[test]
    fn create_table_includes_base_columns_and_pk() {
        let model = ModelDef::new("vehicle")
            .column(ColumnDef::new("license_plate", ColumnType::Text).not_null().unique());
        let sql = create_table_sql(&model);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"vehicle\""));
        assert!(sql.contains("\"id\" SERIAL"));
        assert!(sql.contains("\"created_at\" timestamptz NOT NULL DEFAULT NOW()"));
        assert!(sql.contains("\"active\" boolean NOT NULL DEFAULT TRUE"));
        assert!(sql.contains("\"system\" boolean NOT NULL DEFAULT FALSE"));
        assert!(sql.contains("\"license_plate\" text NOT NULL UNIQUE"));
        assert!(sql.contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn junction_tables_get_composite_pk() {
        let model = ModelDef::junction("user_role", ("user_id", "user"), ("role_id", "role"));
        let sql = create_table_sql(&model);
        assert!(sql.contains("PRIMARY KEY (\"user_id\", \"role_id\")"));
        assert!(!sql.contains("SERIAL"));
    }

    #[test]
    fn enum_columns_get_check_constraints() {
        let model = crate::models::cron::cron();
        let sql = create_table_sql(&model);
        assert!(sql.contains("CHECK (\"interval_unit\" IN ('minutes', 'hours', 'days', 'weeks'))"));
        assert!(sql.contains("\"interval_unit\" text NOT NULL DEFAULT 'minutes'"));
    }

    #[test]
    fn admin_url_parsing() {
        let (admin, name) = parse_db_name_from_url("postgres://u:p@localhost:5432/appdb").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(name, "appdb");
        let (_, name) = parse_db_name_from_url("postgres://u:p@h/appdb?sslmode=disable").unwrap();
        assert_eq!(name, "appdb");
    }
}
