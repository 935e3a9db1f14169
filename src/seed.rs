//! Seed data import: each installed app ships CSV files imported in its
//! declared order at startup.
//!
//! Conventions per file (named `{table}.csv`):
//! - a `string_id` column is required; rows upsert by it, so startup imports
//!   are idempotent
//! - a header `other_table/column` means the cell holds a `string_id` in
//!   `other_table`; the referenced row's id is written to `column`
//! - a header `json:column` parses the cell as JSON
//! - rows for models with ownership columns default to the super user and
//!   the default organization when the file does not say otherwise
//! - existing rows are only overwritten when they are (or become) system rows

use crate::apps::App;
use crate::error::AppError;
use crate::model::{ModelDef, ModelRegistry};
use crate::service::crud::CrudService;
use crate::service::csv_io::convert_cell;
use crate::settings::Settings;
use crate::sql;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use std::path::Path;

pub async fn install_apps(
    pool: &PgPool,
    registry: &ModelRegistry,
    settings: &Settings,
    apps: &[App],
) -> Result<(), AppError> {
    for app in apps {
        tracing::info!(app = app.name, "installing app");
        let dir = settings.data_dir.join(app.name);
        for file in app.import_order {
            let path = dir.join(file);
            if !path.exists() {
                tracing::warn!(file = %path.display(), "seed file missing, skipping");
                continue;
            }
            import_seed_file(pool, registry, settings, &path).await?;
        }
    }
    bootstrap_super_user_role(pool).await?;
    Ok(())
}

/// Import one seed CSV. The model is named by the file stem.
pub async fn import_seed_file(
    pool: &PgPool,
    registry: &ModelRegistry,
    settings: &Settings,
    path: &Path,
) -> Result<(), AppError> {
    let table = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| AppError::BadRequest(format!("bad seed file name: {}", path.display())))?;
    let Some(model) = registry.get(table) else {
        tracing::warn!(table, "seed file for unknown model, skipping");
        return Ok(());
    };
    tracing::debug!(file = %path.display(), "importing seed data");

    let content = std::fs::read(path)
        .map_err(|e| AppError::Internal(format!("read {}: {}", path.display(), e)))?;
    let mut reader = csv::Reader::from_reader(content.as_slice());
    let headers = reader
        .headers()
        .map_err(|e| AppError::BadRequest(format!("invalid CSV {}: {}", path.display(), e)))?
        .clone();
    if !headers.iter().any(|h| h == "string_id") {
        return Err(AppError::BadRequest(format!(
            "file {} does not have required \"string_id\" column",
            path.display()
        )));
    }

    let stamp_owner = model.has_column("owner_id")
        && !headers.iter().any(|h| h == "owner_id" || h == "user/owner_id");
    let stamp_org = model.has_column("organization_id")
        && !headers
            .iter()
            .any(|h| h == "organization_id" || h == "organization/organization_id");
    let super_user_id = if stamp_owner {
        resolve_string_id(pool, registry.get("user"), "super_user", None).await?
    } else {
        None
    };

    for record in reader.records() {
        let record = record.map_err(|e| AppError::BadRequest(format!("invalid CSV {}: {}", path.display(), e)))?;
        let mut row: HashMap<String, Value> = HashMap::new();

        for (header, cell) in headers.iter().zip(record.iter()) {
            if let Some((ref_table, column)) = header.split_once('/') {
                // cell holds a string_id in ref_table
                let target = registry.get(ref_table);
                let org_scope = target
                    .map(|t| t.has_column("organization_id"))
                    .unwrap_or(false)
                    .then_some(settings.default_org_id);
                match resolve_string_id(pool, target, cell, org_scope).await? {
                    Some(id) => {
                        row.insert(column.to_string(), Value::from(id));
                    }
                    None => {
                        tracing::error!(reference = cell, table = ref_table, "seed reference not found");
                    }
                }
            } else if let Some(column) = header.strip_prefix("json:") {
                let value: Value = serde_json::from_str(cell).map_err(|_| {
                    AppError::BadRequest(format!("invalid JSON in {} column {}", path.display(), column))
                })?;
                row.insert(column.to_string(), value);
            } else if let Some(col) = model.get_column(header) {
                row.insert(header.to_string(), convert_cell(col, cell)?);
            } else {
                tracing::warn!(column = header, table, "unknown seed column, skipping");
            }
        }

        if stamp_owner {
            if let Some(id) = super_user_id {
                row.insert("owner_id".to_string(), Value::from(id));
            }
        }
        if stamp_org && !row.contains_key("organization_id") {
            row.insert("organization_id".to_string(), Value::from(settings.default_org_id));
        }

        upsert_row(pool, model, settings, row).await?;
    }
    Ok(())
}

/// Insert the row, or update an existing row with the same (string_id,
/// organization) when either side carries the system flag. Seeding bypasses
/// the permission layer: there is no user yet.
async fn upsert_row(
    pool: &PgPool,
    model: &ModelDef,
    settings: &Settings,
    row: HashMap<String, Value>,
) -> Result<(), AppError> {
    let Some(string_id) = row.get("string_id").and_then(Value::as_str).map(String::from) else {
        return Err(AppError::BadRequest(format!(
            "seed row for {} is missing string_id",
            model.table
        )));
    };
    let org_scope = model
        .has_column("organization_id")
        .then_some(settings.default_org_id);
    let existing = find_by_string_id(pool, model, &string_id, org_scope).await?;

    match existing {
        None => {
            let q = sql::insert(model, &row);
            CrudService::query_one(pool, &q).await?;
            tracing::debug!(table = %model.table, string_id, "seeded");
        }
        Some((id, existing_system)) => {
            let row_system = row.get("system").and_then(Value::as_bool).unwrap_or(false);
            if row_system || existing_system {
                let mut update = row;
                update.remove("string_id");
                let q = sql::update(model, id, &update);
                CrudService::query_one(pool, &q).await?;
                tracing::debug!(table = %model.table, string_id, "updated system row");
            }
        }
    }
    Ok(())
}

async fn resolve_string_id(
    pool: &PgPool,
    model: Option<&ModelDef>,
    string_id: &str,
    organization_id: Option<i64>,
) -> Result<Option<i64>, AppError> {
    let Some(model) = model else { return Ok(None) };
    Ok(find_by_string_id(pool, model, string_id, organization_id)
        .await?
        .map(|(id, _)| id))
}

async fn find_by_string_id(
    pool: &PgPool,
    model: &ModelDef,
    string_id: &str,
    organization_id: Option<i64>,
) -> Result<Option<(i64, bool)>, AppError> {
    let sql = if organization_id.is_some() {
        format!(
            r#"SELECT id::bigint, system FROM "{}" WHERE string_id = $1 AND organization_id = $2"#,
            model.table
        )
    } else {
        format!(
            r#"SELECT id::bigint, system FROM "{}" WHERE string_id = $1"#,
            model.table
        )
    };
    let mut query = sqlx::query_as::<_, (i64, bool)>(&sql).bind(string_id);
    if let Some(org) = organization_id {
        query = query.bind(org);
    }
    Ok(query.fetch_optional(pool).await?)
}

/// The super user holds the super admin role; seed files cannot express
/// junction rows, so the link is ensured here.
async fn bootstrap_super_user_role(pool: &PgPool) -> Result<(), AppError> {
    sqlx::query(
        r#"INSERT INTO user_role (user_id, role_id)
           SELECT u.id, r.id FROM "user" u, role r
           WHERE u.string_id = 'super_user' AND r.string_id = 'super_admin_role'
           ON CONFLICT DO NOTHING"#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
