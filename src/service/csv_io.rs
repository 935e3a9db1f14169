//! CSV export of search results and CSV import with typed cell conversion.

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::model::{ColumnDef, ColumnType, ModelDef, ModelRegistry};
use crate::service::crud::CrudService;
use crate::service::search::{OrderBy, SearchQuery};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;

/// Export matching rows (flat columns only, relationships not expanded) as a
/// CSV document.
pub async fn export(
    pool: &PgPool,
    registry: &ModelRegistry,
    model: &ModelDef,
    user: &CurrentUser,
    query: &SearchQuery,
    order_by: Option<&OrderBy>,
) -> Result<String, AppError> {
    let result = CrudService::search(pool, registry, model, user, query, order_by, 0, Some(crate::service::crud::MAX_LIMIT)).await?;

    let headers: Vec<&str> = model.visible_columns().map(|c| c.name.as_str()).collect();
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&headers)
        .map_err(|e| AppError::Internal(format!("csv write: {}", e)))?;
    for row in &result.data {
        let record: Vec<String> = headers.iter().map(|h| cell_to_string(row.get(*h))).collect();
        writer
            .write_record(&record)
            .map_err(|e| AppError::Internal(format!("csv write: {}", e)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("csv write: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("csv encoding: {}", e)))
}

fn cell_to_string(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Import rows from an uploaded CSV. Rows with an `id` update that record;
/// rows with a `string_id` upsert by (string_id, organization); everything
/// else is created. All writes go through the permission-checked service.
pub async fn import(
    pool: &PgPool,
    registry: &ModelRegistry,
    model: &ModelDef,
    user: &CurrentUser,
    content: &[u8],
) -> Result<u64, AppError> {
    let mut reader = csv::Reader::from_reader(content);
    let headers = reader
        .headers()
        .map_err(|e| AppError::BadRequest(format!("invalid CSV: {}", e)))?
        .clone();
    let mut count = 0u64;
    for record in reader.records() {
        let record = record.map_err(|e| AppError::BadRequest(format!("invalid CSV: {}", e)))?;
        let mut row: HashMap<String, Value> = HashMap::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            let Some(col) = model.get_column(header) else { continue };
            row.insert(header.to_string(), convert_cell(col, cell)?);
        }

        let existing_id = match row.remove("id") {
            Some(Value::Number(n)) => n.as_i64(),
            _ => match row.get("string_id").and_then(Value::as_str) {
                Some(string_id) => find_by_string_id(pool, model, string_id, user.organization_id).await?,
                None => None,
            },
        };

        match existing_id {
            Some(id) => {
                row.remove("string_id");
                CrudService::update(pool, registry, model, user, id, row).await?;
            }
            None => {
                CrudService::create(pool, registry, model, user, row).await?;
            }
        }
        count += 1;
    }
    Ok(count)
}

async fn find_by_string_id(
    pool: &PgPool,
    model: &ModelDef,
    string_id: &str,
    organization_id: Option<i64>,
) -> Result<Option<i64>, AppError> {
    let org_scoped = model.has_column("organization_id") && organization_id.is_some();
    let sql = if org_scoped {
        format!(
            r#"SELECT id::bigint FROM "{}" WHERE string_id = $1 AND organization_id = $2"#,
            model.table
        )
    } else {
        format!(r#"SELECT id::bigint FROM "{}" WHERE string_id = $1"#, model.table)
    };
    let mut query = sqlx::query_as::<_, (i64,)>(&sql).bind(string_id);
    if org_scoped {
        query = query.bind(organization_id.unwrap_or_default());
    }
    Ok(query.fetch_optional(pool).await?.map(|(id,)| id))
}

/// Convert one CSV cell according to the column type. Empty cells are NULL.
pub fn convert_cell(col: &ColumnDef, raw: &str) -> Result<Value, AppError> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    Ok(match &col.ty {
        ColumnType::Boolean => {
            Value::Bool(matches!(raw.to_lowercase().as_str(), "true" | "1" | "t" | "y" | "yes"))
        }
        ColumnType::Integer | ColumnType::BigInt => {
            // FK cells may carry "table/string_id" references
            if col.references.is_some() && raw.contains('/') {
                Value::String(raw.to_string())
            } else {
                Value::from(raw.parse::<i64>().map_err(|_| {
                    AppError::BadRequest(format!("invalid CSV field input: '{}' for {}", raw, col.name))
                })?)
            }
        }
        ColumnType::Float => Value::from(raw.parse::<f64>().map_err(|_| {
            AppError::BadRequest(format!("invalid CSV field input: '{}' for {}", raw, col.name))
        })?),
        ColumnType::Json => serde_json::from_str(raw).map_err(|_| {
            AppError::BadRequest(format!("invalid CSV field input: '{}' for {}", raw, col.name))
        })?,
        ColumnType::Text | ColumnType::DateTime | ColumnType::Enum(_) => Value::String(raw.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_cell_is_null() {
        let col = ColumnDef::new("make", ColumnType::Text);
        assert_eq!(convert_cell(&col, "").unwrap(), Value::Null);
    }

    #[test]
    fn boolean_cells_accept_common_spellings() {
        let col = ColumnDef::new("active", ColumnType::Boolean);
        for truthy in ["true", "True", "1", "t", "y", "yes"] {
            assert_eq!(convert_cell(&col, truthy).unwrap(), json!(true));
        }
        assert_eq!(convert_cell(&col, "false").unwrap(), json!(false));
        assert_eq!(convert_cell(&col, "no").unwrap(), json!(false));
    }

    #[test]
    fn integer_cells_parse_or_fail() {
        let col = ColumnDef::new("year", ColumnType::Integer);
        assert_eq!(convert_cell(&col, "2021").unwrap(), json!(2021));
        assert!(convert_cell(&col, "soon").is_err());
    }

    #[test]
    fn fk_cells_keep_reference_strings() {
        let col = ColumnDef::new("vehicle_id", ColumnType::Integer).references("vehicle");
        assert_eq!(
            convert_cell(&col, "vehicle/fleet_truck_1").unwrap(),
            json!("vehicle/fleet_truck_1")
        );
        assert_eq!(convert_cell(&col, "7").unwrap(), json!(7));
    }

    #[test]
    fn json_cells_parse() {
        let col = ColumnDef::new("arguments", ColumnType::Json);
        assert_eq!(convert_cell(&col, r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert!(convert_cell(&col, "{broken").is_err());
    }

    #[test]
    fn export_cell_rendering() {
        assert_eq!(cell_to_string(Some(&json!("abc"))), "abc");
        assert_eq!(cell_to_string(Some(&json!(42))), "42");
        assert_eq!(cell_to_string(Some(&Value::Null)), "");
        assert_eq!(cell_to_string(None), "");
        assert_eq!(cell_to_string(Some(&json!({"k": true}))), r#"{"k":true}"#);
    }
}
