//! Derive read/create/update/search schemas from model metadata.
//!
//! Rules mirror the declared shape directly: every column appears in the read
//! schema; write schemas drop the technical columns; non-nullable columns
//! without a database default are required; relationships expand recursively
//! into read schemas, guarded against cycles by the list of models already on
//! the expansion path.

use crate::case::to_pascal_case;
use crate::error::AppError;
use crate::model::{ColumnDef, ColumnType, ModelDef, ModelRegistry, RelationKind};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Technical columns never accepted in create bodies.
const CREATE_EXCLUDED: [&str; 5] = ["id", "string_id", "owner_id", "created_at", "updated_at"];

/// Technical columns never accepted in update bodies. `string_id` stays
/// editable; `organization_id` is fixed after creation.
const UPDATE_EXCLUDED: [&str; 5] = ["id", "owner_id", "created_at", "updated_at", "organization_id"];

fn string_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static pattern"))
}

fn base_type(col: &ColumnDef, for_write: bool) -> Value {
    if for_write && col.references.is_some() {
        // FK columns accept an id or a "table/string_id" reference string
        return json!({ "oneOf": [{ "type": "integer" }, { "type": "string" }] });
    }
    match &col.ty {
        ColumnType::Integer | ColumnType::BigInt => json!({ "type": "integer" }),
        ColumnType::Float => json!({ "type": "number" }),
        ColumnType::Boolean => json!({ "type": "boolean" }),
        ColumnType::Text => json!({ "type": "string" }),
        ColumnType::DateTime => json!({ "type": "string", "format": "date-time" }),
        ColumnType::Json => json!({}),
        ColumnType::Enum(values) => json!({ "type": "string", "enum": values }),
    }
}

fn column_schema(col: &ColumnDef, for_write: bool) -> Value {
    let mut schema = base_type(col, for_write);
    if col.nullable {
        if let Some(obj) = schema.as_object_mut() {
            if let Some(Value::String(t)) = obj.get("type").cloned() {
                obj.insert("type".into(), json!([t, "null"]));
            }
        }
    }
    schema
}

fn push_visited(visited: &[String], table: &str) -> Vec<String> {
    let mut tree = visited.to_vec();
    if !tree.iter().any(|t| t == table) {
        tree.push(table.to_string());
    }
    tree
}

fn object_schema(title: String, properties: Map<String, Value>, required: Vec<String>) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), json!("object"));
    obj.insert("title".into(), json!(title));
    obj.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        obj.insert("required".into(), json!(required));
    }
    Value::Object(obj)
}

/// Read schema: all non-hidden columns plus recursively expanded
/// relationships. Many-to-one becomes a nullable object, one-to-many and
/// many-to-many become arrays.
pub fn read_schema(registry: &ModelRegistry, model: &ModelDef, visited: &[String]) -> Value {
    let tree = push_visited(visited, &model.table);
    let mut properties = Map::new();
    let mut required = Vec::new();
    for col in model.visible_columns() {
        properties.insert(col.name.clone(), column_schema(col, false));
        if !col.nullable {
            required.push(col.name.clone());
        }
    }
    for rel in &model.relationships {
        if tree.iter().any(|t| *t == rel.target) {
            continue;
        }
        let Some(target) = registry.get(&rel.target) else { continue };
        let sub = read_schema(registry, target, &tree);
        let prop = match rel.kind {
            RelationKind::ManyToOne { .. } => json!({ "oneOf": [sub, { "type": "null" }] }),
            RelationKind::OneToMany { .. } | RelationKind::ManyToMany { .. } => {
                json!({ "type": "array", "items": sub })
            }
        };
        properties.insert(rel.name.clone(), prop);
    }
    object_schema(format!("{}Read", to_pascal_case(&model.table)), properties, required)
}

/// Create schema: writable columns, required where non-nullable without a
/// default (`organization_id` excepted: the service stamps it). Many-to-many
/// relationships accept `{id}` link arrays; one-to-many accept nested create
/// bodies with the parent key dropped.
pub fn create_schema(
    registry: &ModelRegistry,
    model: &ModelDef,
    visited: &[String],
    extra_excluded: &[&str],
) -> Value {
    let tree = push_visited(visited, &model.table);
    let mut properties = Map::new();
    let mut required = Vec::new();
    for col in model.visible_columns() {
        if CREATE_EXCLUDED.contains(&col.name.as_str()) || extra_excluded.contains(&col.name.as_str()) {
            continue;
        }
        properties.insert(col.name.clone(), column_schema(col, true));
        if !col.nullable && !col.has_default && col.name != "organization_id" {
            required.push(col.name.clone());
        }
    }
    for rel in &model.relationships {
        match &rel.kind {
            RelationKind::ManyToOne { .. } => {}
            RelationKind::ManyToMany { .. } => {
                properties.insert(rel.name.clone(), json!({ "type": "array", "items": link_schema() }));
            }
            RelationKind::OneToMany { remote_fk } => {
                let items = if tree.iter().any(|t| *t == rel.target) {
                    json!({})
                } else {
                    match registry.get(&rel.target) {
                        Some(target) => create_schema(registry, target, &tree, &[remote_fk.as_str()]),
                        None => json!({}),
                    }
                };
                properties.insert(rel.name.clone(), json!({ "type": "array", "items": items }));
            }
        }
    }
    object_schema(format!("{}Create", to_pascal_case(&model.table)), properties, required)
}

/// Update schema: like create, but nothing is required, `string_id` is
/// editable, and `organization_id` is not.
pub fn update_schema(registry: &ModelRegistry, model: &ModelDef) -> Value {
    let mut properties = Map::new();
    for col in model.visible_columns() {
        if UPDATE_EXCLUDED.contains(&col.name.as_str()) {
            continue;
        }
        properties.insert(col.name.clone(), column_schema(col, true));
    }
    for rel in &model.relationships {
        match &rel.kind {
            RelationKind::ManyToOne { .. } => {}
            RelationKind::ManyToMany { .. } => {
                properties.insert(rel.name.clone(), json!({ "type": "array", "items": link_schema() }));
            }
            RelationKind::OneToMany { .. } => {
                properties.insert(rel.name.clone(), json!({ "type": "array", "items": {} }));
            }
        }
    }
    object_schema(format!("{}Update", to_pascal_case(&model.table)), properties, Vec::new())
}

/// Search result envelope: `{ total, data: [read] }`.
pub fn search_result_schema(registry: &ModelRegistry, model: &ModelDef) -> Value {
    let read = read_schema(registry, model, &[]);
    let mut properties = Map::new();
    properties.insert("total".into(), json!({ "type": "integer" }));
    properties.insert("data".into(), json!({ "type": "array", "items": read }));
    object_schema(
        format!("{}SearchResult", to_pascal_case(&model.table)),
        properties,
        vec!["total".into(), "data".into()],
    )
}

fn link_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "id": { "type": "integer" } },
        "required": ["id"]
    })
}

/// Drop the fields the create schema excludes. Applied at the HTTP boundary;
/// internal callers (seed import, nested creates) may pass them.
pub fn strip_non_create_fields(model: &ModelDef, body: &mut HashMap<String, Value>) {
    body.retain(|k, _| {
        !CREATE_EXCLUDED.contains(&k.as_str())
            && model.get_column(k).map(|c| !c.hidden).unwrap_or(true)
    });
}

/// Drop the fields the update schema excludes.
pub fn strip_non_update_fields(model: &ModelDef, body: &mut HashMap<String, Value>) {
    body.retain(|k, _| {
        !UPDATE_EXCLUDED.contains(&k.as_str())
            && model.get_column(k).map(|c| !c.hidden).unwrap_or(true)
    });
}

/// Enforce the create schema on a request body: required presence, value
/// shapes, enum membership. Relationship keys are validated by the service.
pub fn validate_create(model: &ModelDef, body: &HashMap<String, Value>) -> Result<(), AppError> {
    for col in model.visible_columns() {
        if CREATE_EXCLUDED.contains(&col.name.as_str()) {
            continue;
        }
        let val = body.get(&col.name);
        let missing = matches!(val, None | Some(Value::Null));
        if missing {
            if !col.nullable && !col.has_default && col.name != "organization_id" {
                return Err(AppError::Validation(format!("field '{}' is required", col.name)));
            }
            continue;
        }
        check_value(col, val.expect("checked above"))?;
    }
    Ok(())
}

/// Enforce value shapes on the fields an update body actually carries.
pub fn validate_update(model: &ModelDef, body: &HashMap<String, Value>) -> Result<(), AppError> {
    for (key, val) in body {
        if UPDATE_EXCLUDED.contains(&key.as_str()) {
            continue;
        }
        let Some(col) = model.get_column(key).filter(|c| !c.hidden) else { continue };
        if val.is_null() {
            if !col.nullable {
                return Err(AppError::Validation(format!("field '{}' may not be null", col.name)));
            }
            continue;
        }
        check_value(col, val)?;
        if col.name == "string_id" {
            let s = val.as_str().unwrap_or_default();
            if !string_id_pattern().is_match(s) {
                return Err(AppError::Validation(
                    "string_id must be a lowercase identifier".into(),
                ));
            }
        }
    }
    Ok(())
}

fn check_value(col: &ColumnDef, val: &Value) -> Result<(), AppError> {
    if col.references.is_some() {
        if !(val.is_i64() || val.is_u64() || val.is_string()) {
            return Err(AppError::Validation(format!(
                "field '{}' must be an id or a reference string",
                col.name
            )));
        }
        return Ok(());
    }
    let ok = match &col.ty {
        ColumnType::Integer | ColumnType::BigInt => val.is_i64() || val.is_u64(),
        ColumnType::Float => val.is_number(),
        ColumnType::Boolean => val.is_boolean(),
        ColumnType::Text | ColumnType::DateTime => val.is_string(),
        ColumnType::Json => true,
        ColumnType::Enum(values) => match val.as_str() {
            Some(s) => values.iter().any(|v| v == s),
            None => false,
        },
    };
    if !ok {
        let expected = match &col.ty {
            ColumnType::Enum(values) => format!("one of {:?}", values),
            other => format!("{:?}", other).to_lowercase(),
        };
        return Err(AppError::Validation(format!(
            "field '{}' must be {}",
            col.name, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RelationshipDef;
    use serde_json::json;

    fn registry() -> ModelRegistry {
        let vehicle = ModelDef::new("vehicle")
            .column(ColumnDef::new("license_plate", ColumnType::Text).not_null().unique())
            .column(ColumnDef::new("make", ColumnType::Text))
            .relationship(RelationshipDef::one_to_many("locations", "location_log", "vehicle_id"));
        let log = ModelDef::new("location_log")
            .column(ColumnDef::new("latitude", ColumnType::Float).not_null())
            .column(ColumnDef::new("vehicle_id", ColumnType::Integer).references("vehicle"))
            .relationship(RelationshipDef::many_to_one("vehicle", "vehicle", "vehicle_id"));
        let mut models = crate::models::core_models();
        models.push(vehicle);
        models.push(log);
        ModelRegistry::build(models).unwrap()
    }

    #[test]
    fn read_schema_expands_relationships() {
        let registry = registry();
        let model = registry.get("vehicle").unwrap();
        let schema = read_schema(&registry, model, &[]);
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("license_plate"));
        assert_eq!(props["locations"]["type"], "array");
        // the nested read schema must not expand back into vehicle
        let nested = &props["locations"]["items"]["properties"];
        assert!(nested.as_object().unwrap().contains_key("latitude"));
        assert!(!nested.as_object().unwrap().contains_key("vehicle"));
    }

    #[test]
    fn self_referencing_relationship_is_cycle_guarded() {
        let registry = registry();
        let role = registry.get("role").unwrap();
        let schema = read_schema(&registry, role, &[]);
        let props = schema["properties"].as_object().unwrap();
        assert!(!props.contains_key("implied_roles"));
    }

    #[test]
    fn create_schema_excludes_technical_fields() {
        let registry = registry();
        let schema = create_schema(&registry, registry.get("vehicle").unwrap(), &[], &[]);
        let props = schema["properties"].as_object().unwrap();
        for name in ["id", "string_id", "owner_id", "created_at", "updated_at"] {
            assert!(!props.contains_key(name), "{} must be excluded", name);
        }
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(required.contains(&"license_plate"));
        assert!(!required.contains(&"organization_id"));
        assert!(!required.contains(&"make"));
    }

    #[test]
    fn nested_create_drops_parent_key() {
        let registry = registry();
        let schema = create_schema(&registry, registry.get("vehicle").unwrap(), &[], &[]);
        let nested = &schema["properties"]["locations"]["items"]["properties"];
        assert!(nested.as_object().unwrap().contains_key("latitude"));
        assert!(!nested.as_object().unwrap().contains_key("vehicle_id"));
    }

    #[test]
    fn update_schema_keeps_string_id_editable() {
        let registry = registry();
        let schema = update_schema(&registry, registry.get("vehicle").unwrap());
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("string_id"));
        assert!(!props.contains_key("organization_id"));
        assert!(!props.contains_key("owner_id"));
        assert!(schema.get("required").is_none());
    }

    #[test]
    fn hidden_columns_never_appear() {
        let registry = registry();
        let user = registry.get("user").unwrap();
        for schema in [
            read_schema(&registry, user, &[]),
            create_schema(&registry, user, &[], &[]),
            update_schema(&registry, user),
        ] {
            assert!(!schema["properties"].as_object().unwrap().contains_key("hashed_password"));
        }
    }

    #[test]
    fn many_to_many_accepts_link_objects() {
        let registry = registry();
        let schema = create_schema(&registry, registry.get("user").unwrap(), &[], &[]);
        let roles = &schema["properties"]["roles"];
        assert_eq!(roles["type"], "array");
        assert_eq!(roles["items"]["required"], json!(["id"]));
    }

    #[test]
    fn validate_create_requires_non_nullable() {
        let registry = registry();
        let model = registry.get("vehicle").unwrap();
        let mut body = HashMap::new();
        body.insert("make".to_string(), json!("Toyota"));
        let err = validate_create(model, &body).unwrap_err();
        assert!(err.to_string().contains("license_plate"));

        body.insert("license_plate".to_string(), json!("AB-123"));
        assert!(validate_create(model, &body).is_ok());
    }

    #[test]
    fn validate_rejects_bad_enum_value() {
        let registry = registry();
        let model = registry.get("cron").unwrap();
        let mut body = HashMap::new();
        body.insert("name".to_string(), json!("nightly"));
        body.insert("job".to_string(), json!("purge_inactive_records"));
        body.insert("interval_unit".to_string(), json!("fortnights"));
        assert!(validate_create(model, &body).is_err());
        body.insert("interval_unit".to_string(), json!("days"));
        assert!(validate_create(model, &body).is_ok());
    }

    #[test]
    fn validate_update_checks_string_id_format() {
        let registry = registry();
        let model = registry.get("vehicle").unwrap();
        let mut body = HashMap::new();
        body.insert("string_id".to_string(), json!("Fleet Truck"));
        assert!(validate_update(model, &body).is_err());
        body.insert("string_id".to_string(), json!("fleet_truck_1"));
        assert!(validate_update(model, &body).is_ok());
    }

    #[test]
    fn fk_columns_accept_reference_strings() {
        let registry = registry();
        let model = registry.get("location_log").unwrap();
        let mut body = HashMap::new();
        body.insert("latitude".to_string(), json!(48.2));
        body.insert("vehicle_id".to_string(), json!("vehicle/fleet_truck_1"));
        assert!(validate_create(model, &body).is_ok());
        body.insert("vehicle_id".to_string(), json!(true));
        assert!(validate_create(model, &body).is_err());
    }
}
