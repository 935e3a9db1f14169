//! OpenAPI document assembly: static DTO components come from utoipa derives,
//! per-model schemas and CRUD paths are generated from the registry and
//! merged in at startup.

use crate::case::{to_pascal_case, to_title_case};
use crate::handlers::auth::{LoginRequest, TokenResponse};
use crate::model::{ModelDef, ModelRegistry};
use crate::schema::generate;
use crate::service::search::{
    BulkDeleteResponse, DeleteResponse, OrderBy, SearchCriteria, SearchQuery, SearchRequest, SearchResult,
};
use serde_json::{json, Value};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Chassis API",
        description = "Model-driven CRUD endpoints generated from the registered models"
    ),
    components(schemas(
        SearchQuery,
        SearchCriteria,
        OrderBy,
        SearchRequest,
        SearchResult,
        DeleteResponse,
        BulkDeleteResponse,
        LoginRequest,
        TokenResponse,
    ))
)]
struct ApiDoc;

/// Build the full document for every exposed model.
pub fn build_document(registry: &ModelRegistry) -> Value {
    let mut doc = serde_json::to_value(ApiDoc::openapi()).unwrap_or_else(|_| json!({}));

    let mut paths = doc
        .get("paths")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let mut schemas = doc
        .pointer("/components/schemas")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for model in registry.exposed() {
        let pascal = to_pascal_case(&model.table);
        schemas.insert(format!("{}Read", pascal), generate::read_schema(registry, model, &[]));
        schemas.insert(
            format!("{}Create", pascal),
            generate::create_schema(registry, model, &[], &[]),
        );
        schemas.insert(format!("{}Update", pascal), generate::update_schema(registry, model));
        schemas.insert(
            format!("{}SearchResult", pascal),
            generate::search_result_schema(registry, model),
        );
        for (path, item) in model_paths(model, &pascal) {
            paths.insert(path, item);
        }
    }

    doc["paths"] = Value::Object(paths);
    doc["components"]["schemas"] = Value::Object(schemas);
    doc
}

fn schema_ref(name: &str) -> Value {
    json!({ "$ref": format!("#/components/schemas/{}", name) })
}

fn json_body(schema: Value) -> Value {
    json!({ "content": { "application/json": { "schema": schema } } })
}

fn model_paths(model: &ModelDef, pascal: &str) -> Vec<(String, Value)> {
    let tag = to_title_case(&model.table);
    let read_ref = schema_ref(&format!("{}Read", pascal));
    let list = json!({
        "get": {
            "tags": [tag],
            "summary": "Get All",
            "parameters": [
                { "name": "skip", "in": "query", "schema": { "type": "integer" } },
                { "name": "limit", "in": "query", "schema": { "type": "integer" } }
            ],
            "responses": { "200": json_body(json!({ "type": "array", "items": read_ref })) }
        },
        "post": {
            "tags": [tag],
            "summary": "Create One",
            "requestBody": json_body(schema_ref(&format!("{}Create", pascal))),
            "responses": {
                "200": json_body(read_ref.clone()),
                "422": { "description": "Validation Error" }
            }
        }
    });
    let one = json!({
        "get": {
            "tags": [tag],
            "summary": "Get One",
            "responses": {
                "200": json_body(read_ref.clone()),
                "404": { "description": "Not Found" }
            }
        },
        "put": {
            "tags": [tag],
            "summary": "Update One",
            "requestBody": json_body(schema_ref(&format!("{}Update", pascal))),
            "responses": { "200": json_body(read_ref.clone()) }
        },
        "delete": {
            "tags": [tag],
            "summary": "Delete One",
            "parameters": [
                { "name": "force", "in": "query", "schema": { "type": "boolean" } }
            ],
            "responses": { "200": json_body(schema_ref("DeleteResponse")) }
        }
    });
    let search = json!({
        "post": {
            "tags": [tag],
            "summary": "Search",
            "requestBody": json_body(schema_ref("SearchRequest")),
            "responses": { "200": json_body(schema_ref(&format!("{}SearchResult", pascal))) }
        }
    });
    let bulk_delete = json!({
        "post": {
            "tags": [tag],
            "summary": "Bulk Delete",
            "requestBody": json_body(schema_ref("SearchRequest")),
            "responses": { "200": json_body(schema_ref("BulkDeleteResponse")) }
        }
    });
    let import = json!({
        "post": {
            "tags": [tag],
            "summary": "Import CSV",
            "requestBody": {
                "content": { "multipart/form-data": { "schema": { "type": "object" } } }
            },
            "responses": { "200": json_body(schema_ref("DeleteResponse")) }
        }
    });
    let export = json!({
        "post": {
            "tags": [tag],
            "summary": "Export CSV",
            "requestBody": json_body(schema_ref("SearchRequest")),
            "responses": { "200": { "content": { "text/csv": {} } } }
        }
    });
    vec![
        (format!("/{}", model.table), list),
        (format!("/{}/search", model.table), search),
        (format!("/{}/bulk_delete", model.table), bulk_delete),
        (format!("/{}/import", model.table), import),
        (format!("/{}/export", model.table), export),
        (format!("/{}/{{id}}", model.table), one),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_contains_model_paths_and_schemas() {
        let registry = ModelRegistry::build(crate::models::core_models()).unwrap();
        let doc = build_document(&registry);
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/user"));
        assert!(paths.contains_key("/user/search"));
        assert!(paths.contains_key("/user/{id}"));
        // junctions are not exposed
        assert!(!paths.contains_key("/user_role"));
        let schemas = doc["components"]["schemas"].as_object().unwrap();
        assert!(schemas.contains_key("UserRead"));
        assert!(schemas.contains_key("RoleCreate"));
        assert!(schemas.contains_key("SearchRequest"));
    }
}
