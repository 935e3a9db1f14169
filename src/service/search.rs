//! Search request types: AND/OR criteria groups with a fixed operator set,
//! ordering, and the `{ total, data }` result envelope.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, ToSchema)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "in")]
    In,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "ilike")]
    ILike,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct SearchCriteria {
    /// Column name, or `relationship.column` for a one-level join.
    pub field: String,
    pub operator: Operator,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct SearchQuery {
    #[serde(default, rename = "AND")]
    pub and: Vec<SearchCriteria>,
    #[serde(default, rename = "OR")]
    pub or: Vec<SearchCriteria>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: OrderDirection,
}

/// Body of POST /{table}/search and /{table}/bulk_delete and /{table}/export.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct SearchRequest {
    #[serde(default)]
    pub search: Option<SearchQuery>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResult {
    pub total: i64,
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkDeleteResponse {
    pub success: bool,
    pub deleted_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_operators_and_groups() {
        let body = json!({
            "AND": [{"field": "year", "operator": ">=", "value": 2020}],
            "OR": [
                {"field": "make", "operator": "ilike", "value": "toyo"},
                {"field": "make", "operator": "=", "value": "Honda"}
            ]
        });
        let q: SearchQuery = serde_json::from_value(body).unwrap();
        assert_eq!(q.and.len(), 1);
        assert_eq!(q.and[0].operator, Operator::Gte);
        assert_eq!(q.or.len(), 2);
        assert_eq!(q.or[0].operator, Operator::ILike);
    }

    #[test]
    fn missing_groups_default_empty() {
        let q: SearchQuery = serde_json::from_value(json!({})).unwrap();
        assert!(q.and.is_empty());
        assert!(q.or.is_empty());
    }

    #[test]
    fn order_direction_defaults_asc() {
        let ob: OrderBy = serde_json::from_value(json!({"field": "name"})).unwrap();
        assert!(matches!(ob.direction, OrderDirection::Asc));
        let ob: OrderBy = serde_json::from_value(json!({"field": "name", "direction": "desc"})).unwrap();
        assert!(matches!(ob.direction, OrderDirection::Desc));
    }
}
