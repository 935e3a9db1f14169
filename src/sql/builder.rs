//! Builds parameterized INSERT, SELECT, UPDATE, DELETE from model metadata.
//! Identifiers come from registered models only; values are always bound.

use crate::error::AppError;
use crate::model::{ColumnDef, ModelDef, ModelRegistry, RelationKind};
use crate::service::permission::ScopeFilter;
use crate::service::search::{OrderBy, OrderDirection, Operator, SearchQuery};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Quote identifier for PostgreSQL (safe: only from registered metadata).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

/// SELECT list: every non-hidden column, qualified with `alias` when given.
fn select_column_list(model: &ModelDef, alias: Option<&str>) -> String {
    model
        .visible_columns()
        .map(|c| match alias {
            Some(a) => format!("{}.{}", quoted(a), quoted(&c.name)),
            None => quoted(&c.name),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholder(col: Option<&ColumnDef>, n: usize) -> String {
    match col.and_then(|c| c.ty.bind_cast()) {
        Some(cast) => format!("${}::{}", n, cast),
        None => format!("${}", n),
    }
}

fn scope_condition(q: &mut QueryBuf, model: &ModelDef, alias: &str, scope: &ScopeFilter) -> Option<String> {
    let col = |name: &str| format!("{}.{}", quoted(alias), quoted(name));
    match scope {
        ScopeFilter::Unrestricted => None,
        ScopeFilter::Owner(id) => {
            let n = q.push_param(Value::from(*id));
            Some(format!("{} = ${}", col("owner_id"), n))
        }
        ScopeFilter::Organization(id) => {
            let n = q.push_param(Value::from(*id));
            Some(format!("{} = ${}", col("organization_id"), n))
        }
        ScopeFilter::SelfRow(id) => {
            let pk = &model.pk_columns[0];
            let n = q.push_param(Value::from(*id));
            Some(format!("{} = ${}", col(pk), n))
        }
    }
}

const MAIN: &str = "main";

/// SELECT one row by primary key, optionally narrowed by a permission scope.
pub fn select_one(model: &ModelDef, id: i64, scope: &ScopeFilter) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = &model.pk_columns[0];
    let n = q.push_param(Value::from(id));
    let mut conds = vec![format!("{}.{} = ${}", quoted(MAIN), quoted(pk), n)];
    if let Some(c) = scope_condition(&mut q, model, MAIN, scope) {
        conds.push(c);
    }
    q.sql = format!(
        "SELECT {} FROM {} {} WHERE {}",
        select_column_list(model, Some(MAIN)),
        quoted(&model.table),
        quoted(MAIN),
        conds.join(" AND ")
    );
    q
}

/// SELECT list with scope and active filters, ORDER BY pk, LIMIT/OFFSET.
pub fn select_list(
    model: &ModelDef,
    scope: &ScopeFilter,
    active_only: bool,
    limit: u64,
    offset: u64,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = &model.pk_columns[0];
    let mut conds = Vec::new();
    if let Some(c) = scope_condition(&mut q, model, MAIN, scope) {
        conds.push(c);
    }
    if active_only && model.has_column("active") {
        conds.push(format!("{}.{} = TRUE", quoted(MAIN), quoted("active")));
    }
    let where_clause = if conds.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conds.join(" AND "))
    };
    q.sql = format!(
        "SELECT {} FROM {} {}{} ORDER BY {}.{} LIMIT {} OFFSET {}",
        select_column_list(model, Some(MAIN)),
        quoted(&model.table),
        quoted(MAIN),
        where_clause,
        quoted(MAIN),
        quoted(pk),
        limit,
        offset
    );
    q
}

/// SELECT rows WHERE column IN (values), ORDER BY pk. Batch loader for
/// relationship expansion.
pub fn select_where_in(model: &ModelDef, column: &str, values: &[Value]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols = select_column_list(model, None);
    if values.is_empty() {
        q.sql = format!("SELECT {} FROM {} WHERE 1 = 0", cols, quoted(&model.table));
        return q;
    }
    let col = model.get_column(column);
    let placeholders: Vec<String> = values
        .iter()
        .map(|v| {
            let n = q.push_param(v.clone());
            placeholder(col, n)
        })
        .collect();
    let order = model
        .pk_columns
        .iter()
        .map(|c| quoted(c))
        .collect::<Vec<_>>()
        .join(", ");
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY {}",
        cols,
        quoted(&model.table),
        quoted(column),
        placeholders.join(", "),
        order
    );
    q
}

/// INSERT from body: known columns only; columns with a database default are
/// omitted when the body has no value, so the default applies. The surrogate
/// pk is omitted unless the body provides one (seed imports do).
pub fn insert(model: &ModelDef, body: &HashMap<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &model.columns {
        let is_surrogate_pk = !model.junction && c.name == model.pk_columns[0];
        let val = body.get(&c.name).cloned();
        if is_surrogate_pk && val.is_none() {
            continue;
        }
        if val.is_none() && c.has_default {
            continue;
        }
        let n = q.push_param(val.unwrap_or(Value::Null));
        cols.push(quoted(&c.name));
        placeholders.push(placeholder(Some(c), n));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        quoted(&model.table),
        cols.join(", "),
        placeholders.join(", "),
        select_column_list(model, None)
    );
    q
}

/// UPDATE by pk: SET only columns present in body; always touches updated_at.
pub fn update(model: &ModelDef, id: i64, body: &HashMap<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = &model.pk_columns[0];
    let mut sets = Vec::new();
    // deterministic SET order
    let ordered: BTreeMap<_, _> = body.iter().collect();
    for (k, v) in ordered {
        if *k == *pk || k == "updated_at" {
            continue;
        }
        let Some(c) = model.get_column(k) else { continue };
        let n = q.push_param(v.clone());
        sets.push(format!("{} = {}", quoted(k), placeholder(Some(c), n)));
    }
    if model.has_column("updated_at") {
        sets.push(format!("{} = NOW()", quoted("updated_at")));
    }
    if sets.is_empty() {
        return select_one(model, id, &ScopeFilter::Unrestricted);
    }
    let id_param = q.push_param(Value::from(id));
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = ${} RETURNING {}",
        quoted(&model.table),
        sets.join(", "),
        quoted(pk),
        id_param,
        select_column_list(model, None)
    );
    q
}

/// DELETE by pk.
pub fn delete(model: &ModelDef, id: i64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = &model.pk_columns[0];
    let n = q.push_param(Value::from(id));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = ${}",
        quoted(&model.table),
        quoted(pk),
        n
    );
    q
}

/// DELETE rows WHERE column IN (ids). Cascade and junction cleanup.
pub fn delete_where_in(model: &ModelDef, column: &str, ids: &[i64]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let placeholders: Vec<String> = ids
        .iter()
        .map(|id| format!("${}", q.push_param(Value::from(*id))))
        .collect();
    q.sql = format!(
        "DELETE FROM {} WHERE {} IN ({})",
        quoted(&model.table),
        quoted(column),
        placeholders.join(", ")
    );
    q
}

/// UPDATE rows SET column = NULL WHERE column IN (ids). Cascade null-out.
pub fn set_null_where_in(model: &ModelDef, column: &str, ids: &[i64]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let placeholders: Vec<String> = ids
        .iter()
        .map(|id| format!("${}", q.push_param(Value::from(*id))))
        .collect();
    q.sql = format!(
        "UPDATE {} SET {} = NULL WHERE {} IN ({})",
        quoted(&model.table),
        quoted(column),
        quoted(column),
        placeholders.join(", ")
    );
    q
}

/// INSERT a junction link, ignoring duplicates.
pub fn insert_link(junction: &ModelDef, local_fk: &str, remote_fk: &str, local_id: i64, remote_id: i64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let a = q.push_param(Value::from(local_id));
    let b = q.push_param(Value::from(remote_id));
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES (${}, ${}) ON CONFLICT DO NOTHING",
        quoted(&junction.table),
        quoted(local_fk),
        quoted(remote_fk),
        a,
        b
    );
    q
}

/// DELETE all junction links for one parent row.
pub fn delete_links(junction: &ModelDef, local_fk: &str, local_id: i64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Value::from(local_id));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = ${}",
        quoted(&junction.table),
        quoted(local_fk),
        n
    );
    q
}

/// SELECT (local_fk, remote_fk) pairs for a set of parent ids.
pub fn select_links(junction: &ModelDef, local_fk: &str, remote_fk: &str, local_ids: &[Value]) -> QueryBuf {
    let mut q = QueryBuf::new();
    if local_ids.is_empty() {
        q.sql = format!(
            "SELECT {}, {} FROM {} WHERE 1 = 0",
            quoted(local_fk),
            quoted(remote_fk),
            quoted(&junction.table)
        );
        return q;
    }
    let placeholders: Vec<String> = local_ids
        .iter()
        .map(|v| format!("${}", q.push_param(v.clone())))
        .collect();
    q.sql = format!(
        "SELECT {}, {} FROM {} WHERE {} IN ({}) ORDER BY {}, {}",
        quoted(local_fk),
        quoted(remote_fk),
        quoted(&junction.table),
        quoted(local_fk),
        placeholders.join(", "),
        quoted(local_fk),
        quoted(remote_fk)
    );
    q
}

/// The FROM/JOIN/WHERE backbone shared by search and its count query.
struct SearchClauses {
    joins: Vec<String>,
    conds: Vec<String>,
}

fn rel_alias(name: &str) -> String {
    format!("rel_{}", name)
}

/// Resolve a criteria field to `(qualified column sql, column def)`, adding
/// joins for one-level `relationship.column` paths.
fn resolve_field<'a>(
    model: &'a ModelDef,
    registry: &'a ModelRegistry,
    field: &str,
    joins: &mut Vec<String>,
    joined: &mut Vec<String>,
) -> Result<(String, &'a ColumnDef), AppError> {
    if let Some((rel_name, col_name)) = field.split_once('.') {
        let rel = model.get_relationship(rel_name).ok_or_else(|| {
            AppError::BadRequest(format!(
                "relation \"{}\" does not exist on this resource type",
                rel_name
            ))
        })?;
        let target = registry
            .get(&rel.target)
            .ok_or_else(|| AppError::BadRequest(format!("unknown relation target {}", rel.target)))?;
        let col = target
            .get_column(col_name)
            .filter(|c| !c.hidden)
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "field \"{}\" does not exist on this resource type",
                    col_name
                ))
            })?;
        let alias = rel_alias(rel_name);
        if !joined.contains(&rel_name.to_string()) {
            joined.push(rel_name.to_string());
            match &rel.kind {
                RelationKind::ManyToOne { fk_column } => joins.push(format!(
                    "JOIN {} {} ON {}.{} = {}.{}",
                    quoted(&target.table),
                    quoted(&alias),
                    quoted(MAIN),
                    quoted(fk_column),
                    quoted(&alias),
                    quoted(&target.pk_columns[0]),
                )),
                RelationKind::OneToMany { remote_fk } => joins.push(format!(
                    "JOIN {} {} ON {}.{} = {}.{}",
                    quoted(&target.table),
                    quoted(&alias),
                    quoted(&alias),
                    quoted(remote_fk),
                    quoted(MAIN),
                    quoted(&model.pk_columns[0]),
                )),
                RelationKind::ManyToMany {
                    junction,
                    local_fk,
                    remote_fk,
                } => {
                    let junction_model = registry.get(junction).ok_or_else(|| {
                        AppError::BadRequest(format!("unknown junction {}", junction))
                    })?;
                    let jalias = format!("{}_link", alias);
                    joins.push(format!(
                        "JOIN {} {} ON {}.{} = {}.{}",
                        quoted(&junction_model.table),
                        quoted(&jalias),
                        quoted(&jalias),
                        quoted(local_fk),
                        quoted(MAIN),
                        quoted(&model.pk_columns[0]),
                    ));
                    joins.push(format!(
                        "JOIN {} {} ON {}.{} = {}.{}",
                        quoted(&target.table),
                        quoted(&alias),
                        quoted(&alias),
                        quoted(&target.pk_columns[0]),
                        quoted(&jalias),
                        quoted(remote_fk),
                    ));
                }
            }
        }
        Ok((format!("{}.{}", quoted(&alias), quoted(&col.name)), col))
    } else {
        let col = model
            .get_column(field)
            .filter(|c| !c.hidden)
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "field \"{}\" does not exist on this resource type",
                    field
                ))
            })?;
        Ok((format!("{}.{}", quoted(MAIN), quoted(&col.name)), col))
    }
}

fn criteria_condition(
    q: &mut QueryBuf,
    lhs: &str,
    col: &ColumnDef,
    op: &Operator,
    value: &Value,
) -> Result<String, AppError> {
    let bind = |q: &mut QueryBuf, v: &Value| {
        let n = q.push_param(v.clone());
        placeholder(Some(col), n)
    };
    Ok(match op {
        Operator::Eq => format!("{} = {}", lhs, bind(q, value)),
        Operator::Ne => format!("{} != {}", lhs, bind(q, value)),
        Operator::In => {
            let Value::Array(items) = value else {
                return Err(AppError::BadRequest("'in' operator requires a list value".into()));
            };
            if items.is_empty() {
                return Ok("1 = 0".to_string());
            }
            let placeholders: Vec<String> = items.iter().map(|v| bind(q, v)).collect();
            format!("{} IN ({})", lhs, placeholders.join(", "))
        }
        Operator::Gt => format!("{} > {}", lhs, bind(q, value)),
        Operator::Gte => format!("{} >= {}", lhs, bind(q, value)),
        Operator::Lt => format!("{} < {}", lhs, bind(q, value)),
        Operator::Lte => format!("{} <= {}", lhs, bind(q, value)),
        Operator::Like | Operator::ILike => {
            let Value::String(s) = value else {
                return Err(AppError::BadRequest("'like' operator requires a string value".into()));
            };
            let n = q.push_param(Value::String(format!("%{}%", s)));
            let kw = if matches!(op, Operator::Like) { "LIKE" } else { "ILIKE" };
            format!("{} {} ${}", lhs, kw, n)
        }
    })
}

fn search_clauses(
    q: &mut QueryBuf,
    model: &ModelDef,
    registry: &ModelRegistry,
    query: &SearchQuery,
    scope: &ScopeFilter,
) -> Result<SearchClauses, AppError> {
    let mut joins = Vec::new();
    let mut joined = Vec::new();
    let mut conds = Vec::new();

    for criteria in &query.and {
        let (lhs, col) = resolve_field(model, registry, &criteria.field, &mut joins, &mut joined)?;
        conds.push(criteria_condition(q, &lhs, col, &criteria.operator, &criteria.value)?);
    }
    let mut or_parts = Vec::new();
    for criteria in &query.or {
        let (lhs, col) = resolve_field(model, registry, &criteria.field, &mut joins, &mut joined)?;
        or_parts.push(criteria_condition(q, &lhs, col, &criteria.operator, &criteria.value)?);
    }
    if !or_parts.is_empty() {
        conds.push(format!("({})", or_parts.join(" OR ")));
    }

    // unless a criterion mentions `active`, hide inactive rows
    let mentions_active = query
        .and
        .iter()
        .chain(query.or.iter())
        .any(|c| c.field == "active");
    if !mentions_active && model.has_column("active") {
        conds.push(format!("{}.{} = TRUE", quoted(MAIN), quoted("active")));
    }

    if let Some(c) = scope_condition(q, model, MAIN, scope) {
        conds.push(c);
    }
    Ok(SearchClauses { joins, conds })
}

/// Full search SELECT: criteria, joins, scope, order, pagination.
pub fn search(
    model: &ModelDef,
    registry: &ModelRegistry,
    query: &SearchQuery,
    order_by: Option<&OrderBy>,
    scope: &ScopeFilter,
    limit: u64,
    offset: u64,
) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let clauses = search_clauses(&mut q, model, registry, query, scope)?;

    let order_clause = match order_by {
        Some(ob) => {
            let col = model.get_column(&ob.field).filter(|c| !c.hidden).ok_or_else(|| {
                AppError::BadRequest(format!(
                    "field \"{}\" does not exist on this resource type",
                    ob.field
                ))
            })?;
            let dir = match ob.direction {
                OrderDirection::Asc => "ASC",
                OrderDirection::Desc => "DESC",
            };
            format!("ORDER BY {}.{} {}", quoted(MAIN), quoted(&col.name), dir)
        }
        None => format!("ORDER BY {}.{}", quoted(MAIN), quoted(&model.pk_columns[0])),
    };
    let where_clause = if clauses.conds.is_empty() {
        String::new()
    } else {
        format!("WHERE {} ", clauses.conds.join(" AND "))
    };
    q.sql = format!(
        "SELECT {} FROM {} {} {}{}{} LIMIT {} OFFSET {}",
        select_column_list(model, Some(MAIN)),
        quoted(&model.table),
        quoted(MAIN),
        clauses
            .joins
            .iter()
            .map(|j| format!("{} ", j))
            .collect::<String>(),
        where_clause,
        order_clause,
        limit,
        offset
    );
    Ok(q)
}

/// COUNT over the same joins and conditions, ignoring pagination.
pub fn search_count(
    model: &ModelDef,
    registry: &ModelRegistry,
    query: &SearchQuery,
    scope: &ScopeFilter,
) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let clauses = search_clauses(&mut q, model, registry, query, scope)?;
    let where_clause = if clauses.conds.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.conds.join(" AND "))
    };
    q.sql = format!(
        "SELECT COUNT(*) FROM {} {}{}{}",
        quoted(&model.table),
        quoted(MAIN),
        clauses
            .joins
            .iter()
            .map(|j| format!(" {}", j))
            .collect::<String>(),
        where_clause
    );
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, ColumnType, ModelDef, RelationshipDef};
    use crate::service::search::SearchCriteria;
    use serde_json::json;

    fn registry() -> ModelRegistry {
        let vehicle = ModelDef::new("vehicle")
            .column(ColumnDef::new("license_plate", ColumnType::Text).not_null().unique())
            .column(ColumnDef::new("year", ColumnType::Integer))
            .relationship(RelationshipDef::one_to_many("locations", "location_log", "vehicle_id"));
        let log = ModelDef::new("location_log")
            .column(ColumnDef::new("vehicle_id", ColumnType::Integer).references("vehicle"))
            .column(ColumnDef::new("recorded_at", ColumnType::DateTime))
            .relationship(RelationshipDef::many_to_one("vehicle", "vehicle", "vehicle_id"));
        let user = crate::models::user::user();
        let user_role = crate::models::user::user_role();
        let role = crate::models::role::role();
        let implied = crate::models::role::implied_role();
        let org = crate::models::organization::organization();
        ModelRegistry::build(vec![vehicle, log, user, user_role, role, implied, org]).unwrap()
    }

    #[test]
    fn insert_skips_defaults_and_pk() {
        let registry = registry();
        let model = registry.get("vehicle").unwrap();
        let mut body = HashMap::new();
        body.insert("license_plate".to_string(), json!("AB-123"));
        body.insert("owner_id".to_string(), json!(1));
        body.insert("organization_id".to_string(), json!(1));
        let q = insert(model, &body);
        assert!(q.sql.starts_with("INSERT INTO \"vehicle\""));
        assert!(!q.sql.contains("\"id\""), "surrogate pk must be omitted: {}", q.sql);
        assert!(!q.sql.contains("\"created_at\""), "defaulted col must be omitted: {}", q.sql);
        // year and string_id have no default and no value: explicit NULL
        assert!(q.sql.contains("\"year\""));
        assert!(q.sql.contains("\"string_id\""));
        assert!(q.sql.contains("RETURNING"));
        assert_eq!(q.params.len(), 5);
    }

    #[test]
    fn update_touches_updated_at_and_skips_unknown() {
        let registry = registry();
        let model = registry.get("vehicle").unwrap();
        let mut body = HashMap::new();
        body.insert("year".to_string(), json!(2021));
        body.insert("bogus".to_string(), json!("x"));
        let q = update(model, 7, &body);
        assert!(q.sql.contains("\"year\" = $1"));
        assert!(q.sql.contains("\"updated_at\" = NOW()"));
        assert!(!q.sql.contains("bogus"));
        assert_eq!(q.params.last().unwrap(), &json!(7));
    }

    #[test]
    fn select_one_applies_scope() {
        let registry = registry();
        let model = registry.get("vehicle").unwrap();
        let q = select_one(model, 3, &ScopeFilter::Organization(9));
        assert!(q.sql.contains("\"main\".\"organization_id\" = $2"));
        assert_eq!(q.params, vec![json!(3), json!(9)]);
    }

    #[test]
    fn search_adds_active_filter_and_or_group() {
        let registry = registry();
        let model = registry.get("vehicle").unwrap();
        let query = SearchQuery {
            and: vec![SearchCriteria {
                field: "year".into(),
                operator: Operator::Gte,
                value: json!(2020),
            }],
            or: vec![
                SearchCriteria {
                    field: "license_plate".into(),
                    operator: Operator::ILike,
                    value: json!("ab"),
                },
                SearchCriteria {
                    field: "license_plate".into(),
                    operator: Operator::Like,
                    value: json!("XY"),
                },
            ],
        };
        let q = search(model, &registry, &query, None, &ScopeFilter::Unrestricted, 100, 0).unwrap();
        assert!(q.sql.contains("\"main\".\"year\" >= $1"));
        assert!(q.sql.contains("ILIKE $2"));
        assert!(q.sql.contains("OR"));
        assert!(q.sql.contains("\"main\".\"active\" = TRUE"));
        assert_eq!(q.params[1], json!("%ab%"));
    }

    #[test]
    fn search_active_criterion_disables_default_filter() {
        let registry = registry();
        let model = registry.get("vehicle").unwrap();
        let query = SearchQuery {
            and: vec![SearchCriteria {
                field: "active".into(),
                operator: Operator::Eq,
                value: json!(false),
            }],
            or: vec![],
        };
        let q = search(model, &registry, &query, None, &ScopeFilter::Unrestricted, 10, 0).unwrap();
        assert!(!q.sql.contains("\"active\" = TRUE"));
    }

    #[test]
    fn search_joins_relationship_path() {
        let registry = registry();
        let model = registry.get("location_log").unwrap();
        let query = SearchQuery {
            and: vec![SearchCriteria {
                field: "vehicle.license_plate".into(),
                operator: Operator::Eq,
                value: json!("AB-123"),
            }],
            or: vec![],
        };
        let q = search(model, &registry, &query, None, &ScopeFilter::Unrestricted, 10, 0).unwrap();
        assert!(q.sql.contains("JOIN \"vehicle\" \"rel_vehicle\" ON \"main\".\"vehicle_id\" = \"rel_vehicle\".\"id\""));
        assert!(q.sql.contains("\"rel_vehicle\".\"license_plate\" = $1"));
    }

    #[test]
    fn search_rejects_unknown_field() {
        let registry = registry();
        let model = registry.get("vehicle").unwrap();
        let query = SearchQuery {
            and: vec![SearchCriteria {
                field: "no_such".into(),
                operator: Operator::Eq,
                value: json!(1),
            }],
            or: vec![],
        };
        assert!(search(model, &registry, &query, None, &ScopeFilter::Unrestricted, 10, 0).is_err());
    }

    #[test]
    fn search_rejects_hidden_field() {
        let registry = registry();
        let model = registry.get("user").unwrap();
        let query = SearchQuery {
            and: vec![SearchCriteria {
                field: "hashed_password".into(),
                operator: Operator::Eq,
                value: json!("x"),
            }],
            or: vec![],
        };
        assert!(search(model, &registry, &query, None, &ScopeFilter::Unrestricted, 10, 0).is_err());
    }

    #[test]
    fn count_matches_search_conditions() {
        let registry = registry();
        let model = registry.get("vehicle").unwrap();
        let query = SearchQuery::default();
        let q = search_count(model, &registry, &query, &ScopeFilter::Owner(5)).unwrap();
        assert!(q.sql.starts_with("SELECT COUNT(*) FROM \"vehicle\""));
        assert!(q.sql.contains("\"main\".\"owner_id\" = $1"));
    }

    #[test]
    fn in_operator_binds_each_value() {
        let registry = registry();
        let model = registry.get("vehicle").unwrap();
        let query = SearchQuery {
            and: vec![SearchCriteria {
                field: "year".into(),
                operator: Operator::In,
                value: json!([2019, 2020]),
            }],
            or: vec![],
        };
        let q = search(model, &registry, &query, None, &ScopeFilter::Unrestricted, 10, 0).unwrap();
        assert!(q.sql.contains("IN ($1, $2)"));
        assert_eq!(q.params, vec![json!(2019), json!(2020)]);
    }

    #[test]
    fn hidden_columns_never_selected() {
        let registry = registry();
        let model = registry.get("user").unwrap();
        let q = select_one(model, 1, &ScopeFilter::Unrestricted);
        assert!(!q.sql.contains("hashed_password"));
    }
}
