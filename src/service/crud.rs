//! Permission-checked CRUD execution against PostgreSQL.
//!
//! Every operation resolves the caller's permission scope first, then narrows
//! row visibility through ownership and organization columns. Bodies may link
//! related records: many-to-many as `[{id}]` arrays, one-to-many as nested
//! create/update bodies, and foreign keys as `"table/string_id"` reference
//! strings.

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::model::{ModelDef, ModelRegistry, RelationKind, RelationshipDef};
use crate::schema::generate;
use crate::service::cascade;
use crate::service::permission::{resolve_scope, PermissionAction, PermissionScope, ScopeFilter};
use crate::service::search::{BulkDeleteResponse, DeleteResponse, OrderBy, SearchQuery, SearchResult};
use crate::sql::{self, PgBindValue, QueryBuf};
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const DEFAULT_LIMIT: u64 = 100;
pub const MAX_LIMIT: u64 = 1000;
/// Effectively unpaginated (bulk delete and export look at the whole match).
const UNBOUNDED: u64 = i64::MAX as u64;

pub struct CrudService;

impl CrudService {
    /// Fetch one row by id, enforcing the read scope. Own-scoped callers see
    /// their own rows (or themselves on the user table, their organization on
    /// the organization table); org-scoped callers their organization's rows.
    pub async fn get_one(
        pool: &PgPool,
        registry: &ModelRegistry,
        model: &ModelDef,
        user: &CurrentUser,
        id: i64,
    ) -> Result<Value, AppError> {
        let scope = check_permission(model, PermissionAction::Read, user)?;
        enforce_singleton_scope(model, scope, user, id)?;
        let filter = scope_filter(model, scope, user);
        let q = sql::select_one(model, id, &filter);
        let mut row = Self::query_one(pool, &q)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", model.table, id)))?;
        expand_row(pool, registry, model, &mut row).await?;
        Ok(row)
    }

    /// List rows visible to the caller. Inactive rows are hidden.
    pub async fn get_all(
        pool: &PgPool,
        registry: &ModelRegistry,
        model: &ModelDef,
        user: &CurrentUser,
        skip: u64,
        limit: Option<u64>,
    ) -> Result<Vec<Value>, AppError> {
        let scope = check_permission(model, PermissionAction::Read, user)?;
        let filter = scope_filter(model, scope, user);
        let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let q = sql::select_list(model, &filter, true, limit, skip);
        let mut rows = Self::query_many(pool, &q).await?;
        expand_rows(pool, registry, model, &mut rows, vec![]).await?;
        Ok(rows)
    }

    /// Criteria search with ordering and pagination; returns the total match
    /// count alongside the page.
    pub async fn search(
        pool: &PgPool,
        registry: &ModelRegistry,
        model: &ModelDef,
        user: &CurrentUser,
        query: &SearchQuery,
        order_by: Option<&OrderBy>,
        skip: u64,
        limit: Option<u64>,
    ) -> Result<SearchResult, AppError> {
        let scope = check_permission(model, PermissionAction::Read, user)?;
        let filter = scope_filter(model, scope, user);
        let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let count_q = sql::search_count(model, registry, query, &filter)?;
        let total = Self::query_count(pool, &count_q).await?;
        let q = sql::search(model, registry, query, order_by, &filter, limit, skip)?;
        let mut rows = Self::query_many(pool, &q).await?;
        expand_rows(pool, registry, model, &mut rows, vec![]).await?;
        Ok(SearchResult { total, data: rows })
    }

    /// Create a row. Ownership is always stamped with the caller; the
    /// organization is the caller's unless a super admin supplies one.
    pub fn create<'a>(
        pool: &'a PgPool,
        registry: &'a ModelRegistry,
        model: &'a ModelDef,
        user: &'a CurrentUser,
        mut body: HashMap<String, Value>,
    ) -> BoxFut<'a, Result<Value, AppError>> {
        Box::pin(async move {
            check_permission(model, PermissionAction::Create, user)?;

            if model.has_column("owner_id") {
                body.insert("owner_id".to_string(), Value::from(user.id));
            }
            if model.has_column("organization_id") {
                let provided = body.get("organization_id").filter(|v| !v.is_null()).is_some();
                if !user.is_super_admin() || !provided {
                    body.insert("organization_id".to_string(), org_value(user));
                }
            }

            resolve_reference_strings(pool, registry, model, &mut body).await?;
            let (links, children) = take_relationship_values(model, &mut body);
            generate::validate_create(model, &body)?;
            body.retain(|k, _| model.has_column(k));

            let q = sql::insert(model, &body);
            let row = Self::query_one(pool, &q)
                .await?
                .ok_or_else(|| AppError::Internal("insert returned no row".into()))?;
            let id = row_id(&row)?;

            for (rel, records) in links {
                Self::replace_links(pool, registry, rel, id, &records).await?;
            }
            for (rel, records) in children {
                let RelationKind::OneToMany { remote_fk } = &rel.kind else { continue };
                let Some(child_model) = registry.get(&rel.target) else { continue };
                for record in records {
                    let Some(mut child) = object_body(record) else { continue };
                    child.insert(remote_fk.clone(), Value::from(id));
                    Self::create(pool, registry, child_model, user, child).await?;
                }
            }

            Self::fetch_expanded(pool, registry, model, id).await
        })
    }

    /// Update a row. System records are immutable; own/org scopes must match
    /// the caller. Linked sets are replaced, nested children upserted, and
    /// children missing from a nested array unlinked or deleted depending on
    /// the foreign key's nullability.
    pub fn update<'a>(
        pool: &'a PgPool,
        registry: &'a ModelRegistry,
        model: &'a ModelDef,
        user: &'a CurrentUser,
        id: i64,
        mut body: HashMap<String, Value>,
    ) -> BoxFut<'a, Result<Value, AppError>> {
        Box::pin(async move {
            let q = sql::select_one(model, id, &ScopeFilter::Unrestricted);
            let current = Self::query_one(pool, &q)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{} {}", model.table, id)))?;
            guard_system_record(&current)?;
            let scope = check_permission(model, PermissionAction::Write, user)?;
            enforce_instance_scope(model, &current, scope, user, "update")?;

            generate::validate_update(model, &body)?;
            resolve_reference_strings(pool, registry, model, &mut body).await?;
            let (links, children) = take_relationship_values(model, &mut body);

            for (rel, records) in links {
                Self::replace_links(pool, registry, rel, id, &records).await?;
            }
            for (rel, records) in children {
                Self::sync_children(pool, registry, rel, user, id, records).await?;
            }

            body.retain(|k, _| model.has_column(k) && k != "id");
            if !body.is_empty() {
                let q = sql::update(model, id, &body);
                Self::query_one(pool, &q).await?;
            }

            Self::fetch_expanded(pool, registry, model, id).await
        })
    }

    /// Delete a row. Dependent records found through the registry's foreign
    /// keys abort the delete unless `force` is set, in which case they are
    /// deleted (non-nullable references, recursively) or nulled out.
    pub async fn delete(
        pool: &PgPool,
        registry: &ModelRegistry,
        model: &ModelDef,
        user: &CurrentUser,
        id: i64,
        force: bool,
    ) -> Result<DeleteResponse, AppError> {
        let q = sql::select_one(model, id, &ScopeFilter::Unrestricted);
        let current = Self::query_one(pool, &q)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", model.table, id)))?;
        guard_system_record(&current)?;
        let scope = check_permission(model, PermissionAction::Delete, user)?;
        enforce_instance_scope(model, &current, scope, user, "delete")?;

        let affected = cascade::collect(pool, registry, model, &[id]).await?;
        if affected.has_dependencies() && !force {
            return Err(AppError::BadRequest("This record has dependencies.".into()));
        }
        cascade::execute(pool, registry, &affected).await?;
        cascade::delete_junction_links(pool, registry, model, &[id]).await?;
        let q = sql::delete(model, id);
        Self::execute(pool, &q).await?;
        Ok(DeleteResponse { success: true })
    }

    /// Delete every row matching a search query (scope-filtered). Without
    /// `force`, rows referenced elsewhere surface the foreign-key conflict
    /// as a 409.
    pub async fn bulk_delete(
        pool: &PgPool,
        registry: &ModelRegistry,
        model: &ModelDef,
        user: &CurrentUser,
        query: &SearchQuery,
        force: bool,
    ) -> Result<BulkDeleteResponse, AppError> {
        let scope = check_permission(model, PermissionAction::Delete, user)?;
        let filter = scope_filter(model, scope, user);
        let q = sql::search(model, registry, query, None, &filter, UNBOUNDED, 0)?;
        let rows = Self::query_many(pool, &q).await?;
        let ids: Vec<i64> = rows.iter().filter_map(|r| row_id(r).ok()).collect();
        if ids.is_empty() {
            return Ok(BulkDeleteResponse {
                success: true,
                deleted_count: 0,
            });
        }
        if force {
            let affected = cascade::collect(pool, registry, model, &ids).await?;
            cascade::execute(pool, registry, &affected).await?;
        }
        cascade::delete_junction_links(pool, registry, model, &ids).await?;
        let q = sql::delete_where_in(model, &model.pk_columns[0], &ids);
        let deleted_count = Self::execute(pool, &q).await?;
        Ok(BulkDeleteResponse {
            success: true,
            deleted_count,
        })
    }

    /// Re-read a row without scope narrowing and expand its relationships.
    pub async fn fetch_expanded(
        pool: &PgPool,
        registry: &ModelRegistry,
        model: &ModelDef,
        id: i64,
    ) -> Result<Value, AppError> {
        let q = sql::select_one(model, id, &ScopeFilter::Unrestricted);
        let mut row = Self::query_one(pool, &q)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", model.table, id)))?;
        expand_row(pool, registry, model, &mut row).await?;
        Ok(row)
    }

    /// Replace the full link set of a many-to-many relationship.
    async fn replace_links(
        pool: &PgPool,
        registry: &ModelRegistry,
        rel: &RelationshipDef,
        id: i64,
        records: &[Value],
    ) -> Result<(), AppError> {
        let RelationKind::ManyToMany {
            junction,
            local_fk,
            remote_fk,
        } = &rel.kind
        else {
            return Ok(());
        };
        let Some(junction_model) = registry.get(junction) else {
            return Ok(());
        };
        let q = sql::delete_links(junction_model, local_fk, id);
        Self::execute(pool, &q).await?;
        for record in records {
            let remote_id = record
                .get("id")
                .and_then(Value::as_i64)
                .or_else(|| record.as_i64())
                .ok_or_else(|| {
                    AppError::Validation(format!("each linked {} record must have an 'id'", rel.name))
                })?;
            let q = sql::insert_link(junction_model, local_fk, remote_fk, id, remote_id);
            Self::execute(pool, &q).await?;
        }
        Ok(())
    }

    /// Upsert one-to-many children from an update body: entries without an id
    /// are created, entries with one updated; existing children missing from
    /// the array are unlinked when the foreign key is nullable, deleted
    /// otherwise.
    async fn sync_children(
        pool: &PgPool,
        registry: &ModelRegistry,
        rel: &RelationshipDef,
        user: &CurrentUser,
        id: i64,
        records: Vec<Value>,
    ) -> Result<(), AppError> {
        let RelationKind::OneToMany { remote_fk } = &rel.kind else {
            return Ok(());
        };
        let Some(child_model) = registry.get(&rel.target) else {
            return Ok(());
        };

        let q = sql::select_where_in(child_model, remote_fk, &[Value::from(id)]);
        let existing = Self::query_many(pool, &q).await?;
        let kept_ids: Vec<i64> = records
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect();

        for record in records {
            let Some(mut child) = object_body(record) else { continue };
            match child.get("id").and_then(Value::as_i64) {
                None => {
                    child.insert(remote_fk.clone(), Value::from(id));
                    Self::create(pool, registry, child_model, user, child).await?;
                }
                Some(child_id) => {
                    child.remove("id");
                    Self::update(pool, registry, child_model, user, child_id, child).await?;
                }
            }
        }

        let fk_nullable = child_model.get_column(remote_fk).map(|c| c.nullable).unwrap_or(false);
        for row in existing {
            let child_id = row_id(&row)?;
            if kept_ids.contains(&child_id) {
                continue;
            }
            if fk_nullable {
                let mut unlink = HashMap::new();
                unlink.insert(remote_fk.clone(), Value::Null);
                Self::update(pool, registry, child_model, user, child_id, unlink).await?;
            } else {
                cascade::delete_junction_links(pool, registry, child_model, &[child_id]).await?;
                let q = sql::delete(child_model, child_id);
                Self::execute(pool, &q).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn query_one(pool: &PgPool, q: &QueryBuf) -> Result<Option<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let row = query.fetch_optional(pool).await?;
        Ok(row.map(|r| row_to_json(&r)))
    }

    pub(crate) async fn query_many(pool: &PgPool, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let rows = query.fetch_all(pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    pub(crate) async fn query_count(pool: &PgPool, q: &QueryBuf) -> Result<i64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        Ok(query.fetch_one(pool).await?)
    }

    pub(crate) async fn execute(pool: &PgPool, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        Ok(query.execute(pool).await?.rows_affected())
    }
}

pub fn check_permission(
    model: &ModelDef,
    action: PermissionAction,
    user: &CurrentUser,
) -> Result<PermissionScope, AppError> {
    let scope = resolve_scope(&user.permissions, &model.table, action);
    if scope == PermissionScope::None {
        return Err(AppError::Forbidden(format!(
            "You do not have permission to {} this resource type: {}",
            action, model.table
        )));
    }
    Ok(scope)
}

/// Row-set narrowing for list/search reads.
pub fn scope_filter(model: &ModelDef, scope: PermissionScope, user: &CurrentUser) -> ScopeFilter {
    match scope {
        PermissionScope::All | PermissionScope::None => ScopeFilter::Unrestricted,
        PermissionScope::Org => {
            if model.has_column("organization_id") {
                match user.organization_id {
                    Some(org) => ScopeFilter::Organization(org),
                    None => ScopeFilter::Unrestricted,
                }
            } else if model.table == "organization" {
                match user.organization_id {
                    Some(org) => ScopeFilter::SelfRow(org),
                    None => ScopeFilter::Unrestricted,
                }
            } else {
                ScopeFilter::Unrestricted
            }
        }
        PermissionScope::Own => {
            if model.has_column("owner_id") {
                ScopeFilter::Owner(user.id)
            } else if model.table == "user" {
                ScopeFilter::SelfRow(user.id)
            } else if model.table == "organization" {
                match user.organization_id {
                    Some(org) => ScopeFilter::SelfRow(org),
                    None => ScopeFilter::Unrestricted,
                }
            } else {
                ScopeFilter::Unrestricted
            }
        }
    }
}

/// The user and organization tables answer reads about *other* rows with 403
/// rather than filtering down to an empty result.
fn enforce_singleton_scope(
    model: &ModelDef,
    scope: PermissionScope,
    user: &CurrentUser,
    id: i64,
) -> Result<(), AppError> {
    let denied = match scope {
        PermissionScope::Own => {
            (model.table == "user" && id != user.id)
                || (model.table == "organization" && user.organization_id != Some(id))
        }
        PermissionScope::Org => {
            model.table == "organization"
                && !model.has_column("organization_id")
                && user.organization_id != Some(id)
        }
        _ => false,
    };
    if denied {
        return Err(AppError::Forbidden(
            "You do not have permission to read this resource".into(),
        ));
    }
    Ok(())
}

fn enforce_instance_scope(
    model: &ModelDef,
    row: &Value,
    scope: PermissionScope,
    user: &CurrentUser,
    verb: &str,
) -> Result<(), AppError> {
    let denied = match scope {
        PermissionScope::Own => {
            if model.has_column("owner_id") {
                row.get("owner_id").and_then(Value::as_i64) != Some(user.id)
            } else if model.table == "user" {
                row_id(row).ok() != Some(user.id)
            } else {
                false
            }
        }
        PermissionScope::Org => {
            model.has_column("organization_id")
                && row.get("organization_id").and_then(Value::as_i64) != user.organization_id
        }
        _ => false,
    };
    if denied {
        return Err(AppError::Forbidden(format!(
            "You do not have permission to {} this resource",
            verb
        )));
    }
    Ok(())
}

fn guard_system_record(row: &Value) -> Result<(), AppError> {
    if row.get("system").and_then(Value::as_bool) == Some(true) {
        return Err(AppError::Forbidden("System records cannot be modified.".into()));
    }
    Ok(())
}

fn org_value(user: &CurrentUser) -> Value {
    user.organization_id.map(Value::from).unwrap_or(Value::Null)
}

pub fn row_id(row: &Value) -> Result<i64, AppError> {
    row.get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| AppError::Internal("row has no id".into()))
}

pub fn object_body(value: Value) -> Option<HashMap<String, Value>> {
    match value {
        Value::Object(m) => Some(m.into_iter().collect()),
        _ => None,
    }
}

/// Pop relationship keys out of the body. Returns (many-to-many link sets,
/// one-to-many child sets), each an array of records.
fn take_relationship_values<'m>(
    model: &'m ModelDef,
    body: &mut HashMap<String, Value>,
) -> (
    Vec<(&'m RelationshipDef, Vec<Value>)>,
    Vec<(&'m RelationshipDef, Vec<Value>)>,
) {
    let mut links = Vec::new();
    let mut children = Vec::new();
    for rel in &model.relationships {
        let Some(value) = body.remove(&rel.name) else { continue };
        let Value::Array(records) = value else { continue };
        match rel.kind {
            RelationKind::ManyToMany { .. } => links.push((rel, records)),
            RelationKind::OneToMany { .. } => children.push((rel, records)),
            RelationKind::ManyToOne { .. } => {}
        }
    }
    (links, children)
}

/// Resolve `"table/string_id"` reference strings on foreign-key columns to
/// the referenced record's id. Unresolvable references are left in place and
/// logged; the database rejects them downstream.
async fn resolve_reference_strings(
    pool: &PgPool,
    registry: &ModelRegistry,
    model: &ModelDef,
    body: &mut HashMap<String, Value>,
) -> Result<(), AppError> {
    for col in model.columns.iter().filter(|c| c.references.is_some()) {
        let Some(Value::String(raw)) = body.get(&col.name) else { continue };
        let Some((table, string_id)) = raw.split_once('/') else { continue };
        if string_id.contains('/') {
            continue;
        }
        let Some(target) = registry.get(table) else { continue };
        if !target.has_column("string_id") {
            continue;
        }
        let id: Option<(i64,)> = sqlx::query_as(&format!(
            r#"SELECT id::bigint FROM "{}" WHERE string_id = $1"#,
            target.table
        ))
        .bind(string_id)
        .fetch_optional(pool)
        .await?;
        match id {
            Some((id,)) => {
                body.insert(col.name.clone(), Value::from(id));
            }
            None => {
                tracing::error!(reference = %raw, column = %col.name, "record reference not found");
            }
        }
    }
    Ok(())
}

async fn expand_row(
    pool: &PgPool,
    registry: &ModelRegistry,
    model: &ModelDef,
    row: &mut Value,
) -> Result<(), AppError> {
    let mut rows = vec![std::mem::take(row)];
    expand_rows(pool, registry, model, &mut rows, vec![]).await?;
    *row = rows.pop().unwrap_or(Value::Null);
    Ok(())
}

/// Attach related records under each relationship name, recursively, guarded
/// by the list of models already on the expansion path (mirrors the generated
/// read schema).
fn expand_rows<'a>(
    pool: &'a PgPool,
    registry: &'a ModelRegistry,
    model: &'a ModelDef,
    rows: &'a mut Vec<Value>,
    visited: Vec<String>,
) -> BoxFut<'a, Result<(), AppError>> {
    Box::pin(async move {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tree = visited;
        if !tree.iter().any(|t| *t == model.table) {
            tree.push(model.table.clone());
        }
        let ids: Vec<Value> = rows
            .iter()
            .filter_map(|r| r.get("id").cloned())
            .filter(|v| !v.is_null())
            .collect();

        for rel in &model.relationships {
            if tree.iter().any(|t| *t == rel.target) {
                continue;
            }
            let Some(target) = registry.get(&rel.target) else { continue };
            match &rel.kind {
                RelationKind::ManyToOne { fk_column } => {
                    let mut fks: Vec<Value> = rows
                        .iter()
                        .filter_map(|r| r.get(fk_column.as_str()).cloned())
                        .filter(|v| !v.is_null())
                        .collect();
                    fks.sort_by(cmp_values);
                    fks.dedup();
                    let q = sql::select_where_in(target, &target.pk_columns[0], &fks);
                    let mut related = CrudService::query_many(pool, &q).await?;
                    expand_rows(pool, registry, target, &mut related, tree.clone()).await?;
                    let by_id: HashMap<i64, Value> = related
                        .into_iter()
                        .filter_map(|r| row_id(&r).ok().map(|id| (id, r)))
                        .collect();
                    for row in rows.iter_mut() {
                        let fk = row.get(fk_column.as_str()).and_then(Value::as_i64);
                        let related = fk.and_then(|id| by_id.get(&id).cloned()).unwrap_or(Value::Null);
                        insert_key(row, &rel.name, related);
                    }
                }
                RelationKind::OneToMany { remote_fk } => {
                    let q = sql::select_where_in(target, remote_fk, &ids);
                    let mut related = CrudService::query_many(pool, &q).await?;
                    expand_rows(pool, registry, target, &mut related, tree.clone()).await?;
                    let mut grouped: HashMap<i64, Vec<Value>> = HashMap::new();
                    for r in related {
                        if let Some(parent) = r.get(remote_fk.as_str()).and_then(Value::as_i64) {
                            grouped.entry(parent).or_default().push(r);
                        }
                    }
                    for row in rows.iter_mut() {
                        let id = row_id(row).unwrap_or_default();
                        let items = grouped.remove(&id).unwrap_or_default();
                        insert_key(row, &rel.name, Value::Array(items));
                    }
                }
                RelationKind::ManyToMany {
                    junction,
                    local_fk,
                    remote_fk,
                } => {
                    let Some(junction_model) = registry.get(junction) else { continue };
                    let q = sql::select_links(junction_model, local_fk, remote_fk, &ids);
                    let pairs = CrudService::query_many(pool, &q).await?;
                    let mut remote_ids: Vec<Value> = pairs
                        .iter()
                        .filter_map(|p| p.get(remote_fk.as_str()).cloned())
                        .collect();
                    remote_ids.sort_by(cmp_values);
                    remote_ids.dedup();
                    let q = sql::select_where_in(target, &target.pk_columns[0], &remote_ids);
                    let mut related = CrudService::query_many(pool, &q).await?;
                    expand_rows(pool, registry, target, &mut related, tree.clone()).await?;
                    let by_id: HashMap<i64, Value> = related
                        .into_iter()
                        .filter_map(|r| row_id(&r).ok().map(|id| (id, r)))
                        .collect();
                    let mut grouped: HashMap<i64, Vec<Value>> = HashMap::new();
                    for pair in &pairs {
                        let local = pair.get(local_fk.as_str()).and_then(Value::as_i64);
                        let remote = pair.get(remote_fk.as_str()).and_then(Value::as_i64);
                        if let (Some(local), Some(remote)) = (local, remote) {
                            if let Some(r) = by_id.get(&remote) {
                                grouped.entry(local).or_default().push(r.clone());
                            }
                        }
                    }
                    for row in rows.iter_mut() {
                        let id = row_id(row).unwrap_or_default();
                        let items = grouped.remove(&id).unwrap_or_default();
                        insert_key(row, &rel.name, Value::Array(items));
                    }
                }
            }
        }
        Ok(())
    })
}

fn insert_key(row: &mut Value, key: &str, value: Value) {
    if let Value::Object(map) = row {
        map.insert(key.to_string(), value);
    }
}

fn cmp_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

pub(crate) fn row_to_json(row: &sqlx::postgres::PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, ColumnType};
    use crate::service::permission::Permission;
    use serde_json::json;

    fn user_with(perms: &[&str]) -> CurrentUser {
        CurrentUser {
            id: 10,
            username: "alice".into(),
            email: Some("alice@example.com".into()),
            string_id: None,
            organization_id: Some(2),
            roles: vec![],
            permissions: perms.iter().filter_map(|p| Permission::parse(p)).collect(),
        }
    }

    fn vehicle() -> ModelDef {
        ModelDef::new("vehicle").column(ColumnDef::new("license_plate", ColumnType::Text).not_null())
    }

    #[test]
    fn permission_denied_maps_to_forbidden() {
        let user = user_with(&["depot:read:org"]);
        let err = check_permission(&vehicle(), PermissionAction::Read, &user).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn scope_filter_prefers_declared_columns() {
        let model = vehicle();
        let user = user_with(&[]);
        assert_eq!(
            scope_filter(&model, PermissionScope::Own, &user),
            ScopeFilter::Owner(10)
        );
        assert_eq!(
            scope_filter(&model, PermissionScope::Org, &user),
            ScopeFilter::Organization(2)
        );
        assert_eq!(
            scope_filter(&model, PermissionScope::All, &user),
            ScopeFilter::Unrestricted
        );
    }

    #[test]
    fn own_scope_on_user_table_is_self() {
        let user_model = crate::models::user::user();
        let user = user_with(&[]);
        assert_eq!(
            scope_filter(&user_model, PermissionScope::Own, &user),
            ScopeFilter::SelfRow(10)
        );
    }

    #[test]
    fn singleton_scope_rejects_foreign_user_read() {
        let user_model = crate::models::user::user();
        let user = user_with(&[]);
        assert!(enforce_singleton_scope(&user_model, PermissionScope::Own, &user, 10).is_ok());
        assert!(enforce_singleton_scope(&user_model, PermissionScope::Own, &user, 11).is_err());
    }

    #[test]
    fn instance_scope_checks_owner_and_org() {
        let model = vehicle();
        let user = user_with(&[]);
        let own_row = json!({"id": 1, "owner_id": 10, "organization_id": 2});
        let foreign_row = json!({"id": 2, "owner_id": 11, "organization_id": 3});
        assert!(enforce_instance_scope(&model, &own_row, PermissionScope::Own, &user, "update").is_ok());
        assert!(enforce_instance_scope(&model, &foreign_row, PermissionScope::Own, &user, "update").is_err());
        assert!(enforce_instance_scope(&model, &own_row, PermissionScope::Org, &user, "update").is_ok());
        assert!(enforce_instance_scope(&model, &foreign_row, PermissionScope::Org, &user, "update").is_err());
    }

    #[test]
    fn system_records_are_immutable() {
        assert!(guard_system_record(&json!({"id": 1, "system": true})).is_err());
        assert!(guard_system_record(&json!({"id": 1, "system": false})).is_ok());
    }

    #[test]
    fn relationship_values_are_split_by_kind() {
        let model = crate::models::user::user();
        let mut body: HashMap<String, Value> = HashMap::new();
        body.insert("username".into(), json!("bob"));
        body.insert("roles".into(), json!([{"id": 1}, {"id": 2}]));
        let (links, children) = take_relationship_values(&model, &mut body);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0.name, "roles");
        assert_eq!(links[0].1.len(), 2);
        assert!(children.is_empty());
        assert!(!body.contains_key("roles"));
        assert!(body.contains_key("username"));
    }
}
