//! Delete-dependency walk over the registry's foreign keys.
//!
//! Rows referencing a record through a non-nullable foreign key must be
//! deleted with it (recursively); nullable references are nulled out.
//! Junction rows are neither: they are link bookkeeping and are cleaned up
//! silently by the delete path.

use crate::error::AppError;
use crate::model::{ModelDef, ModelRegistry};
use crate::service::crud::{row_id, CrudService};
use crate::sql;
use serde_json::Value;
use sqlx::PgPool;

/// One group of affected rows: rows of `table` whose `column` references a
/// record being deleted.
#[derive(Debug)]
pub struct AffectedGroup {
    pub table: String,
    pub column: String,
    pub ids: Vec<i64>,
}

#[derive(Debug, Default)]
pub struct AffectedRecords {
    /// Discovery order: parents before their own dependents. Deletion runs
    /// in reverse so the deepest rows go first.
    pub to_delete: Vec<AffectedGroup>,
    pub to_set_null: Vec<AffectedGroup>,
}

impl AffectedRecords {
    pub fn has_dependencies(&self) -> bool {
        !self.to_delete.is_empty() || !self.to_set_null.is_empty()
    }
}

/// Collect every record affected by deleting `ids` from `model`.
pub async fn collect(
    pool: &PgPool,
    registry: &ModelRegistry,
    model: &ModelDef,
    ids: &[i64],
) -> Result<AffectedRecords, AppError> {
    let mut affected = AffectedRecords::default();
    walk(pool, registry, model, ids.to_vec(), &mut affected).await?;
    Ok(affected)
}

async fn walk(
    pool: &PgPool,
    registry: &ModelRegistry,
    model: &ModelDef,
    ids: Vec<i64>,
    affected: &mut AffectedRecords,
) -> Result<(), AppError> {
    // iterative frontier; (model, ids) pairs still to inspect
    let mut frontier: Vec<(&ModelDef, Vec<i64>)> = vec![(model, ids)];
    while let Some((current, current_ids)) = frontier.pop() {
        if current_ids.is_empty() {
            continue;
        }
        for referrer in registry.referrers(&current.table) {
            if referrer.model.junction {
                continue;
            }
            let values: Vec<Value> = current_ids.iter().map(|id| Value::from(*id)).collect();
            let q = sql::select_where_in(referrer.model, referrer.column, &values);
            let rows = CrudService::query_many(pool, &q).await?;
            let mut referring_ids: Vec<i64> = rows.iter().filter_map(|r| row_id(r).ok()).collect();
            referring_ids.sort_unstable();
            referring_ids.dedup();
            if referring_ids.is_empty() {
                continue;
            }
            // self-references already queued would loop forever
            if referrer.model.table == current.table {
                referring_ids.retain(|id| !current_ids.contains(id));
                if referring_ids.is_empty() {
                    continue;
                }
            }
            let group = AffectedGroup {
                table: referrer.model.table.clone(),
                column: referrer.column.to_string(),
                ids: referring_ids.clone(),
            };
            if referrer.nullable {
                affected.to_set_null.push(group);
            } else {
                affected.to_delete.push(group);
                frontier.push((referrer.model, referring_ids));
            }
        }
    }
    Ok(())
}

/// Apply the walk's result: delete the non-nullable referrers deepest-first,
/// then null out the nullable references.
pub async fn execute(
    pool: &PgPool,
    registry: &ModelRegistry,
    affected: &AffectedRecords,
) -> Result<(), AppError> {
    for group in affected.to_delete.iter().rev() {
        let Some(model) = registry.get(&group.table) else { continue };
        delete_junction_links(pool, registry, model, &group.ids).await?;
        let q = sql::delete_where_in(model, &model.pk_columns[0], &group.ids);
        CrudService::execute(pool, &q).await?;
    }
    for group in &affected.to_set_null {
        let Some(model) = registry.get(&group.table) else { continue };
        let q = sql::set_null_where_in(model, &group.column, &group.ids);
        CrudService::execute(pool, &q).await?;
    }
    Ok(())
}

/// Remove junction rows that reference any of `ids` in `model` from either
/// side of a link.
pub async fn delete_junction_links(
    pool: &PgPool,
    registry: &ModelRegistry,
    model: &ModelDef,
    ids: &[i64],
) -> Result<(), AppError> {
    if ids.is_empty() {
        return Ok(());
    }
    for referrer in registry.referrers(&model.table) {
        if !referrer.model.junction {
            continue;
        }
        let q = sql::delete_where_in(referrer.model, referrer.column, ids);
        CrudService::execute(pool, &q).await?;
    }
    Ok(())
}
