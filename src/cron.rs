//! Scheduled jobs driven by the `cron` table.
//!
//! Rows name a handler in the compiled-in job registry. The runner wakes
//! every minute, picks the enabled rows whose `next_run` has passed, and
//! executes each under a Postgres advisory lock keyed by the row id so
//! concurrent replicas never run the same job twice. Lock and unlock happen
//! on one pooled connection; advisory locks are session-scoped.

use crate::error::AppError;
use crate::model::ModelRegistry;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send>>;
pub type JobHandler = fn(JobContext, Value) -> JobFuture;

#[derive(Clone)]
pub struct JobContext {
    pub pool: PgPool,
    pub registry: Arc<ModelRegistry>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<&'static str, JobHandler>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry every deployment starts from.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("purge_inactive_records", purge_inactive_records);
        registry
    }

    pub fn register(&mut self, name: &'static str, handler: JobHandler) {
        self.jobs.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<&JobHandler> {
        self.jobs.get(name)
    }
}

/// Delete rows that were deactivated and never touched since. Arguments:
/// `{"tables": ["scan", ...], "older_than_days": 30}`.
fn purge_inactive_records(ctx: JobContext, args: Value) -> JobFuture {
    Box::pin(async move {
        let days = args.get("older_than_days").and_then(Value::as_i64).unwrap_or(30);
        let tables: Vec<String> = args
            .get("tables")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        for table in tables {
            let Some(model) = ctx.registry.get(&table) else {
                tracing::warn!(table, "purge_inactive_records: unknown table");
                continue;
            };
            if !model.has_column("active") || !model.has_column("updated_at") {
                continue;
            }
            let sql = format!(
                r#"DELETE FROM "{}" WHERE active = FALSE AND system = FALSE AND updated_at < NOW() - make_interval(days => $1)"#,
                model.table
            );
            let deleted = sqlx::query(&sql).bind(days).execute(&ctx.pool).await?.rows_affected();
            tracing::info!(table = %model.table, deleted, "purged inactive records");
        }
        Ok(())
    })
}

struct DueJob {
    id: i64,
    name: String,
    job: String,
    arguments: Value,
    interval: i64,
    interval_unit: String,
}

/// Compute the wait until the next run from the row's interval columns.
pub fn interval_duration(unit: &str, n: i64) -> Duration {
    match unit {
        "minutes" => Duration::minutes(n),
        "hours" => Duration::hours(n),
        "days" => Duration::days(n),
        "weeks" => Duration::weeks(n),
        // unreachable for rows that passed the enum check; be safe anyway
        _ => Duration::days(n),
    }
}

/// Runner loop: spawn with `tokio::spawn(cron::run_scheduler(...))`.
pub async fn run_scheduler(pool: PgPool, registry: Arc<ModelRegistry>, jobs: Arc<JobRegistry>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = run_due_jobs(&pool, &registry, &jobs).await {
            tracing::error!(error = %e, "cron tick failed");
        }
    }
}

pub async fn run_due_jobs(
    pool: &PgPool,
    registry: &Arc<ModelRegistry>,
    jobs: &JobRegistry,
) -> Result<(), AppError> {
    let due: Vec<(i64, String, String, Option<Value>, i64, String)> = sqlx::query_as(
        r#"SELECT id::bigint, name, job, arguments, "interval"::bigint, interval_unit
           FROM cron
           WHERE enabled = TRUE AND active = TRUE AND next_run <= NOW()
           ORDER BY id"#,
    )
    .fetch_all(pool)
    .await?;

    for (id, name, job, arguments, interval, interval_unit) in due {
        let due_job = DueJob {
            id,
            name,
            job,
            arguments: arguments.unwrap_or(Value::Null),
            interval,
            interval_unit,
        };
        if let Err(e) = run_one(pool, registry, jobs, &due_job).await {
            tracing::error!(cron = %due_job.name, error = %e, "cron job failed");
        }
    }
    Ok(())
}

async fn run_one(
    pool: &PgPool,
    registry: &Arc<ModelRegistry>,
    jobs: &JobRegistry,
    due: &DueJob,
) -> Result<(), AppError> {
    let Some(handler) = jobs.get(&due.job) else {
        tracing::error!(cron = %due.name, job = %due.job, "no such job in registry");
        return Ok(());
    };

    // one connection for the advisory lock's whole lifetime
    let mut conn = pool.acquire().await?;
    let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .bind(due.id)
        .fetch_one(&mut *conn)
        .await?;
    if !locked {
        tracing::warn!(cron = %due.name, "could not obtain lock, another instance may be running");
        return Ok(());
    }

    tracing::info!(cron = %due.name, job = %due.job, "executing cron");
    let started: DateTime<Utc> = Utc::now();
    let result = handler(
        JobContext {
            pool: pool.clone(),
            registry: registry.clone(),
        },
        due.arguments.clone(),
    )
    .await;

    let next_run = started + interval_duration(&due.interval_unit, due.interval);
    sqlx::query(r#"UPDATE cron SET last_run = $1, next_run = $2, updated_at = NOW() WHERE id = $3"#)
        .bind(started)
        .bind(next_run)
        .bind(due.id)
        .execute(pool)
        .await?;

    let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(due.id)
        .execute(&mut *conn)
        .await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_durations() {
        assert_eq!(interval_duration("minutes", 5), Duration::minutes(5));
        assert_eq!(interval_duration("hours", 2), Duration::hours(2));
        assert_eq!(interval_duration("days", 1), Duration::days(1));
        assert_eq!(interval_duration("weeks", 3), Duration::weeks(3));
    }

    #[test]
    fn builtin_registry_has_purge_job() {
        let registry = JobRegistry::builtin();
        assert!(registry.get("purge_inactive_records").is_some());
        assert!(registry.get("no_such_job").is_none());
    }

    #[test]
    fn unknown_unit_falls_back_to_days() {
        assert_eq!(interval_duration("fortnights", 2), Duration::days(2));
    }
}
