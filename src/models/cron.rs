//! Scheduled jobs. `job` names a handler in the compiled-in job registry
//! (see cron.rs); `arguments` is passed to it as JSON.

use crate::model::{ColumnDef, ColumnType, ModelDef};

pub const INTERVAL_UNITS: [&str; 4] = ["minutes", "hours", "days", "weeks"];

pub fn cron() -> ModelDef {
    ModelDef::bare("cron")
        .column(ColumnDef::new("name", ColumnType::Text).not_null())
        .column(ColumnDef::new("job", ColumnType::Text).not_null())
        .column(ColumnDef::new("arguments", ColumnType::Json).defaulted())
        .column(ColumnDef::new("enabled", ColumnType::Boolean).defaulted())
        .column(ColumnDef::new("last_run", ColumnType::DateTime))
        .column(ColumnDef::new("next_run", ColumnType::DateTime).defaulted())
        .column(ColumnDef::new("interval", ColumnType::Integer).not_null().defaulted())
        .column(
            ColumnDef::new(
                "interval_unit",
                ColumnType::Enum(INTERVAL_UNITS.iter().map(|s| s.to_string()).collect()),
            )
            .not_null()
            .defaulted(),
        )
}
