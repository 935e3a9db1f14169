//! Demo logistics app: vehicles, depots, location logs, and barcode scans.

use crate::model::{ColumnDef, ColumnType, ModelDef, RelationshipDef};

pub const SCAN_TYPES: [&str; 4] = ["load", "off_depot", "on_truck", "off_location"];

fn vehicle() -> ModelDef {
    ModelDef::new("vehicle")
        .column(ColumnDef::new("license_plate", ColumnType::Text).not_null().unique())
        .column(ColumnDef::new("model", ColumnType::Text))
        .column(ColumnDef::new("make", ColumnType::Text))
        .column(ColumnDef::new("year", ColumnType::Integer))
        .relationship(RelationshipDef::one_to_many("locations", "location_log", "vehicle_id"))
}

fn depot() -> ModelDef {
    ModelDef::new("depot")
        .column(ColumnDef::new("name", ColumnType::Text).not_null())
        .column(ColumnDef::new("address", ColumnType::Text))
}

fn location_log() -> ModelDef {
    ModelDef::new("location_log")
        .column(ColumnDef::new("latitude", ColumnType::Float).not_null())
        .column(ColumnDef::new("longitude", ColumnType::Float).not_null())
        .column(ColumnDef::new("recorded_at", ColumnType::DateTime).defaulted())
        .column(ColumnDef::new("vehicle_id", ColumnType::Integer).references("vehicle"))
        .relationship(RelationshipDef::many_to_one("vehicle", "vehicle", "vehicle_id"))
}

fn scan() -> ModelDef {
    ModelDef::new("scan")
        .column(ColumnDef::new("barcode", ColumnType::Text).not_null())
        .column(
            ColumnDef::new(
                "scan_type",
                ColumnType::Enum(SCAN_TYPES.iter().map(|s| s.to_string()).collect()),
            )
            .not_null(),
        )
        .column(ColumnDef::new("vehicle_id", ColumnType::Integer).references("vehicle"))
        .column(ColumnDef::new("depot_id", ColumnType::Integer).references("depot"))
        .relationship(RelationshipDef::many_to_one("vehicle", "vehicle", "vehicle_id"))
        .relationship(RelationshipDef::many_to_one("depot", "depot", "depot_id"))
}

pub fn models() -> Vec<ModelDef> {
    vec![vehicle(), depot(), location_log(), scan()]
}
