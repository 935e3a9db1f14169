//! Roles and the self-referencing implied-role junction.
//!
//! `permissions` holds a JSON array of `table:action:scope` strings, e.g.
//! `["invoice:read:org", "invoice:*:own"]`. A role grants everything its
//! implied roles grant, transitively.

use crate::model::{ColumnDef, ColumnType, ModelDef, RelationshipDef};

pub fn role() -> ModelDef {
    ModelDef::bare("role")
        .column(ColumnDef::new("name", ColumnType::Text).not_null().unique())
        .column(ColumnDef::new("description", ColumnType::Text))
        .column(ColumnDef::new("permissions", ColumnType::Text))
        .column(
            ColumnDef::new("organization_id", ColumnType::Integer)
                .not_null()
                .references("organization"),
        )
        .relationship(RelationshipDef::many_to_many(
            "implied_roles",
            "role",
            "implied_role",
            "role_id",
            "implied_role_id",
        ))
}

pub fn implied_role() -> ModelDef {
    ModelDef::junction("implied_role", ("role_id", "role"), ("implied_role_id", "role"))
}
