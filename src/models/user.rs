//! The user model. Carries its own nullable organization reference instead of
//! the ownership pair; a user is not owned by another user.

use crate::model::{ColumnDef, ColumnType, ModelDef, RelationshipDef};

pub fn user() -> ModelDef {
    ModelDef::bare("user")
        .column(ColumnDef::new("username", ColumnType::Text).not_null().unique())
        .column(ColumnDef::new("email", ColumnType::Text).not_null().unique())
        .column(ColumnDef::new("hashed_password", ColumnType::Text).hidden())
        .column(ColumnDef::new("signed_up", ColumnType::Boolean).defaulted())
        .column(ColumnDef::new("company_name", ColumnType::Text))
        .column(ColumnDef::new("device_info", ColumnType::Json))
        .column(ColumnDef::new("organization_id", ColumnType::Integer).references("organization"))
        .relationship(RelationshipDef::many_to_many(
            "roles", "role", "user_role", "user_id", "role_id",
        ))
}

pub fn user_role() -> ModelDef {
    ModelDef::junction("user_role", ("user_id", "user"), ("role_id", "role"))
}
