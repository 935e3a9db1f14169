//! The organization model: the tenant boundary every org-scoped permission
//! checks against.

use crate::model::{ColumnDef, ColumnType, ModelDef};

pub fn organization() -> ModelDef {
    ModelDef::bare("organization")
        .column(ColumnDef::new("name", ColumnType::Text).not_null().unique())
        .column(ColumnDef::new("access_token_expire_minutes", ColumnType::Integer).defaulted())
        .column(ColumnDef::new("allow_public_signup", ColumnType::Boolean).defaulted())
}
