//! Model metadata: tables, columns, and relationships declared by apps.
//!
//! Every model gets the shared base columns at construction (audit timestamps,
//! public string identifier, system and active flags) plus the ownership pair
//! (`owner_id`, `organization_id`) unless it opts out. Rows travel as JSON and
//! SQL is built from this metadata, so the declared shape is the single source
//! of truth for DDL, request/response schemas, and permission filtering.

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ColumnType {
    Integer,
    BigInt,
    Float,
    Boolean,
    Text,
    DateTime,
    Json,
    Enum(Vec<String>),
}

impl ColumnType {
    /// PostgreSQL type used in generated DDL. Enums are stored as text with a
    /// CHECK constraint (see migrate.rs).
    pub fn pg_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Float => "double precision",
            ColumnType::Boolean => "boolean",
            ColumnType::Text | ColumnType::Enum(_) => "text",
            ColumnType::DateTime => "timestamptz",
            ColumnType::Json => "jsonb",
        }
    }

    /// Cast suffix for bind placeholders where a string value must coerce
    /// (e.g. `$1::timestamptz`).
    pub fn bind_cast(&self) -> Option<&'static str> {
        match self {
            ColumnType::DateTime => Some("timestamptz"),
            ColumnType::Json => Some("jsonb"),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    /// Column has a database-side default; inserts omit it when the body
    /// does not provide a value.
    pub has_default: bool,
    /// Foreign key target table, if any.
    pub references: Option<String>,
    /// Never exposed through the API (password hashes and the like).
    pub hidden: bool,
}

impl ColumnDef {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        ColumnDef {
            name: name.to_string(),
            ty,
            nullable: true,
            unique: false,
            has_default: false,
            references: None,
            hidden: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn defaulted(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn references(mut self, table: &str) -> Self {
        self.references = Some(table.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Relationship kinds, from the declaring model's point of view.
#[derive(Clone, Debug, Serialize)]
pub enum RelationKind {
    /// We hold the foreign key.
    ManyToOne { fk_column: String },
    /// The target holds a foreign key back to us.
    OneToMany { remote_fk: String },
    /// Linked through a junction table.
    ManyToMany {
        junction: String,
        local_fk: String,
        remote_fk: String,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct RelationshipDef {
    pub name: String,
    pub target: String,
    pub kind: RelationKind,
}

impl RelationshipDef {
    pub fn many_to_one(name: &str, target: &str, fk_column: &str) -> Self {
        RelationshipDef {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::ManyToOne {
                fk_column: fk_column.to_string(),
            },
        }
    }

    pub fn one_to_many(name: &str, target: &str, remote_fk: &str) -> Self {
        RelationshipDef {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::OneToMany {
                remote_fk: remote_fk.to_string(),
            },
        }
    }

    pub fn many_to_many(name: &str, target: &str, junction: &str, local_fk: &str, remote_fk: &str) -> Self {
        RelationshipDef {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::ManyToMany {
                junction: junction.to_string(),
                local_fk: local_fk.to_string(),
                remote_fk: remote_fk.to_string(),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ModelDef {
    /// snake_case, unpluralized; doubles as the API path segment.
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub relationships: Vec<RelationshipDef>,
    pub pk_columns: Vec<String>,
    /// Junction tables carry no surrogate id and are not exposed over HTTP.
    pub junction: bool,
    /// Whether the generic CRUD router serves this model.
    pub exposed: bool,
}

impl ModelDef {
    /// A model with the full base mixin: surrogate id, audit timestamps,
    /// public string identifier, system/active flags, and the ownership pair.
    pub fn new(table: &str) -> Self {
        let mut def = Self::bare(table);
        def.columns.push(
            ColumnDef::new("owner_id", ColumnType::Integer)
                .not_null()
                .references("user"),
        );
        def.columns.push(
            ColumnDef::new("organization_id", ColumnType::Integer)
                .not_null()
                .references("organization"),
        );
        def
    }

    /// Base mixin without the ownership pair (the user and organization
    /// models themselves, and service tables like cron).
    pub fn bare(table: &str) -> Self {
        ModelDef {
            table: table.to_string(),
            columns: vec![
                ColumnDef::new("id", ColumnType::Integer).not_null().defaulted(),
                ColumnDef::new("created_at", ColumnType::DateTime).not_null().defaulted(),
                ColumnDef::new("updated_at", ColumnType::DateTime).not_null().defaulted(),
                ColumnDef::new("string_id", ColumnType::Text).unique(),
                ColumnDef::new("system", ColumnType::Boolean).not_null().defaulted(),
                ColumnDef::new("active", ColumnType::Boolean).not_null().defaulted(),
            ],
            relationships: Vec::new(),
            pk_columns: vec!["id".to_string()],
            junction: false,
            exposed: true,
        }
    }

    /// A many-to-many junction: two FK columns forming the primary key, audit
    /// timestamps, no API exposure.
    pub fn junction(table: &str, left: (&str, &str), right: (&str, &str)) -> Self {
        let (left_col, left_table) = left;
        let (right_col, right_table) = right;
        ModelDef {
            table: table.to_string(),
            columns: vec![
                ColumnDef::new(left_col, ColumnType::Integer)
                    .not_null()
                    .references(left_table),
                ColumnDef::new(right_col, ColumnType::Integer)
                    .not_null()
                    .references(right_table),
                ColumnDef::new("created_at", ColumnType::DateTime).not_null().defaulted(),
                ColumnDef::new("updated_at", ColumnType::DateTime).not_null().defaulted(),
            ],
            relationships: Vec::new(),
            pk_columns: vec![left_col.to_string(), right_col.to_string()],
            junction: true,
            exposed: false,
        }
    }

    pub fn column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }

    pub fn relationship(mut self, rel: RelationshipDef) -> Self {
        self.relationships.push(rel);
        self
    }

    pub fn internal(mut self) -> Self {
        self.exposed = false;
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    pub fn get_relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Columns serialized in API responses.
    pub fn visible_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| !c.hidden)
    }

    /// Foreign-key columns together with their target tables.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnDef, &str)> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_deref().map(|t| (c, t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_mixin_columns_injected() {
        let def = ModelDef::new("product");
        for name in [
            "id",
            "created_at",
            "updated_at",
            "string_id",
            "system",
            "active",
            "owner_id",
            "organization_id",
        ] {
            assert!(def.has_column(name), "missing {}", name);
        }
        assert_eq!(def.pk_columns, vec!["id"]);
    }

    #[test]
    fn bare_model_has_no_ownership() {
        let def = ModelDef::bare("cron");
        assert!(!def.has_column("owner_id"));
        assert!(!def.has_column("organization_id"));
        assert!(def.has_column("string_id"));
    }

    #[test]
    fn junction_shape() {
        let def = ModelDef::junction("user_role", ("user_id", "user"), ("role_id", "role"));
        assert!(def.junction);
        assert!(!def.exposed);
        assert_eq!(def.pk_columns, vec!["user_id", "role_id"]);
        assert!(!def.has_column("id"));
        let fks: Vec<_> = def.foreign_keys().map(|(c, t)| (c.name.clone(), t.to_string())).collect();
        assert_eq!(fks, vec![("user_id".into(), "user".into()), ("role_id".into(), "role".into())]);
    }
}
