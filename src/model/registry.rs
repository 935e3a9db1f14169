//! Registry of all declared models, keyed by table name.
//!
//! Built once at startup from the installed apps. Validation runs at build
//! time so broken declarations fail the boot instead of the first request.

use crate::error::ConfigError;
use crate::model::types::{ModelDef, RelationKind};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDef>,
}

impl ModelRegistry {
    pub fn build(defs: Vec<ModelDef>) -> Result<Self, ConfigError> {
        let mut models = BTreeMap::new();
        for def in defs {
            if models.contains_key(&def.table) {
                return Err(ConfigError::DuplicateTable(def.table));
            }
            models.insert(def.table.clone(), def);
        }
        let registry = ModelRegistry { models };
        registry.validate()?;
        Ok(registry)
    }

    pub fn get(&self, table: &str) -> Option<&ModelDef> {
        self.models.get(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }

    /// Models served by the generic CRUD router.
    pub fn exposed(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values().filter(|m| m.exposed)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for model in self.models.values() {
            for (col, target) in model.foreign_keys() {
                if !self.models.contains_key(target) {
                    return Err(ConfigError::MissingReference {
                        kind: "table",
                        id: format!("{} (referenced by {}.{})", target, model.table, col.name),
                    });
                }
            }
            for rel in &model.relationships {
                let target = self.models.get(&rel.target).ok_or(ConfigError::MissingReference {
                    kind: "table",
                    id: rel.target.clone(),
                })?;
                let invalid = |reason: &str| ConfigError::InvalidRelationship {
                    table: model.table.clone(),
                    name: rel.name.clone(),
                    reason: reason.to_string(),
                };
                match &rel.kind {
                    RelationKind::ManyToOne { fk_column } => {
                        let col = model
                            .get_column(fk_column)
                            .ok_or_else(|| invalid("fk column not declared"))?;
                        if col.references.as_deref() != Some(rel.target.as_str()) {
                            return Err(invalid("fk column does not reference target"));
                        }
                    }
                    RelationKind::OneToMany { remote_fk } => {
                        let col = target
                            .get_column(remote_fk)
                            .ok_or_else(|| invalid("remote fk column not declared on target"))?;
                        if col.references.as_deref() != Some(model.table.as_str()) {
                            return Err(invalid("remote fk column does not reference this table"));
                        }
                    }
                    RelationKind::ManyToMany {
                        junction,
                        local_fk,
                        remote_fk,
                    } => {
                        let junction = self
                            .models
                            .get(junction)
                            .ok_or_else(|| invalid("junction table not declared"))?;
                        if !junction.junction {
                            return Err(invalid("junction table is not a junction model"));
                        }
                        let local = junction
                            .get_column(local_fk)
                            .ok_or_else(|| invalid("local fk missing on junction"))?;
                        if local.references.as_deref() != Some(model.table.as_str()) {
                            return Err(invalid("junction local fk does not reference this table"));
                        }
                        let remote = junction
                            .get_column(remote_fk)
                            .ok_or_else(|| invalid("remote fk missing on junction"))?;
                        if remote.references.as_deref() != Some(rel.target.as_str()) {
                            return Err(invalid("junction remote fk does not reference target"));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Tables holding a foreign key into `table`, with the referencing column
    /// and its nullability. Junction referrers are included; the delete path
    /// treats them separately (link rows are cleaned up, not reported as
    /// dependencies).
    pub fn referrers(&self, table: &str) -> Vec<Referrer<'_>> {
        let mut out = Vec::new();
        for model in self.models.values() {
            for (col, target) in model.foreign_keys() {
                if target == table {
                    out.push(Referrer {
                        model,
                        column: col.name.as_str(),
                        nullable: col.nullable,
                    });
                }
            }
        }
        out
    }
}

pub struct Referrer<'a> {
    pub model: &'a ModelDef,
    pub column: &'a str,
    pub nullable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{ColumnDef, ColumnType, RelationshipDef};

    fn org() -> ModelDef {
        ModelDef::bare("organization").column(ColumnDef::new("name", ColumnType::Text).not_null().unique())
    }

    fn user() -> ModelDef {
        ModelDef::bare("user")
            .column(ColumnDef::new("username", ColumnType::Text).not_null().unique())
            .column(ColumnDef::new("organization_id", ColumnType::Integer).references("organization"))
    }

    #[test]
    fn build_validates_fk_targets() {
        let err = ModelRegistry::build(vec![user()]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingReference { .. }));
        assert!(ModelRegistry::build(vec![user(), org()]).is_ok());
    }

    #[test]
    fn rejects_relationship_with_wrong_fk() {
        let bad = ModelDef::bare("user")
            .column(ColumnDef::new("organization_id", ColumnType::Integer).references("organization"))
            .relationship(RelationshipDef::many_to_one("organization", "organization", "name"));
        let err = ModelRegistry::build(vec![bad, org()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRelationship { .. }));
    }

    #[test]
    fn many_to_many_requires_junction_model() {
        let role = ModelDef::bare("role").column(ColumnDef::new("name", ColumnType::Text));
        let user = user().relationship(RelationshipDef::many_to_many(
            "roles", "role", "user_role", "user_id", "role_id",
        ));
        let err = ModelRegistry::build(vec![user.clone(), role.clone(), org()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRelationship { .. }));

        let junction = ModelDef::junction("user_role", ("user_id", "user"), ("role_id", "role"));
        assert!(ModelRegistry::build(vec![user, role, org(), junction]).is_ok());
    }

    #[test]
    fn referrers_walk() {
        let log = ModelDef::bare("location_log")
            .column(ColumnDef::new("vehicle_id", ColumnType::Integer).not_null().references("vehicle"));
        let vehicle = ModelDef::bare("vehicle");
        let registry = ModelRegistry::build(vec![log, vehicle]).unwrap();
        let refs = registry.referrers("vehicle");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].model.table, "location_log");
        assert_eq!(refs[0].column, "vehicle_id");
        assert!(!refs[0].nullable);
    }
}
