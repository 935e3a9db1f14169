pub mod registry;
pub mod types;

pub use registry::{ModelRegistry, Referrer};
pub use types::{ColumnDef, ColumnType, ModelDef, RelationKind, RelationshipDef};
