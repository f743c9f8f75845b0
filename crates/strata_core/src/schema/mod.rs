//! Declarative schema layer: fields, descriptors, relationships, the
//! registry, and migration.

pub mod descriptor;
pub mod field;
pub mod migration;
pub mod registry;
pub mod relationship;

pub use descriptor::{EntityDecl, SchemaDescriptor, DEFAULT_NAMESPACE, PRIMARY_KEY_COLUMN};
pub use field::{FieldDecl, FieldDef, FieldRole, FieldType};
pub use migration::{diff_documents, EntityDiff, FieldChange, Migrator, SchemaDiff};
pub use registry::{SchemaDocument, SchemaRegistry};
pub use relationship::{assign, Cascade, CascadeAction, Relationship};
