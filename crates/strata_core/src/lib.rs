//! Strata persistence engine.
//!
//! Strata is a unit-of-work engine over a remote relational store reached
//! through a pluggable driver. Callers declare entity schemas with typed
//! fields and relationships; the engine creates and evolves the
//! corresponding tables and manages in-memory entity lifecycles: tracked,
//! dirty-diffed, flushed, and audited through a change log.
//!
//! The usual flow:
//!
//! 1. Build [`SchemaDescriptor`]s and register them in a [`SchemaRegistry`].
//! 2. Bootstrap an [`Application`] over a [`Driver`]; `init` creates tables
//!    in foreign-key dependency order and reconciles the persisted schema
//!    snapshot, migrating on drift.
//! 3. Open a [`Session`], create and query [`Entity`] instances, and
//!    `commit` or `rollback` the unit of work.

pub mod application;
pub mod entity;
pub mod error;
pub mod query;
pub mod reflection;
pub mod schema;
pub mod session;
pub mod statement;

pub use application::{Application, Config};
pub use entity::{Entity, EntryId};
pub use error::{CoreError, CoreResult};
pub use query::Query;
pub use schema::{
    diff_documents, Cascade, CascadeAction, EntityDecl, FieldDecl, FieldDef, FieldRole, FieldType,
    Migrator, Relationship, SchemaDescriptor, SchemaDiff, SchemaDocument, SchemaRegistry,
    DEFAULT_NAMESPACE, PRIMARY_KEY_COLUMN,
};
pub use session::{Session, SessionState};

pub use strata_driver::{Connection, Driver, DriverError, DriverResult, MemoryDriver, Row, Value};
