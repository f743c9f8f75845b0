//! Error types for the Strata engine.

use crate::entity::EntryId;
use thiserror::Error;
use uuid::Uuid;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Strata engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Driver boundary error.
    #[error("driver error: {0}")]
    Driver(#[from] strata_driver::DriverError),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A mutating operation was attempted before the session was activated.
    #[error("session {session} must be activated with begin() before use")]
    SessionNotActive {
        /// The session's identity.
        session: Uuid,
    },

    /// A mutating operation was attempted on a completed session.
    #[error("session {session} has completed and accepts no further operations")]
    SessionCompleted {
        /// The session's identity.
        session: Uuid,
    },

    /// An inert entity instance was mutated or handed to a session.
    ///
    /// An instance goes inert when it is superseded by a newer query result,
    /// deleted within its session, or its session completes.
    #[error("entity {entry_id} is no longer mapped: it was superseded, deleted, or its session completed")]
    StaleEntity {
        /// Identity of the stale instance.
        entry_id: EntryId,
    },

    /// The foreign-key graph of the registered schemas has no valid order.
    #[error("cyclic foreign-key dependency among entities: {entities:?}")]
    CyclicDependency {
        /// Entities left unresolved after ordering drained.
        entities: Vec<String>,
    },

    /// A value of the wrong entity type was assigned to a relationship.
    #[error("relationship {relationship} expects entity {expected}, got {actual}")]
    RelationshipType {
        /// Name of the relationship slot.
        relationship: String,
        /// Target entity the relationship declares.
        expected: String,
        /// Entity the assigned value belongs to.
        actual: String,
    },

    /// A field was referenced that the entity's schema does not declare.
    #[error("entity {entity} declares no field named {field}")]
    UnknownField {
        /// The entity name.
        entity: String,
        /// The missing field's program name.
        field: String,
    },

    /// A relationship was referenced that the entity's schema does not declare.
    #[error("entity {entity} declares no relationship named {relationship}")]
    UnknownRelationship {
        /// The entity name.
        entity: String,
        /// The missing relationship name.
        relationship: String,
    },

    /// A session was requested before the application finished bootstrap.
    #[error("application {application} must be initialized before opening sessions")]
    NotInitialized {
        /// The application's id.
        application: String,
    },

    /// Bootstrap was attempted a second time.
    #[error("application {application} is already initialized")]
    AlreadyInitialized {
        /// The application's id.
        application: String,
    },

    /// Registration was attempted after the dependency order was computed.
    #[error("schema registry is frozen: register all schemas before the first order computation")]
    RegistryFrozen,

    /// A schema descriptor is malformed.
    #[error("invalid schema: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// The persisted schema snapshot could not be used.
    #[error("snapshot error: {message}")]
    Snapshot {
        /// Description of the problem.
        message: String,
    },

    /// A migration step failed.
    #[error("migration failed: {message}")]
    Migration {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid-schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a snapshot error.
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }

    /// Creates a migration error.
    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }

    /// Creates a stale-entity error.
    pub fn stale(entry_id: EntryId) -> Self {
        Self::StaleEntity { entry_id }
    }
}
