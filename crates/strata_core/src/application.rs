//! Application bootstrap.
//!
//! An application binds a driver, a schema registry, and an id under which
//! its schema snapshot is persisted. `init` brings the store in line with
//! the registered schemas: it creates the engine's own tables, reconciles
//! the persisted snapshot against the current declarations (running
//! migrations on drift), and creates every entity table in foreign-key
//! dependency order. Sessions open only after a successful `init`.

use crate::entity::EntryId;
use crate::error::{CoreError, CoreResult};
use crate::reflection;
use crate::schema::migration::{diff_documents, Migrator};
use crate::schema::registry::SchemaRegistry;
use crate::session::Session;
use crate::statement;
use std::sync::Arc;
use strata_driver::{Driver, Value};
use tracing::{debug, info};

/// Bootstrap configuration.
#[derive(Debug, Clone)]
pub struct Config {
    application_id: String,
    actor: Option<String>,
    migrate: bool,
}

impl Config {
    /// Creates a configuration for an application id, with migration
    /// enabled and no audit actor.
    #[must_use]
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            actor: None,
            migrate: true,
        }
    }

    /// Sets the audit actor recorded in change-log rows for sessions opened
    /// through [`Application::session`].
    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Enables or disables migration on schema drift.
    ///
    /// With migration disabled, drift is still detected and the snapshot
    /// still overwritten, but no DDL is issued.
    #[must_use]
    pub fn migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }
}

/// An initialized engine over one driver and one schema registry.
pub struct Application {
    config: Config,
    driver: Arc<dyn Driver>,
    registry: SchemaRegistry,
    initialized: bool,
}

impl Application {
    /// Binds a configuration, driver, and registry.
    ///
    /// The registry should already hold every user descriptor; `init`
    /// registers the engine's internal descriptors and freezes it.
    #[must_use]
    pub fn new(config: Config, driver: Arc<dyn Driver>, registry: SchemaRegistry) -> Self {
        Self {
            config,
            driver,
            registry,
            initialized: false,
        }
    }

    /// Returns the application id.
    #[must_use]
    pub fn application_id(&self) -> &str {
        &self.config.application_id
    }

    /// Returns the schema registry.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Bootstraps the store.
    ///
    /// Registers the internal descriptors and freezes the dependency order,
    /// ensures the engine's own tables, reconciles the persisted schema
    /// snapshot (running the migrator on drift when enabled), and creates
    /// namespace and table for every descriptor in dependency order.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::AlreadyInitialized`] on a second call, and
    /// propagates registry, snapshot, migration, and driver failures.
    pub fn init(&mut self) -> CoreResult<()> {
        if self.initialized {
            return Err(CoreError::AlreadyInitialized {
                application: self.config.application_id.clone(),
            });
        }

        self.registry.register(reflection::change_log_descriptor())?;
        self.registry.register(reflection::snapshot_descriptor())?;
        let ordered = self.registry.ordered()?;

        // The engine's own tables must exist before the bootstrap session
        // reads the snapshot or flushes audit rows.
        self.create_tables(&[
            Arc::new(reflection::snapshot_descriptor()),
            Arc::new(reflection::change_log_descriptor()),
        ])?;

        self.reconcile_snapshot()?;
        self.create_tables(&ordered)?;

        self.initialized = true;
        info!(application = %self.config.application_id, "application initialized");
        Ok(())
    }

    /// Opens a session carrying the configured audit actor.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::NotInitialized`] before `init`.
    pub fn session(&self) -> CoreResult<Session> {
        self.open_session(self.config.actor.clone())
    }

    /// Opens a session recording a specific actor in the change log.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::NotInitialized`] before `init`.
    pub fn session_as(&self, actor: impl Into<String>) -> CoreResult<Session> {
        self.open_session(Some(actor.into()))
    }

    fn open_session(&self, actor: Option<String>) -> CoreResult<Session> {
        if !self.initialized {
            return Err(CoreError::NotInitialized {
                application: self.config.application_id.clone(),
            });
        }
        Ok(Session::new(
            Arc::clone(&self.driver),
            actor,
            self.change_log_descriptor()?,
        ))
    }

    fn change_log_descriptor(&self) -> CoreResult<Arc<crate::schema::SchemaDescriptor>> {
        self.registry
            .get(reflection::CHANGE_LOG_TABLE)
            .ok_or_else(|| CoreError::schema("change-log descriptor is not registered"))
    }

    fn create_tables(
        &self,
        descriptors: &[Arc<crate::schema::SchemaDescriptor>],
    ) -> CoreResult<()> {
        let mut connection = self.driver.connect()?;
        for descriptor in descriptors {
            let namespace = descriptor.namespace_name();
            debug!(
                entity = descriptor.entity_name(),
                namespace, "ensuring namespace and table"
            );
            connection.execute(&statement::create_namespace(namespace), &[], namespace)?;
            connection.execute(&statement::create_table(descriptor), &[], namespace)?;
        }
        connection.close()?;
        Ok(())
    }

    fn reconcile_snapshot(&self) -> CoreResult<()> {
        let snapshot_descriptor = self
            .registry
            .get(reflection::SNAPSHOT_TABLE)
            .ok_or_else(|| CoreError::snapshot("snapshot descriptor is not registered"))?;
        let current = self.registry.document()?;

        let mut session = Session::new(
            Arc::clone(&self.driver),
            Some(reflection::SYSTEM_ACTOR.to_string()),
            self.change_log_descriptor()?,
        );
        session.begin()?;

        let app_id = EntryId::from(self.config.application_id.as_str());
        let previous = session
            .query(Arc::clone(&snapshot_descriptor))
            .get(&app_id)?;

        let Some(previous) = previous else {
            debug!(
                application = %self.config.application_id,
                "no schema snapshot found, persisting the first one"
            );
            let snapshot = reflection::new_snapshot(
                snapshot_descriptor,
                &self.config.application_id,
                &current,
            )?;
            session.add_untracked(&snapshot)?;
            session.commit()?;
            return Ok(());
        };

        let persisted = reflection::parse_snapshot(&previous)?;
        let diff = diff_documents(&persisted, &current);
        if !diff.is_empty() {
            info!(
                application = %self.config.application_id,
                entities = diff.entities.len(),
                "schema drift detected"
            );
            if self.config.migrate {
                Migrator::new(&diff).run(&mut session)?;
            }
            // Only drift rewrites the snapshot; the document's capture
            // version alone is not worth an audited update.
            previous.set("snapshot", Value::Json(serde_json::to_value(&current)?))?;
        }
        session.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("application_id", &self.config.application_id)
            .field("migrate", &self.config.migrate)
            .field("initialized", &self.initialized)
            .finish()
    }
}
