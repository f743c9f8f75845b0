//! Unit-of-work sessions.
//!
//! A session owns one driver connection and a map of tracked entity
//! instances keyed by entry id. Reads materialize entities into the map
//! (newest query result wins), writes stage on the connection, and
//! `flush`/`commit` turn accumulated in-memory changes into updates plus
//! audit rows. Completing a session, by commit, rollback, or drop, makes
//! every tracked instance inert.

use crate::entity::{Entity, EntryId};
use crate::error::{CoreError, CoreResult};
use crate::query::Query;
use crate::reflection;
use crate::schema::descriptor::{SchemaDescriptor, PRIMARY_KEY_COLUMN};
use crate::schema::relationship::{assign, CascadeAction};
use crate::statement;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use strata_driver::{Driver, Row, Value};
use tracing::debug;
use uuid::Uuid;

/// Lifecycle state of a session.
///
/// `Completed` is terminal; a completed session accepts no further
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed but not yet connected.
    Initialized,
    /// Connected and accepting operations.
    Active,
    /// Committed or rolled back.
    Completed,
}

/// One unit of work over one driver connection.
pub struct Session {
    session_id: Uuid,
    driver: Arc<dyn Driver>,
    actor: Option<String>,
    change_log: Arc<SchemaDescriptor>,
    state: SessionState,
    connection: Option<Box<dyn strata_driver::Connection>>,
    tracked: BTreeMap<EntryId, Entity>,
}

impl Session {
    pub(crate) fn new(
        driver: Arc<dyn Driver>,
        actor: Option<String>,
        change_log: Arc<SchemaDescriptor>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            driver,
            actor,
            change_log,
            state: SessionState::Initialized,
            connection: None,
            tracked: BTreeMap::new(),
        }
    }

    /// Connects and activates the session. Idempotent while active.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::SessionCompleted`] on a completed session and
    /// propagates connection failures.
    pub fn begin(&mut self) -> CoreResult<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Completed => Err(CoreError::SessionCompleted {
                session: self.session_id,
            }),
            SessionState::Initialized => {
                self.connection = Some(self.driver.connect()?);
                self.state = SessionState::Active;
                debug!(session = %self.session_id, "session started");
                Ok(())
            }
        }
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the session's identity.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns the tracked instance for an entry id, if any.
    #[must_use]
    pub fn tracked(&self, id: &EntryId) -> Option<Entity> {
        self.tracked.get(id).cloned()
    }

    /// Opens a query over one entity type in this session.
    pub fn query(&mut self, descriptor: Arc<SchemaDescriptor>) -> Query<'_> {
        Query::new(descriptor, self)
    }

    fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Initialized => Err(CoreError::SessionNotActive {
                session: self.session_id,
            }),
            SessionState::Completed => Err(CoreError::SessionCompleted {
                session: self.session_id,
            }),
        }
    }

    fn connection(&mut self) -> CoreResult<&mut (dyn strata_driver::Connection + 'static)> {
        self.ensure_active()?;
        self.connection
            .as_deref_mut()
            .ok_or(CoreError::SessionNotActive {
                session: self.session_id,
            })
    }

    pub(crate) fn execute(
        &mut self,
        stmt: &str,
        params: &[Value],
        namespace: &str,
    ) -> CoreResult<u64> {
        Ok(self.connection()?.execute(stmt, params, namespace)?)
    }

    pub(crate) fn fetch(
        &mut self,
        stmt: &str,
        params: &[Value],
        namespace: &str,
    ) -> CoreResult<Vec<Row>> {
        Ok(self.connection()?.query(stmt, params, namespace)?)
    }

    /// Registers an entity under its id.
    ///
    /// A previously tracked instance with the same id is deactivated; the
    /// newest instance wins.
    pub(crate) fn track(&mut self, entity: Entity) {
        if let Some(old) = self.tracked.get(entity.id()) {
            if !old.same_instance(&entity) {
                debug!(
                    session = %self.session_id,
                    entry_id = %old.id(),
                    "tracked instance superseded by newer result"
                );
                old.deactivate();
            }
        }
        self.tracked.insert(entity.id().clone(), entity);
    }

    fn insert(&mut self, entity: &Entity) -> CoreResult<()> {
        let namespace = entity.descriptor().namespace_name().to_string();
        let table = entity.entity_name().to_string();
        let row = entity.insert_row();
        let columns: Vec<String> = row.iter().map(|(c, _)| c.clone()).collect();
        let params: Vec<Value> = row.into_iter().map(|(_, v)| v).collect();
        let stmt = statement::insert(&namespace, &table, &columns);
        self.execute(&stmt, &params, &namespace)?;
        Ok(())
    }

    /// Inserts an entity, tracks it, and cascades over the relationship
    /// graph.
    ///
    /// Every entity reachable through a save-update (or all) edge is
    /// inserted and tracked as well. The walk uses an explicit worklist with
    /// a visited set, so cycles in the object graph terminate.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::StaleEntity`] when any visited entity is
    /// inert.
    pub fn add(&mut self, entity: &Entity) -> CoreResult<()> {
        self.ensure_active()?;

        let mut worklist = vec![entity.clone()];
        let mut visited: BTreeSet<EntryId> = BTreeSet::new();
        while let Some(current) = worklist.pop() {
            if !visited.insert(current.id().clone()) {
                continue;
            }
            if !current.is_active() {
                return Err(CoreError::stale(current.id().clone()));
            }
            self.track(current.clone());
            self.insert(&current)?;

            for relationship in current.descriptor().relationships() {
                if !relationship.cascade.includes_save_update() {
                    continue;
                }
                if let Some(child) = current.related(&relationship.name) {
                    worklist.push(child);
                }
            }
        }
        Ok(())
    }

    /// Inserts an entity without tracking it and without cascading.
    ///
    /// # Errors
    ///
    /// Inert entities are rejected here too.
    pub fn add_untracked(&mut self, entity: &Entity) -> CoreResult<()> {
        self.ensure_active()?;
        if !entity.is_active() {
            return Err(CoreError::stale(entity.id().clone()));
        }
        self.insert(entity)
    }

    /// Adds a batch of entities with tracking and cascade.
    ///
    /// # Errors
    ///
    /// Stops at the first failing add.
    pub fn add_all<'a>(&mut self, entities: impl IntoIterator<Item = &'a Entity>) -> CoreResult<()> {
        for entity in entities {
            self.add(entity)?;
        }
        Ok(())
    }

    /// Deletes an entity's row by id.
    ///
    /// A tracked instance with this id goes inert; the passed handle does
    /// too when its id is tracked.
    pub fn delete(&mut self, entity: &Entity) -> CoreResult<()> {
        self.ensure_active()?;
        let namespace = entity.descriptor().namespace_name().to_string();
        let table = entity.entity_name().to_string();
        let stmt = statement::delete(&namespace, &table, &[PRIMARY_KEY_COLUMN.to_string()]);
        let id_param = Value::Text(entity.id().as_str().to_string());
        self.execute(&stmt, &[id_param], &namespace)?;

        if let Some(tracked) = self.tracked.get(entity.id()) {
            tracked.deactivate();
            entity.deactivate();
        }
        Ok(())
    }

    /// Deletes a batch of entities.
    ///
    /// # Errors
    ///
    /// Stops at the first failing delete.
    pub fn delete_all<'a>(
        &mut self,
        entities: impl IntoIterator<Item = &'a Entity>,
    ) -> CoreResult<()> {
        for entity in entities {
            self.delete(entity)?;
        }
        Ok(())
    }

    /// Assigns a relationship slot and applies the cascade consequences:
    /// save-update children are added, delete-orphan children whose back
    /// reference is now empty are deleted.
    ///
    /// # Errors
    ///
    /// Fails for undeclared relationships and propagates assignment and
    /// cascade failures.
    pub fn assign_related(
        &mut self,
        owner: &Entity,
        relationship_name: &str,
        value: Option<Entity>,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        let relationship = owner
            .descriptor()
            .relationship_named(relationship_name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownRelationship {
                entity: owner.entity_name().to_string(),
                relationship: relationship_name.to_string(),
            })?;

        let actions = assign(owner, &relationship, value)?;
        for action in actions {
            match action {
                CascadeAction::SaveUpdate(child) => self.add(&child)?,
                CascadeAction::DeleteOrphan(child) => {
                    let back_is_empty = relationship
                        .back_populates
                        .as_deref()
                        .is_some_and(|back| child.related(back).is_none());
                    if back_is_empty {
                        self.delete(&child)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Clears a relationship slot, deleting the orphaned child when the
    /// policy asks for it.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Session::assign_related`].
    pub fn detach_child(&mut self, parent: &Entity, relationship_name: &str) -> CoreResult<()> {
        self.assign_related(parent, relationship_name, None)
    }

    /// Writes every tracked entity's accumulated changes to the store.
    ///
    /// Entities with an empty diff are skipped. Each non-empty diff issues
    /// one update and, when an audit actor is configured, one change-log
    /// row. Flushed entities recapture their original state; activity never
    /// changes.
    ///
    /// # Errors
    ///
    /// Propagates the first driver failure.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        let entities: Vec<Entity> = self.tracked.values().cloned().collect();
        for entity in entities {
            if !entity.is_active() {
                continue;
            }
            let diff = entity.diff()?;
            if diff.is_empty() {
                continue;
            }
            self.update(&entity)?;
            if let Some(actor) = self.actor.clone() {
                let log_row = reflection::new_change_log(
                    Arc::clone(&self.change_log),
                    entity.id(),
                    entity.entity_name(),
                    &actor,
                    &diff,
                )?;
                self.insert(&log_row)?;
            }
            entity.refresh_original();
        }
        debug!(session = %self.session_id, "session flushed");
        Ok(())
    }

    fn update(&mut self, entity: &Entity) -> CoreResult<()> {
        let namespace = entity.descriptor().namespace_name().to_string();
        let table = entity.entity_name().to_string();
        let assignments = entity.update_assignments();
        let columns: Vec<String> = assignments.iter().map(|(c, _)| c.clone()).collect();
        let mut params: Vec<Value> = assignments.into_iter().map(|(_, v)| v).collect();
        params.push(Value::Text(entity.id().as_str().to_string()));
        let stmt = statement::update(
            &namespace,
            &table,
            &columns,
            &[PRIMARY_KEY_COLUMN.to_string()],
        );
        self.execute(&stmt, &params, &namespace)?;
        Ok(())
    }

    /// Flushes, commits the connection, and completes the session.
    ///
    /// All tracked instances go inert.
    ///
    /// # Errors
    ///
    /// Propagates flush and commit failures; the session stays active on
    /// failure so the caller can roll back.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.flush()?;
        self.connection()?.commit()?;
        self.complete();
        debug!(session = %self.session_id, "session committed");
        Ok(())
    }

    /// Discards staged writes and completes the session.
    ///
    /// All tracked instances go inert.
    ///
    /// # Errors
    ///
    /// Propagates driver rollback failures.
    pub fn rollback(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.connection()?.rollback()?;
        self.complete();
        debug!(session = %self.session_id, "session rolled back");
        Ok(())
    }

    fn complete(&mut self) {
        for entity in self.tracked.values() {
            entity.deactivate();
            entity.clear_related();
        }
        self.state = SessionState::Completed;
        if let Some(mut connection) = self.connection.take() {
            let _ = connection.close();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            debug!(session = %self.session_id, "rolling back session before drop");
            if let Some(connection) = self.connection.as_mut() {
                let _ = connection.rollback();
            }
            self.complete();
        } else if let Some(mut connection) = self.connection.take() {
            let _ = connection.close();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("actor", &self.actor)
            .field("tracked", &self.tracked.len())
            .finish()
    }
}
