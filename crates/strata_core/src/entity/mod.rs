//! Tracked entities and the dirty-diff engine.

mod id;

pub use id::EntryId;

use crate::error::{CoreError, CoreResult};
use crate::schema::descriptor::{SchemaDescriptor, PRIMARY_KEY_COLUMN};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use strata_driver::{Row, Value};

/// One live record instance.
///
/// An entity is a cheap-to-clone handle; clones share the same underlying
/// instance, and sessions hand out and track these handles freely. Each
/// instance captures a deep copy of its field values at construction (the
/// "original state") which the dirty-diff compares against at flush time.
///
/// An instance is **active** until it is superseded by a newer query result
/// with the same identity, deleted within its session, or its session
/// completes. Inert instances reject every mutation.
#[derive(Clone)]
pub struct Entity {
    id: EntryId,
    descriptor: Arc<SchemaDescriptor>,
    state: Arc<Mutex<State>>,
}

struct State {
    values: BTreeMap<String, Value>,
    original: BTreeMap<String, Value>,
    active: bool,
    related: BTreeMap<String, Entity>,
}

impl Entity {
    /// Creates a new entity with a fresh identity.
    ///
    /// `values` maps program-facing field names to initial values; every
    /// name must be declared by the descriptor.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::UnknownField`] for undeclared names.
    pub fn new(
        descriptor: Arc<SchemaDescriptor>,
        values: impl IntoIterator<Item = (impl Into<String>, Value)>,
    ) -> CoreResult<Self> {
        Self::with_id(descriptor, EntryId::new(), values)
    }

    /// Creates an entity with a caller-chosen identity.
    ///
    /// Used for singleton rows such as the schema snapshot, whose identity
    /// is the application id.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::UnknownField`] for undeclared names.
    pub fn with_id(
        descriptor: Arc<SchemaDescriptor>,
        id: EntryId,
        values: impl IntoIterator<Item = (impl Into<String>, Value)>,
    ) -> CoreResult<Self> {
        let mut map = BTreeMap::new();
        for (attribute, value) in values {
            let attribute = attribute.into();
            if descriptor.field(&attribute).is_none() {
                return Err(CoreError::UnknownField {
                    entity: descriptor.entity_name().to_string(),
                    field: attribute,
                });
            }
            map.insert(attribute, value);
        }
        Ok(Self {
            id,
            descriptor,
            state: Arc::new(Mutex::new(State {
                original: map.clone(),
                values: map,
                active: true,
                related: BTreeMap::new(),
            })),
        })
    }

    /// Rebuilds an entity from a driver row.
    ///
    /// The row's `_entry_id` column supplies the identity; declared columns
    /// present in the row become field values. The rebuilt instance is
    /// active with a fresh original state.
    ///
    /// # Errors
    ///
    /// Fails if the row has no textual primary-key column.
    pub fn from_row(descriptor: Arc<SchemaDescriptor>, row: &Row) -> CoreResult<Self> {
        let id = row
            .get(PRIMARY_KEY_COLUMN)
            .and_then(Value::as_text)
            .map(EntryId::from)
            .ok_or_else(|| {
                CoreError::schema(format!(
                    "row for entity {} carries no {PRIMARY_KEY_COLUMN} column",
                    descriptor.entity_name()
                ))
            })?;
        let values: Vec<(String, Value)> = descriptor
            .fields()
            .iter()
            .filter(|f| !f.is_primary_key())
            .filter_map(|f| row.get(&f.column).map(|v| (f.attribute.clone(), v.clone())))
            .collect();
        Self::with_id(descriptor, id, values)
    }

    /// Returns the identity.
    #[must_use]
    pub fn id(&self) -> &EntryId {
        &self.id
    }

    /// Returns the schema descriptor this entity is bound to.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<SchemaDescriptor> {
        &self.descriptor
    }

    /// Returns the entity name from the bound descriptor.
    #[must_use]
    pub fn entity_name(&self) -> &str {
        self.descriptor.entity_name()
    }

    /// Returns `true` while this instance may be mutated.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Returns `true` when both handles refer to the same instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Reads a field value by program-facing name.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<Value> {
        self.state.lock().values.get(attribute).cloned()
    }

    /// Writes a field value.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::StaleEntity`] on an inert instance, with
    /// [`CoreError::UnknownField`] for undeclared names, and with a schema
    /// error when the primary key is targeted.
    pub fn set(&self, attribute: &str, value: Value) -> CoreResult<()> {
        if attribute == PRIMARY_KEY_COLUMN {
            return Err(CoreError::schema(format!(
                "{PRIMARY_KEY_COLUMN} is immutable"
            )));
        }
        if self.descriptor.field(attribute).is_none() {
            return Err(CoreError::UnknownField {
                entity: self.entity_name().to_string(),
                field: attribute.to_string(),
            });
        }
        let mut state = self.state.lock();
        if !state.active {
            return Err(CoreError::stale(self.id.clone()));
        }
        state.values.insert(attribute.to_string(), value);
        Ok(())
    }

    /// Computes the dirty diff against the captured original state.
    ///
    /// For every declared field, the captured and current values are
    /// compared by value; unequal pairs map program name to (old, new).
    /// Fields absent from both states are skipped; a field present only in
    /// the current state diffs from [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::StaleEntity`] on an inert instance - a diff
    /// of a superseded handle would describe changes nobody may flush.
    pub fn diff(&self) -> CoreResult<BTreeMap<String, (Value, Value)>> {
        let state = self.state.lock();
        if !state.active {
            return Err(CoreError::stale(self.id.clone()));
        }
        let mut changes = BTreeMap::new();
        for field in self.descriptor.fields() {
            let original = state.original.get(&field.attribute);
            let current = state.values.get(&field.attribute);
            if original.is_none() && current.is_none() {
                continue;
            }
            if original != current {
                changes.insert(
                    field.attribute.clone(),
                    (
                        original.cloned().unwrap_or(Value::Null),
                        current.cloned().unwrap_or(Value::Null),
                    ),
                );
            }
        }
        Ok(changes)
    }

    /// Reads a relationship slot.
    ///
    /// An unset slot yields `None`, never an error.
    #[must_use]
    pub fn related(&self, relationship: &str) -> Option<Entity> {
        self.state.lock().related.get(relationship).cloned()
    }

    /// Writes a relationship slot directly, without reciprocal sync.
    ///
    /// Callers go through [`crate::schema::relationship::assign`] for the
    /// synchronized path.
    pub(crate) fn set_related(&self, relationship: &str, value: Option<Entity>) -> CoreResult<()> {
        let mut state = self.state.lock();
        if !state.active {
            return Err(CoreError::stale(self.id.clone()));
        }
        match value {
            Some(entity) => {
                state.related.insert(relationship.to_string(), entity);
            }
            None => {
                state.related.remove(relationship);
            }
        }
        Ok(())
    }

    /// Marks the instance inert. Mutations are rejected from here on.
    pub(crate) fn deactivate(&self) {
        self.state.lock().active = false;
    }

    /// Recaptures the original state after a successful flush.
    pub(crate) fn refresh_original(&self) {
        let mut state = self.state.lock();
        state.original = state.values.clone();
    }

    /// Drops all relationship handles.
    ///
    /// Called when a session completes so reference cycles between related
    /// instances cannot outlive it.
    pub(crate) fn clear_related(&self) {
        self.state.lock().related.clear();
    }

    /// Storage-format projection for an insert: primary key first, then
    /// every declared field present in the current state, as (column,
    /// value) pairs.
    #[must_use]
    pub fn insert_row(&self) -> Vec<(String, Value)> {
        let state = self.state.lock();
        let mut row = vec![(
            PRIMARY_KEY_COLUMN.to_string(),
            Value::Text(self.id.as_str().to_string()),
        )];
        for field in self.descriptor.fields() {
            if field.is_primary_key() {
                continue;
            }
            if let Some(value) = state.values.get(&field.attribute) {
                row.push((field.column.clone(), value.clone()));
            }
        }
        row
    }

    /// Storage-format projection for an update: declared fields present in
    /// the current state, primary key excluded.
    #[must_use]
    pub fn update_assignments(&self) -> Vec<(String, Value)> {
        let state = self.state.lock();
        self.descriptor
            .fields()
            .iter()
            .filter(|f| !f.is_primary_key())
            .filter_map(|f| {
                state
                    .values
                    .get(&f.attribute)
                    .map(|v| (f.column.clone(), v.clone()))
            })
            .collect()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Entity")
            .field("entity", &self.descriptor.entity_name())
            .field("id", &self.id)
            .field("active", &state.active)
            .field("values", &state.values)
            .finish()
    }
}
