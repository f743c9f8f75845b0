//! Schema registry and foreign-key dependency ordering.

use crate::error::{CoreError, CoreResult};
use crate::schema::descriptor::{EntityDecl, SchemaDescriptor};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The full declarative description of all registered schemas at a point in
/// time, persisted for drift detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// Version marker (unix milliseconds at capture time).
    pub version: String,
    /// Entity declarations in dependency order.
    pub schemas: Vec<EntityDecl>,
}

/// Catalog of every registered schema descriptor.
///
/// The registry has an explicit two-phase lifecycle: a registration phase at
/// construction time, then a frozen phase once the dependency order has been
/// computed. Registration after the first order computation fails loudly;
/// the memoized order is therefore safe to read repeatedly without
/// revalidation.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    descriptors: Vec<Arc<SchemaDescriptor>>,
    ordered: Option<Vec<Arc<SchemaDescriptor>>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema descriptor.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::RegistryFrozen`] once the dependency order
    /// has been computed, and with a schema error for descriptor-level
    /// invariant violations (duplicate entity name within a namespace,
    /// duplicate field names).
    pub fn register(&self, descriptor: SchemaDescriptor) -> CoreResult<()> {
        descriptor.validate().map_err(CoreError::schema)?;
        let mut inner = self.inner.write();
        if inner.ordered.is_some() {
            return Err(CoreError::RegistryFrozen);
        }
        let duplicate = inner.descriptors.iter().any(|d| {
            d.entity_name() == descriptor.entity_name()
                && d.namespace_name() == descriptor.namespace_name()
        });
        if duplicate {
            return Err(CoreError::schema(format!(
                "entity {} is already registered in namespace {}",
                descriptor.entity_name(),
                descriptor.namespace_name()
            )));
        }
        inner.descriptors.push(Arc::new(descriptor));
        Ok(())
    }

    /// Looks up a registered descriptor by entity name.
    #[must_use]
    pub fn get(&self, entity_name: &str) -> Option<Arc<SchemaDescriptor>> {
        self.inner
            .read()
            .descriptors
            .iter()
            .find(|d| d.entity_name() == entity_name)
            .cloned()
    }

    /// Returns the number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().descriptors.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().descriptors.is_empty()
    }

    /// Returns all descriptors in foreign-key dependency order: every
    /// descriptor referenced by another's foreign key precedes it.
    ///
    /// The order is computed once and memoized; computing it freezes the
    /// registry against further registration. The tie-break among
    /// simultaneously ready descriptors is arbitrary.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::CyclicDependency`] naming every descriptor
    /// left unresolved when the ready queue drains - self references,
    /// multi-node cycles, and references to unregistered entities alike.
    pub fn ordered(&self) -> CoreResult<Vec<Arc<SchemaDescriptor>>> {
        if let Some(ordered) = &self.inner.read().ordered {
            return Ok(ordered.clone());
        }
        let mut inner = self.inner.write();
        if let Some(ordered) = &inner.ordered {
            return Ok(ordered.clone());
        }
        let ordered = sort_by_foreign_key(&inner.descriptors)?;
        inner.ordered = Some(ordered.clone());
        Ok(ordered)
    }

    /// Captures the full declarative snapshot document, entities in
    /// dependency order.
    ///
    /// # Errors
    ///
    /// Fails when no dependency order exists.
    pub fn document(&self) -> CoreResult<SchemaDocument> {
        let version = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            .to_string();
        Ok(SchemaDocument {
            version,
            schemas: self
                .ordered()?
                .iter()
                .map(|d| d.declaration())
                .collect(),
        })
    }
}

/// Kahn's algorithm over the foreign-key graph.
///
/// Edges run from a referencing descriptor to the descriptors it
/// references; in-degrees count unresolved references only.
fn sort_by_foreign_key(
    descriptors: &[Arc<SchemaDescriptor>],
) -> CoreResult<Vec<Arc<SchemaDescriptor>>> {
    let by_name: BTreeMap<&str, &Arc<SchemaDescriptor>> = descriptors
        .iter()
        .map(|d| (d.entity_name(), d))
        .collect();

    let mut dependencies: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for descriptor in descriptors {
        let name = descriptor.entity_name();
        dependencies.entry(name).or_default();
        for field in descriptor.fields() {
            if let Some((referenced, _)) = field.references() {
                // A reference to an unregistered entity can never resolve
                // and surfaces through the same unresolved-set failure.
                dependencies
                    .entry(name)
                    .or_default()
                    .insert(referenced);
                dependents.entry(referenced).or_default().insert(name);
            }
        }
    }

    let mut queue: VecDeque<&str> = by_name
        .keys()
        .copied()
        .filter(|name| dependencies[name].is_empty())
        .collect();
    let mut ordered_names = Vec::with_capacity(descriptors.len());
    while let Some(name) = queue.pop_front() {
        ordered_names.push(name);
        if let Some(children) = dependents.get(name) {
            for child in children.clone() {
                let remaining = dependencies.entry(child).or_default();
                remaining.remove(name);
                if remaining.is_empty() {
                    queue.push_back(child);
                }
            }
        }
    }

    if ordered_names.len() != by_name.len() {
        let resolved: BTreeSet<&str> = ordered_names.iter().copied().collect();
        let unresolved = by_name
            .keys()
            .filter(|name| !resolved.contains(*name))
            .map(ToString::to_string)
            .collect();
        return Err(CoreError::CyclicDependency {
            entities: unresolved,
        });
    }

    Ok(ordered_names
        .into_iter()
        .map(|name| Arc::clone(by_name[name]))
        .collect())
}
