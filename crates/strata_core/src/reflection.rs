//! Engine-internal entities: the audit change log and the schema snapshot.
//!
//! Both live in their own namespace so they never collide with user tables.
//! They are ordinary entities over internal descriptors and flow through the
//! same session machinery as everything else; bootstrap registers their
//! descriptors before any user session opens.

use crate::entity::{Entity, EntryId};
use crate::error::CoreResult;
use crate::schema::descriptor::SchemaDescriptor;
use crate::schema::field::{FieldDef, FieldType};
use crate::schema::registry::SchemaDocument;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use strata_driver::Value;

/// Namespace holding the engine's own tables.
pub const INTERNAL_NAMESPACE: &str = "internal";

/// Table recording one row per audited field-level change set.
pub const CHANGE_LOG_TABLE: &str = "change_log";

/// Table holding one persisted schema snapshot per application.
pub const SNAPSHOT_TABLE: &str = "snapshot";

/// Actor name used for bootstrap sessions.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// Builds the change-log table descriptor.
#[must_use]
pub fn change_log_descriptor() -> SchemaDescriptor {
    SchemaDescriptor::new(
        CHANGE_LOG_TABLE,
        vec![
            FieldDef::new("modified_entry_id", FieldType::Text).not_null(),
            FieldDef::new("modified_entity_name", FieldType::Text).not_null(),
            FieldDef::new("modified_by", FieldType::Text).not_null(),
            FieldDef::new("date_of_change", FieldType::Timestamp).not_null(),
            FieldDef::new("changes", FieldType::Json).not_null(),
        ],
    )
    .namespace(INTERNAL_NAMESPACE)
}

/// Builds the snapshot table descriptor.
///
/// The snapshot row's identity is the application id, so each application
/// owns exactly one row.
#[must_use]
pub fn snapshot_descriptor() -> SchemaDescriptor {
    SchemaDescriptor::new(
        SNAPSHOT_TABLE,
        vec![FieldDef::new("snapshot", FieldType::Json).not_null()],
    )
    .namespace(INTERNAL_NAMESPACE)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Builds a change-log entity for one flushed diff.
///
/// The diff's (old, new) pairs are rendered into a JSON object mapping each
/// field name to a two-element array in audit form.
///
/// # Errors
///
/// Propagates descriptor mismatches from entity construction.
pub fn new_change_log(
    descriptor: Arc<SchemaDescriptor>,
    modified_entry_id: &EntryId,
    modified_entity_name: &str,
    modified_by: &str,
    diff: &BTreeMap<String, (Value, Value)>,
) -> CoreResult<Entity> {
    let changes: serde_json::Map<String, serde_json::Value> = diff
        .iter()
        .map(|(field, (old, new))| {
            (
                field.clone(),
                serde_json::Value::Array(vec![old.to_json(), new.to_json()]),
            )
        })
        .collect();

    Entity::new(
        descriptor,
        [
            (
                "modified_entry_id",
                Value::Text(modified_entry_id.as_str().to_string()),
            ),
            (
                "modified_entity_name",
                Value::Text(modified_entity_name.to_string()),
            ),
            ("modified_by", Value::Text(modified_by.to_string())),
            ("date_of_change", Value::Timestamp(now_millis())),
            ("changes", Value::Json(serde_json::Value::Object(changes))),
        ],
    )
}

/// Builds the snapshot entity for an application, identity fixed to the
/// application id.
///
/// # Errors
///
/// Fails when the document does not serialize.
pub fn new_snapshot(
    descriptor: Arc<SchemaDescriptor>,
    application_id: &str,
    document: &SchemaDocument,
) -> CoreResult<Entity> {
    Entity::with_id(
        descriptor,
        EntryId::from(application_id),
        [("snapshot", Value::Json(serde_json::to_value(document)?))],
    )
}

/// Reads the schema document back out of a snapshot entity.
///
/// # Errors
///
/// Fails with a snapshot error when the field is missing or not a document.
pub fn parse_snapshot(entity: &Entity) -> CoreResult<SchemaDocument> {
    let value = entity
        .get("snapshot")
        .and_then(|v| v.as_json().cloned())
        .ok_or_else(|| {
            crate::error::CoreError::snapshot(format!(
                "snapshot row {} carries no snapshot document",
                entity.id()
            ))
        })?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::registry::SchemaRegistry;

    #[test]
    fn internal_descriptors_live_in_internal_namespace() {
        assert_eq!(change_log_descriptor().namespace_name(), INTERNAL_NAMESPACE);
        assert_eq!(snapshot_descriptor().namespace_name(), INTERNAL_NAMESPACE);
        assert_eq!(change_log_descriptor().fields().len(), 6);
    }

    #[test]
    fn change_log_row_renders_diff_as_json() {
        let mut diff = BTreeMap::new();
        diff.insert(
            "name".to_string(),
            (Value::Text("alice".into()), Value::Text("alicia".into())),
        );
        let id = EntryId::new();
        let row = new_change_log(
            Arc::new(change_log_descriptor()),
            &id,
            "users",
            "tester",
            &diff,
        )
        .unwrap();

        assert_eq!(
            row.get("modified_entry_id"),
            Some(Value::Text(id.as_str().to_string()))
        );
        assert_eq!(row.get("modified_by"), Some(Value::Text("tester".into())));
        let changes = row.get("changes").unwrap();
        let json = changes.as_json().unwrap();
        assert_eq!(json["name"][0], "alice");
        assert_eq!(json["name"][1], "alicia");
    }

    #[test]
    fn snapshot_roundtrips_the_document() {
        let registry = SchemaRegistry::new();
        registry.register(snapshot_descriptor()).unwrap();
        let document = registry.document().unwrap();

        let entity = new_snapshot(
            Arc::new(snapshot_descriptor()),
            "a8817239-9bae-4961-a619-1e9ef5575eff",
            &document,
        )
        .unwrap();
        assert_eq!(entity.id().as_str(), "a8817239-9bae-4961-a619-1e9ef5575eff");
        assert_eq!(parse_snapshot(&entity).unwrap(), document);
    }

    #[test]
    fn snapshot_without_document_fails_parse() {
        let entity = Entity::new(
            Arc::new(snapshot_descriptor()),
            std::iter::empty::<(&str, Value)>(),
        )
        .unwrap();
        assert!(parse_snapshot(&entity).is_err());
    }
}
