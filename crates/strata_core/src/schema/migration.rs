//! Schema drift detection and migration statement synthesis.
//!
//! Bootstrap compares the persisted snapshot document against the currently
//! registered one. [`diff_documents`] reduces the pair to a [`SchemaDiff`];
//! the [`Migrator`] compiles the diff into ordered DDL and applies it over a
//! session's connection.

use crate::error::{CoreError, CoreResult};
use crate::schema::descriptor::EntityDecl;
use crate::schema::field::FieldDecl;
use crate::schema::registry::SchemaDocument;
use crate::session::Session;
use crate::statement;
use tracing::debug;

/// One field-level change inside an entity.
///
/// `previous` and `current` are never both `None`: a field is added,
/// dropped, or changed (rename included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Declaration in the persisted snapshot, absent for added fields.
    pub previous: Option<FieldDecl>,
    /// Declaration in the current registry, absent for dropped fields.
    pub current: Option<FieldDecl>,
}

/// The reconciliation of one entity between two snapshot documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDiff {
    /// Current entity name (the previous name for dropped entities).
    pub entity_name: String,
    /// Namespace the entity lives in.
    pub namespace: String,
    /// Previous entity name when the table itself was renamed.
    pub previous_name: Option<String>,
    /// The whole entity disappeared from the current document.
    pub dropped: bool,
    /// Field-level changes, in current-document field order.
    pub changes: Vec<FieldChange>,
}

/// All entity diffs between two snapshot documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    /// Entities with at least one change, previous-document order.
    pub entities: Vec<EntityDiff>,
}

impl SchemaDiff {
    /// Returns `true` when the documents describe the same schema.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Reconciles two snapshot documents entity by entity.
///
/// Every entity of the previous document is matched against the current one,
/// by name or through a current entity declaring it as its previous name
/// (a table rename). An unmatched previous entity is reported as dropped,
/// whole; its columns are not decomposed. Entities only present in the
/// current document need no diff at all, creation handles them.
///
/// Field matching within an entity works the same way: a current field
/// naming a previous field via its rename marker consumes that previous
/// field; otherwise fields pair up by name, and unpaired fields become adds
/// or drops. Paired fields with unequal declarations become modifications.
#[must_use]
pub fn diff_documents(previous: &SchemaDocument, current: &SchemaDocument) -> SchemaDiff {
    let mut entities = Vec::new();

    for prev_entity in &previous.schemas {
        let curr_entity = current.schemas.iter().find(|c| {
            c.entity_name == prev_entity.entity_name
                || c.previous_name.as_deref() == Some(prev_entity.entity_name.as_str())
        });

        let Some(curr_entity) = curr_entity else {
            entities.push(EntityDiff {
                entity_name: prev_entity.entity_name.clone(),
                namespace: prev_entity.namespace.clone(),
                previous_name: None,
                dropped: true,
                changes: Vec::new(),
            });
            continue;
        };

        let renamed = curr_entity.entity_name != prev_entity.entity_name;
        let changes = diff_fields(prev_entity, curr_entity);
        if renamed || !changes.is_empty() {
            entities.push(EntityDiff {
                entity_name: curr_entity.entity_name.clone(),
                namespace: curr_entity.namespace.clone(),
                previous_name: renamed.then(|| prev_entity.entity_name.clone()),
                dropped: false,
                changes,
            });
        }
    }

    SchemaDiff { entities }
}

fn diff_fields(previous: &EntityDecl, current: &EntityDecl) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let mut consumed: Vec<&str> = Vec::new();

    for curr_field in &current.fields {
        let renamed_from = curr_field.previous_name.as_deref().and_then(|prev_name| {
            previous.fields.iter().find(|p| p.name == prev_name)
        });
        if let Some(prev_field) = renamed_from {
            consumed.push(&prev_field.name);
            if prev_field != curr_field {
                changes.push(FieldChange {
                    previous: Some(prev_field.clone()),
                    current: Some(curr_field.clone()),
                });
            }
            continue;
        }
        match previous.fields.iter().find(|p| p.name == curr_field.name) {
            None => changes.push(FieldChange {
                previous: None,
                current: Some(curr_field.clone()),
            }),
            Some(prev_field) => {
                consumed.push(&prev_field.name);
                if prev_field != curr_field {
                    changes.push(FieldChange {
                        previous: Some(prev_field.clone()),
                        current: Some(curr_field.clone()),
                    });
                }
            }
        }
    }

    for prev_field in &previous.fields {
        if !consumed.contains(&prev_field.name.as_str()) {
            changes.push(FieldChange {
                previous: Some(prev_field.clone()),
                current: None,
            });
        }
    }

    changes
}

/// Compiles a [`SchemaDiff`] into DDL and applies it.
///
/// Statement order within an entity is fixed: table rename first, then field
/// drops, adds, column renames, and attribute modifications in diff order.
/// Each changed attribute among nullability, default, and declared type gets
/// its own statement.
#[derive(Debug)]
pub struct Migrator {
    statements: Vec<(String, String)>,
}

impl Migrator {
    /// Compiles the diff into ordered (namespace, statement) pairs.
    #[must_use]
    pub fn new(diff: &SchemaDiff) -> Self {
        let mut statements = Vec::new();
        for entity in &diff.entities {
            compile_entity(entity, &mut statements);
        }
        Self { statements }
    }

    /// Returns the compiled statements with their namespaces.
    #[must_use]
    pub fn statements(&self) -> &[(String, String)] {
        &self.statements
    }

    /// Applies every compiled statement over the session's connection.
    ///
    /// # Errors
    ///
    /// The first failing statement surfaces as [`CoreError::Migration`]
    /// naming the statement; previously applied DDL stays applied.
    pub fn run(&self, session: &mut Session) -> CoreResult<()> {
        for (namespace, stmt) in &self.statements {
            debug!(namespace = %namespace, statement = %stmt, "applying migration statement");
            session
                .execute(stmt, &[], namespace)
                .map_err(|source| CoreError::migration(format!("{stmt}: {source}")))?;
        }
        Ok(())
    }
}

fn compile_entity(entity: &EntityDiff, statements: &mut Vec<(String, String)>) {
    let namespace = entity.namespace.as_str();
    let table = statement::qualified(namespace, &entity.entity_name);

    if entity.dropped {
        statements.push((namespace.to_string(), format!("DROP TABLE {table}")));
        return;
    }

    if let Some(previous) = &entity.previous_name {
        let previous_table = statement::qualified(namespace, previous);
        statements.push((
            namespace.to_string(),
            format!(
                "ALTER TABLE {previous_table} RENAME TO {}",
                statement::quote_ident(&entity.entity_name)
            ),
        ));
    }

    for change in &entity.changes {
        match (&change.previous, &change.current) {
            (Some(prev), None) => statements.push((
                namespace.to_string(),
                format!(
                    "ALTER TABLE {table} DROP COLUMN {}",
                    statement::quote_ident(&prev.name)
                ),
            )),
            (None, Some(curr)) => statements.push((
                namespace.to_string(),
                format!(
                    "ALTER TABLE {table} ADD COLUMN {}",
                    statement::column_definition(
                        &curr.name,
                        &curr.ty,
                        curr.nullable,
                        curr.default.as_deref(),
                    )
                ),
            )),
            (Some(prev), Some(curr)) => {
                if prev.name != curr.name {
                    statements.push((
                        namespace.to_string(),
                        format!(
                            "ALTER TABLE {table} RENAME COLUMN {} TO {}",
                            statement::quote_ident(&prev.name),
                            statement::quote_ident(&curr.name)
                        ),
                    ));
                }
                compile_modifications(&table, namespace, prev, curr, statements);
            }
            (None, None) => {}
        }
    }
}

fn compile_modifications(
    table: &str,
    namespace: &str,
    prev: &FieldDecl,
    curr: &FieldDecl,
    statements: &mut Vec<(String, String)>,
) {
    let column = statement::quote_ident(&curr.name);

    if prev.nullable != curr.nullable {
        let clause = if curr.nullable {
            "DROP NOT NULL"
        } else {
            "SET NOT NULL"
        };
        statements.push((
            namespace.to_string(),
            format!("ALTER TABLE {table} MODIFY COLUMN {column} {clause}"),
        ));
    }

    if prev.default != curr.default {
        let stmt = match &curr.default {
            Some(literal) => {
                format!("ALTER TABLE {table} MODIFY COLUMN {column} SET DEFAULT {literal}")
            }
            None => format!("ALTER TABLE {table} MODIFY COLUMN {column} DROP DEFAULT"),
        };
        statements.push((namespace.to_string(), stmt));
    }

    if prev.ty != curr.ty {
        statements.push((
            namespace.to_string(),
            format!(
                "ALTER TABLE {table} MODIFY COLUMN {column} SET TYPE {}",
                curr.ty
            ),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::SchemaDescriptor;
    use crate::schema::field::{FieldDef, FieldType};
    use strata_driver::Value;

    fn document(descriptors: Vec<SchemaDescriptor>) -> SchemaDocument {
        SchemaDocument {
            version: "0".to_string(),
            schemas: descriptors.iter().map(SchemaDescriptor::declaration).collect(),
        }
    }

    fn users(fields: Vec<FieldDef>) -> SchemaDescriptor {
        SchemaDescriptor::new("users", fields)
    }

    #[test]
    fn identical_documents_diff_empty() {
        let doc = document(vec![users(vec![FieldDef::new("name", FieldType::Text)])]);
        assert!(diff_documents(&doc, &doc).is_empty());
    }

    #[test]
    fn added_field_becomes_add_column() {
        let previous = document(vec![users(vec![FieldDef::new("name", FieldType::Text)])]);
        let current = document(vec![users(vec![
            FieldDef::new("name", FieldType::Text),
            FieldDef::new("age", FieldType::Integer).not_null(),
        ])]);

        let diff = diff_documents(&previous, &current);
        let statements = Migrator::new(&diff);
        assert_eq!(
            statements.statements(),
            &[(
                "public".to_string(),
                "ALTER TABLE \"public\".\"users\" ADD COLUMN \"age\" INTEGER NOT NULL"
                    .to_string()
            )]
        );
    }

    #[test]
    fn dropped_field_becomes_drop_column() {
        let previous = document(vec![users(vec![
            FieldDef::new("name", FieldType::Text),
            FieldDef::new("age", FieldType::Integer),
        ])]);
        let current = document(vec![users(vec![FieldDef::new("name", FieldType::Text)])]);

        let statements = Migrator::new(&diff_documents(&previous, &current));
        assert_eq!(
            statements.statements(),
            &[(
                "public".to_string(),
                "ALTER TABLE \"public\".\"users\" DROP COLUMN \"age\"".to_string()
            )]
        );
    }

    #[test]
    fn rename_marker_beats_positional_matching() {
        let previous = document(vec![users(vec![FieldDef::new("name", FieldType::Text)])]);
        let current = document(vec![users(vec![
            FieldDef::new("full_name", FieldType::Text).renamed_from("name"),
        ])]);

        let statements = Migrator::new(&diff_documents(&previous, &current));
        assert_eq!(
            statements.statements(),
            &[(
                "public".to_string(),
                "ALTER TABLE \"public\".\"users\" RENAME COLUMN \"name\" TO \"full_name\""
                    .to_string()
            )]
        );
    }

    #[test]
    fn one_statement_per_changed_attribute() {
        let previous = document(vec![users(vec![
            FieldDef::new("age", FieldType::Integer),
        ])]);
        let current = document(vec![users(vec![
            FieldDef::new("age", FieldType::BigInt)
                .not_null()
                .default_value(Value::Int(0)),
        ])]);

        let statements = Migrator::new(&diff_documents(&previous, &current));
        let texts: Vec<&str> = statements
            .statements()
            .iter()
            .map(|(_, s)| s.as_str())
            .collect();
        assert_eq!(
            texts,
            vec![
                "ALTER TABLE \"public\".\"users\" MODIFY COLUMN \"age\" SET NOT NULL",
                "ALTER TABLE \"public\".\"users\" MODIFY COLUMN \"age\" SET DEFAULT 0",
                "ALTER TABLE \"public\".\"users\" MODIFY COLUMN \"age\" SET TYPE BIGINT",
            ]
        );
    }

    #[test]
    fn table_rename_emitted_first() {
        let previous = document(vec![SchemaDescriptor::new(
            "accounts",
            vec![FieldDef::new("name", FieldType::Text)],
        )]);
        let current = document(vec![SchemaDescriptor::new(
            "users",
            vec![
                FieldDef::new("name", FieldType::Text),
                FieldDef::new("age", FieldType::Integer),
            ],
        )
        .renamed_from("accounts")]);

        let statements = Migrator::new(&diff_documents(&previous, &current));
        let texts: Vec<&str> = statements
            .statements()
            .iter()
            .map(|(_, s)| s.as_str())
            .collect();
        assert_eq!(
            texts,
            vec![
                "ALTER TABLE \"public\".\"accounts\" RENAME TO \"users\"",
                "ALTER TABLE \"public\".\"users\" ADD COLUMN \"age\" INTEGER NULL",
            ]
        );
    }

    #[test]
    fn dropped_entity_becomes_drop_table() {
        let previous = document(vec![
            users(vec![FieldDef::new("name", FieldType::Text)]),
            SchemaDescriptor::new("bikes", vec![FieldDef::new("brand", FieldType::Text)]),
        ]);
        let current = document(vec![users(vec![FieldDef::new("name", FieldType::Text)])]);

        let diff = diff_documents(&previous, &current);
        assert_eq!(diff.entities.len(), 1);
        assert!(diff.entities[0].dropped);
        assert!(diff.entities[0].changes.is_empty());

        let statements = Migrator::new(&diff);
        assert_eq!(
            statements.statements(),
            &[(
                "public".to_string(),
                "DROP TABLE \"public\".\"bikes\"".to_string()
            )]
        );
    }

    #[test]
    fn failing_statement_surfaces_as_migration_error() {
        use crate::reflection;
        use std::sync::Arc;
        use strata_driver::MemoryDriver;

        // Renaming a table that was never created fails in the driver; the
        // migrator reports it with the offending statement.
        let previous = document(vec![SchemaDescriptor::new(
            "accounts",
            vec![FieldDef::new("name", FieldType::Text)],
        )]);
        let current = document(vec![SchemaDescriptor::new(
            "users",
            vec![FieldDef::new("name", FieldType::Text)],
        )
        .renamed_from("accounts")]);

        let mut session = Session::new(
            Arc::new(MemoryDriver::new()),
            None,
            Arc::new(reflection::change_log_descriptor()),
        );
        session.begin().unwrap();

        let result = Migrator::new(&diff_documents(&previous, &current)).run(&mut session);
        match result {
            Err(CoreError::Migration { message }) => {
                assert!(message.contains("RENAME TO"));
            }
            other => panic!("expected a migration error, got {other:?}"),
        }
    }

    #[test]
    fn new_entity_produces_no_statements() {
        let previous = document(vec![users(vec![FieldDef::new("name", FieldType::Text)])]);
        let current = document(vec![
            users(vec![FieldDef::new("name", FieldType::Text)]),
            SchemaDescriptor::new("bikes", vec![FieldDef::new("brand", FieldType::Text)]),
        ]);

        let diff = diff_documents(&previous, &current);
        assert!(diff.is_empty());
    }
}
