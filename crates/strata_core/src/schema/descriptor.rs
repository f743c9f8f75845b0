//! Schema descriptors.

use crate::schema::field::{FieldDecl, FieldDef, FieldType};
use crate::schema::relationship::Relationship;
use serde::{Deserialize, Serialize};

/// Namespace used when a descriptor does not name one.
pub const DEFAULT_NAMESPACE: &str = "public";

/// Storage name of the synthetic primary-key column.
pub const PRIMARY_KEY_COLUMN: &str = "_entry_id";

/// The declared shape of one entity.
///
/// A descriptor is an ordered set of [`FieldDef`]s plus an entity name and
/// namespace. The synthetic primary-key field is always prepended, so user
/// fields never have to declare identity themselves. Relationships declared
/// on the entity live here too; they are object-graph edges, not columns,
/// and do not appear in snapshots.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    entity_name: String,
    namespace: String,
    previous_name: Option<String>,
    fields: Vec<FieldDef>,
    relationships: Vec<Relationship>,
}

impl SchemaDescriptor {
    /// Creates a descriptor in the default namespace.
    ///
    /// The synthetic `_entry_id VARCHAR(36)` primary key is prepended to
    /// `fields`.
    #[must_use]
    pub fn new(entity_name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        let mut all_fields =
            vec![FieldDef::primary_key(PRIMARY_KEY_COLUMN, FieldType::VarChar(36))];
        all_fields.extend(fields);
        Self {
            entity_name: entity_name.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            previous_name: None,
            fields: all_fields,
            relationships: Vec::new(),
        }
    }

    /// Places the entity in a namespace other than the default.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Declares the name this entity's table had before a rename.
    #[must_use]
    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.previous_name = Some(previous.into());
        self
    }

    /// Declares a relationship on this entity.
    #[must_use]
    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Returns the entity name.
    #[must_use]
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Returns the namespace name.
    #[must_use]
    pub fn namespace_name(&self) -> &str {
        &self.namespace
    }

    /// Returns the previous entity name, if a table rename is declared.
    #[must_use]
    pub fn previous_entity_name(&self) -> Option<&str> {
        self.previous_name.as_deref()
    }

    /// Returns all fields in declaration order, primary key first.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Looks up a field by program-facing name.
    #[must_use]
    pub fn field(&self, attribute: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.attribute == attribute)
    }

    /// Returns all declared relationships.
    #[must_use]
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Looks up a relationship by slot name.
    #[must_use]
    pub fn relationship_named(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Checks descriptor-level invariants: unique storage names and unique
    /// program names.
    pub(crate) fn validate(&self) -> Result<(), String> {
        for (i, field) in self.fields.iter().enumerate() {
            for other in &self.fields[i + 1..] {
                if field.column == other.column {
                    return Err(format!(
                        "entity {} declares column {} twice",
                        self.entity_name, field.column
                    ));
                }
                if field.attribute == other.attribute {
                    return Err(format!(
                        "entity {} declares attribute {} twice",
                        self.entity_name, field.attribute
                    ));
                }
            }
        }
        Ok(())
    }

    /// Produces the declarative form used in schema snapshots.
    #[must_use]
    pub fn declaration(&self) -> EntityDecl {
        EntityDecl {
            entity_name: self.entity_name.clone(),
            namespace: self.namespace.clone(),
            previous_name: self.previous_name.clone(),
            fields: self.fields.iter().map(FieldDef::declaration).collect(),
        }
    }
}

/// Declarative (snapshot) form of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDecl {
    /// Entity name.
    pub entity_name: String,
    /// Namespace name.
    pub namespace: String,
    /// Previous entity name, when declaring a table rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_name: Option<String>,
    /// Ordered field declarations, primary key first.
    pub fields: Vec<FieldDecl>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_is_prepended() {
        let descriptor = SchemaDescriptor::new("users", vec![FieldDef::new("name", FieldType::Text)]);
        let fields = descriptor.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].column, PRIMARY_KEY_COLUMN);
        assert!(fields[0].is_primary_key());
        assert_eq!(fields[1].column, "name");
    }

    #[test]
    fn default_namespace() {
        let descriptor = SchemaDescriptor::new("users", vec![]);
        assert_eq!(descriptor.namespace_name(), DEFAULT_NAMESPACE);
        let internal = SchemaDescriptor::new("snapshot", vec![]).namespace("internal");
        assert_eq!(internal.namespace_name(), "internal");
    }

    #[test]
    fn field_lookup_by_attribute() {
        let descriptor = SchemaDescriptor::new(
            "users",
            vec![FieldDef::new("email", FieldType::Text).attribute_name("mail")],
        );
        assert!(descriptor.field("mail").is_some());
        assert!(descriptor.field("email").is_none());
    }

    #[test]
    fn duplicate_column_fails_validation() {
        let descriptor = SchemaDescriptor::new(
            "users",
            vec![
                FieldDef::new("name", FieldType::Text),
                FieldDef::new("name", FieldType::Text),
            ],
        );
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn declaration_carries_all_fields() {
        let descriptor = SchemaDescriptor::new(
            "users",
            vec![FieldDef::new("name", FieldType::Text).not_null()],
        )
        .renamed_from("accounts");
        let decl = descriptor.declaration();
        assert_eq!(decl.entity_name, "users");
        assert_eq!(decl.previous_name.as_deref(), Some("accounts"));
        assert_eq!(decl.fields.len(), 2);
        assert_eq!(decl.fields[0].name, PRIMARY_KEY_COLUMN);
    }
}
