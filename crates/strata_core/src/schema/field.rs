//! Field and type adapters.
//!
//! A [`FieldDef`] describes one column: its storage name, program-facing
//! name, semantic type, nullability, uniqueness, default, and - for foreign
//! keys - the referenced entity and column. The adapter converts values
//! between the program representation, the wire-serializable form, and the
//! JSON-serializable audit form used by the change log.

use serde::{Deserialize, Serialize};
use strata_driver::Value;

/// Semantic column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Bounded text.
    VarChar(u32),
    /// Unbounded text.
    Text,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Double-precision float.
    Double,
    /// Boolean.
    Boolean,
    /// Unix-millisecond timestamp.
    Timestamp,
    /// JSON document.
    Json,
}

impl FieldType {
    /// Returns the declared DDL type string.
    #[must_use]
    pub fn ddl_type(&self) -> String {
        match self {
            Self::VarChar(len) => format!("VARCHAR({len})"),
            Self::Text => "TEXT".to_string(),
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::Double => "DOUBLE".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Timestamp => "TIMESTAMP".to_string(),
            Self::Json => "JSON".to_string(),
        }
    }

    /// Renders a value as a SQL literal, for DEFAULT clauses.
    #[must_use]
    pub fn sql_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Timestamp(ms) => ms.to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Json(j) => format!("'{}'", j.to_string().replace('\'', "''")),
        }
    }

    /// Converts a value to the JSON-serializable audit form.
    #[must_use]
    pub fn to_audit(&self, value: &Value) -> serde_json::Value {
        value.to_json()
    }
}

/// Role a field plays in its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRole {
    /// Ordinary column.
    Plain,
    /// Primary-key column.
    PrimaryKey,
    /// Foreign-key column.
    ForeignKey {
        /// Name of the referenced entity.
        entity: String,
        /// Storage name of the referenced column.
        column: String,
    },
}

/// Declaration of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Storage (column) name.
    pub column: String,
    /// Program-facing (attribute) name.
    pub attribute: String,
    /// Semantic type.
    pub ty: FieldType,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// Whether values must be unique.
    pub unique: bool,
    /// Default value, if any.
    pub default: Option<Value>,
    /// Storage name this column had in the previous schema version.
    ///
    /// Declaring it lets the migrator detect a rename instead of emitting a
    /// drop/add pair.
    pub previous_name: Option<String>,
    /// Role in the table.
    pub role: FieldRole,
}

impl FieldDef {
    /// Creates an ordinary nullable field whose storage and program names
    /// are the same.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            attribute: name,
            ty,
            nullable: true,
            unique: false,
            default: None,
            previous_name: None,
            role: FieldRole::Plain,
        }
    }

    /// Creates a primary-key field.
    #[must_use]
    pub fn primary_key(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            role: FieldRole::PrimaryKey,
            nullable: false,
            unique: true,
            ..Self::new(name, ty)
        }
    }

    /// Creates a foreign-key field referencing another entity's column.
    #[must_use]
    pub fn foreign_key(
        name: impl Into<String>,
        ty: FieldType,
        entity: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            role: FieldRole::ForeignKey {
                entity: entity.into(),
                column: column.into(),
            },
            ..Self::new(name, ty)
        }
    }

    /// Marks the field NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the field UNIQUE.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Declares the storage name this column had before a rename.
    #[must_use]
    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.previous_name = Some(previous.into());
        self
    }

    /// Uses a different program-facing name than the storage name.
    #[must_use]
    pub fn attribute_name(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into();
        self
    }

    /// Returns the referenced (entity, column) for foreign-key fields.
    #[must_use]
    pub fn references(&self) -> Option<(&str, &str)> {
        match &self.role {
            FieldRole::ForeignKey { entity, column } => Some((entity, column)),
            _ => None,
        }
    }

    /// Returns `true` for the primary-key field.
    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.role == FieldRole::PrimaryKey
    }

    /// Produces the declarative form used in schema snapshots.
    #[must_use]
    pub fn declaration(&self) -> FieldDecl {
        FieldDecl {
            name: self.column.clone(),
            ty: self.ty.ddl_type(),
            nullable: self.nullable,
            unique: self.unique,
            default: self.default.as_ref().map(|v| self.ty.sql_literal(v)),
            previous_name: self.previous_name.clone(),
        }
    }
}

/// Declarative (snapshot) form of one column.
///
/// This is what gets persisted in the schema snapshot and diffed by the
/// migrator; everything here is already rendered to storage-level strings
/// so two snapshots compare without type information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    /// Storage name.
    pub name: String,
    /// Declared DDL type string.
    #[serde(rename = "type")]
    pub ty: String,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// Whether values must be unique.
    pub unique: bool,
    /// Rendered default literal, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Previous storage name, when declaring a rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_name: Option<String>,
}
