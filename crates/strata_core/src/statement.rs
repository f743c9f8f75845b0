//! Textual DDL/DML statement compilation.
//!
//! The engine talks to drivers in parameterized statement text. This module
//! owns all of that text: identifier quoting, table creation from a schema
//! descriptor, and the parameterized INSERT/UPDATE/DELETE/SELECT shapes the
//! session and query builder issue. Migration ALTER statements are composed
//! in the migration module from the same quoting helpers.

use crate::schema::descriptor::SchemaDescriptor;
use crate::schema::field::FieldDef;

/// Quotes one identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// Quotes a namespace-qualified table name.
#[must_use]
pub fn qualified(namespace: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(namespace), quote_ident(table))
}

/// Compiles a "create namespace" statement.
#[must_use]
pub fn create_namespace(namespace: &str) -> String {
    format!(
        "CREATE RELATIONAL NAMESPACE IF NOT EXISTS {}",
        quote_ident(namespace)
    )
}

/// Renders one column definition clause.
#[must_use]
pub fn column_definition(
    name: &str,
    ty: &str,
    nullable: bool,
    default: Option<&str>,
) -> String {
    let mut clause = format!("{} {}", quote_ident(name), ty);
    clause.push_str(if nullable { " NULL" } else { " NOT NULL" });
    if let Some(literal) = default {
        clause.push_str(" DEFAULT ");
        clause.push_str(literal);
    }
    clause
}

fn field_definition(field: &FieldDef) -> String {
    let decl = field.declaration();
    column_definition(&decl.name, &decl.ty, decl.nullable, decl.default.as_deref())
}

/// Compiles a "create table" statement for a schema descriptor: column
/// definitions followed by foreign-key, primary-key, and uniqueness
/// constraints.
#[must_use]
pub fn create_table(descriptor: &SchemaDescriptor) -> String {
    let mut columns = Vec::new();
    let mut constraints = Vec::new();
    let mut primary_keys = Vec::new();
    let mut unique_columns = Vec::new();

    for field in descriptor.fields() {
        columns.push(field_definition(field));
        if let Some((entity, column)) = field.references() {
            constraints.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                quote_ident(&field.column),
                quote_ident(entity),
                quote_ident(column)
            ));
        }
        if field.is_primary_key() {
            primary_keys.push(quote_ident(&field.column));
        }
        if field.unique {
            unique_columns.push(quote_ident(&field.column));
        }
    }

    if !primary_keys.is_empty() {
        constraints.push(format!("PRIMARY KEY ({})", primary_keys.join(", ")));
    }
    for column in unique_columns {
        constraints.push(format!("UNIQUE ({column})"));
    }

    let mut body = columns;
    body.extend(constraints);
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified(descriptor.namespace_name(), descriptor.entity_name()),
        body.join(", ")
    )
}

/// Compiles a parameterized insert for the given columns.
#[must_use]
pub fn insert(namespace: &str, table: &str, columns: &[String]) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified(namespace, table),
        column_list.join(", "),
        placeholders
    )
}

fn equality_list(columns: &[String], separator: &str) -> String {
    columns
        .iter()
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Compiles a parameterized update; filters are conjunctive equalities.
#[must_use]
pub fn update(
    namespace: &str,
    table: &str,
    assignment_columns: &[String],
    filter_columns: &[String],
) -> String {
    let mut statement = format!(
        "UPDATE {} SET {}",
        qualified(namespace, table),
        equality_list(assignment_columns, ", ")
    );
    if !filter_columns.is_empty() {
        statement.push_str(" WHERE ");
        statement.push_str(&equality_list(filter_columns, " AND "));
    }
    statement
}

/// Compiles a parameterized delete; filters are conjunctive equalities.
#[must_use]
pub fn delete(namespace: &str, table: &str, filter_columns: &[String]) -> String {
    let mut statement = format!("DELETE FROM {}", qualified(namespace, table));
    if !filter_columns.is_empty() {
        statement.push_str(" WHERE ");
        statement.push_str(&equality_list(filter_columns, " AND "));
    }
    statement
}

/// Compiles a parameterized select; filters are conjunctive equalities.
///
/// With `count` set, compiles a `COUNT(*)` projection instead of `*` (and
/// no LIMIT clause is ever attached to a count).
#[must_use]
pub fn select(
    namespace: &str,
    table: &str,
    filter_columns: &[String],
    limit: Option<usize>,
    count: bool,
) -> String {
    let projection = if count { "COUNT(*)" } else { "*" };
    let mut statement = format!(
        "SELECT {projection} FROM {}",
        qualified(namespace, table)
    );
    if !filter_columns.is_empty() {
        statement.push_str(" WHERE ");
        statement.push_str(&equality_list(filter_columns, " AND "));
    }
    if !count {
        if let Some(limit) = limit {
            statement.push_str(&format!(" LIMIT {limit}"));
        }
    }
    statement
}
