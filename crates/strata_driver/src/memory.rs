//! In-memory driver for testing.

use crate::driver::{Connection, Driver};
use crate::error::{DriverError, DriverResult};
use crate::row::Row;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

type TableKey = (String, String);
type StoredRow = BTreeMap<String, Value>;

/// An in-memory backing store.
///
/// This driver keeps all tables in process memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// It understands exactly the parameterized statement shapes the engine
/// emits (CREATE/ALTER/DROP TABLE, INSERT, UPDATE, DELETE, SELECT with
/// equality filters, LIMIT and COUNT). Anything else fails with a
/// statement error.
///
/// # Transaction Semantics
///
/// Each connection stages its writes locally: they are visible to that
/// connection's own reads immediately, invisible to other connections until
/// `commit`, and discarded on `rollback`. DDL applies immediately, outside
/// the transaction, the way most relational stores behave.
#[derive(Debug, Default, Clone)]
pub struct MemoryDriver {
    store: Arc<RwLock<Store>>,
}

#[derive(Debug, Default)]
struct Store {
    namespaces: HashSet<String>,
    tables: HashMap<TableKey, Vec<StoredRow>>,
}

impl MemoryDriver {
    /// Creates a new empty in-memory driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows currently committed to a table.
    ///
    /// Useful for assertions in tests.
    #[must_use]
    pub fn committed_rows(&self, namespace: &str, table: &str) -> usize {
        self.store
            .read()
            .tables
            .get(&(namespace.to_string(), table.to_string()))
            .map_or(0, Vec::len)
    }
}

impl Driver for MemoryDriver {
    fn connect(&self) -> DriverResult<Box<dyn Connection>> {
        Ok(Box::new(MemoryConnection {
            store: Arc::clone(&self.store),
            staged: Vec::new(),
            open: true,
        }))
    }
}

/// A write staged on a connection, pending commit.
#[derive(Debug, Clone)]
enum StagedWrite {
    Insert(StoredRow),
    Update {
        assignments: Vec<(String, Value)>,
        filters: Vec<(String, Value)>,
    },
    Delete {
        filters: Vec<(String, Value)>,
    },
}

#[derive(Debug)]
struct MemoryConnection {
    store: Arc<RwLock<Store>>,
    staged: Vec<(TableKey, StagedWrite)>,
    open: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DriverError::ConnectionClosed)
        }
    }

    /// Committed rows overlaid with this connection's staged writes.
    fn effective_rows(&self, key: &TableKey) -> DriverResult<Vec<StoredRow>> {
        let store = self.store.read();
        let mut rows = store
            .tables
            .get(key)
            .cloned()
            .ok_or_else(|| DriverError::table_not_found(&key.0, &key.1))?;
        for (staged_key, write) in &self.staged {
            if staged_key == key {
                apply_write(&mut rows, write);
            }
        }
        Ok(rows)
    }

    fn table_exists(&self, key: &TableKey) -> bool {
        self.store.read().tables.contains_key(key)
    }
}

fn matches(row: &StoredRow, filters: &[(String, Value)]) -> bool {
    filters
        .iter()
        .all(|(column, value)| row.get(column) == Some(value))
}

fn apply_write(rows: &mut Vec<StoredRow>, write: &StagedWrite) {
    match write {
        StagedWrite::Insert(row) => rows.push(row.clone()),
        StagedWrite::Update {
            assignments,
            filters,
        } => {
            for row in rows.iter_mut().filter(|r| matches(r, filters)) {
                for (column, value) in assignments {
                    row.insert(column.clone(), value.clone());
                }
            }
        }
        StagedWrite::Delete { filters } => rows.retain(|r| !matches(r, filters)),
    }
}

fn bind(columns: Vec<String>, params: &[Value], offset: usize) -> Vec<(String, Value)> {
    columns
        .into_iter()
        .enumerate()
        .map(|(i, c)| (c, params[offset + i].clone()))
        .collect()
}

impl Connection for MemoryConnection {
    fn execute(&mut self, statement: &str, params: &[Value], _namespace: &str) -> DriverResult<u64> {
        self.ensure_open()?;
        let parsed = parse(statement)?;
        let expected = parsed.placeholder_count();
        if expected != params.len() {
            return Err(DriverError::ParameterMismatch {
                expected,
                actual: params.len(),
            });
        }

        match parsed {
            Parsed::CreateNamespace(namespace) => {
                self.store.write().namespaces.insert(namespace);
                Ok(0)
            }
            Parsed::CreateTable(key) => {
                self.store.write().tables.entry(key).or_default();
                Ok(0)
            }
            Parsed::DropTable(key) => {
                self.store.write().tables.remove(&key);
                Ok(0)
            }
            Parsed::RenameTable(key, to) => {
                let mut store = self.store.write();
                let rows = store
                    .tables
                    .remove(&key)
                    .ok_or_else(|| DriverError::table_not_found(&key.0, &key.1))?;
                store.tables.insert((key.0, to), rows);
                Ok(0)
            }
            Parsed::DropColumn(key, column) => {
                let mut store = self.store.write();
                let rows = store
                    .tables
                    .get_mut(&key)
                    .ok_or_else(|| DriverError::table_not_found(&key.0, &key.1))?;
                for row in rows.iter_mut() {
                    row.remove(&column);
                }
                Ok(0)
            }
            Parsed::RenameColumn(key, from, to) => {
                let mut store = self.store.write();
                let rows = store
                    .tables
                    .get_mut(&key)
                    .ok_or_else(|| DriverError::table_not_found(&key.0, &key.1))?;
                for row in rows.iter_mut() {
                    if let Some(value) = row.remove(&from) {
                        row.insert(to.clone(), value);
                    }
                }
                Ok(0)
            }
            Parsed::AlterNoop => Ok(0),
            Parsed::Insert(key, columns) => {
                if !self.table_exists(&key) {
                    return Err(DriverError::table_not_found(&key.0, &key.1));
                }
                let row: StoredRow = bind(columns, params, 0).into_iter().collect();
                self.staged.push((key, StagedWrite::Insert(row)));
                Ok(1)
            }
            Parsed::Update(key, assignment_columns, filter_columns) => {
                let assignments = bind(assignment_columns, params, 0);
                let filters = bind(filter_columns, params, assignments.len());
                let affected = self
                    .effective_rows(&key)?
                    .iter()
                    .filter(|r| matches(r, &filters))
                    .count() as u64;
                self.staged.push((
                    key,
                    StagedWrite::Update {
                        assignments,
                        filters,
                    },
                ));
                Ok(affected)
            }
            Parsed::Delete(key, filter_columns) => {
                let filters = bind(filter_columns, params, 0);
                let affected = self
                    .effective_rows(&key)?
                    .iter()
                    .filter(|r| matches(r, &filters))
                    .count() as u64;
                self.staged.push((key, StagedWrite::Delete { filters }));
                Ok(affected)
            }
            Parsed::Select { .. } => Err(DriverError::statement(
                "SELECT must be issued through query()",
            )),
        }
    }

    fn query(
        &mut self,
        statement: &str,
        params: &[Value],
        _namespace: &str,
    ) -> DriverResult<Vec<Row>> {
        self.ensure_open()?;
        let parsed = parse(statement)?;
        let Parsed::Select {
            key,
            filter_columns,
            limit,
            count,
        } = parsed
        else {
            return Err(DriverError::statement(
                "only SELECT may be issued through query()",
            ));
        };
        if filter_columns.len() != params.len() {
            return Err(DriverError::ParameterMismatch {
                expected: filter_columns.len(),
                actual: params.len(),
            });
        }

        let filters = bind(filter_columns, params, 0);
        let mut rows: Vec<StoredRow> = self
            .effective_rows(&key)?
            .into_iter()
            .filter(|r| matches(r, &filters))
            .collect();

        if count {
            let mut row = Row::new();
            row.push("count", Value::Int(rows.len() as i64));
            return Ok(vec![row]);
        }

        if let Some(limit) = limit {
            rows.truncate(limit);
        }

        Ok(rows
            .into_iter()
            .map(|stored| Row::from_pairs(stored))
            .collect())
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        let mut store = self.store.write();
        for (key, write) in self.staged.drain(..) {
            if let Some(rows) = store.tables.get_mut(&key) {
                apply_write(rows, &write);
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        self.staged.clear();
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.staged.clear();
        self.open = false;
        Ok(())
    }
}

/// A statement decoded into the shapes the engine emits.
#[derive(Debug)]
enum Parsed {
    CreateNamespace(String),
    CreateTable(TableKey),
    DropTable(TableKey),
    RenameTable(TableKey, String),
    DropColumn(TableKey, String),
    RenameColumn(TableKey, String, String),
    AlterNoop,
    Insert(TableKey, Vec<String>),
    Update(TableKey, Vec<String>, Vec<String>),
    Delete(TableKey, Vec<String>),
    Select {
        key: TableKey,
        filter_columns: Vec<String>,
        limit: Option<usize>,
        count: bool,
    },
}

impl Parsed {
    fn placeholder_count(&self) -> usize {
        match self {
            Self::Insert(_, columns) => columns.len(),
            Self::Update(_, assignments, filters) => assignments.len() + filters.len(),
            Self::Delete(_, filters) => filters.len(),
            Self::Select { filter_columns, .. } => filter_columns.len(),
            _ => 0,
        }
    }
}

fn parse(statement: &str) -> DriverResult<Parsed> {
    let s = statement.trim().trim_end_matches(';');

    if let Some(rest) = s.strip_prefix("CREATE RELATIONAL NAMESPACE IF NOT EXISTS ") {
        let (namespace, _) = quoted(rest)?;
        return Ok(Parsed::CreateNamespace(namespace));
    }
    if let Some(rest) = s.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
        let (key, _) = qualified(rest)?;
        return Ok(Parsed::CreateTable(key));
    }
    if let Some(rest) = s.strip_prefix("DROP TABLE ") {
        let (key, _) = qualified(rest)?;
        return Ok(Parsed::DropTable(key));
    }
    if let Some(rest) = s.strip_prefix("ALTER TABLE ") {
        let (key, rest) = qualified(rest)?;
        let rest = rest.trim_start();
        if let Some(rest) = rest.strip_prefix("RENAME TO ") {
            let (to, _) = quoted(rest)?;
            return Ok(Parsed::RenameTable(key, to));
        }
        if let Some(rest) = rest.strip_prefix("DROP COLUMN ") {
            let (column, _) = quoted(rest)?;
            return Ok(Parsed::DropColumn(key, column));
        }
        if let Some(rest) = rest.strip_prefix("RENAME COLUMN ") {
            let (from, rest) = quoted(rest)?;
            let rest = rest
                .trim_start()
                .strip_prefix("TO ")
                .ok_or_else(|| DriverError::statement("RENAME COLUMN missing TO"))?;
            let (to, _) = quoted(rest)?;
            return Ok(Parsed::RenameColumn(key, from, to));
        }
        // ADD COLUMN and MODIFY COLUMN need no structural change here:
        // rows gain columns on write and the store is typeless.
        if rest.starts_with("ADD COLUMN ") || rest.starts_with("MODIFY COLUMN ") {
            return Ok(Parsed::AlterNoop);
        }
        return Err(DriverError::statement(format!(
            "unsupported ALTER TABLE form: {rest}"
        )));
    }
    if let Some(rest) = s.strip_prefix("INSERT INTO ") {
        let (key, rest) = qualified(rest)?;
        let rest = rest.trim_start();
        let open = rest
            .strip_prefix('(')
            .ok_or_else(|| DriverError::statement("INSERT missing column list"))?;
        let close = open
            .find(')')
            .ok_or_else(|| DriverError::statement("INSERT column list not closed"))?;
        let columns = column_list(&open[..close])?;
        return Ok(Parsed::Insert(key, columns));
    }
    if let Some(rest) = s.strip_prefix("UPDATE ") {
        let (key, rest) = qualified(rest)?;
        let rest = rest
            .trim_start()
            .strip_prefix("SET ")
            .ok_or_else(|| DriverError::statement("UPDATE missing SET"))?;
        let (set_part, where_part) = match rest.split_once(" WHERE ") {
            Some((set, filters)) => (set, Some(filters)),
            None => (rest, None),
        };
        let assignments = equality_columns(set_part, ", ")?;
        let filters = match where_part {
            Some(w) => equality_columns(w, " AND ")?,
            None => Vec::new(),
        };
        return Ok(Parsed::Update(key, assignments, filters));
    }
    if let Some(rest) = s.strip_prefix("DELETE FROM ") {
        let (key, rest) = qualified(rest)?;
        let filters = match rest.trim_start().strip_prefix("WHERE ") {
            Some(w) => equality_columns(w, " AND ")?,
            None => Vec::new(),
        };
        return Ok(Parsed::Delete(key, filters));
    }
    for (prefix, count) in [("SELECT COUNT(*) FROM ", true), ("SELECT * FROM ", false)] {
        if let Some(rest) = s.strip_prefix(prefix) {
            let (key, rest) = qualified(rest)?;
            let mut rest = rest.trim_start();
            let mut limit = None;
            if let Some((before, limit_part)) = rest.rsplit_once(" LIMIT ") {
                limit = Some(limit_part.trim().parse::<usize>().map_err(|_| {
                    DriverError::statement(format!("bad LIMIT value: {limit_part}"))
                })?);
                rest = before.trim();
            } else if let Some(limit_part) = rest.strip_prefix("LIMIT ") {
                limit = Some(limit_part.trim().parse::<usize>().map_err(|_| {
                    DriverError::statement(format!("bad LIMIT value: {limit_part}"))
                })?);
                rest = "";
            }
            let filter_columns = match rest.strip_prefix("WHERE ") {
                Some(w) => equality_columns(w, " AND ")?,
                None if rest.is_empty() => Vec::new(),
                None => {
                    return Err(DriverError::statement(format!(
                        "unexpected SELECT suffix: {rest}"
                    )))
                }
            };
            return Ok(Parsed::Select {
                key,
                filter_columns,
                limit,
                count,
            });
        }
    }

    Err(DriverError::statement(format!(
        "statement not understood: {s}"
    )))
}

/// Parses a leading `"ident"`, returning the identifier and the rest.
fn quoted(input: &str) -> DriverResult<(String, &str)> {
    let rest = input
        .strip_prefix('"')
        .ok_or_else(|| DriverError::statement(format!("expected quoted identifier at: {input}")))?;
    let end = rest
        .find('"')
        .ok_or_else(|| DriverError::statement("unterminated identifier"))?;
    Ok((rest[..end].to_string(), &rest[end + 1..]))
}

/// Parses a leading `"ns"."table"`.
fn qualified(input: &str) -> DriverResult<(TableKey, &str)> {
    let (namespace, rest) = quoted(input)?;
    let rest = rest
        .strip_prefix('.')
        .ok_or_else(|| DriverError::statement("expected qualified table name"))?;
    let (table, rest) = quoted(rest)?;
    Ok(((namespace, table), rest))
}

/// Parses `"a", "b", "c"`.
fn column_list(input: &str) -> DriverResult<Vec<String>> {
    input
        .split(", ")
        .map(|part| quoted(part.trim()).map(|(name, _)| name))
        .collect()
}

/// Parses `"a" = ?<sep>"b" = ?` into column names.
fn equality_columns(input: &str, separator: &str) -> DriverResult<Vec<String>> {
    input
        .split(separator)
        .map(|part| {
            let (column, rest) = quoted(part.trim())?;
            if rest.trim() != "= ?" {
                return Err(DriverError::statement(format!(
                    "expected equality placeholder in: {part}"
                )));
            }
            Ok(column)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (MemoryDriver, Box<dyn Connection>) {
        let driver = MemoryDriver::new();
        let mut conn = driver.connect().unwrap();
        conn.execute(
            "CREATE RELATIONAL NAMESPACE IF NOT EXISTS \"public\"",
            &[],
            "public",
        )
        .unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS \"public\".\"users\" (\"_entry_id\" VARCHAR(36) NOT NULL)",
            &[],
            "public",
        )
        .unwrap();
        (driver, conn)
    }

    fn insert(conn: &mut dyn Connection, id: &str, name: &str) {
        conn.execute(
            "INSERT INTO \"public\".\"users\" (\"_entry_id\", \"name\") VALUES (?, ?)",
            &[Value::Text(id.into()), Value::Text(name.into())],
            "public",
        )
        .unwrap();
    }

    #[test]
    fn staged_insert_visible_to_own_reads() {
        let (_driver, mut conn) = setup();
        insert(conn.as_mut(), "a", "alice");
        let rows = conn
            .query("SELECT * FROM \"public\".\"users\"", &[], "public")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::Text("alice".into())));
    }

    #[test]
    fn staged_insert_invisible_to_other_connections() {
        let (driver, mut conn) = setup();
        insert(conn.as_mut(), "a", "alice");

        let mut other = driver.connect().unwrap();
        let rows = other
            .query("SELECT * FROM \"public\".\"users\"", &[], "public")
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn commit_publishes_staged_writes() {
        let (driver, mut conn) = setup();
        insert(conn.as_mut(), "a", "alice");
        conn.commit().unwrap();

        let mut other = driver.connect().unwrap();
        let rows = other
            .query("SELECT * FROM \"public\".\"users\"", &[], "public")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(driver.committed_rows("public", "users"), 1);
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let (driver, mut conn) = setup();
        insert(conn.as_mut(), "a", "alice");
        conn.rollback().unwrap();
        conn.commit().unwrap();
        assert_eq!(driver.committed_rows("public", "users"), 0);
    }

    #[test]
    fn update_with_filter() {
        let (_driver, mut conn) = setup();
        insert(conn.as_mut(), "a", "alice");
        insert(conn.as_mut(), "b", "bob");

        let affected = conn
            .execute(
                "UPDATE \"public\".\"users\" SET \"name\" = ? WHERE \"_entry_id\" = ?",
                &[Value::Text("alicia".into()), Value::Text("a".into())],
                "public",
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = conn
            .query(
                "SELECT * FROM \"public\".\"users\" WHERE \"_entry_id\" = ?",
                &[Value::Text("a".into())],
                "public",
            )
            .unwrap();
        assert_eq!(rows[0].get("name"), Some(&Value::Text("alicia".into())));
    }

    #[test]
    fn delete_with_filter() {
        let (_driver, mut conn) = setup();
        insert(conn.as_mut(), "a", "alice");
        insert(conn.as_mut(), "b", "bob");

        let affected = conn
            .execute(
                "DELETE FROM \"public\".\"users\" WHERE \"name\" = ?",
                &[Value::Text("bob".into())],
                "public",
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = conn
            .query("SELECT * FROM \"public\".\"users\"", &[], "public")
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn count_and_limit() {
        let (_driver, mut conn) = setup();
        insert(conn.as_mut(), "a", "alice");
        insert(conn.as_mut(), "b", "bob");
        insert(conn.as_mut(), "c", "carol");

        let rows = conn
            .query(
                "SELECT * FROM \"public\".\"users\" LIMIT 2",
                &[],
                "public",
            )
            .unwrap();
        assert_eq!(rows.len(), 2);

        let counted = conn
            .query("SELECT COUNT(*) FROM \"public\".\"users\"", &[], "public")
            .unwrap();
        assert_eq!(counted[0].get("count"), Some(&Value::Int(3)));
    }

    #[test]
    fn rename_table_rekeys() {
        let (driver, mut conn) = setup();
        insert(conn.as_mut(), "a", "alice");
        conn.commit().unwrap();

        conn.execute(
            "ALTER TABLE \"public\".\"users\" RENAME TO \"people\"",
            &[],
            "public",
        )
        .unwrap();
        assert_eq!(driver.committed_rows("public", "people"), 1);
        assert_eq!(driver.committed_rows("public", "users"), 0);
    }

    #[test]
    fn rename_column_rekeys_rows() {
        let (_driver, mut conn) = setup();
        insert(conn.as_mut(), "a", "alice");
        conn.commit().unwrap();

        conn.execute(
            "ALTER TABLE \"public\".\"users\" RENAME COLUMN \"name\" TO \"full_name\"",
            &[],
            "public",
        )
        .unwrap();
        let rows = conn
            .query("SELECT * FROM \"public\".\"users\"", &[], "public")
            .unwrap();
        assert_eq!(rows[0].get("full_name"), Some(&Value::Text("alice".into())));
        assert!(rows[0].get("name").is_none());
    }

    #[test]
    fn unknown_table_errors() {
        let (_driver, mut conn) = setup();
        let result = conn.query("SELECT * FROM \"public\".\"missing\"", &[], "public");
        assert!(matches!(result, Err(DriverError::TableNotFound { .. })));
    }

    #[test]
    fn parameter_mismatch_rejected() {
        let (_driver, mut conn) = setup();
        let result = conn.execute(
            "INSERT INTO \"public\".\"users\" (\"_entry_id\", \"name\") VALUES (?, ?)",
            &[Value::Text("a".into())],
            "public",
        );
        assert!(matches!(result, Err(DriverError::ParameterMismatch { .. })));
    }

    #[test]
    fn closed_connection_rejects_operations() {
        let (_driver, mut conn) = setup();
        conn.close().unwrap();
        let result = conn.query("SELECT * FROM \"public\".\"users\"", &[], "public");
        assert!(matches!(result, Err(DriverError::ConnectionClosed)));
    }

    #[test]
    fn garbage_statement_rejected() {
        let (_driver, mut conn) = setup();
        let result = conn.execute("VACUUM FULL", &[], "public");
        assert!(matches!(result, Err(DriverError::Statement { .. })));
    }
}
