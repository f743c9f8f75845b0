//! Driver and connection trait definitions.

use crate::error::DriverResult;
use crate::row::Row;
use crate::value::Value;

/// One live connection to the backing store.
///
/// A connection carries exactly one implicit transaction at a time: writes
/// issued through [`Connection::execute`] become durable on
/// [`Connection::commit`] and are discarded on [`Connection::rollback`].
/// Statements are parameterized text; `?` placeholders are bound
/// positionally from `params`. Every statement names an explicit target
/// namespace.
///
/// # Invariants
///
/// - Writes are visible to this connection's own reads before commit
/// - Writes are invisible to other connections until commit
/// - After `close`, every operation fails with `ConnectionClosed`
pub trait Connection: Send {
    /// Executes a statement that returns no rows.
    ///
    /// Returns the number of affected rows (0 for DDL).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed, the statement is not
    /// understood, or parameter binding fails.
    fn execute(&mut self, statement: &str, params: &[Value], namespace: &str) -> DriverResult<u64>;

    /// Executes a statement and fetches all result rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the statement is not
    /// understood.
    fn query(&mut self, statement: &str, params: &[Value], namespace: &str)
        -> DriverResult<Vec<Row>>;

    /// Durably commits the connection's open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the store rejects
    /// the commit.
    fn commit(&mut self) -> DriverResult<()>;

    /// Aborts the connection's open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    fn rollback(&mut self) -> DriverResult<()>;

    /// Closes the connection, releasing its resources.
    ///
    /// Closing an already-closed connection is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing the underlying resources fails.
    fn close(&mut self) -> DriverResult<()>;
}

/// A backing-store driver: a factory for [`Connection`]s.
///
/// Drivers must be shareable across sessions; each session acquires its own
/// connection for its scoped lifetime.
pub trait Driver: Send + Sync {
    /// Opens a new connection to the backing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    fn connect(&self) -> DriverResult<Box<dyn Connection>>;
}
