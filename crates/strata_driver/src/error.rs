//! Error types for the driver boundary.

use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors that can occur at the driver boundary.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Connection to the backing store failed.
    #[error("connect failed: {message}")]
    Connect {
        /// Description of the failure.
        message: String,
    },

    /// The connection has been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The statement could not be understood by the driver.
    #[error("statement error: {message}")]
    Statement {
        /// Description of the problem.
        message: String,
    },

    /// A statement referenced a table the store does not have.
    #[error("table not found: \"{namespace}\".\"{table}\"")]
    TableNotFound {
        /// Target namespace.
        namespace: String,
        /// Target table.
        table: String,
    },

    /// Parameter count did not match the statement's placeholders.
    #[error("parameter mismatch: statement expects {expected}, got {actual}")]
    ParameterMismatch {
        /// Placeholders in the statement.
        expected: usize,
        /// Parameters supplied.
        actual: usize,
    },

    /// The driver does not support the requested operation.
    #[error("unsupported operation: {message}")]
    Unsupported {
        /// Description of the operation.
        message: String,
    },
}

impl DriverError {
    /// Creates a connect error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a statement error.
    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            message: message.into(),
        }
    }

    /// Creates a table-not-found error.
    pub fn table_not_found(namespace: impl Into<String>, table: impl Into<String>) -> Self {
        Self::TableNotFound {
            namespace: namespace.into(),
            table: table.into(),
        }
    }

    /// Creates an unsupported-operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}
