//! # Strata Driver
//!
//! Driver boundary for Strata.
//!
//! This crate defines the contract between the Strata engine and the backing
//! relational store. Drivers are **opaque collaborators**: the engine hands
//! them parameterized statement text with an explicit target namespace and
//! expects rows back as ordered mappings of storage column name to value.
//! Drivers do not interpret schemas, sessions, or cascades - the engine owns
//! all of that.
//!
//! ## Provided here
//!
//! - [`Driver`] / [`Connection`] - the traits a backing store implements
//! - [`Value`] / [`Row`] - the wire data model shared with the engine
//! - [`MemoryDriver`] - an in-memory reference driver for tests and
//!   ephemeral use
//!
//! ## Example
//!
//! ```rust
//! use strata_driver::{Driver, MemoryDriver, Value};
//!
//! let driver = MemoryDriver::new();
//! let mut conn = driver.connect().unwrap();
//! conn.execute(
//!     "CREATE TABLE IF NOT EXISTS \"public\".\"users\" (\"_entry_id\" VARCHAR(36) NOT NULL)",
//!     &[],
//!     "public",
//! )
//! .unwrap();
//! conn.commit().unwrap();
//! ```

mod driver;
mod error;
mod memory;
mod row;
mod value;

pub use driver::{Connection, Driver};
pub use error::{DriverError, DriverResult};
pub use memory::MemoryDriver;
pub use row::Row;
pub use value::Value;
