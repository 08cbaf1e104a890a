//! Core types and traits for GraphModel Rust.
//!
//! This crate provides the foundations shared by the query builder and the
//! relation layer:
//!
//! - `Value` and `Row` for dynamically-typed data
//! - `Reference` for `Table.column[:json.path]` column references
//! - `QueryContext` for state shared with lifecycle hooks
//! - `Connection` trait for the database boundary
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod connection;
pub mod context;
pub mod error;
pub mod reference;
pub mod row;
pub mod value;

pub use connection::Connection;
pub use context::QueryContext;
pub use error::{
    ConfigError, Error, GraphError, GraphErrorKind, QueryError, ReferenceError,
    ReferenceErrorKind, Result, TypeError,
};
pub use reference::{PathSegment, Reference, json_get, json_set};
pub use row::{ColumnInfo, Row};
pub use value::Value;
