//! SQL query builder for GraphModel Rust.
//!
//! `graphmodel-query` is the **query construction layer** the relation layer
//! talks to. It provides:
//!
//! - **`Select`**: a table-keyed SELECT builder with alias bindings, a shared
//!   or forked `QueryContext`, and introspection (`is_select_all`,
//!   `has_wheres`, `has_selects`).
//! - **Expression DSL**: `Expr` for WHERE/ON clauses, including composite
//!   IN over tuples or sub-queries and JSON-path fields.
//! - **Joins**: `Join` over tables or derived sub-selects.
//! - **Write builders**: `InsertBuilder`, `UpdateBuilder` (with JSON-path
//!   `Patch` targets) and `DeleteBuilder`.
//! - **Dialect support**: generates SQL for Postgres, MySQL, and SQLite.
//!
//! The resulting queries execute through the `Connection` trait from
//! `graphmodel-core`.

pub mod builder;
pub mod clause;
pub mod expr;
pub mod join;
pub mod select;

pub use builder::{DeleteBuilder, InsertBuilder, Patch, UpdateBuilder};
pub use clause::{Limit, Offset, OrderBy, OrderDirection};
pub use expr::{BinaryOp, Dialect, Expr};
pub use join::{Join, JoinSource, JoinType};
pub use select::{Select, SelectItem};
