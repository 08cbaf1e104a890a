//! Database connection boundary.
//!
//! The relation layer never talks to a database itself. It produces SQL and
//! parameters, hands them to a [`Connection`], and folds the returned rows.
//! All operations integrate with asupersync's structured concurrency via `Cx`
//! for cancellation.

use std::time::Duration;

use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// A database connection capable of running statements.
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;

    /// Execute a query with a timeout forwarded from the query builder.
    ///
    /// Drivers that support statement timeouts should override this; the
    /// default ignores the timeout.
    fn query_with_timeout(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        timeout: Option<Duration>,
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send {
        let _ = timeout;
        self.query(cx, sql, params)
    }

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, crate::Error>> + Send;

    /// Execute an INSERT and return the last inserted ID.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, crate::Error>> + Send;
}
