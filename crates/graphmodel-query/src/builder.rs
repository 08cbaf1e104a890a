//! INSERT, UPDATE and DELETE builders.

use std::collections::BTreeMap;

use graphmodel_core::reference::parse_json_path;
use graphmodel_core::{Connection, Cx, Outcome, Value};

use crate::expr::{Dialect, Expr};

/// Update payload keyed by target.
///
/// A key is either a plain column name or a `column:json.path` field
/// expression. JSON targets are rewritten as `jsonb_set`/`json_set` so only
/// the addressed sub-path changes.
pub type Patch = BTreeMap<String, Value>;

/// INSERT query builder.
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    rows: Vec<Vec<(String, Value)>>,
    returning: Vec<String>,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Vec::new(),
            returning: Vec::new(),
        }
    }

    /// Add a row of `(column, value)` pairs.
    #[must_use]
    pub fn values(mut self, row: Vec<(String, Value)>) -> Self {
        self.rows.push(row);
        self
    }

    /// Add a RETURNING clause (PostgreSQL).
    #[must_use]
    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn rows(&self) -> &[Vec<(String, Value)>] {
        &self.rows
    }

    /// Column list: union of all rows' columns in first-seen order.
    fn columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for row in &self.rows {
            for (column, _) in row {
                if !columns.contains(&column.as_str()) {
                    columns.push(column);
                }
            }
        }
        columns
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let columns = self.columns();

        let mut sql = format!("INSERT INTO {}", dialect.quote_table(&self.table));
        if columns.is_empty() {
            sql.push_str(" DEFAULT VALUES");
        } else {
            let quoted: Vec<String> = columns
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect();
            sql.push_str(&format!(" ({})", quoted.join(", ")));

            let rows: Vec<String> = self
                .rows
                .iter()
                .map(|row| {
                    let placeholders: Vec<String> = columns
                        .iter()
                        .map(|column| {
                            let value = row
                                .iter()
                                .find(|(c, _)| c.as_str() == *column)
                                .map_or(Value::Null, |(_, v)| v.clone());
                            params.push(value);
                            dialect.placeholder(params.len())
                        })
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();
            sql.push_str(" VALUES ");
            sql.push_str(&rows.join(", "));
        }

        if !self.returning.is_empty() && dialect != Dialect::Mysql {
            let quoted: Vec<String> = self
                .returning
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect();
            sql.push_str(" RETURNING ");
            sql.push_str(&quoted.join(", "));
        }

        (sql, params)
    }

    /// Execute the insert and return the last inserted id.
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        dialect: Dialect,
    ) -> Outcome<i64, graphmodel_core::Error> {
        let (sql, params) = self.build(dialect);
        tracing::trace!(sql = %sql, "Executing insert");
        conn.insert(cx, &sql, &params).await
    }
}

/// UPDATE query builder.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    set: Vec<(String, Value)>,
    where_clause: Option<Expr>,
}

impl UpdateBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set: Vec::new(),
            where_clause: None,
        }
    }

    /// Set a column (or `column:json.path` target) to a value.
    #[must_use]
    pub fn set(mut self, target: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((target.into(), value.into()));
        self
    }

    /// Apply every entry of a patch.
    #[must_use]
    pub fn patch(mut self, patch: &Patch) -> Self {
        for (target, value) in patch {
            self.set.push((target.clone(), value.clone()));
        }
        self
    }

    /// Add a WHERE condition, AND-ed with any existing one.
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn assignments(&self) -> &[(String, Value)] {
        &self.set
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let assignments: Vec<String> = self
            .set
            .iter()
            .map(|(target, value)| {
                params.push(value.clone());
                let placeholder = dialect.placeholder(params.len());
                build_assignment(dialect, target, &placeholder)
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_table(&self.table),
            assignments.join(", ")
        );
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build(dialect, &mut params));
        }
        (sql, params)
    }

    /// Execute the update and return the number of affected rows.
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        dialect: Dialect,
    ) -> Outcome<u64, graphmodel_core::Error> {
        let (sql, params) = self.build(dialect);
        tracing::trace!(sql = %sql, "Executing update");
        conn.execute(cx, &sql, &params).await
    }
}

fn build_assignment(dialect: Dialect, target: &str, placeholder: &str) -> String {
    let json_target = target
        .split_once(':')
        .and_then(|(column, path)| parse_json_path(path).ok().map(|p| (column, p)));

    match json_target {
        Some((column, path)) => {
            let column = dialect.quote_identifier(column);
            let path = dialect.json_path(&path);
            match dialect {
                Dialect::Postgres => format!(
                    "{column} = jsonb_set({column}, {path}, to_jsonb({placeholder}))"
                ),
                Dialect::Sqlite | Dialect::Mysql => {
                    format!("{column} = json_set({column}, {path}, {placeholder})")
                }
            }
        }
        None => format!("{} = {}", dialect.quote_identifier(target), placeholder),
    }
}

/// DELETE query builder.
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    where_clause: Option<Expr>,
}

impl DeleteBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
        }
    }

    /// Add a WHERE condition, AND-ed with any existing one.
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", dialect.quote_table(&self.table));
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build(dialect, &mut params));
        }
        (sql, params)
    }

    /// Execute the delete and return the number of affected rows.
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        dialect: Dialect,
    ) -> Outcome<u64, graphmodel_core::Error> {
        let (sql, params) = self.build(dialect);
        tracing::trace!(sql = %sql, "Executing delete");
        conn.execute(cx, &sql, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_multiple_rows_aligns_columns() {
        let insert = InsertBuilder::new("persons_movies")
            .values(vec![
                ("personId".to_string(), Value::Int(1)),
                ("movieId".to_string(), Value::Int(2)),
            ])
            .values(vec![("movieId".to_string(), Value::Int(3))])
            .returning(["id"]);
        let (sql, params) = insert.build(Dialect::Postgres);
        assert_eq!(
            sql,
            r#"INSERT INTO "persons_movies" ("personId", "movieId") VALUES ($1, $2), ($3, $4) RETURNING "id""#
        );
        assert_eq!(
            params,
            vec![Value::Int(1), Value::Int(2), Value::Null, Value::Int(3)]
        );
        assert!(!insert.build(Dialect::Mysql).0.contains("RETURNING"));
    }

    #[test]
    fn test_update_plain_and_json_targets() {
        let mut patch = Patch::new();
        patch.insert("name".to_string(), Value::from("Jo"));
        patch.insert("meta:address.city".to_string(), Value::from("Oslo"));
        let update = UpdateBuilder::new("persons")
            .patch(&patch)
            .filter(Expr::col("id").eq(Value::Int(7)));
        let (sql, params) = update.build(Dialect::Postgres);
        assert_eq!(
            sql,
            r#"UPDATE "persons" SET "meta" = jsonb_set("meta", '{address,city}', to_jsonb($1)), "name" = $2 WHERE "id" = $3"#
        );
        assert_eq!(params.len(), 3);

        let (sqlite, _) = update.build(Dialect::Sqlite);
        assert!(sqlite.contains(r#""meta" = json_set("meta", '$.address.city', ?1)"#));
    }

    #[test]
    fn test_delete_sql() {
        let delete = DeleteBuilder::new("animals").filter(Expr::col("ownerId").eq(Value::Int(1)));
        assert_eq!(
            delete.build(Dialect::Sqlite).0,
            r#"DELETE FROM "animals" WHERE "ownerId" = ?1"#
        );
    }
}
