//! SELECT query builder.

use std::collections::BTreeMap;
use std::time::Duration;

use graphmodel_core::{Connection, Cx, Outcome, QueryContext, Row, Value};

use crate::clause::{Limit, Offset, OrderBy};
use crate::expr::{Dialect, Expr};
use crate::join::Join;

/// One entry of a SELECT list.
#[derive(Debug, Clone)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    /// The column name this item produces in result rows, when known.
    pub fn output_name(&self) -> Option<&str> {
        if let Some(alias) = &self.alias {
            return Some(alias);
        }
        match &self.expr {
            Expr::Column { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// A SELECT query builder.
///
/// Unlike a typed model query, this builder is keyed by table name so the
/// relation layer can assemble joins across arbitrary model tables.
///
/// Cloning a `Select` forks its [`QueryContext`]: writes made through the
/// clone never reach the original. Use [`Select::child_query_of`] for a
/// query that shares its parent's context.
#[derive(Debug)]
pub struct Select {
    table: String,
    alias: Option<String>,
    columns: Vec<SelectItem>,
    where_clause: Option<Expr>,
    joins: Vec<Join>,
    order_by: Vec<OrderBy>,
    limit: Option<Limit>,
    offset: Option<Offset>,
    distinct: bool,
    /// Table name -> alias bound for this query
    table_aliases: BTreeMap<String, String>,
    context: QueryContext,
    timeout: Option<Duration>,
    dialect: Dialect,
}

impl Clone for Select {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            alias: self.alias.clone(),
            columns: self.columns.clone(),
            where_clause: self.where_clause.clone(),
            joins: self.joins.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            distinct: self.distinct,
            table_aliases: self.table_aliases.clone(),
            context: self.context.fork(),
            timeout: self.timeout,
            dialect: self.dialect,
        }
    }
}

impl Select {
    /// Create a new SELECT query over a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
            columns: Vec::new(),
            where_clause: None,
            joins: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            table_aliases: BTreeMap::new(),
            context: QueryContext::new(),
            timeout: None,
            dialect: Dialect::default(),
        }
    }

    /// Make this a child query of `parent`.
    ///
    /// The child shares the parent's context (writes are visible both ways)
    /// and inherits its dialect and timeout.
    #[must_use]
    pub fn child_query_of(mut self, parent: &Select) -> Self {
        self.context = parent.context.clone();
        self.dialect = parent.dialect;
        self.timeout = parent.timeout;
        self
    }

    /// Deep copy with an independent context. Same as `clone()`.
    #[must_use]
    pub fn fork(&self) -> Self {
        self.clone()
    }

    // ==================== Table and alias bindings ====================

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Alias the FROM table (`FROM table AS alias`).
    #[must_use]
    pub fn alias_as(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Name the FROM table is referred to by: its alias, or the table name.
    pub fn table_ref(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Bind an alias for another table referenced by this query.
    #[must_use]
    pub fn alias_for(mut self, table: impl Into<String>, alias: impl Into<String>) -> Self {
        self.bind_alias(table, alias);
        self
    }

    pub fn bind_alias(&mut self, table: impl Into<String>, alias: impl Into<String>) {
        self.table_aliases.insert(table.into(), alias.into());
    }

    /// The alias a table is referred to by within this query.
    ///
    /// Explicit bindings win; the FROM table resolves to its own alias;
    /// anything else is referred to by its table name.
    pub fn table_ref_for(&self, table: &str) -> String {
        if let Some(alias) = self.table_aliases.get(table) {
            return alias.clone();
        }
        if table == self.table {
            return self.table_ref().to_string();
        }
        table.to_string()
    }

    // ==================== SELECT list ====================

    /// Select unqualified columns.
    #[must_use]
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            self.columns.push(SelectItem {
                expr: Expr::col(column),
                alias: None,
            });
        }
        self
    }

    /// Select an expression, optionally aliased.
    #[must_use]
    pub fn select_expr(mut self, expr: Expr, alias: Option<String>) -> Self {
        self.add_select(expr, alias);
        self
    }

    pub fn add_select(&mut self, expr: Expr, alias: Option<String>) {
        self.columns.push(SelectItem { expr, alias });
    }

    pub fn clear_select(&mut self) {
        self.columns.clear();
    }

    pub fn selections(&self) -> &[SelectItem] {
        &self.columns
    }

    /// Output column names of the SELECT list, where known.
    pub fn selected_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter_map(|item| item.output_name().map(str::to_string))
            .collect()
    }

    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    // ==================== WHERE ====================

    /// Add a WHERE condition, AND-ed with any existing one.
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.add_filter(expr);
        self
    }

    pub fn add_filter(&mut self, expr: Expr) {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
    }

    /// `table_ref.column = value`.
    #[must_use]
    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        let expr = Expr::qualified(self.table_ref(), column).eq_value(value.into());
        self.filter(expr)
    }

    /// Pairwise equality between expressions and values.
    #[must_use]
    pub fn where_composite(self, exprs: Vec<Expr>, values: Vec<Value>) -> Self {
        match Expr::all_eq(exprs.into_iter().zip(values.into_iter().map(Expr::Literal))) {
            Some(expr) => self.filter(expr),
            None => self,
        }
    }

    /// Composite IN over literal tuples.
    #[must_use]
    pub fn where_in_composite(self, exprs: Vec<Expr>, tuples: Vec<Vec<Value>>) -> Self {
        self.filter(Expr::in_tuples(exprs, tuples))
    }

    /// Composite IN over a sub-query.
    #[must_use]
    pub fn where_in_subquery(self, exprs: Vec<Expr>, query: Select) -> Self {
        self.filter(Expr::in_subquery(exprs, query))
    }

    pub fn where_clause(&self) -> Option<&Expr> {
        self.where_clause.as_ref()
    }

    // ==================== JOIN / ORDER / LIMIT ====================

    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn add_join(&mut self, join: Join) {
        self.joins.push(join);
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(Limit(n));
        self
    }

    #[must_use]
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(Offset(n));
        self
    }

    // ==================== Introspection ====================

    /// Is this an unfiltered `SELECT * FROM table`?
    pub fn is_select_all(&self) -> bool {
        self.columns.is_empty()
            && self.where_clause.is_none()
            && self.joins.is_empty()
            && self.order_by.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
            && !self.distinct
    }

    pub fn has_wheres(&self) -> bool {
        self.where_clause.is_some()
    }

    pub fn has_selects(&self) -> bool {
        !self.columns.is_empty()
    }

    // ==================== Context, timeout, dialect ====================

    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    /// Replace the context with a shared handle.
    #[must_use]
    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    /// Forward a statement timeout to the driver.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn get_dialect(&self) -> Dialect {
        self.dialect
    }

    // ==================== SQL ====================

    /// Build the SQL query and parameters using this query's dialect.
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(self.dialect)
    }

    /// Build the SQL query and parameters with a specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.build_into(dialect, &mut params);
        (sql, params)
    }

    /// Build SQL, appending parameters to an existing list.
    ///
    /// Placeholders continue numbering from `params.len()`, which lets a
    /// sub-query be embedded in an enclosing statement.
    pub fn build_into(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        if self.columns.is_empty() {
            sql.push('*');
        } else {
            let items: Vec<String> = self
                .columns
                .iter()
                .map(|item| {
                    let expr_sql = item.expr.build(dialect, params);
                    match &item.alias {
                        Some(alias) => format!("{} AS {}", expr_sql, dialect.quote_identifier(alias)),
                        None => expr_sql,
                    }
                })
                .collect();
            sql.push_str(&items.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&dialect.quote_table(&self.table));
        if let Some(alias) = &self.alias {
            sql.push_str(" AS ");
            sql.push_str(&dialect.quote_identifier(alias));
        }

        for join in &self.joins {
            sql.push_str(&join.build(dialect, params));
        }

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build(dialect, params));
        }

        if !self.order_by.is_empty() {
            let orders: Vec<String> = self.order_by.iter().map(OrderBy::to_sql).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        if let Some(Limit(n)) = self.limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        if let Some(Offset(n)) = self.offset {
            sql.push_str(&format!(" OFFSET {n}"));
        }

        sql
    }

    /// The SQL text alone.
    pub fn to_sql(&self) -> String {
        self.build().0
    }

    /// Execute the query and return raw rows.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(table = %self.table))]
    pub async fn rows<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<Vec<Row>, graphmodel_core::Error> {
        let (sql, params) = self.build();
        tracing::trace!(sql = %sql, params = params.len(), "Executing select");
        conn.query_with_timeout(cx, &sql, &params, self.timeout).await
    }
}
