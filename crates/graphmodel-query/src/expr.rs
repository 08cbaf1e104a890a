//! SQL expressions for WHERE and ON clauses.

use graphmodel_core::{PathSegment, Reference, Value};

use crate::select::Select;

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Embedded quote characters are doubled.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                let escaped = name.replace('"', "\"\"");
                format!("\"{}\"", escaped)
            }
            Dialect::Mysql => {
                let escaped = name.replace('`', "``");
                format!("`{}`", escaped)
            }
        }
    }

    /// Quote a possibly schema-qualified table name (`schema.table`).
    pub fn quote_table(self, name: &str) -> String {
        name.split('.')
            .map(|part| self.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Render a JSON path for this dialect's JSON functions.
    pub fn json_path(self, path: &[PathSegment]) -> String {
        match self {
            Dialect::Postgres => {
                let parts: Vec<String> = path
                    .iter()
                    .map(|s| match s {
                        PathSegment::Key(k) => k.replace('\'', "''"),
                        PathSegment::Index(i) => i.to_string(),
                    })
                    .collect();
                format!("'{{{}}}'", parts.join(","))
            }
            Dialect::Sqlite | Dialect::Mysql => {
                let mut out = String::from("'$");
                for segment in path {
                    match segment {
                        PathSegment::Key(k) => {
                            out.push('.');
                            out.push_str(&k.replace('\'', "''"));
                        }
                        PathSegment::Index(i) => {
                            out.push('[');
                            out.push_str(&i.to_string());
                            out.push(']');
                        }
                    }
                }
                out.push('\'');
                out
            }
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

/// A SQL expression that can be used in WHERE and ON clauses.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        /// Optional table name or alias
        table: Option<String>,
        /// Column name
        name: String,
    },

    /// Value nested inside a JSON column
    JsonField {
        table: Option<String>,
        column: String,
        path: Vec<PathSegment>,
    },

    /// Literal value, bound as a parameter
    Literal(Value),

    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    Not(Box<Expr>),

    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },

    /// Composite-aware IN over literal tuples: `(a, b) IN ((1, 2), (3, 4))`
    In {
        exprs: Vec<Expr>,
        tuples: Vec<Vec<Value>>,
        negated: bool,
    },

    /// Composite-aware IN over a sub-query: `(a, b) IN (SELECT ...)`
    InSubquery {
        exprs: Vec<Expr>,
        query: Box<Select>,
    },

    /// Raw SQL fragment, emitted as-is
    Raw(String),

    Paren(Box<Expr>),
}

impl Expr {
    /// Unqualified column reference.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// Table-qualified column reference.
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// Expression for a parsed column reference, JSON path included.
    pub fn reference(reference: &Reference) -> Self {
        if reference.is_plain() {
            Expr::qualified(reference.table(), reference.column())
        } else {
            Expr::JsonField {
                table: Some(reference.table().to_string()),
                column: reference.column().to_string(),
                path: reference.json_path().to_vec(),
            }
        }
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    /// A predicate that never matches.
    pub fn always_false() -> Self {
        Expr::Raw("1 = 0".to_string())
    }

    /// Is this the never-matching predicate?
    pub fn is_always_false(&self) -> bool {
        matches!(self, Expr::Raw(sql) if sql == "1 = 0")
    }

    fn binary(self, op: BinaryOp, other: Expr) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other.into())
    }

    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other.into())
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other.into())
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other.into())
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other.into())
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other.into())
    }

    pub fn and(self, other: Expr) -> Self {
        self.binary(BinaryOp::And, other)
    }

    /// Disjunction, parenthesized so it composes under AND.
    pub fn or(self, other: Expr) -> Self {
        Expr::Paren(Box::new(self.binary(BinaryOp::Or, other)))
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// Equality that turns a NULL value into `IS NULL`.
    pub fn eq_value(self, value: Value) -> Self {
        if value.is_null() {
            self.is_null()
        } else {
            self.eq(Expr::Literal(value))
        }
    }

    /// Composite IN over literal tuples.
    pub fn in_tuples(exprs: Vec<Expr>, tuples: Vec<Vec<Value>>) -> Self {
        Expr::In {
            exprs,
            tuples,
            negated: false,
        }
    }

    /// Composite IN over a sub-query selecting the matching columns.
    pub fn in_subquery(exprs: Vec<Expr>, query: Select) -> Self {
        Expr::InSubquery {
            exprs,
            query: Box::new(query),
        }
    }

    /// Conjunction of pairwise equalities: `l0 = r0 AND l1 = r1 ...`.
    pub fn all_eq(pairs: impl IntoIterator<Item = (Expr, Expr)>) -> Option<Self> {
        pairs
            .into_iter()
            .map(|(l, r)| l.eq(r))
            .reduce(|acc, e| acc.and(e))
    }

    /// Build SQL for this expression, pushing bound values onto `params`.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        match self {
            Expr::Column { table, name } => match table {
                Some(t) => format!(
                    "{}.{}",
                    dialect.quote_table(t),
                    dialect.quote_identifier(name)
                ),
                None => dialect.quote_identifier(name),
            },

            Expr::JsonField {
                table,
                column,
                path,
            } => {
                let column_sql = match table {
                    Some(t) => format!(
                        "{}.{}",
                        dialect.quote_table(t),
                        dialect.quote_identifier(column)
                    ),
                    None => dialect.quote_identifier(column),
                };
                match dialect {
                    Dialect::Postgres => format!("{}#>>{}", column_sql, dialect.json_path(path)),
                    Dialect::Sqlite | Dialect::Mysql => {
                        format!("json_extract({}, {})", column_sql, dialect.json_path(path))
                    }
                }
            }

            Expr::Literal(value) => {
                params.push(value.clone());
                dialect.placeholder(params.len())
            }

            Expr::Binary { left, op, right } => {
                let left_sql = left.build(dialect, params);
                let right_sql = right.build(dialect, params);
                format!("{left_sql} {} {right_sql}", op.as_str())
            }

            Expr::Not(expr) => format!("NOT {}", expr.build(dialect, params)),

            Expr::IsNull { expr, negated } => {
                let expr_sql = expr.build(dialect, params);
                if *negated {
                    format!("{expr_sql} IS NOT NULL")
                } else {
                    format!("{expr_sql} IS NULL")
                }
            }

            Expr::In {
                exprs,
                tuples,
                negated,
            } => {
                if tuples.is_empty() {
                    return if *negated { "1 = 1" } else { "1 = 0" }.to_string();
                }
                let lhs = build_tuple(exprs, dialect, params);
                let rows: Vec<String> = tuples
                    .iter()
                    .map(|tuple| {
                        let placeholders: Vec<String> = tuple
                            .iter()
                            .map(|v| {
                                params.push(v.clone());
                                dialect.placeholder(params.len())
                            })
                            .collect();
                        if placeholders.len() == 1 {
                            placeholders.join("")
                        } else {
                            format!("({})", placeholders.join(", "))
                        }
                    })
                    .collect();
                let not = if *negated { "NOT " } else { "" };
                format!("{lhs} {not}IN ({})", rows.join(", "))
            }

            Expr::InSubquery { exprs, query } => {
                let lhs = build_tuple(exprs, dialect, params);
                let sub = query.build_into(dialect, params);
                format!("{lhs} IN ({sub})")
            }

            Expr::Raw(sql) => sql.clone(),

            Expr::Paren(expr) => format!("({})", expr.build(dialect, params)),
        }
    }
}

fn build_tuple(exprs: &[Expr], dialect: Dialect, params: &mut Vec<Value>) -> String {
    let parts: Vec<String> = exprs.iter().map(|e| e.build(dialect, params)).collect();
    if parts.len() == 1 {
        parts.join("")
    } else {
        format!("({})", parts.join(", "))
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<&Reference> for Expr {
    fn from(reference: &Reference) -> Self {
        Expr::reference(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql(expr: &Expr, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = expr.build(dialect, &mut params);
        (sql, params)
    }

    #[test]
    fn test_qualified_column_quoting() {
        let e = Expr::qualified("public.persons", "id");
        assert_eq!(sql(&e, Dialect::Postgres).0, r#""public"."persons"."id""#);
        assert_eq!(sql(&e, Dialect::Mysql).0, "`public`.`persons`.`id`");
    }

    #[test]
    fn test_binary_with_params() {
        let e = Expr::col("age")
            .gt(Value::Int(18))
            .and(Expr::col("name").eq(Value::from("Jo")));
        let (s, params) = sql(&e, Dialect::Postgres);
        assert_eq!(s, r#""age" > $1 AND "name" = $2"#);
        assert_eq!(params, vec![Value::Int(18), Value::from("Jo")]);
        assert_eq!(sql(&e, Dialect::Sqlite).0, r#""age" > ?1 AND "name" = ?2"#);
    }

    #[test]
    fn test_composite_in() {
        let e = Expr::in_tuples(
            vec![Expr::qualified("t", "a"), Expr::qualified("t", "b")],
            vec![
                vec![Value::Int(1), Value::Int(2)],
                vec![Value::Int(3), Value::Int(4)],
            ],
        );
        let (s, params) = sql(&e, Dialect::Postgres);
        assert_eq!(s, r#"("t"."a", "t"."b") IN (($1, $2), ($3, $4))"#);
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_single_column_in() {
        let e = Expr::in_tuples(
            vec![Expr::qualified("t", "a")],
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        assert_eq!(sql(&e, Dialect::Postgres).0, r#""t"."a" IN ($1, $2)"#);
    }

    #[test]
    fn test_empty_in_is_always_false() {
        let e = Expr::in_tuples(vec![Expr::col("a")], vec![]);
        assert_eq!(sql(&e, Dialect::Postgres).0, "1 = 0");
        assert!(Expr::always_false().is_always_false());
    }

    #[test]
    fn test_json_field() {
        let r = Reference::parse("persons.meta:address.tags[0]").unwrap();
        let e = Expr::reference(&r);
        assert_eq!(
            sql(&e, Dialect::Postgres).0,
            r##""persons"."meta"#>>'{address,tags,0}'"##
        );
        assert_eq!(
            sql(&e, Dialect::Sqlite).0,
            r#"json_extract("persons"."meta", '$.address.tags[0]')"#
        );
    }

    #[test]
    fn test_eq_value_null() {
        let e = Expr::col("a").eq_value(Value::Null);
        assert_eq!(sql(&e, Dialect::Postgres).0, r#""a" IS NULL"#);
    }

    #[test]
    fn test_or_is_parenthesized() {
        let e = Expr::col("a")
            .eq(Value::Int(1))
            .or(Expr::col("b").eq(Value::Int(2)))
            .and(Expr::col("c").is_not_null());
        assert_eq!(
            sql(&e, Dialect::Postgres).0,
            r#"("a" = $1 OR "b" = $2) AND "c" IS NOT NULL"#
        );
    }

    #[test]
    fn test_all_eq_pairs_positionally() {
        let e = Expr::all_eq([
            (Expr::qualified("T", "a"), Expr::qualified("U", "x")),
            (Expr::qualified("T", "b"), Expr::qualified("U", "y")),
        ])
        .unwrap();
        assert_eq!(
            sql(&e, Dialect::Postgres).0,
            r#""T"."a" = "U"."x" AND "T"."b" = "U"."y""#
        );
        assert!(Expr::all_eq(Vec::new()).is_none());
    }
}
