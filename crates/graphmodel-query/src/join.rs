//! JOIN clause types.

use std::fmt;
use std::str::FromStr;

use graphmodel_core::Value;

use crate::expr::{Dialect, Expr};
use crate::select::Select;

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL OUTER JOIN",
        }
    }

    /// Builder-style operation name (`join`, `leftJoin`, ...).
    pub const fn operation(&self) -> &'static str {
        match self {
            JoinType::Inner => "join",
            JoinType::Left => "leftJoin",
            JoinType::Right => "rightJoin",
            JoinType::Full => "fullOuterJoin",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

impl FromStr for JoinType {
    type Err = String;

    /// Accepts the builder operation names, e.g. `"leftJoin"` or `"innerJoin"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "join" | "innerJoin" => Ok(JoinType::Inner),
            "leftJoin" | "leftOuterJoin" => Ok(JoinType::Left),
            "rightJoin" | "rightOuterJoin" => Ok(JoinType::Right),
            "outerJoin" | "fullOuterJoin" => Ok(JoinType::Full),
            other => Err(format!("unknown join operation \"{}\"", other)),
        }
    }
}

/// What a JOIN clause joins: a table or a derived sub-select.
#[derive(Debug, Clone)]
pub enum JoinSource {
    Table(String),
    Subquery(Box<Select>),
}

/// A JOIN clause.
#[derive(Debug, Clone)]
pub struct Join {
    /// Type of join
    pub join_type: JoinType,
    /// Table or sub-select to join
    pub source: JoinSource,
    /// Optional table alias
    pub alias: Option<String>,
    /// ON condition
    pub on: Expr,
}

impl Join {
    /// Join a table.
    pub fn table(join_type: JoinType, table: impl Into<String>, on: Expr) -> Self {
        Self {
            join_type,
            source: JoinSource::Table(table.into()),
            alias: None,
            on,
        }
    }

    /// Join a derived sub-select.
    pub fn subquery(join_type: JoinType, query: Select, on: Expr) -> Self {
        Self {
            join_type,
            source: JoinSource::Subquery(Box::new(query)),
            alias: None,
            on,
        }
    }

    /// Set an alias for the joined table.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The name the rest of the query refers to this join by.
    pub fn reference_name(&self) -> Option<&str> {
        match (&self.alias, &self.source) {
            (Some(alias), _) => Some(alias),
            (None, JoinSource::Table(table)) => Some(table),
            (None, JoinSource::Subquery(_)) => None,
        }
    }

    pub fn is_subquery(&self) -> bool {
        matches!(self.source, JoinSource::Subquery(_))
    }

    /// Generate SQL and collect parameters.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let source = match &self.source {
            JoinSource::Table(table) => dialect.quote_table(table),
            JoinSource::Subquery(query) => format!("({})", query.build_into(dialect, params)),
        };

        let mut sql = format!(" {} {}", self.join_type.as_str(), source);
        if let Some(alias) = &self.alias {
            sql.push_str(" AS ");
            sql.push_str(&dialect.quote_identifier(alias));
        }
        sql.push_str(" ON ");
        sql.push_str(&self.on.build(dialect, params));
        sql
    }
}
