//! Error types for GraphModel operations.

use std::fmt;

/// The primary error type for all GraphModel operations.
#[derive(Debug)]
pub enum Error {
    /// Relation mapping or model configuration errors
    Config(ConfigError),
    /// `Table.column` reference parsing errors
    Reference(ReferenceError),
    /// Graph expression errors (parse, allow-list, unknown relation)
    Graph(GraphError),
    /// A named modifier could not be resolved
    ModifierNotFound(String),
    /// Relation/operation combination that is structurally disallowed
    Unsupported(String),
    /// Query execution errors surfaced by the driver
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Operation timed out
    Timeout,
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    /// Name of the model class the failing relation is declared on
    pub model: String,
    /// Name of the relation, when the error is attributable to one
    pub relation: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceError {
    pub kind: ReferenceErrorKind,
    /// The reference text that failed to resolve
    pub reference: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceErrorKind {
    /// The reference could not be parsed, or spans more than one table
    InvalidReference,
    /// No registered model class owns the referenced table
    ModelNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphError {
    pub kind: GraphErrorKind,
    /// Dotted relation path the error refers to
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// The expression text is malformed
    Parse,
    /// The requested path is not covered by any allow-list
    NotAllowed,
    /// A relation name is not declared on the model class
    UnknownRelation,
    /// The expression nests deeper than the configured maximum
    MaxDepth,
}

#[derive(Debug)]
pub struct QueryError {
    pub message: String,
    pub sql: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl ConfigError {
    /// Create a configuration error attributed to a model.
    pub fn new(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            relation: None,
            message: message.into(),
            source: None,
        }
    }

    /// Attribute the error to a relation of the model.
    #[must_use]
    pub fn relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl ReferenceError {
    pub fn invalid(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ReferenceErrorKind::InvalidReference,
            reference: reference.into(),
            message: message.into(),
        }
    }

    pub fn model_not_found(reference: impl Into<String>) -> Self {
        let reference = reference.into();
        Self {
            kind: ReferenceErrorKind::ModelNotFound,
            message: format!("could not find a model class for reference {}", reference),
            reference,
        }
    }
}

impl GraphError {
    pub fn new(kind: GraphErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    /// A requested path that no allow-list covers.
    pub fn not_allowed(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            kind: GraphErrorKind::NotAllowed,
            message: format!("Eager expression not allowed: {}", path),
            path,
        }
    }

    pub fn unknown_relation(path: impl Into<String>, relation: &str, model: &str) -> Self {
        Self {
            kind: GraphErrorKind::UnknownRelation,
            path: path.into(),
            message: format!(
                "unknown relation \"{}\" in an eager expression (model {})",
                relation, model
            ),
        }
    }

    pub fn parse(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: GraphErrorKind::Parse,
            path: expression.into(),
            message: message.into(),
        }
    }
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }
}

impl Error {
    /// Is this an allow-list rejection?
    pub fn is_not_allowed(&self) -> bool {
        matches!(self, Error::Graph(e) if e.kind == GraphErrorKind::NotAllowed)
    }

    /// Is this a configuration error?
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Get the dotted graph path this error refers to, if any
    pub fn graph_path(&self) -> Option<&str> {
        match self {
            Error::Graph(e) => Some(&e.path),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "{}", e),
            Error::Reference(e) => write!(f, "{}", e),
            Error::Graph(e) => write!(f, "{}", e),
            Error::ModifierNotFound(name) => write!(f, "Unable to determine modify function from provided value: \"{}\"", name),
            Error::Unsupported(msg) => write!(f, "Not implemented: {}", msg),
            Error::Query(e) => write!(f, "{}", e),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}.relationMappings.{}: {}", self.model, relation, self.message),
            None => write!(f, "{}: {}", self.model, self.message),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ReferenceError {}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query error: {}", self.message)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<ReferenceError> for Error {
    fn from(err: ReferenceError) -> Self {
        Error::Reference(err)
    }
}

impl From<GraphError> for Error {
    fn from(err: GraphError) -> Self {
        Error::Graph(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Custom(format!("JSON error: {}", err))
    }
}

/// Result type alias for GraphModel operations.
pub type Result<T> = std::result::Result<T, Error>;
