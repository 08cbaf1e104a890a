//! Column references of the form `Table.column` with an optional JSON path.
//!
//! Relation mappings name both sides of a join with references such as
//! `persons.id`, `public.persons.id` or `persons.meta:address.city[0]`. The
//! part after `:` addresses a value nested inside a JSON column.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ReferenceError;

const REFERENCE_PATTERN: &str =
    r"^(?P<table>[A-Za-z_][\w$]*(?:\.[A-Za-z_][\w$]*)*)\.(?P<column>[A-Za-z_][\w$]*)(?::(?P<path>\S+))?$";

fn reference_pattern() -> Result<&'static Regex, ReferenceError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(REFERENCE_PATTERN))
        .as_ref()
        .map_err(|e| ReferenceError::invalid(REFERENCE_PATTERN, e.to_string()))
}

/// One step of a JSON path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object member access
    Key(String),
    /// Array element access
    Index(usize),
}

/// A parsed, table-qualified column reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    table: String,
    column: String,
    json_path: Vec<PathSegment>,
}

impl Reference {
    /// Parse a `Table.column[:json.path]` string.
    pub fn parse(text: &str) -> Result<Self, ReferenceError> {
        let text = text.trim();
        let caps = reference_pattern()?.captures(text).ok_or_else(|| {
            ReferenceError::invalid(
                text,
                format!(
                    "could not parse reference \"{}\": must have format TableName.columnName",
                    text
                ),
            )
        })?;

        let json_path = match caps.name("path") {
            Some(path) => parse_json_path(path.as_str()).map_err(|message| {
                ReferenceError::invalid(
                    text,
                    format!("invalid JSON path in reference \"{}\": {}", text, message),
                )
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            table: caps["table"].to_string(),
            column: caps["column"].to_string(),
            json_path,
        })
    }

    /// Create a plain column reference.
    pub fn column_ref(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            json_path: Vec::new(),
        }
    }

    /// The table (or table alias) this reference is bound to.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn json_path(&self) -> &[PathSegment] {
        &self.json_path
    }

    /// Does this reference address a whole column (no JSON path)?
    pub fn is_plain(&self) -> bool {
        self.json_path.is_empty()
    }

    /// Return a copy bound to a different table or alias.
    #[must_use]
    pub fn with_table(&self, table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: self.column.clone(),
            json_path: self.json_path.clone(),
        }
    }

    /// `table.column`, ignoring any JSON path.
    pub fn qualified_column(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }

    /// `column` or `column:json.path`, without the table.
    pub fn column_expression(&self) -> String {
        if self.json_path.is_empty() {
            self.column.clone()
        } else {
            format!("{}:{}", self.column, format_json_path(&self.json_path))
        }
    }

    /// The full `table.column[:json.path]` expression.
    pub fn expression(&self) -> String {
        format!("{}.{}", self.table, self.column_expression())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression())
    }
}

/// Parse `a.b[0]['key']` into path segments.
pub fn parse_json_path(text: &str) -> Result<Vec<PathSegment>, String> {
    let mut segments = Vec::new();
    let mut chars = text.chars();
    let mut current = String::new();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if current.is_empty() {
                    if segments.is_empty() {
                        return Err("empty path segment".to_string());
                    }
                } else {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                }
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err("unclosed '['".to_string());
                }
                let inner = inner.trim();
                if let Ok(index) = inner.parse::<usize>() {
                    segments.push(PathSegment::Index(index));
                } else {
                    let key = inner.trim_matches(|c| c == '\'' || c == '"');
                    if key.is_empty() {
                        return Err("empty bracket segment".to_string());
                    }
                    segments.push(PathSegment::Key(key.to_string()));
                }
            }
            ']' => return Err("unexpected ']'".to_string()),
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(PathSegment::Key(current));
    }
    if segments.is_empty() {
        return Err("empty path".to_string());
    }
    Ok(segments)
}

/// Render path segments back into `a.b[0]` form.
pub fn format_json_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathSegment::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Read a nested JSON value.
pub fn json_get<'a>(
    root: &'a serde_json::Value,
    path: &[PathSegment],
) -> Option<&'a serde_json::Value> {
    path.iter().try_fold(root, |current, segment| match segment {
        PathSegment::Key(key) => current.get(key.as_str()),
        PathSegment::Index(index) => current.get(*index),
    })
}

/// Write a nested JSON value, creating intermediate objects and arrays.
pub fn json_set(root: &mut serde_json::Value, path: &[PathSegment], value: serde_json::Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for segment in parents {
        current = match segment {
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = serde_json::Value::Object(serde_json::Map::new());
                }
                match current {
                    serde_json::Value::Object(map) => map
                        .entry(key.clone())
                        .or_insert(serde_json::Value::Null),
                    _ => return,
                }
            }
            PathSegment::Index(index) => array_slot(current, *index),
        };
    }

    match last {
        PathSegment::Key(key) => {
            if !current.is_object() {
                *current = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(map) = current {
                map.insert(key.clone(), value);
            }
        }
        PathSegment::Index(index) => *array_slot(current, *index) = value,
    }
}

fn array_slot(current: &mut serde_json::Value, index: usize) -> &mut serde_json::Value {
    if !current.is_array() {
        *current = serde_json::Value::Array(Vec::new());
    }
    match current {
        serde_json::Value::Array(items) => {
            if items.len() <= index {
                items.resize(index + 1, serde_json::Value::Null);
            }
            &mut items[index]
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_reference() {
        let r = Reference::parse("persons.id").unwrap();
        assert_eq!(r.table(), "persons");
        assert_eq!(r.column(), "id");
        assert!(r.is_plain());
        assert_eq!(r.expression(), "persons.id");
    }

    #[test]
    fn test_parse_schema_qualified_reference() {
        let r = Reference::parse("public.persons.id").unwrap();
        assert_eq!(r.table(), "public.persons");
        assert_eq!(r.column(), "id");
    }

    #[test]
    fn test_parse_json_reference() {
        let r = Reference::parse("persons.meta:address.tags[1]").unwrap();
        assert_eq!(r.column(), "meta");
        assert_eq!(
            r.json_path(),
            &[
                PathSegment::Key("address".to_string()),
                PathSegment::Key("tags".to_string()),
                PathSegment::Index(1)
            ]
        );
        assert_eq!(r.column_expression(), "meta:address.tags[1]");
        assert_eq!(r.to_string(), "persons.meta:address.tags[1]");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in ["persons", "", ".id", "persons.", "persons.id:", "persons.meta:a[0"] {
            let err = Reference::parse(text).unwrap_err();
            assert_eq!(err.kind, crate::error::ReferenceErrorKind::InvalidReference, "{text}");
        }
    }

    #[test]
    fn test_with_table_does_not_mutate() {
        let r = Reference::parse("persons.id").unwrap();
        let bound = r.with_table("parent");
        assert_eq!(bound.qualified_column(), "parent.id");
        assert_eq!(r.qualified_column(), "persons.id");
    }

    #[test]
    fn test_json_get_and_set() {
        let path = parse_json_path("a.b[2]").unwrap();
        let mut root = json!({});
        json_set(&mut root, &path, json!("x"));
        assert_eq!(root, json!({"a": {"b": [null, null, "x"]}}));
        assert_eq!(json_get(&root, &path), Some(&json!("x")));
        assert_eq!(json_get(&root, &parse_json_path("a.c").unwrap()), None);
    }

    #[test]
    fn test_bracket_keys() {
        let path = parse_json_path("['weird key'][0]").unwrap();
        assert_eq!(
            path,
            vec![PathSegment::Key("weird key".to_string()), PathSegment::Index(0)]
        );
        assert_eq!(format_json_path(&parse_json_path("a[0].b").unwrap()), "a[0].b");
    }
}
