//! Relation (graph) expressions.
//!
//! A relation expression names the relations to load and how they nest:
//!
//! ```text
//! pets
//! children.pets(onlyDogs)
//! [pets, children.[pets, movies]]
//! parent.^       recursive, bounded by the configured maximum
//! parent.^3      recursive to three levels
//! *              every relation, recursively
//! ```
//!
//! The same tree can be given as a JSON object, e.g.
//! `{"children": {"pets": true, "$modify": ["onlyAdults"]}}`.

use std::fmt;
use std::str::FromStr;

use graphmodel_core::{Error, GraphError, Result};

/// Recursion of a node onto its own relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recursion {
    /// `^`: as deep as the configured maximum allows
    Unbounded,
    /// `^N`: the relation is followed N times in total
    Depth(usize),
}

impl Recursion {
    /// Levels to unfold, with `max` standing in for unbounded recursion.
    pub fn levels(self, max: usize) -> usize {
        match self {
            Recursion::Unbounded => max,
            Recursion::Depth(depth) => depth,
        }
    }

    fn deeper(self, other: Recursion) -> Recursion {
        match (self, other) {
            (Recursion::Depth(a), Recursion::Depth(b)) => Recursion::Depth(a.max(b)),
            _ => Recursion::Unbounded,
        }
    }
}

/// A node of a relation expression tree.
///
/// The root node has no name; every other node names a relation of its
/// parent's model. Child names are unique within a node and keep the order
/// they were first mentioned in, which drives column order in joined queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationExpression {
    name: Option<String>,
    modifiers: Vec<String>,
    children: Vec<RelationExpression>,
    recursive: Option<Recursion>,
    all_recursive: bool,
}

impl RelationExpression {
    /// An empty root expression.
    pub fn root() -> Self {
        Self::default()
    }

    /// A relation node without children.
    pub fn node(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Parse the textual form.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser::new(text);
        let mut root = Self::root();
        parser.skip_ws();
        if parser.peek().is_some() {
            parser.list(&mut root, None)?;
        }
        parser.skip_ws();
        if let Some(c) = parser.peek() {
            return Err(parser.error(format!("unexpected '{}'", c)));
        }
        if root.recursive.is_some() {
            return Err(parser.error("'^' must follow a relation name".to_string()));
        }
        Ok(root)
    }

    /// Parse the object form, or the textual form given as a JSON string.
    ///
    /// Keys are relation names; values are `true` (include), `false`
    /// (skip) or a nested object. `$modify` lists modifier names,
    /// `$recursive` is `true` or a depth, and `$allRecursive` is a boolean.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::String(text) => Self::parse(text),
            serde_json::Value::Object(_) => {
                let mut root = Self::root();
                fill_from_json(&mut root, json, "")?;
                Ok(root)
            }
            other => Err(Error::Graph(GraphError::parse(
                other.to_string(),
                "a relation expression must be a string or an object",
            ))),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn modifiers(&self) -> &[String] {
        &self.modifiers
    }

    pub fn children(&self) -> &[RelationExpression] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&RelationExpression> {
        self.children.iter().find(|c| c.name() == Some(name))
    }

    pub fn recursion(&self) -> Option<Recursion> {
        self.recursive
    }

    pub fn is_all_recursive(&self) -> bool {
        self.all_recursive
    }

    /// Does the expression request nothing?
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && !self.all_recursive
    }

    #[must_use]
    pub fn modifier(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.modifiers.contains(&name) {
            self.modifiers.push(name);
        }
        self
    }

    #[must_use]
    pub fn recursive(mut self, recursion: Recursion) -> Self {
        self.recursive = Some(recursion);
        self
    }

    #[must_use]
    pub fn all_recursive(mut self) -> Self {
        self.all_recursive = true;
        self
    }

    /// Add a child, merging it into an existing child of the same name.
    #[must_use]
    pub fn with_child(mut self, child: RelationExpression) -> Self {
        self.add_child(child);
        self
    }

    pub fn add_child(&mut self, child: RelationExpression) {
        match self.children.iter_mut().find(|c| c.name == child.name) {
            Some(existing) => existing.merge(child),
            None => self.children.push(child),
        }
    }

    fn child_mut_or_insert(&mut self, name: &str) -> &mut RelationExpression {
        let index = match self.children.iter().position(|c| c.name() == Some(name)) {
            Some(index) => index,
            None => {
                self.children.push(Self::node(name));
                self.children.len() - 1
            }
        };
        &mut self.children[index]
    }

    /// Merge another expression into this one.
    ///
    /// Modifiers and children are unioned; the deeper recursion wins.
    pub fn merge(&mut self, other: RelationExpression) {
        for modifier in other.modifiers {
            if !self.modifiers.contains(&modifier) {
                self.modifiers.push(modifier);
            }
        }
        self.recursive = match (self.recursive, other.recursive) {
            (Some(a), Some(b)) => Some(a.deeper(b)),
            (a, b) => a.or(b),
        };
        self.all_recursive |= other.all_recursive;
        for child in other.children {
            self.add_child(child);
        }
    }

    /// Unfold `^` recursion into explicit nested nodes.
    ///
    /// A recursive node `a` with N levels becomes `a.a. ... .a` N deep, each
    /// copy carrying the node's modifiers and children. `max` bounds
    /// unbounded recursion.
    #[must_use]
    pub fn expand(&self, max: usize) -> Self {
        let mut expanded = Self {
            name: self.name.clone(),
            modifiers: self.modifiers.clone(),
            children: self.children.iter().map(|c| c.expand(max)).collect(),
            recursive: None,
            all_recursive: self.all_recursive,
        };
        if let (Some(recursion), Some(_)) = (self.recursive, &self.name) {
            let levels = recursion.levels(max);
            if levels > 1 {
                let mut next = self.clone();
                next.recursive = Some(Recursion::Depth(levels - 1));
                expanded.add_child(next.expand(max));
            }
        }
        expanded
    }

    /// Dotted paths of every leaf node, e.g. `["a.b", "c"]`.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for child in &self.children {
            child.collect_leaves("", &mut out);
        }
        out
    }

    fn collect_leaves(&self, prefix: &str, out: &mut Vec<String>) {
        let path = join_path(prefix, self.name().unwrap_or_default());
        if self.children.is_empty() {
            out.push(path);
        } else {
            for child in &self.children {
                child.collect_leaves(&path, out);
            }
        }
    }

    /// The object form of this expression.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if !self.modifiers.is_empty() {
            map.insert("$modify".to_string(), serde_json::json!(self.modifiers));
        }
        match self.recursive {
            Some(Recursion::Unbounded) => {
                map.insert("$recursive".to_string(), serde_json::Value::Bool(true));
            }
            Some(Recursion::Depth(depth)) => {
                map.insert("$recursive".to_string(), serde_json::json!(depth));
            }
            None => {}
        }
        if self.all_recursive {
            map.insert("$allRecursive".to_string(), serde_json::Value::Bool(true));
        }
        for child in &self.children {
            if let Some(name) = child.name() {
                map.insert(name.to_string(), child.to_json());
            }
        }
        serde_json::Value::Object(map)
    }

    /// Terms rendered below this node: children, then `^`/`*` markers.
    fn terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = self.children.iter().map(ToString::to_string).collect();
        match self.recursive {
            Some(Recursion::Unbounded) => terms.push("^".to_string()),
            Some(Recursion::Depth(depth)) => terms.push(format!("^{}", depth)),
            None => {}
        }
        if self.all_recursive {
            terms.push("*".to_string());
        }
        terms
    }
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn render_terms(f: &mut fmt::Formatter<'_>, terms: &[String]) -> fmt::Result {
    match terms {
        [] => Ok(()),
        [single] => write!(f, "{}", single),
        many => write!(f, "[{}]", many.join(", ")),
    }
}

/// Canonical textual form; parsing it yields an equal expression.
impl fmt::Display for RelationExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms = self.terms();
        let Some(name) = &self.name else {
            return render_terms(f, &terms);
        };
        write!(f, "{}", name)?;
        if !self.modifiers.is_empty() {
            write!(f, "({})", self.modifiers.join(", "))?;
        }
        if !terms.is_empty() {
            write!(f, ".")?;
            render_terms(f, &terms)?;
        }
        Ok(())
    }
}

impl FromStr for RelationExpression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn fill_from_json(node: &mut RelationExpression, json: &serde_json::Value, path: &str) -> Result<()> {
    let serde_json::Value::Object(map) = json else {
        return Ok(());
    };
    let err = |message: String| Error::Graph(GraphError::parse(path.to_string(), message));

    for (key, value) in map {
        match key.as_str() {
            "$modify" => {
                let names: Vec<String> = match value {
                    serde_json::Value::String(name) => vec![name.clone()],
                    serde_json::Value::Array(items) => items
                        .iter()
                        .map(|item| {
                            item.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| err("$modify entries must be strings".to_string()))
                        })
                        .collect::<Result<_>>()?,
                    _ => return Err(err("$modify must be a string or an array".to_string())),
                };
                for name in names {
                    if !node.modifiers.contains(&name) {
                        node.modifiers.push(name);
                    }
                }
            }
            "$recursive" => {
                node.recursive = match value {
                    serde_json::Value::Bool(true) => Some(Recursion::Unbounded),
                    serde_json::Value::Bool(false) => None,
                    serde_json::Value::Number(n) => {
                        let depth = n
                            .as_u64()
                            .and_then(|d| usize::try_from(d).ok())
                            .ok_or_else(|| err("$recursive depth must be a positive integer".to_string()))?;
                        Some(Recursion::Depth(depth))
                    }
                    _ => return Err(err("$recursive must be a boolean or a depth".to_string())),
                };
                if node.name.is_none() && node.recursive.is_some() {
                    return Err(err("$recursive needs a relation".to_string()));
                }
            }
            "$allRecursive" => {
                node.all_recursive = value.as_bool().unwrap_or(false);
            }
            name if name.starts_with('$') => {
                return Err(err(format!("unknown key \"{}\"", name)));
            }
            name => match value {
                serde_json::Value::Bool(false) => {}
                serde_json::Value::Bool(true) => {
                    node.child_mut_or_insert(name);
                }
                serde_json::Value::Object(_) => {
                    let child_path = join_path(path, name);
                    fill_from_json(node.child_mut_or_insert(name), value, &child_path)?;
                }
                _ => {
                    return Err(err(format!(
                        "value of \"{}\" must be a boolean or an object",
                        name
                    )));
                }
            },
        }
    }
    Ok(())
}

/// Recursive-descent parser over the textual form.
///
/// ```text
/// list := term (',' term)*
/// term := '[' list ']' | '*' | '^' digits? | name modifiers? ('.' term)?
/// ```
struct Parser<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn error(&self, message: String) -> Error {
        Error::Graph(GraphError::parse(
            self.text,
            format!("invalid relation expression \"{}\" at {}: {}", self.text, self.pos, message),
        ))
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", expected, c))),
            None => Err(self.error(format!("expected '{}'", expected))),
        }
    }

    /// Terms separated by commas, up to `close` (or the end of input).
    fn list(&mut self, parent: &mut RelationExpression, close: Option<char>) -> Result<()> {
        loop {
            self.term(parent)?;
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                Some(c) if Some(c) == close => return Ok(()),
                None if close.is_none() => return Ok(()),
                Some(c) => return Err(self.error(format!("unexpected '{}'", c))),
                None => return Err(self.error("unterminated '['".to_string())),
            }
        }
    }

    fn term(&mut self, parent: &mut RelationExpression) -> Result<()> {
        self.skip_ws();
        match self.peek() {
            Some('[') => {
                self.pos += 1;
                self.skip_ws();
                if self.peek() == Some(']') {
                    return Err(self.error("empty brackets".to_string()));
                }
                self.list(parent, Some(']'))?;
                self.expect(']')
            }
            Some('*') => {
                self.pos += 1;
                parent.all_recursive = true;
                Ok(())
            }
            Some('^') => {
                self.pos += 1;
                let digits = self.take_while(|c| c.is_ascii_digit());
                let recursion = if digits.is_empty() {
                    Recursion::Unbounded
                } else {
                    let depth: usize = digits
                        .parse()
                        .map_err(|_| self.error(format!("invalid recursion depth \"{}\"", digits)))?;
                    Recursion::Depth(depth)
                };
                parent.recursive = Some(match parent.recursive {
                    Some(existing) => existing.deeper(recursion),
                    None => recursion,
                });
                Ok(())
            }
            Some(c) if is_name_char(c) => {
                let name = self.take_while(is_name_char);
                let modifiers = self.modifiers()?;
                let child = parent.child_mut_or_insert(&name);
                for modifier in modifiers {
                    if !child.modifiers.contains(&modifier) {
                        child.modifiers.push(modifier);
                    }
                }
                self.skip_ws();
                if self.peek() == Some('.') {
                    self.pos += 1;
                    self.term(child)?;
                }
                Ok(())
            }
            Some(c) => Err(self.error(format!("unexpected '{}'", c))),
            None => Err(self.error("expected a relation name".to_string())),
        }
    }

    /// `(a, b)` or `(a b)` after a relation name.
    fn modifiers(&mut self) -> Result<Vec<String>> {
        self.skip_ws();
        if self.peek() != Some('(') {
            return Ok(Vec::new());
        }
        self.pos += 1;
        let mut names = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(')') => {
                    self.pos += 1;
                    return Ok(names);
                }
                Some(',') => {
                    self.pos += 1;
                }
                Some(c) if is_name_char(c) => names.push(self.take_while(is_name_char)),
                Some(c) => return Err(self.error(format!("unexpected '{}' in modifier list", c))),
                None => return Err(self.error("unterminated modifier list".to_string())),
            }
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '-'
}
