//! Declarative relation mappings.
//!
//! A mapping is the raw, unvalidated description of a relation, e.g.
//!
//! ```json
//! {
//!   "relation": "ManyToManyRelation",
//!   "modelClass": "Movie",
//!   "join": {
//!     "from": "persons.id",
//!     "through": { "from": "persons_movies.personId", "to": "persons_movies.movieId" },
//!     "to": "movies.id"
//!   }
//! }
//! ```
//!
//! Mappings are turned into [`Relation`](crate::relation::Relation)s by the
//! registry the first time a model's relations are requested.

use std::fmt;
use std::sync::Arc;

use graphmodel_core::{QueryContext, Result};

use crate::instance::ModelInstance;
use crate::modifier::Modifier;

/// The closed set of relation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    HasMany,
    HasOne,
    BelongsToOne,
    ManyToMany,
    HasOneThrough,
}

impl RelationKind {
    /// The type tag used in declarative mappings.
    pub const fn tag(self) -> &'static str {
        match self {
            RelationKind::HasMany => "HasManyRelation",
            RelationKind::HasOne => "HasOneRelation",
            RelationKind::BelongsToOne => "BelongsToOneRelation",
            RelationKind::ManyToMany => "ManyToManyRelation",
            RelationKind::HasOneThrough => "HasOneThroughRelation",
        }
    }

    /// Parse a type tag. The `Relation` suffix is optional.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.strip_suffix("Relation").unwrap_or(tag);
        match tag {
            "HasMany" => Some(RelationKind::HasMany),
            "HasOne" => Some(RelationKind::HasOne),
            "BelongsToOne" => Some(RelationKind::BelongsToOne),
            "ManyToMany" => Some(RelationKind::ManyToMany),
            "HasOneThrough" => Some(RelationKind::HasOneThrough),
            _ => None,
        }
    }

    /// Does a loaded value hold at most one instance?
    pub const fn is_one_to_one(self) -> bool {
        matches!(
            self,
            RelationKind::HasOne | RelationKind::BelongsToOne | RelationKind::HasOneThrough
        )
    }

    /// Does this kind go through a join table?
    pub const fn is_through(self) -> bool {
        matches!(self, RelationKind::ManyToMany | RelationKind::HasOneThrough)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One or more `Table.column` reference strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRefs(Vec<String>);

impl ColumnRefs {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ColumnRefs {
    fn from(s: &str) -> Self {
        ColumnRefs(vec![s.to_string()])
    }
}

impl From<String> for ColumnRefs {
    fn from(s: String) -> Self {
        ColumnRefs(vec![s])
    }
}

impl From<Vec<&str>> for ColumnRefs {
    fn from(v: Vec<&str>) -> Self {
        ColumnRefs(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for ColumnRefs {
    fn from(v: Vec<String>) -> Self {
        ColumnRefs(v)
    }
}

impl<const N: usize> From<[&str; N]> for ColumnRefs {
    fn from(v: [&str; N]) -> Self {
        ColumnRefs(v.iter().map(|s| (*s).to_string()).collect())
    }
}

/// A join-table column surfaced as an extra property on related rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraColumn {
    /// Column of the join table
    pub column: String,
    /// Name it is exposed under on the related row
    pub alias: String,
}

impl ExtraColumn {
    pub fn new(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            alias: column.clone(),
            column,
        }
    }

    pub fn aliased(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            alias: alias.into(),
        }
    }
}

/// Hook run on a model before it is inserted through a relation.
pub type BeforeInsertFn =
    Arc<dyn Fn(&mut ModelInstance, &QueryContext) -> Result<()> + Send + Sync>;

/// The `join.through` block of a many-to-many or has-one-through relation.
#[derive(Clone, Default)]
pub struct ThroughMapping {
    pub from: Option<ColumnRefs>,
    pub to: Option<ColumnRefs>,
    /// Declared model class of the join table, if any
    pub model_class: Option<String>,
    pub extras: Vec<ExtraColumn>,
    pub modify: Option<Modifier>,
    pub filter: Option<Modifier>,
    pub before_insert: Option<BeforeInsertFn>,
}

impl ThroughMapping {
    pub fn new(from: impl Into<ColumnRefs>, to: impl Into<ColumnRefs>) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn model_class(mut self, name: impl Into<String>) -> Self {
        self.model_class = Some(name.into());
        self
    }

    #[must_use]
    pub fn extra(mut self, extra: ExtraColumn) -> Self {
        self.extras.push(extra);
        self
    }

    #[must_use]
    pub fn modify(mut self, modifier: Modifier) -> Self {
        self.modify = Some(modifier);
        self
    }

    #[must_use]
    pub fn before_insert<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ModelInstance, &QueryContext) -> Result<()> + Send + Sync + 'static,
    {
        self.before_insert = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ThroughMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThroughMapping")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("model_class", &self.model_class)
            .field("extras", &self.extras)
            .field("modify", &self.modify)
            .field("filter", &self.filter)
            .field("before_insert", &self.before_insert.is_some())
            .finish()
    }
}

/// The `join` block of a mapping.
#[derive(Debug, Clone, Default)]
pub struct JoinMapping {
    pub from: Option<ColumnRefs>,
    pub to: Option<ColumnRefs>,
    pub through: Option<ThroughMapping>,
}

/// Raw declarative relation mapping.
#[derive(Clone, Default)]
pub struct RelationMapping {
    /// Relation type tag, e.g. `"HasManyRelation"`
    pub relation: Option<String>,
    /// Name of the related model class
    pub model_class: Option<String>,
    pub join: Option<JoinMapping>,
    pub modify: Option<Modifier>,
    pub filter: Option<Modifier>,
    pub before_insert: Option<BeforeInsertFn>,
}

impl RelationMapping {
    pub fn new(kind: RelationKind, model_class: impl Into<String>) -> Self {
        Self {
            relation: Some(kind.tag().to_string()),
            model_class: Some(model_class.into()),
            ..Self::default()
        }
    }

    pub fn has_many(model_class: impl Into<String>) -> Self {
        Self::new(RelationKind::HasMany, model_class)
    }

    pub fn has_one(model_class: impl Into<String>) -> Self {
        Self::new(RelationKind::HasOne, model_class)
    }

    pub fn belongs_to_one(model_class: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsToOne, model_class)
    }

    pub fn many_to_many(model_class: impl Into<String>) -> Self {
        Self::new(RelationKind::ManyToMany, model_class)
    }

    pub fn has_one_through(model_class: impl Into<String>) -> Self {
        Self::new(RelationKind::HasOneThrough, model_class)
    }

    /// Set `join.from` and `join.to`.
    #[must_use]
    pub fn join(mut self, from: impl Into<ColumnRefs>, to: impl Into<ColumnRefs>) -> Self {
        let through = self.join.take().and_then(|j| j.through);
        self.join = Some(JoinMapping {
            from: Some(from.into()),
            to: Some(to.into()),
            through,
        });
        self
    }

    /// Set `join.through`.
    #[must_use]
    pub fn through(mut self, through: ThroughMapping) -> Self {
        self.join.get_or_insert_with(JoinMapping::default).through = Some(through);
        self
    }

    #[must_use]
    pub fn modify(mut self, modifier: Modifier) -> Self {
        self.modify = Some(modifier);
        self
    }

    #[must_use]
    pub fn filter(mut self, modifier: Modifier) -> Self {
        self.filter = Some(modifier);
        self
    }

    #[must_use]
    pub fn before_insert<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ModelInstance, &QueryContext) -> Result<()> + Send + Sync + 'static,
    {
        self.before_insert = Some(Arc::new(hook));
        self
    }

    /// Parse the JSON form of a mapping.
    ///
    /// Hooks and closures cannot be expressed in JSON; modifiers can be given
    /// as names, predicate objects or lists of either.
    pub fn from_json(json: &serde_json::Value) -> std::result::Result<Self, String> {
        let obj = json
            .as_object()
            .ok_or_else(|| "relation mapping must be an object".to_string())?;

        let mut mapping = RelationMapping::default();
        for (key, value) in obj {
            match key.as_str() {
                "relation" => mapping.relation = Some(json_string(key, value)?),
                "modelClass" => mapping.model_class = Some(json_string(key, value)?),
                "join" => mapping.join = Some(join_from_json(value)?),
                "modify" => mapping.modify = Some(Modifier::from_json(value)?),
                "filter" => mapping.filter = Some(Modifier::from_json(value)?),
                other => return Err(format!("unknown relation mapping property \"{}\"", other)),
            }
        }
        Ok(mapping)
    }
}

impl fmt::Debug for RelationMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationMapping")
            .field("relation", &self.relation)
            .field("model_class", &self.model_class)
            .field("join", &self.join)
            .field("modify", &self.modify)
            .field("filter", &self.filter)
            .field("before_insert", &self.before_insert.is_some())
            .finish()
    }
}

fn json_string(key: &str, value: &serde_json::Value) -> std::result::Result<String, String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("\"{}\" must be a string", key))
}

fn refs_from_json(key: &str, value: &serde_json::Value) -> std::result::Result<ColumnRefs, String> {
    match value {
        serde_json::Value::String(s) => Ok(ColumnRefs::from(s.as_str())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| json_string(key, item))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(ColumnRefs::from),
        _ => Err(format!(
            "join.{} must be a reference string or an array of them",
            key
        )),
    }
}

fn extras_from_json(value: &serde_json::Value) -> std::result::Result<Vec<ExtraColumn>, String> {
    match value {
        serde_json::Value::String(s) => Ok(vec![ExtraColumn::new(s.as_str())]),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| json_string("extra", item).map(ExtraColumn::new))
            .collect(),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(alias, column)| {
                json_string(alias, column).map(|column| ExtraColumn::aliased(alias.as_str(), column))
            })
            .collect(),
        _ => Err("join.through.extra must be a string, an array or an object".to_string()),
    }
}

fn join_from_json(value: &serde_json::Value) -> std::result::Result<JoinMapping, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "join must be an object".to_string())?;
    let mut join = JoinMapping::default();
    for (key, value) in obj {
        match key.as_str() {
            "from" => join.from = Some(refs_from_json(key, value)?),
            "to" => join.to = Some(refs_from_json(key, value)?),
            "through" => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| "join.through must be an object".to_string())?;
                let mut through = ThroughMapping::default();
                for (key, value) in obj {
                    match key.as_str() {
                        "from" => through.from = Some(refs_from_json(key, value)?),
                        "to" => through.to = Some(refs_from_json(key, value)?),
                        "modelClass" => through.model_class = Some(json_string(key, value)?),
                        "extra" | "extras" => through.extras = extras_from_json(value)?,
                        "modify" => through.modify = Some(Modifier::from_json(value)?),
                        "filter" => through.filter = Some(Modifier::from_json(value)?),
                        other => {
                            return Err(format!("unknown join.through property \"{}\"", other));
                        }
                    }
                }
                join.through = Some(through);
            }
            other => return Err(format!("unknown join property \"{}\"", other)),
        }
    }
    Ok(join)
}
