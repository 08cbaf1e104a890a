//! Model classes: the capability interface the relation layer consumes.
//!
//! A model class describes a table: its name, primary key columns, column to
//! property mapping, declared relations, named modifiers and lifecycle hooks.
//! Model classes are registered explicitly in a
//! [`ModelRegistry`](crate::registry::ModelRegistry); nothing is discovered at
//! runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use graphmodel_core::{ConfigError, Error, QueryContext, Result};

use crate::instance::ModelInstance;
use crate::mapping::RelationMapping;
use crate::modifier::Modifier;

/// Shared handle to a registered model class.
pub type ModelRef = Arc<dyn ModelClass>;

/// Hook run on every model instance after it is loaded.
pub type AfterFindHook =
    Arc<dyn Fn(&mut ModelInstance, &QueryContext) -> Result<()> + Send + Sync>;

/// Fallback consulted when a named modifier cannot be found.
pub type ModifierFallback = Arc<dyn Fn(&str) -> Result<Modifier> + Send + Sync>;

/// Metadata and hooks of a model class.
pub trait ModelClass: Send + Sync + fmt::Debug {
    /// Model class name, e.g. `"Person"`.
    fn name(&self) -> &str;

    /// Table name, e.g. `"persons"`.
    fn table_name(&self) -> &str;

    /// Primary key columns.
    fn id_columns(&self) -> &[String];

    /// Every column of the table.
    fn columns(&self) -> &[String];

    /// Map a column name to its in-memory property name.
    fn column_to_property(&self, column: &str) -> String {
        column.to_string()
    }

    /// Map a property name back to its column name.
    fn property_to_column(&self, property: &str) -> String {
        property.to_string()
    }

    /// Raw declarative relation mappings, in declaration order.
    fn relation_mappings(&self) -> &[(String, RelationMapping)] {
        &[]
    }

    /// Look up a named modifier registered on this model class.
    fn named_modifier(&self, _name: &str) -> Option<Modifier> {
        None
    }

    /// Called when a named modifier cannot be resolved.
    ///
    /// The default fails with `ModifierNotFound`; override to substitute a
    /// fallback modifier instead.
    fn modifier_not_found(&self, name: &str) -> Result<Modifier> {
        Err(Error::ModifierNotFound(name.to_string()))
    }

    /// Lifecycle hook run after an instance (and its loaded relations) is
    /// built from query results.
    fn after_find(&self, _instance: &mut ModelInstance, _ctx: &QueryContext) -> Result<()> {
        Ok(())
    }

    /// Is this a synthesized join-table descriptor rather than a declared model?
    fn is_synthetic(&self) -> bool {
        false
    }

    /// Property names of the primary key columns.
    fn id_properties(&self) -> Vec<String> {
        self.id_columns()
            .iter()
            .map(|c| self.column_to_property(c))
            .collect()
    }
}

/// Do two handles describe the same model class?
pub fn same_model(a: &dyn ModelClass, b: &dyn ModelClass) -> bool {
    a.name() == b.name() && a.table_name() == b.table_name()
}

/// A model class declared at startup with a builder.
///
/// # Example
///
/// ```ignore
/// let person = ModelDef::new("Person", "persons")
///     .columns(["id", "parentId", "firstName"])
///     .relation(
///         "children",
///         RelationMapping::has_many("Person").join("persons.id", "persons.parentId"),
///     );
/// ```
#[derive(Clone)]
pub struct ModelDef {
    name: String,
    table: String,
    id_columns: Vec<String>,
    columns: Vec<String>,
    /// column -> property
    properties: BTreeMap<String, String>,
    relations: Vec<(String, RelationMapping)>,
    modifiers: BTreeMap<String, Modifier>,
    after_find: Option<AfterFindHook>,
    modifier_fallback: Option<ModifierFallback>,
}

impl ModelDef {
    /// Create a model class with an `id` primary key.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            id_columns: vec!["id".to_string()],
            columns: Vec::new(),
            properties: BTreeMap::new(),
            relations: Vec::new(),
            modifiers: BTreeMap::new(),
            after_find: None,
            modifier_fallback: None,
        }
    }

    /// Set the primary key column(s).
    #[must_use]
    pub fn id_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the table's columns. Primary key columns are added if missing.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        for id in self.id_columns.iter().rev() {
            if !self.columns.contains(id) {
                self.columns.insert(0, id.clone());
            }
        }
        self
    }

    /// Map a column to a differently-named property.
    #[must_use]
    pub fn property(mut self, column: impl Into<String>, property: impl Into<String>) -> Self {
        self.properties.insert(column.into(), property.into());
        self
    }

    /// Declare a relation.
    #[must_use]
    pub fn relation(mut self, name: impl Into<String>, mapping: RelationMapping) -> Self {
        self.relations.push((name.into(), mapping));
        self
    }

    /// Declare a relation from its JSON form.
    pub fn relation_json(self, name: &str, json: &serde_json::Value) -> Result<Self> {
        let mapping = RelationMapping::from_json(json).map_err(|message| {
            Error::Config(ConfigError::new(self.name.clone(), message).relation(name))
        })?;
        Ok(self.relation(name, mapping))
    }

    /// Register a named modifier.
    #[must_use]
    pub fn modifier(mut self, name: impl Into<String>, modifier: Modifier) -> Self {
        self.modifiers.insert(name.into(), modifier);
        self
    }

    /// Set the after-find hook.
    #[must_use]
    pub fn after_find<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ModelInstance, &QueryContext) -> Result<()> + Send + Sync + 'static,
    {
        self.after_find = Some(Arc::new(hook));
        self
    }

    /// Substitute modifiers that cannot be found instead of failing.
    #[must_use]
    pub fn on_modifier_not_found<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&str) -> Result<Modifier> + Send + Sync + 'static,
    {
        self.modifier_fallback = Some(Arc::new(fallback));
        self
    }
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("id_columns", &self.id_columns)
            .field("columns", &self.columns)
            .field(
                "relations",
                &self.relations.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("modifiers", &self.modifiers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ModelClass for ModelDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn id_columns(&self) -> &[String] {
        &self.id_columns
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn column_to_property(&self, column: &str) -> String {
        self.properties
            .get(column)
            .cloned()
            .unwrap_or_else(|| column.to_string())
    }

    fn property_to_column(&self, property: &str) -> String {
        self.properties
            .iter()
            .find(|(_, p)| p.as_str() == property)
            .map_or_else(|| property.to_string(), |(c, _)| c.clone())
    }

    fn relation_mappings(&self) -> &[(String, RelationMapping)] {
        &self.relations
    }

    fn named_modifier(&self, name: &str) -> Option<Modifier> {
        self.modifiers.get(name).cloned()
    }

    fn modifier_not_found(&self, name: &str) -> Result<Modifier> {
        match &self.modifier_fallback {
            Some(fallback) => fallback(name),
            None => Err(Error::ModifierNotFound(name.to_string())),
        }
    }

    fn after_find(&self, instance: &mut ModelInstance, ctx: &QueryContext) -> Result<()> {
        match &self.after_find {
            Some(hook) => hook(instance, ctx),
            None => Ok(()),
        }
    }
}

/// Minimal descriptor for a join table that has no declared model class.
///
/// It can take part in joins and inserts like any model class.
#[derive(Debug, Clone)]
pub struct SyntheticTable {
    table: String,
    id_columns: Vec<String>,
    columns: Vec<String>,
}

impl SyntheticTable {
    pub fn new(table: impl Into<String>, id_columns: Vec<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            id_columns,
            columns,
        }
    }
}

impl ModelClass for SyntheticTable {
    fn name(&self) -> &str {
        &self.table
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn id_columns(&self) -> &[String] {
        &self.id_columns
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn is_synthetic(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_def_defaults() {
        let person = ModelDef::new("Person", "persons").columns(["firstName"]);
        assert_eq!(ModelClass::id_columns(&person), &["id".to_string()]);
        assert_eq!(
            ModelClass::columns(&person),
            &["id".to_string(), "firstName".to_string()]
        );
        assert!(!person.is_synthetic());
    }

    #[test]
    fn test_property_mapping_round_trip() {
        let person = ModelDef::new("Person", "persons")
            .columns(["first_name"])
            .property("first_name", "firstName");
        assert_eq!(person.column_to_property("first_name"), "firstName");
        assert_eq!(person.property_to_column("firstName"), "first_name");
        assert_eq!(person.column_to_property("id"), "id");
    }

    #[test]
    fn test_modifier_not_found_default_and_fallback() {
        let plain = ModelDef::new("Animal", "animals");
        let err = plain.modifier_not_found("dogs").unwrap_err();
        assert!(matches!(err, Error::ModifierNotFound(ref n) if n == "dogs"));

        let lenient = ModelDef::new("Animal", "animals")
            .on_modifier_not_found(|_| Ok(Modifier::list(Vec::new())));
        assert!(lenient.modifier_not_found("dogs").is_ok());
    }

    #[test]
    fn test_synthetic_table() {
        let t = SyntheticTable::new(
            "persons_movies",
            vec!["id".to_string()],
            vec!["personId".to_string(), "movieId".to_string()],
        );
        assert!(t.is_synthetic());
        assert_eq!(t.name(), "persons_movies");
        assert!(same_model(&t, &t.clone()));
    }
}
