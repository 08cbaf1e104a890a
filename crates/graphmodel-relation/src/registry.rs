//! Model registry and memoized relation resolution.
//!
//! Model classes are registered once at startup. Each model's relations are
//! built from its declarative mappings on first use and cached; the cache
//! is dropped whenever a model is (re-)registered or [`ModelRegistry::reset`]
//! is called.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use graphmodel_core::{Error, ReferenceError, Result};

use crate::model::{ModelClass, ModelRef};
use crate::relation::Relation;

/// Lists the columns of a table, e.g. by querying the database catalog.
pub type ColumnSource = Arc<dyn Fn(&str) -> Option<Vec<String>> + Send + Sync>;

/// The resolved relations of one model class, in declaration order.
#[derive(Debug, Default)]
pub struct RelationSet {
    relations: Vec<(String, Arc<Relation>)>,
}

impl RelationSet {
    pub fn get(&self, name: &str) -> Option<&Arc<Relation>> {
        self.relations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Relation>> {
        self.relations.iter().map(|(_, r)| r)
    }

    pub fn names(&self) -> Vec<&str> {
        self.relations.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// Registry of model classes.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<BTreeMap<String, ModelRef>>,
    /// table name -> model name
    tables: RwLock<BTreeMap<String, String>>,
    relations: RwLock<BTreeMap<String, Arc<RelationSet>>>,
    columns: RwLock<BTreeMap<String, Arc<Vec<String>>>>,
    column_source: RwLock<Option<ColumnSource>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model class.
    #[must_use]
    pub fn with_model<M: ModelClass + 'static>(self, model: M) -> Self {
        self.register(model);
        self
    }

    /// Use a column source for column pruning instead of declared columns.
    #[must_use]
    pub fn with_column_source<F>(self, source: F) -> Self
    where
        F: Fn(&str) -> Option<Vec<String>> + Send + Sync + 'static,
    {
        self.set_column_source(source);
        self
    }

    pub fn register<M: ModelClass + 'static>(&self, model: M) -> ModelRef {
        let model: ModelRef = Arc::new(model);
        self.register_ref(Arc::clone(&model));
        model
    }

    pub fn register_ref(&self, model: ModelRef) {
        let name = model.name().to_string();
        tracing::debug!(model = %name, table = model.table_name(), "Registering model class");
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.table_name().to_string(), name.clone());
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, model);
        self.relations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn set_column_source<F>(&self, source: F)
    where
        F: Fn(&str) -> Option<Vec<String>> + Send + Sync + 'static,
    {
        *self
            .column_source
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(source));
        self.columns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn find_model(&self, name: &str) -> Option<ModelRef> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Look up a model class by name.
    pub fn model(&self, name: &str) -> Result<ModelRef> {
        self.find_model(name)
            .ok_or_else(|| Error::Reference(ReferenceError::model_not_found(name)))
    }

    /// The model class registered for a table.
    pub fn model_for_table(&self, table: &str) -> Option<ModelRef> {
        let name = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()?;
        self.find_model(&name)
    }

    /// The resolved relations of a model class.
    ///
    /// Relations are built on first call and memoized until the registry
    /// changes. Any mapping error fails the whole set.
    pub fn relations(&self, model: &ModelRef) -> Result<Arc<RelationSet>> {
        if let Some(cached) = self
            .relations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model.name())
        {
            return Ok(Arc::clone(cached));
        }

        tracing::debug!(model = model.name(), "Resolving relation mappings");
        let mut set = RelationSet::default();
        for (name, mapping) in model.relation_mappings() {
            let relation = Relation::create(name, mapping, Arc::clone(model))?
                .set_mapping(mapping, self)?;
            tracing::trace!(
                model = model.name(),
                relation = %name,
                kind = %relation.kind(),
                related = relation.related_model().name(),
                "Resolved relation"
            );
            set.relations.push((name.clone(), Arc::new(relation)));
        }

        let set = Arc::new(set);
        self.relations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.name().to_string(), Arc::clone(&set));
        Ok(set)
    }

    /// A single resolved relation by name.
    pub fn relation(&self, model: &ModelRef, name: &str) -> Result<Option<Arc<Relation>>> {
        Ok(self.relations(model)?.get(name).cloned())
    }

    /// Columns of a model's table, used to prune graph selects.
    pub fn table_columns(&self, model: &dyn ModelClass) -> Arc<Vec<String>> {
        let table = model.table_name();
        if let Some(cached) = self
            .columns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
        {
            return Arc::clone(cached);
        }

        let source = self
            .column_source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let columns = source
            .and_then(|source| source(table))
            .unwrap_or_else(|| model.columns().to_vec());
        let columns = Arc::new(columns);
        self.columns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string(), Arc::clone(&columns));
        columns
    }

    /// Drop memoized relations and table columns.
    pub fn clear_caches(&self) {
        self.relations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.columns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Forget every registered model and cache.
    pub fn reset(&self) {
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.clear_caches();
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ModelRegistry")
            .field("models", &models.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
