//! The owner side of a relation query.
//!
//! A relation can be fetched for loaded model instances, for raw identifier
//! values, for the rows of another query, or (inside correlated sub-queries)
//! for column references of an enclosing query.

use std::collections::BTreeSet;
use std::fmt;

use graphmodel_core::{Error, Reference, Result, Value};
use graphmodel_query::{Expr, Select};

use crate::instance::ModelInstance;
use crate::property::{RelationProperty, values_key};
use crate::relation::Relation;

/// Which shape of owner a [`RelationOwner`] wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    Models,
    Reference,
    Query,
    Identifiers,
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OwnerKind::Models => "models",
            OwnerKind::Reference => "reference",
            OwnerKind::Query => "query",
            OwnerKind::Identifiers => "identifiers",
        })
    }
}

#[derive(Debug, Clone)]
pub enum RelationOwner {
    Models(Vec<ModelInstance>),
    /// Columns of an enclosing query
    Reference(Vec<Reference>),
    /// A query whose rows supply the owner values
    Query(Box<Select>),
    /// Raw identifier values: a scalar, a list, or a list of tuples
    Identifiers(Value),
}

/// Owner values to match related rows against.
#[derive(Debug, Clone)]
pub enum OwnerProperties {
    Tuples(Vec<Vec<Value>>),
    Query(Select),
}

impl RelationOwner {
    pub fn kind(&self) -> OwnerKind {
        match self {
            RelationOwner::Models(_) => OwnerKind::Models,
            RelationOwner::Reference(_) => OwnerKind::Reference,
            RelationOwner::Query(_) => OwnerKind::Query,
            RelationOwner::Identifiers(_) => OwnerKind::Identifiers,
        }
    }

    /// Loaded owner instances, if this owner wraps any.
    pub fn models(&self) -> &[ModelInstance] {
        match self {
            RelationOwner::Models(models) => models,
            _ => &[],
        }
    }

    /// Restrict `builder` to rows related to this owner.
    ///
    /// `related_refs` are the related-side columns as bound in `builder`.
    /// When the owner has no usable identity (for example an unsaved model)
    /// the filter never matches, so the query returns no rows.
    pub fn build_find_query(
        &self,
        builder: &mut Select,
        relation: &Relation,
        related_refs: &[Reference],
    ) -> Result<()> {
        let filter = self.find_filter(relation, related_refs)?;
        builder.add_filter(filter);
        Ok(())
    }

    /// The predicate [`build_find_query`](Self::build_find_query) adds.
    pub fn find_filter(&self, relation: &Relation, related_refs: &[Reference]) -> Result<Expr> {
        let exprs: Vec<Expr> = related_refs.iter().map(Expr::reference).collect();

        if let RelationOwner::Reference(owner_refs) = self {
            if owner_refs.len() != related_refs.len() {
                return Err(Error::Custom(format!(
                    "relation {} has {} join columns but the owner supplies {} references",
                    relation.name(),
                    related_refs.len(),
                    owner_refs.len()
                )));
            }
            let pairs = exprs
                .into_iter()
                .zip(owner_refs.iter().map(Expr::reference));
            return Ok(Expr::all_eq(pairs).unwrap_or_else(Expr::always_false));
        }

        Ok(match self.get_properties(relation, None)? {
            Some(OwnerProperties::Tuples(tuples)) => Expr::in_tuples(exprs, tuples),
            Some(OwnerProperties::Query(query)) => Expr::in_subquery(exprs, query),
            None => {
                tracing::debug!(
                    relation = relation.name(),
                    owner = %self.kind(),
                    "Owner has no identity, relation query matches nothing"
                );
                Expr::always_false()
            }
        })
    }

    /// Owner values for `owner_prop` (the relation's owner property when
    /// `None`). Returns `None` when no owner value is usable.
    pub fn get_properties(
        &self,
        relation: &Relation,
        owner_prop: Option<&RelationProperty>,
    ) -> Result<Option<OwnerProperties>> {
        let prop = owner_prop.unwrap_or_else(|| relation.owner_prop());
        match self {
            RelationOwner::Models(models) => {
                let mut seen = BTreeSet::new();
                let mut tuples = Vec::new();
                for model in models {
                    let values = prop.get_props(model);
                    if values.iter().all(Value::is_null) {
                        continue;
                    }
                    if seen.insert(values_key(&values)) {
                        tuples.push(values);
                    }
                }
                Ok((!tuples.is_empty()).then_some(OwnerProperties::Tuples(tuples)))
            }

            RelationOwner::Identifiers(ids) => {
                let owner = relation.owner_model();
                let tuples = normalize_ids(ids, owner.id_columns().len());
                if tuples.is_empty() {
                    return Ok(None);
                }
                let is_id = prop.references().iter().all(Reference::is_plain)
                    && prop.columns() == owner.id_columns();
                if is_id {
                    return Ok(Some(OwnerProperties::Tuples(tuples)));
                }

                let table = owner.table_name();
                let mut query = Select::new(table);
                for column in prop.columns() {
                    query.add_select(Expr::qualified(table, column.as_str()), None);
                }
                let id_exprs = owner
                    .id_columns()
                    .iter()
                    .map(|c| Expr::qualified(table, c.as_str()))
                    .collect();
                query.add_filter(Expr::in_tuples(id_exprs, tuples));
                Ok(Some(OwnerProperties::Query(query)))
            }

            RelationOwner::Query(query) => {
                let mut query = query.fork();
                if query.table_name() == prop.model().table_name() {
                    query.clear_select();
                    let alias = query.table_ref().to_string();
                    for expr in prop.exprs(&alias) {
                        query.add_select(expr, None);
                    }
                }
                Ok(Some(OwnerProperties::Query(query)))
            }

            RelationOwner::Reference(_) => Err(Error::Unsupported(
                "reference owners have no property values".to_string(),
            )),
        }
    }
}

/// Normalize raw identifiers into tuples of `width` values.
///
/// A scalar is one single-column tuple. A flat list is a list of scalars for
/// single-column ids, or a single tuple for composite ids. A list of lists
/// is a list of tuples. NULL ids are dropped.
pub(crate) fn normalize_ids(ids: &Value, width: usize) -> Vec<Vec<Value>> {
    let items: Vec<Value> = match ids {
        Value::Null => return Vec::new(),
        Value::Array(items) => items.clone(),
        Value::Json(serde_json::Value::Array(items)) => {
            items.iter().cloned().map(Value::from_json).collect()
        }
        scalar => vec![scalar.clone()],
    };

    let nested = items
        .iter()
        .all(|v| matches!(v, Value::Array(_) | Value::Json(serde_json::Value::Array(_))));
    let tuples: Vec<Vec<Value>> = if nested && !items.is_empty() {
        items
            .into_iter()
            .map(|item| normalize_ids(&item, width).into_iter().flatten().collect())
            .collect()
    } else if width > 1 {
        vec![items]
    } else {
        items.into_iter().map(|v| vec![v]).collect()
    };

    tuples
        .into_iter()
        .filter(|t| !t.is_empty() && !t.iter().all(Value::is_null))
        .collect()
}

impl From<ModelInstance> for RelationOwner {
    fn from(model: ModelInstance) -> Self {
        RelationOwner::Models(vec![model])
    }
}

impl From<Vec<ModelInstance>> for RelationOwner {
    fn from(models: Vec<ModelInstance>) -> Self {
        RelationOwner::Models(models)
    }
}

impl From<Vec<Reference>> for RelationOwner {
    fn from(refs: Vec<Reference>) -> Self {
        RelationOwner::Reference(refs)
    }
}

impl From<Select> for RelationOwner {
    fn from(query: Select) -> Self {
        RelationOwner::Query(Box::new(query))
    }
}

impl From<Value> for RelationOwner {
    fn from(ids: Value) -> Self {
        RelationOwner::Identifiers(ids)
    }
}
