//! Join tables of many-to-many and has-one-through relations.

use std::fmt;
use std::sync::Arc;

use graphmodel_core::{ConfigError, Error, Reference, Result};
use graphmodel_query::Select;

use crate::mapping::{BeforeInsertFn, ThroughMapping};
use crate::model::{ModelRef, SyntheticTable};
use crate::modifier::{ResolvedModifier, resolve_modifier};
use crate::property::RelationProperty;
use crate::registry::ModelRegistry;

/// A join-table column surfaced on related rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTableExtra {
    pub join_table_col: String,
    pub join_table_prop: String,
    /// Column name the value is selected as
    pub alias_col: String,
    /// Property name it is exposed under on related instances
    pub alias_prop: String,
}

/// The join table between owner and related rows.
#[derive(Clone)]
pub struct JoinTable {
    model: ModelRef,
    /// Join-table columns that match the owner property
    owner_prop: RelationProperty,
    /// Join-table columns that match the related property
    related_prop: RelationProperty,
    extras: Vec<JoinTableExtra>,
    modify: Option<ResolvedModifier>,
    before_insert: Option<BeforeInsertFn>,
}

impl JoinTable {
    /// Resolve a `join.through` block.
    ///
    /// `swapped` is true when the main `join.from` pointed at the related
    /// table, in which case `through.from` pairs with the related side too.
    pub(crate) fn resolve(
        through: &ThroughMapping,
        swapped: bool,
        owner: &ModelRef,
        related: &ModelRef,
        relation: &str,
        registry: &ModelRegistry,
    ) -> Result<Self> {
        let config_err =
            |message: String| Error::Config(ConfigError::new(owner.name(), message).relation(relation));

        let from = through
            .from
            .as_ref()
            .filter(|refs| !refs.is_empty())
            .ok_or_else(|| config_err("join.through.from must be defined".to_string()))?;
        let to = through
            .to
            .as_ref()
            .filter(|refs| !refs.is_empty())
            .ok_or_else(|| config_err("join.through.to must be defined".to_string()))?;

        let mut tables = Vec::new();
        for text in from.as_slice().iter().chain(to.as_slice()) {
            let reference = Reference::parse(text).map_err(|e| {
                Error::Config(
                    ConfigError::new(
                        owner.name(),
                        format!(
                            "join.through: could not parse reference \"{}\", it must have format TableName.columnName",
                            text
                        ),
                    )
                    .relation(relation)
                    .source(e),
                )
            })?;
            if !tables.iter().any(|t: &String| t == reference.table()) {
                tables.push(reference.table().to_string());
            }
        }
        let [table] = tables.as_slice() else {
            return Err(config_err(
                "join.through.from and join.through.to must point to the same join table".to_string(),
            ));
        };

        let model = join_table_model(through, table, from.as_slice(), to.as_slice(), related, registry)
            .map_err(|e| match e {
                Error::Reference(source) => Error::Config(
                    ConfigError::new(owner.name(), source.message.clone())
                        .relation(relation)
                        .source(source),
                ),
                other => other,
            })?;

        let resolver = |t: &str, _: &str| (t == model.table_name()).then(|| model.clone());
        let from_prop = RelationProperty::new(from.as_slice(), resolver).map_err(|e| {
            Error::Config(
                ConfigError::new(owner.name(), format!("join.through.from: {}", e.message))
                    .relation(relation)
                    .source(e),
            )
        })?;
        let to_prop = RelationProperty::new(to.as_slice(), resolver).map_err(|e| {
            Error::Config(
                ConfigError::new(owner.name(), format!("join.through.to: {}", e.message))
                    .relation(relation)
                    .source(e),
            )
        })?;

        let (owner_prop, related_prop) = if swapped {
            (to_prop, from_prop)
        } else {
            (from_prop, to_prop)
        };

        let extras = through
            .extras
            .iter()
            .map(|extra| JoinTableExtra {
                join_table_col: extra.column.clone(),
                join_table_prop: model.column_to_property(&extra.column),
                alias_col: extra.alias.clone(),
                alias_prop: related.column_to_property(&extra.alias),
            })
            .collect();

        let modify = match through.modify.as_ref().or(through.filter.as_ref()) {
            Some(modifier) => Some(resolve_modifier(modifier, model.as_ref(), None)?),
            None => None,
        };

        Ok(Self {
            model,
            owner_prop,
            related_prop,
            extras,
            modify,
            before_insert: through.before_insert.clone(),
        })
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn table_name(&self) -> &str {
        self.model.table_name()
    }

    pub fn owner_prop(&self) -> &RelationProperty {
        &self.owner_prop
    }

    pub fn related_prop(&self) -> &RelationProperty {
        &self.related_prop
    }

    pub fn extras(&self) -> &[JoinTableExtra] {
        &self.extras
    }

    pub fn modify(&self) -> Option<&ResolvedModifier> {
        self.modify.as_ref()
    }

    pub fn before_insert(&self) -> Option<&BeforeInsertFn> {
        self.before_insert.as_ref()
    }

    /// A child query over the join table with the join-table modifier applied.
    pub fn subquery(&self, parent: &Select) -> Result<Select> {
        let mut query = Select::new(self.table_name()).child_query_of(parent);
        if let Some(modify) = &self.modify {
            modify.apply(&mut query)?;
        }
        Ok(query)
    }
}

impl fmt::Debug for JoinTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinTable")
            .field("table", &self.model.table_name())
            .field("owner_columns", &self.owner_prop.columns())
            .field("related_columns", &self.related_prop.columns())
            .field("extras", &self.extras)
            .finish_non_exhaustive()
    }
}

fn join_table_model(
    through: &ThroughMapping,
    table: &str,
    from: &[String],
    to: &[String],
    related: &ModelRef,
    registry: &ModelRegistry,
) -> Result<ModelRef> {
    if let Some(name) = &through.model_class {
        return registry.model(name);
    }
    if let Some(model) = registry.model_for_table(table) {
        return Ok(model);
    }

    let mut columns: Vec<String> = Vec::new();
    let referenced = from
        .iter()
        .chain(to)
        .filter_map(|text| Reference::parse(text).ok())
        .map(|r| r.column().to_string())
        .chain(through.extras.iter().map(|e| e.column.clone()));
    for column in referenced {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }

    tracing::debug!(table = %table, "Synthesizing join table model");
    Ok(Arc::new(SyntheticTable::new(
        table,
        related.id_columns().to_vec(),
        columns,
    )))
}
