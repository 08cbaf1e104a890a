//! Deferred operations on a relation.
//!
//! Every operation is created from a [`Relation`] and a [`RelationOwner`],
//! can be inspected with `build()` and executed with `run()`. What an
//! operation does depends on the relation's shape: inserting into a has-many
//! relation sets the related row's foreign key, while inserting into a
//! many-to-many relation also writes a join-table row.

use std::collections::BTreeMap;

use graphmodel_core::{Connection, Cx, Error, Outcome, QueryContext, Reference, Result, Row, Value};
use graphmodel_query::{
    DeleteBuilder, Dialect, Expr, InsertBuilder, JoinType, Patch, Select, UpdateBuilder,
};

use crate::instance::{ModelInstance, Related};
use crate::mapping::RelationKind;
use crate::model::ModelRef;
use crate::owner::{RelationOwner, normalize_ids};
use crate::property::values_key;
use crate::relation::{Relation, derived_join};

/// Join-table owner columns are selected under this prefix when fetching
/// through a join table, so fetched rows can be matched to their owners.
const OWNER_KEY_PREFIX: &str = "_owner_key_";

fn owner_key_column(index: usize) -> String {
    format!("{}{}", OWNER_KEY_PREFIX, index)
}

/// A single write statement produced by an operation.
#[derive(Debug, Clone)]
pub enum Statement {
    Insert(InsertBuilder),
    Update(UpdateBuilder),
    Delete(DeleteBuilder),
}

impl Statement {
    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        match self {
            Statement::Insert(b) => b.build(dialect),
            Statement::Update(b) => b.build(dialect),
            Statement::Delete(b) => b.build(dialect),
        }
    }

    pub fn table_name(&self) -> &str {
        match self {
            Statement::Insert(b) => b.table_name(),
            Statement::Update(b) => b.table_name(),
            Statement::Delete(b) => b.table_name(),
        }
    }

    /// Execute; inserts yield the inserted id, the rest the affected rows.
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        dialect: Dialect,
    ) -> Outcome<i64, Error> {
        let affected = match self {
            Statement::Insert(b) => return b.execute(cx, conn, dialect).await,
            Statement::Update(b) => b.execute(cx, conn, dialect).await,
            Statement::Delete(b) => b.execute(cx, conn, dialect).await,
        };
        match affected {
            Outcome::Ok(n) => Outcome::Ok(i64::try_from(n).unwrap_or(i64::MAX)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

impl Relation {
    pub fn find(&self, owner: impl Into<RelationOwner>) -> FindOperation<'_> {
        FindOperation::new(self, owner.into())
    }

    pub fn insert(&self, owner: impl Into<RelationOwner>, models: Vec<ModelInstance>) -> InsertOperation<'_> {
        InsertOperation::new(self, owner.into(), models)
    }

    /// Update related rows with a model's column values.
    pub fn update(&self, owner: impl Into<RelationOwner>, model: &ModelInstance) -> UpdateOperation<'_> {
        let id_columns = self.related_model().id_columns();
        let patch: Patch = model
            .column_values()
            .into_iter()
            .filter(|(column, _)| !id_columns.contains(column))
            .collect();
        UpdateOperation::new(self, owner.into(), patch)
    }

    /// Update only the given targets of related rows.
    pub fn patch(&self, owner: impl Into<RelationOwner>, patch: Patch) -> UpdateOperation<'_> {
        UpdateOperation::new(self, owner.into(), patch)
    }

    pub fn delete(&self, owner: impl Into<RelationOwner>) -> DeleteOperation<'_> {
        DeleteOperation::new(self, owner.into())
    }

    /// Connect existing related rows, addressed by their ids, to the owner.
    pub fn relate(&self, owner: impl Into<RelationOwner>, ids: impl Into<Value>) -> RelateOperation<'_> {
        RelateOperation::new(self, owner.into(), ids.into())
    }

    pub fn unrelate(&self, owner: impl Into<RelationOwner>) -> UnrelateOperation<'_> {
        UnrelateOperation::new(self, owner.into())
    }
}

fn single_owner<'o>(owner: &'o RelationOwner, relation: &Relation, op: &str) -> Result<&'o ModelInstance> {
    match owner.models() {
        [model] => Ok(model),
        models => Err(Error::Custom(format!(
            "{} on relation {} needs exactly one owner model, got {}",
            op,
            relation.name(),
            models.len()
        ))),
    }
}

fn outcome<T>(result: Result<T>) -> Outcome<T, Error> {
    match result {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e),
    }
}

/// Whether an owner can be written against: belongs-to-one relations write
/// the owner row by id, the other kinds copy the owner's join values.
fn owner_is_saved(relation: &Relation, owner: &ModelInstance) -> bool {
    match relation.kind() {
        RelationKind::BelongsToOne => owner.has_id(),
        _ => !relation
            .owner_prop()
            .get_props(owner)
            .iter()
            .all(Value::is_null),
    }
}

/// `id IN (...)` over a model's primary key.
fn id_filter(model: &ModelRef, tuples: Vec<Vec<Value>>) -> Expr {
    let table = model.table_name();
    let exprs = model
        .id_columns()
        .iter()
        .map(|c| Expr::qualified(table, c.as_str()))
        .collect();
    Expr::in_tuples(exprs, tuples)
}

/// Run every `before_insert` hook that applies to a related model.
fn before_insert(relation: &Relation, model: &mut ModelInstance, ctx: &QueryContext) -> Result<()> {
    if let Some(hook) = relation.before_insert() {
        hook(model, ctx)?;
    }
    Ok(())
}

// ==================== Find ====================

/// Fetch the related rows of an owner.
#[derive(Debug)]
pub struct FindOperation<'a> {
    relation: &'a Relation,
    owner: RelationOwner,
    dialect: Dialect,
    context: QueryContext,
}

impl<'a> FindOperation<'a> {
    pub fn new(relation: &'a Relation, owner: RelationOwner) -> Self {
        Self {
            relation,
            owner,
            dialect: Dialect::default(),
            context: QueryContext::new(),
        }
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Share a context with hooks run by this operation.
    #[must_use]
    pub fn context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    /// The SELECT this operation runs.
    pub fn build(&self) -> Result<Select> {
        let relation = self.relation;
        let related = relation.related_model();
        let table = related.table_name();
        let mut query = Select::new(table)
            .dialect(self.dialect)
            .with_context(self.context.clone());
        if let Some(modify) = relation.modify() {
            modify.apply(&mut query)?;
        }

        match relation.join_table() {
            None => {
                let refs = relation.related_prop().refs(&query);
                self.owner.build_find_query(&mut query, relation, &refs)?;
            }
            Some(jt) => {
                let join_table = jt.table_name();
                if !query.has_selects() {
                    for column in related.columns() {
                        query.add_select(Expr::qualified(table, column.as_str()), None);
                    }
                }
                for extra in jt.extras() {
                    query.add_select(
                        Expr::qualified(join_table, extra.join_table_col.as_str()),
                        Some(extra.alias_col.clone()),
                    );
                }
                for (i, column) in jt.owner_prop().columns().iter().enumerate() {
                    query.add_select(
                        Expr::qualified(join_table, column.as_str()),
                        Some(owner_key_column(i)),
                    );
                }

                let on = Expr::all_eq(
                    jt.related_prop()
                        .exprs(join_table)
                        .into_iter()
                        .zip(relation.related_prop().exprs(table)),
                )
                .ok_or_else(|| Error::Custom("relation join without references".to_string()))?;
                let join_query = jt.subquery(&query)?;
                query.add_join(derived_join(JoinType::Inner, join_query, join_table, join_table, on));

                let refs = jt.owner_prop().bind(join_table);
                self.owner.build_find_query(&mut query, relation, &refs)?;
            }
        }
        Ok(query)
    }

    /// Fetch related instances.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(relation = self.relation.name()))]
    pub async fn run<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<Vec<ModelInstance>, Error> {
        match self.fetch(cx, conn).await {
            Outcome::Ok(fetched) => Outcome::Ok(fetched.into_iter().map(|(_, m)| m).collect()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Fetch related instances and attach them to the owner models.
    ///
    /// Returns the owner models with the relation set, in owner order.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(relation = self.relation.name()))]
    pub async fn run_and_attach<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<Vec<ModelInstance>, Error> {
        let fetched = match self.fetch(cx, conn).await {
            Outcome::Ok(fetched) => fetched,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut by_owner: BTreeMap<String, Vec<ModelInstance>> = BTreeMap::new();
        for (key, model) in fetched {
            by_owner.entry(key).or_default().push(model);
        }

        let relation = self.relation;
        let owners = self
            .owner
            .models()
            .iter()
            .map(|owner| {
                let mut owner = owner.clone();
                let key = relation.owner_prop().prop_key(&owner);
                let related = by_owner.get(&key).cloned().unwrap_or_default();
                let value = if relation.is_one_to_one() {
                    Related::One(related.into_iter().next().map(Box::new))
                } else {
                    Related::Many(related)
                };
                owner.set_related(relation.name(), value);
                owner
            })
            .collect();
        Outcome::Ok(owners)
    }

    /// Run the query; each instance is paired with its owner key.
    async fn fetch<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<Vec<(String, ModelInstance)>, Error> {
        let query = match self.build() {
            Ok(q) => q,
            Err(e) => return Outcome::Err(e),
        };
        let rows = match query.rows(cx, conn).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(rows = rows.len(), "Fetched related rows");
        outcome(
            rows.iter()
                .map(|row| self.instance_from_row(row, query.context()))
                .collect(),
        )
    }

    fn instance_from_row(&self, row: &Row, ctx: &QueryContext) -> Result<(String, ModelInstance)> {
        let relation = self.relation;
        let related = relation.related_model();
        let mut owner_key = Vec::new();
        let columns = row.iter().filter(|(name, value)| {
            if name.starts_with(OWNER_KEY_PREFIX) {
                owner_key.push((*value).clone());
                false
            } else {
                true
            }
        });
        let mut model = ModelInstance::from_columns(related.clone(), columns.collect::<Vec<_>>());
        let key = if relation.join_table().is_some() {
            values_key(&owner_key)
        } else {
            relation.related_prop().prop_key(&model)
        };
        related.after_find(&mut model, ctx)?;
        Ok((key, model))
    }
}

// ==================== Insert ====================

/// Insert new related rows and connect them to a single, saved owner.
#[derive(Debug)]
pub struct InsertOperation<'a> {
    relation: &'a Relation,
    owner: RelationOwner,
    models: Vec<ModelInstance>,
    dialect: Dialect,
    context: QueryContext,
}

impl<'a> InsertOperation<'a> {
    pub fn new(relation: &'a Relation, owner: RelationOwner, models: Vec<ModelInstance>) -> Self {
        Self {
            relation,
            owner,
            models,
            dialect: Dialect::default(),
            context: QueryContext::new(),
        }
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    #[must_use]
    pub fn context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    fn check(&self) -> Result<&ModelInstance> {
        let relation = self.relation;
        match relation.kind() {
            RelationKind::HasOneThrough => Err(Error::Unsupported(format!(
                "insert into {} relation {}",
                relation.kind(),
                relation.name()
            ))),
            RelationKind::BelongsToOne if self.models.len() > 1 => Err(Error::Custom(format!(
                "can only insert one model into {} relation {}",
                relation.kind(),
                relation.name()
            ))),
            _ => {
                let owner = single_owner(&self.owner, relation, "insert")?;
                if !owner_is_saved(relation, owner) {
                    return Err(Error::Custom(format!(
                        "insert into relation {} needs a saved owner",
                        relation.name()
                    )));
                }
                Ok(owner)
            }
        }
    }

    /// Prepare the related models: set foreign keys and run hooks.
    fn prepare(&self) -> Result<Vec<ModelInstance>> {
        let relation = self.relation;
        let owner = self.check()?;
        let mut models = self.models.clone();
        for model in &mut models {
            if matches!(relation.kind(), RelationKind::HasMany | RelationKind::HasOne) {
                for i in 0..relation.owner_prop().size() {
                    let value = relation.owner_prop().get_prop(owner, i).unwrap_or(Value::Null);
                    relation.related_prop().set_prop(model, i, value);
                }
            }
            before_insert(relation, model, &self.context)?;
        }
        Ok(models)
    }

    fn insert_related(&self, model: &ModelInstance) -> InsertBuilder {
        let related = self.relation.related_model();
        InsertBuilder::new(related.table_name())
            .values(model.column_values())
            .returning(related.id_columns().iter().cloned())
    }

    /// Owner update of a belongs-to-one insert.
    fn owner_update(&self, owner: &ModelInstance, model: &ModelInstance) -> UpdateBuilder {
        let relation = self.relation;
        let mut patch = Patch::new();
        for i in 0..relation.owner_prop().size() {
            let value = relation.related_prop().get_prop(model, i).unwrap_or(Value::Null);
            relation.owner_prop().patch(&mut patch, i, value);
        }
        let owner_model = relation.owner_model();
        UpdateBuilder::new(owner_model.table_name())
            .patch(&patch)
            .filter(id_filter(owner_model, vec![owner.id_values()]))
    }

    /// Join-table row of a many-to-many insert.
    fn join_row(&self, owner: &ModelInstance, model: &ModelInstance) -> Result<InsertBuilder> {
        let relation = self.relation;
        let jt = relation
            .join_table()
            .ok_or_else(|| Error::Custom(format!("relation {} has no join table", relation.name())))?;

        let mut row = ModelInstance::new(jt.model().clone());
        for i in 0..relation.owner_prop().size() {
            let value = relation.owner_prop().get_prop(owner, i).unwrap_or(Value::Null);
            jt.owner_prop().set_prop(&mut row, i, value);
        }
        for i in 0..relation.related_prop().size() {
            let value = relation.related_prop().get_prop(model, i).unwrap_or(Value::Null);
            jt.related_prop().set_prop(&mut row, i, value);
        }
        for extra in jt.extras() {
            if let Some(value) = model.get(&extra.alias_prop) {
                row.set(extra.join_table_prop.as_str(), value.clone());
            }
        }
        if let Some(hook) = jt.before_insert() {
            hook(&mut row, &self.context)?;
        }

        let values = row
            .props()
            .iter()
            .map(|(prop, value)| (jt.model().property_to_column(prop), value.clone()))
            .collect();
        Ok(InsertBuilder::new(jt.table_name()).values(values))
    }

    /// The statements this insert runs, given the models' current ids.
    pub fn build(&self) -> Result<Vec<Statement>> {
        let relation = self.relation;
        let owner = self.check()?;
        let models = self.prepare()?;
        let mut statements = Vec::new();
        for model in &models {
            statements.push(Statement::Insert(self.insert_related(model)));
            match relation.kind() {
                RelationKind::BelongsToOne => {
                    statements.push(Statement::Update(self.owner_update(owner, model)));
                }
                RelationKind::ManyToMany => {
                    statements.push(Statement::Insert(self.join_row(owner, model)?));
                }
                _ => {}
            }
        }
        Ok(statements)
    }

    /// Insert the models and return them with generated ids set.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(relation = self.relation.name()))]
    pub async fn run<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<Vec<ModelInstance>, Error> {
        let relation = self.relation;
        let owner = match self.check() {
            Ok(owner) => owner,
            Err(e) => return Outcome::Err(e),
        };
        let mut models = match self.prepare() {
            Ok(models) => models,
            Err(e) => return Outcome::Err(e),
        };

        for model in &mut models {
            let id = match self.insert_related(model).execute(cx, conn, self.dialect).await {
                Outcome::Ok(id) => id,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let id_props = relation.related_model().id_properties();
            if let [id_prop] = id_props.as_slice() {
                if model.get(id_prop).is_none_or(Value::is_null) {
                    model.set(id_prop.as_str(), Value::BigInt(id));
                }
            }

            let follow_up = match relation.kind() {
                RelationKind::BelongsToOne => Some(Statement::Update(self.owner_update(owner, model))),
                RelationKind::ManyToMany => match self.join_row(owner, model) {
                    Ok(insert) => Some(Statement::Insert(insert)),
                    Err(e) => return Outcome::Err(e),
                },
                _ => None,
            };
            if let Some(statement) = follow_up {
                match statement.execute(cx, conn, self.dialect).await {
                    Outcome::Ok(_) => {}
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
        }

        tracing::debug!(inserted = models.len(), "Inserted related models");
        Outcome::Ok(models)
    }
}

// ==================== Update / Patch ====================

/// The related rows of an owner, addressed by related primary key.
fn related_ids_subquery(relation: &Relation, owner: &RelationOwner, dialect: Dialect) -> Result<Expr> {
    let related = relation.related_model();
    let mut find = FindOperation::new(relation, owner.clone()).dialect(dialect).build()?;
    find.clear_select();
    let table = related.table_name();
    for column in related.id_columns() {
        find.add_select(Expr::qualified(table, column.as_str()), None);
    }
    let exprs = related
        .id_columns()
        .iter()
        .map(|c| Expr::qualified(table, c.as_str()))
        .collect();
    Ok(Expr::in_subquery(exprs, find))
}

/// Update the related rows of an owner.
#[derive(Debug)]
pub struct UpdateOperation<'a> {
    relation: &'a Relation,
    owner: RelationOwner,
    patch: Patch,
    dialect: Dialect,
}

impl<'a> UpdateOperation<'a> {
    pub fn new(relation: &'a Relation, owner: RelationOwner, patch: Patch) -> Self {
        Self {
            relation,
            owner,
            patch,
            dialect: Dialect::default(),
        }
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn build(&self) -> Result<Statement> {
        let filter = related_ids_subquery(self.relation, &self.owner, self.dialect)?;
        Ok(Statement::Update(
            UpdateBuilder::new(self.relation.related_model().table_name())
                .patch(&self.patch)
                .filter(filter),
        ))
    }

    /// Returns the number of updated rows.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(relation = self.relation.name()))]
    pub async fn run<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<i64, Error> {
        match self.build() {
            Ok(statement) => statement.execute(cx, conn, self.dialect).await,
            Err(e) => Outcome::Err(e),
        }
    }
}

// ==================== Delete ====================

/// Delete the related rows of an owner.
#[derive(Debug)]
pub struct DeleteOperation<'a> {
    relation: &'a Relation,
    owner: RelationOwner,
    dialect: Dialect,
}

impl<'a> DeleteOperation<'a> {
    pub fn new(relation: &'a Relation, owner: RelationOwner) -> Self {
        Self {
            relation,
            owner,
            dialect: Dialect::default(),
        }
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn build(&self) -> Result<Statement> {
        let filter = related_ids_subquery(self.relation, &self.owner, self.dialect)?;
        Ok(Statement::Delete(
            DeleteBuilder::new(self.relation.related_model().table_name()).filter(filter),
        ))
    }

    /// Returns the number of deleted rows.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(relation = self.relation.name()))]
    pub async fn run<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<i64, Error> {
        match self.build() {
            Ok(statement) => statement.execute(cx, conn, self.dialect).await,
            Err(e) => Outcome::Err(e),
        }
    }
}

// ==================== Relate ====================

/// Connect existing related rows to a single owner.
///
/// For has-many and has-one relations the ids address related rows by
/// primary key. For belongs-to-one and through relations they are values of
/// the related join columns. An owner without identity relates nothing.
#[derive(Debug)]
pub struct RelateOperation<'a> {
    relation: &'a Relation,
    owner: RelationOwner,
    ids: Value,
    dialect: Dialect,
    context: QueryContext,
}

impl<'a> RelateOperation<'a> {
    pub fn new(relation: &'a Relation, owner: RelationOwner, ids: Value) -> Self {
        Self {
            relation,
            owner,
            ids,
            dialect: Dialect::default(),
            context: QueryContext::new(),
        }
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    #[must_use]
    pub fn context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    pub fn build(&self) -> Result<Vec<Statement>> {
        let relation = self.relation;
        let owner = single_owner(&self.owner, relation, "relate")?;
        if !owner_is_saved(relation, owner) {
            tracing::debug!(
                relation = relation.name(),
                "Owner has no identity, nothing to relate"
            );
            return Ok(Vec::new());
        }

        match relation.kind() {
            RelationKind::HasMany | RelationKind::HasOne => {
                let related = relation.related_model();
                let ids = normalize_ids(&self.ids, related.id_columns().len());
                let mut patch = Patch::new();
                for i in 0..relation.owner_prop().size() {
                    let value = relation.owner_prop().get_prop(owner, i).unwrap_or(Value::Null);
                    relation.related_prop().patch(&mut patch, i, value);
                }
                Ok(vec![Statement::Update(
                    UpdateBuilder::new(related.table_name())
                        .patch(&patch)
                        .filter(id_filter(related, ids)),
                )])
            }

            RelationKind::BelongsToOne => {
                let tuples = normalize_ids(&self.ids, relation.related_prop().size());
                let [values] = tuples.as_slice() else {
                    return Err(Error::Custom(format!(
                        "can only relate one model to {} relation {}",
                        relation.kind(),
                        relation.name()
                    )));
                };
                let mut patch = Patch::new();
                for (i, value) in values.iter().enumerate() {
                    relation.owner_prop().patch(&mut patch, i, value.clone());
                }
                let owner_model = relation.owner_model();
                Ok(vec![Statement::Update(
                    UpdateBuilder::new(owner_model.table_name())
                        .patch(&patch)
                        .filter(id_filter(owner_model, vec![owner.id_values()])),
                )])
            }

            RelationKind::ManyToMany | RelationKind::HasOneThrough => {
                let jt = relation.join_table().ok_or_else(|| {
                    Error::Custom(format!("relation {} has no join table", relation.name()))
                })?;
                let owner_values = relation.owner_prop().get_props(owner);
                let mut insert = InsertBuilder::new(jt.table_name());
                for related_values in normalize_ids(&self.ids, relation.related_prop().size()) {
                    let mut row = ModelInstance::new(jt.model().clone());
                    for (i, value) in owner_values.iter().enumerate() {
                        jt.owner_prop().set_prop(&mut row, i, value.clone());
                    }
                    for (i, value) in related_values.into_iter().enumerate() {
                        jt.related_prop().set_prop(&mut row, i, value);
                    }
                    if let Some(hook) = jt.before_insert() {
                        hook(&mut row, &self.context)?;
                    }
                    insert = insert.values(
                        row.props()
                            .iter()
                            .map(|(prop, value)| (jt.model().property_to_column(prop), value.clone()))
                            .collect(),
                    );
                }
                if insert.rows().is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![Statement::Insert(insert)])
            }
        }
    }

    /// Returns the number of statements executed.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(relation = self.relation.name()))]
    pub async fn run<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<usize, Error> {
        let statements = match self.build() {
            Ok(s) => s,
            Err(e) => return Outcome::Err(e),
        };
        for statement in &statements {
            match statement.execute(cx, conn, self.dialect).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(statements.len())
    }
}

// ==================== Unrelate ====================

/// Disconnect every related row from the owner without deleting it.
///
/// Foreign keys are set to NULL; through relations delete join-table rows.
#[derive(Debug)]
pub struct UnrelateOperation<'a> {
    relation: &'a Relation,
    owner: RelationOwner,
    dialect: Dialect,
}

impl<'a> UnrelateOperation<'a> {
    pub fn new(relation: &'a Relation, owner: RelationOwner) -> Self {
        Self {
            relation,
            owner,
            dialect: Dialect::default(),
        }
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn build(&self) -> Result<Statement> {
        let relation = self.relation;
        match relation.kind() {
            RelationKind::HasMany | RelationKind::HasOne => {
                let related = relation.related_model();
                let refs: Vec<Reference> = relation.related_prop().bind(related.table_name());
                let filter = self.owner.find_filter(relation, &refs)?;
                let mut patch = Patch::new();
                for i in 0..relation.related_prop().size() {
                    relation.related_prop().patch(&mut patch, i, Value::Null);
                }
                Ok(Statement::Update(
                    UpdateBuilder::new(related.table_name())
                        .patch(&patch)
                        .filter(filter),
                ))
            }

            RelationKind::BelongsToOne => {
                let owner_model = relation.owner_model();
                let mut patch = Patch::new();
                for i in 0..relation.owner_prop().size() {
                    relation.owner_prop().patch(&mut patch, i, Value::Null);
                }
                let tuples: Vec<Vec<Value>> = self
                    .owner
                    .models()
                    .iter()
                    .filter(|m| m.has_id())
                    .map(ModelInstance::id_values)
                    .collect();
                let filter = if tuples.is_empty() {
                    Expr::always_false()
                } else {
                    id_filter(owner_model, tuples)
                };
                Ok(Statement::Update(
                    UpdateBuilder::new(owner_model.table_name())
                        .patch(&patch)
                        .filter(filter),
                ))
            }

            RelationKind::ManyToMany | RelationKind::HasOneThrough => {
                let jt = relation.join_table().ok_or_else(|| {
                    Error::Custom(format!("relation {} has no join table", relation.name()))
                })?;
                let refs = jt.owner_prop().bind(jt.table_name());
                let filter = self.owner.find_filter(relation, &refs)?;
                Ok(Statement::Delete(DeleteBuilder::new(jt.table_name()).filter(filter)))
            }
        }
    }

    /// Returns the number of affected rows.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(relation = self.relation.name()))]
    pub async fn run<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<i64, Error> {
        match self.build() {
            Ok(statement) => statement.execute(cx, conn, self.dialect).await,
            Err(e) => Outcome::Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{ExtraColumn, RelationMapping, ThroughMapping};
    use crate::model::ModelDef;
    use crate::registry::ModelRegistry;
    use asupersync::runtime::RuntimeBuilder;
    use std::sync::{Arc, Mutex};

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with_model(
                ModelDef::new("Person", "persons")
                    .columns(["name", "favoriteId"])
                    .relation(
                        "pets",
                        RelationMapping::has_many("Animal").join("persons.id", "animals.ownerId"),
                    )
                    .relation(
                        "favorite",
                        RelationMapping::belongs_to_one("Animal")
                            .join("persons.favoriteId", "animals.id"),
                    )
                    .relation(
                        "movies",
                        RelationMapping::many_to_many("Movie")
                            .join("persons.id", "movies.id")
                            .through(
                                ThroughMapping::new("persons_movies.personId", "persons_movies.movieId")
                                    .extra(ExtraColumn::new("role")),
                            ),
                    )
                    .relation(
                        "agent",
                        RelationMapping::has_one_through("Person")
                            .join("persons.id", "persons.id")
                            .through(ThroughMapping::new("agents.clientId", "agents.agentId")),
                    ),
            )
            .with_model(ModelDef::new("Animal", "animals").columns(["ownerId", "name"]))
            .with_model(ModelDef::new("Movie", "movies").columns(["title"]))
    }

    fn relation(reg: &ModelRegistry, name: &str) -> Arc<Relation> {
        let person = reg.model("Person").unwrap();
        reg.relation(&person, name).unwrap().unwrap()
    }

    fn person(reg: &ModelRegistry, id: i64) -> ModelInstance {
        ModelInstance::from_props(reg.model("Person").unwrap(), [("id", id)])
    }

    #[test]
    fn test_find_has_many_sql() {
        let reg = registry();
        let rel = relation(&reg, "pets");
        let q = rel.find(vec![person(&reg, 1), person(&reg, 2), person(&reg, 1)]).build().unwrap();
        let (sql, params) = q.build();
        assert_eq!(sql, r#"SELECT * FROM "animals" WHERE "animals"."ownerId" IN ($1, $2)"#);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_find_many_to_many_selects_extras_and_owner_keys() {
        let reg = registry();
        let rel = relation(&reg, "movies");
        let q = rel.find(person(&reg, 1)).build().unwrap();
        assert_eq!(
            q.to_sql(),
            concat!(
                r#"SELECT "movies"."id", "movies"."title", "persons_movies"."role" AS "role", "persons_movies"."personId" AS "_owner_key_0""#,
                r#" FROM "movies" INNER JOIN "persons_movies" ON "persons_movies"."movieId" = "movies"."id""#,
                r#" WHERE "persons_movies"."personId" IN ($1)"#
            )
        );
    }

    #[test]
    fn test_insert_has_many_sets_foreign_key() {
        let reg = registry();
        let rel = relation(&reg, "pets");
        let animal = ModelInstance::from_props(reg.model("Animal").unwrap(), [("name", "Fluffy")]);
        let statements = rel.insert(person(&reg, 7), vec![animal]).build().unwrap();
        assert_eq!(statements.len(), 1);
        let (sql, params) = statements[0].build(Dialect::Postgres);
        assert_eq!(
            sql,
            r#"INSERT INTO "animals" ("ownerId", "name") VALUES ($1, $2) RETURNING "id""#
        );
        assert_eq!(params, vec![Value::BigInt(7), Value::from("Fluffy")]);
    }

    #[test]
    fn test_insert_many_to_many_writes_join_row() {
        let reg = registry();
        let rel = relation(&reg, "movies");
        let movie = ModelInstance::from_props(
            reg.model("Movie").unwrap(),
            [("id", Value::BigInt(3)), ("title", Value::from("Heat")), ("role", Value::from("lead"))],
        );
        let statements = rel.insert(person(&reg, 1), vec![movie]).build().unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1].table_name(), "persons_movies");
        let (_, params) = statements[1].build(Dialect::Sqlite);
        assert_eq!(params.len(), 3);
        assert!(params.contains(&Value::from("lead")));
    }

    #[test]
    fn test_insert_through_one_is_unsupported() {
        let reg = registry();
        let rel = relation(&reg, "agent");
        let err = rel.insert(person(&reg, 1), vec![person(&reg, 2)]).build().unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert!(err.to_string().starts_with("Not implemented"));
    }

    #[test]
    fn test_insert_needs_single_owner() {
        let reg = registry();
        let rel = relation(&reg, "pets");
        let err = rel
            .insert(vec![person(&reg, 1), person(&reg, 2)], Vec::new())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("exactly one owner"));
    }

    #[test]
    fn test_before_insert_hook_runs() {
        let reg = ModelRegistry::new()
            .with_model(
                ModelDef::new("Person", "persons").relation(
                    "pets",
                    RelationMapping::has_many("Animal")
                        .join("persons.id", "animals.ownerId")
                        .before_insert(|m, _| {
                            m.set("name", "hooked");
                            Ok(())
                        }),
                ),
            )
            .with_model(ModelDef::new("Animal", "animals").columns(["ownerId", "name"]));
        let rel = relation(&reg, "pets");
        let animal = ModelInstance::new(reg.model("Animal").unwrap());
        let statements = rel.insert(person(&reg, 1), vec![animal]).build().unwrap();
        let (_, params) = statements[0].build(Dialect::Postgres);
        assert!(params.contains(&Value::from("hooked")));
    }

    #[test]
    fn test_patch_targets_related_ids() {
        let reg = registry();
        let rel = relation(&reg, "pets");
        let mut patch = Patch::new();
        patch.insert("name".to_string(), Value::from("Rex"));
        let (sql, _) = rel.patch(person(&reg, 1), patch).build().unwrap().build(Dialect::Postgres);
        assert_eq!(
            sql,
            r#"UPDATE "animals" SET "name" = $1 WHERE "animals"."id" IN (SELECT "animals"."id" FROM "animals" WHERE "animals"."ownerId" IN ($2))"#
        );
    }

    #[test]
    fn test_delete_unsaved_owner_matches_nothing() {
        let reg = registry();
        let rel = relation(&reg, "pets");
        let unsaved = ModelInstance::new(reg.model("Person").unwrap());
        let (sql, _) = rel.delete(unsaved).build().unwrap().build(Dialect::Postgres);
        assert!(sql.ends_with("WHERE 1 = 0)"));
    }

    #[test]
    fn test_relate_shapes() {
        let reg = registry();
        let (sql, _) = relation(&reg, "pets")
            .relate(person(&reg, 1), Value::Int(5))
            .build()
            .unwrap()[0]
            .build(Dialect::Postgres);
        assert_eq!(
            sql,
            r#"UPDATE "animals" SET "ownerId" = $1 WHERE "animals"."id" IN ($2)"#
        );

        let (sql, _) = relation(&reg, "favorite")
            .relate(person(&reg, 1), Value::Int(5))
            .build()
            .unwrap()[0]
            .build(Dialect::Postgres);
        assert_eq!(
            sql,
            r#"UPDATE "persons" SET "favoriteId" = $1 WHERE "persons"."id" IN ($2)"#
        );

        let statements = relation(&reg, "movies")
            .relate(person(&reg, 1), Value::Array(vec![Value::Int(3), Value::Int(4)]))
            .build()
            .unwrap();
        let (sql, params) = statements[0].build(Dialect::Postgres);
        assert!(sql.starts_with(r#"INSERT INTO "persons_movies""#));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_relate_unsaved_owner_writes_nothing() {
        let reg = registry();
        let unsaved = || ModelInstance::new(reg.model("Person").unwrap());
        for name in ["pets", "favorite", "movies", "agent"] {
            let statements = relation(&reg, name)
                .relate(unsaved(), Value::Int(5))
                .build()
                .unwrap();
            assert!(statements.is_empty(), "{name} wrote {} statements", statements.len());
        }
    }

    #[test]
    fn test_relate_run_unsaved_owner_executes_nothing() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let reg = registry();
        let conn = MockConnection::new(Vec::new());

        rt.block_on(async {
            let unsaved = ModelInstance::new(reg.model("Person").unwrap());
            let pets = relation(&reg, "pets");
            let outcome = pets.relate(unsaved, Value::Int(5)).run(&cx, &conn).await;
            let Outcome::Ok(n) = outcome else {
                panic!("expected relate to succeed");
            };
            assert_eq!(n, 0);
        });
        assert!(conn.executed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_insert_unsaved_owner_is_rejected() {
        let reg = registry();
        let unsaved = ModelInstance::new(reg.model("Person").unwrap());
        let animal = ModelInstance::from_props(reg.model("Animal").unwrap(), [("name", "Fluffy")]);
        let err = relation(&reg, "pets")
            .insert(unsaved.clone(), vec![animal])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("needs a saved owner"));

        let movie = ModelInstance::from_props(reg.model("Movie").unwrap(), [("title", "Heat")]);
        assert!(relation(&reg, "movies").insert(unsaved, vec![movie]).build().is_err());
    }

    #[test]
    fn test_unrelate_shapes() {
        let reg = registry();
        let (sql, _) = relation(&reg, "pets")
            .unrelate(person(&reg, 1))
            .build()
            .unwrap()
            .build(Dialect::Postgres);
        assert_eq!(
            sql,
            r#"UPDATE "animals" SET "ownerId" = $1 WHERE "animals"."ownerId" IN ($2)"#
        );

        let (sql, _) = relation(&reg, "movies")
            .unrelate(person(&reg, 1))
            .build()
            .unwrap()
            .build(Dialect::Postgres);
        assert_eq!(
            sql,
            r#"DELETE FROM "persons_movies" WHERE "persons_movies"."personId" IN ($1)"#
        );
    }

    struct MockConnection {
        rows: Vec<Row>,
        next_id: Mutex<i64>,
        executed: Mutex<Vec<String>>,
    }

    impl MockConnection {
        fn new(rows: Vec<Row>) -> Self {
            Self {
                rows,
                next_id: Mutex::new(100),
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    impl Connection for MockConnection {
        fn query(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            self.executed.lock().unwrap().push(sql.to_string());
            let rows = self.rows.clone();
            async move { Outcome::Ok(rows) }
        }

        fn execute(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            self.executed.lock().unwrap().push(sql.to_string());
            async { Outcome::Ok(1) }
        }

        fn insert(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<i64, Error>> + Send {
            self.executed.lock().unwrap().push(sql.to_string());
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let id = *next;
            async move { Outcome::Ok(id) }
        }
    }

    #[test]
    fn test_run_and_attach_groups_by_owner() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let reg = registry();
        let rel = relation(&reg, "pets");
        let conn = MockConnection::new(vec![
            Row::from_pairs([("id", Value::Int(10)), ("ownerId", Value::Int(1))]),
            Row::from_pairs([("id", Value::Int(11)), ("ownerId", Value::Int(2))]),
            Row::from_pairs([("id", Value::Int(12)), ("ownerId", Value::Int(1))]),
        ]);

        rt.block_on(async {
            let owners = vec![person(&reg, 1), person(&reg, 2), person(&reg, 3)];
            let attached = rel.find(owners).run_and_attach(&cx, &conn).await;
            let Outcome::Ok(attached) = attached else {
                panic!("expected attached owners");
            };
            assert_eq!(attached[0].related_many("pets").len(), 2);
            assert_eq!(attached[1].related_many("pets").len(), 1);
            assert!(attached[2].related_many("pets").is_empty());
        });
    }

    #[test]
    fn test_run_many_to_many_insert_uses_generated_id() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let reg = registry();
        let rel = relation(&reg, "movies");
        let conn = MockConnection::new(Vec::new());

        rt.block_on(async {
            let movie = ModelInstance::from_props(reg.model("Movie").unwrap(), [("title", "Heat")]);
            let inserted = rel.insert(person(&reg, 1), vec![movie]).run(&cx, &conn).await;
            let Outcome::Ok(inserted) = inserted else {
                panic!("expected inserted models");
            };
            assert_eq!(inserted[0].get("id"), Some(&Value::BigInt(101)));
        });

        let executed = conn.executed.lock().unwrap();
        assert_eq!(executed.len(), 2);
        assert!(executed[1].starts_with(r#"INSERT INTO "persons_movies""#));
    }
}
