//! Resolved relations.
//!
//! A [`Relation`] is built from a declarative [`RelationMapping`] in two
//! phases. [`Relation::create`] dispatches on the relation type tag, then
//! [`PendingRelation::set_mapping`] validates the mapping and resolves both
//! join sides. Errors from either phase name the model and relation they
//! belong to.

mod join_table;

pub use join_table::{JoinTable, JoinTableExtra};

use std::fmt;

use graphmodel_core::{ConfigError, Error, ReferenceError, Result};
use graphmodel_query::{Expr, Join, JoinType, Select};

use crate::mapping::{BeforeInsertFn, ColumnRefs, RelationKind, RelationMapping};
use crate::model::{ModelRef, same_model};
use crate::modifier::{ResolvedModifier, resolve_modifier};
use crate::property::RelationProperty;
use crate::registry::ModelRegistry;

/// Kind-specific state of a relation.
#[derive(Debug, Clone)]
pub enum RelationVariant {
    HasMany,
    HasOne,
    BelongsToOne,
    ManyToMany(JoinTable),
    HasOneThrough(JoinTable),
}

impl RelationVariant {
    pub fn kind(&self) -> RelationKind {
        match self {
            RelationVariant::HasMany => RelationKind::HasMany,
            RelationVariant::HasOne => RelationKind::HasOne,
            RelationVariant::BelongsToOne => RelationKind::BelongsToOne,
            RelationVariant::ManyToMany(_) => RelationKind::ManyToMany,
            RelationVariant::HasOneThrough(_) => RelationKind::HasOneThrough,
        }
    }
}

/// A declared edge between an owner model class and a related model class.
#[derive(Clone)]
pub struct Relation {
    name: String,
    owner: ModelRef,
    related: ModelRef,
    owner_prop: RelationProperty,
    related_prop: RelationProperty,
    modify: Option<ResolvedModifier>,
    before_insert: Option<BeforeInsertFn>,
    variant: RelationVariant,
}

/// A relation whose type is known but whose mapping is not yet resolved.
#[derive(Debug)]
pub struct PendingRelation {
    name: String,
    owner: ModelRef,
    kind: RelationKind,
}

/// Optional parameters of [`Relation::join`].
#[derive(Debug, Default)]
pub struct JoinOptions {
    pub join_type: JoinType,
    /// Alias of the related table; defaults to the query's alias for it
    pub related_alias: Option<String>,
    /// Derived sub-select to join instead of the default related query
    pub related_subquery: Option<Select>,
    /// Table name to join, when it differs from the related model's table
    pub related_table: Option<String>,
    /// Alias the owner table is referred to by
    pub owner_table: Option<String>,
}

impl JoinOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.related_alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn subquery(mut self, query: Select) -> Self {
        self.related_subquery = Some(query);
        self
    }

    #[must_use]
    pub fn related_table(mut self, table: impl Into<String>) -> Self {
        self.related_table = Some(table.into());
        self
    }

    #[must_use]
    pub fn owner_table(mut self, alias: impl Into<String>) -> Self {
        self.owner_table = Some(alias.into());
        self
    }
}

impl Relation {
    /// First construction phase: check the type tag.
    pub fn create(name: &str, mapping: &RelationMapping, owner: ModelRef) -> Result<PendingRelation> {
        let err = |message: String| Error::Config(ConfigError::new(owner.name(), message).relation(name));
        let tag = mapping
            .relation
            .as_deref()
            .ok_or_else(|| err("relation is not defined".to_string()))?;
        let kind = RelationKind::from_tag(tag)
            .ok_or_else(|| err(format!("relation \"{}\" is not a known relation type", tag)))?;
        Ok(PendingRelation {
            name: name.to_string(),
            owner,
            kind,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.variant.kind()
    }

    pub fn variant(&self) -> &RelationVariant {
        &self.variant
    }

    pub fn owner_model(&self) -> &ModelRef {
        &self.owner
    }

    pub fn related_model(&self) -> &ModelRef {
        &self.related
    }

    pub fn owner_prop(&self) -> &RelationProperty {
        &self.owner_prop
    }

    pub fn related_prop(&self) -> &RelationProperty {
        &self.related_prop
    }

    pub fn modify(&self) -> Option<&ResolvedModifier> {
        self.modify.as_ref()
    }

    pub fn before_insert(&self) -> Option<&BeforeInsertFn> {
        self.before_insert.as_ref()
    }

    /// Join table of through relations.
    pub fn join_table(&self) -> Option<&JoinTable> {
        match &self.variant {
            RelationVariant::ManyToMany(jt) | RelationVariant::HasOneThrough(jt) => Some(jt),
            _ => None,
        }
    }

    /// Does a loaded value hold at most one related instance?
    pub fn is_one_to_one(&self) -> bool {
        self.kind().is_one_to_one()
    }

    /// Alias of the join table when the related table is aliased `alias`.
    pub fn join_table_alias(alias: &str) -> String {
        format!("{}_join", alias)
    }

    /// A child query of `parent` over the related table with the relation's
    /// modifier applied.
    pub fn related_subquery(&self, parent: &Select) -> Result<Select> {
        let mut query = Select::new(self.related.table_name()).child_query_of(parent);
        if let Some(modify) = &self.modify {
            modify.apply(&mut query)?;
        }
        Ok(query)
    }

    /// Add the joins that reach the related table to `builder`.
    ///
    /// Owner and related references pair by index, so composite keys join
    /// positionally. Through relations join the join table first.
    pub fn join(&self, builder: &mut Select, options: JoinOptions) -> Result<()> {
        let JoinOptions {
            join_type,
            related_alias,
            related_subquery,
            related_table,
            owner_table,
        } = options;

        let owner_table =
            owner_table.unwrap_or_else(|| builder.table_ref_for(self.owner.table_name()));
        let related_alias = related_alias.unwrap_or_else(|| {
            let alias = builder.table_ref_for(self.related.table_name());
            if alias == owner_table { self.name.clone() } else { alias }
        });
        let related_query = match related_subquery {
            Some(query) => query,
            None => self.related_subquery(builder)?,
        };
        let related_table =
            related_table.unwrap_or_else(|| related_query.table_name().to_string());

        let owner_exprs = self.owner_prop.exprs(&owner_table);
        let related_exprs = self.related_prop.exprs(&related_alias);

        match self.join_table() {
            None => {
                let on = pair_up(owner_exprs, related_exprs)?;
                builder.add_join(derived_join(join_type, related_query, &related_table, &related_alias, on));
            }
            Some(jt) => {
                let join_alias = Self::join_table_alias(&related_alias);
                let join_query = jt.subquery(builder)?;
                let on = pair_up(owner_exprs, jt.owner_prop().exprs(&join_alias))?;
                let join_table = join_query.table_name().to_string();
                builder.add_join(derived_join(join_type, join_query, &join_table, &join_alias, on));

                let on = pair_up(jt.related_prop().exprs(&join_alias), related_exprs)?;
                builder.add_join(derived_join(join_type, related_query, &related_table, &related_alias, on));
            }
        }

        tracing::trace!(
            relation = %self.name,
            alias = %related_alias,
            join_type = %join_type,
            "Joined relation"
        );
        Ok(())
    }
}

/// Join a sub-select, collapsing unfiltered `SELECT *` to a table reference.
pub(crate) fn derived_join(join_type: JoinType, query: Select, table: &str, alias: &str, on: Expr) -> Join {
    if query.is_select_all() {
        let join = Join::table(join_type, table, on);
        if alias == table { join } else { join.alias(alias) }
    } else {
        Join::subquery(join_type, query, on).alias(alias)
    }
}

fn pair_up(left: Vec<Expr>, right: Vec<Expr>) -> Result<Expr> {
    Expr::all_eq(left.into_iter().zip(right))
        .ok_or_else(|| Error::Custom("relation join without references".to_string()))
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("owner", &self.owner.name())
            .field("related", &self.related.name())
            .field("owner_columns", &self.owner_prop.columns())
            .field("related_columns", &self.related_prop.columns())
            .field("join_table", &self.join_table())
            .finish_non_exhaustive()
    }
}

impl PendingRelation {
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Second construction phase: validate the mapping and resolve the join.
    pub fn set_mapping(self, mapping: &RelationMapping, registry: &ModelRegistry) -> Result<Relation> {
        let PendingRelation { name, owner, kind } = self;
        let err = |message: String| Error::Config(ConfigError::new(owner.name(), message).relation(&name));

        let through = mapping.join.as_ref().and_then(|j| j.through.as_ref());
        if through.is_some() && !kind.is_through() {
            return Err(err(format!("{} does not support join.through", kind)));
        }

        if owner.is_synthetic() {
            return Err(err("owner must be a declared model class".to_string()));
        }

        let model_class = mapping
            .model_class
            .as_deref()
            .ok_or_else(|| err("modelClass is not defined".to_string()))?;
        let related = registry
            .find_model(model_class)
            .ok_or_else(|| err(format!("modelClass \"{}\" is not a registered model class", model_class)))?;

        let join = mapping
            .join
            .as_ref()
            .ok_or_else(|| err("join must be an object that maps the columns of the related models together".to_string()))?;
        let from = join
            .from
            .as_ref()
            .filter(|refs| !refs.is_empty())
            .ok_or_else(|| err("join.from must be defined".to_string()))?;
        let to = join
            .to
            .as_ref()
            .filter(|refs| !refs.is_empty())
            .ok_or_else(|| err("join.to must be defined".to_string()))?;

        let resolver = |table: &str, _: &str| {
            if table == owner.table_name() {
                Some(owner.clone())
            } else if table == related.table_name() {
                Some(related.clone())
            } else {
                registry.model_for_table(table)
            }
        };
        let from_prop = parse_side("join.from", from, resolver, &owner, &name)?;
        let to_prop = parse_side("join.to", to, resolver, &owner, &name)?;

        let swapped = if same_model(from_prop.model().as_ref(), owner.as_ref()) {
            false
        } else if same_model(to_prop.model().as_ref(), owner.as_ref()) {
            true
        } else {
            return Err(err(format!(
                "join: either join.from or join.to must point to the owner model class {} and the other one to the related model class {}",
                owner.name(),
                related.name()
            )));
        };
        let (owner_prop, related_prop) = if swapped {
            (to_prop, from_prop)
        } else {
            (from_prop, to_prop)
        };

        if !same_model(related_prop.model().as_ref(), related.as_ref()) {
            let side = if swapped { "join.from" } else { "join.to" };
            return Err(err(format!(
                "{} must point to the related model class {}, got table {}",
                side,
                related.name(),
                related_prop.model().table_name()
            )));
        }

        if owner_prop.size() != related_prop.size() {
            return Err(err(
                "join.from and join.to must have the same number of references".to_string(),
            ));
        }

        if owner_prop.properties().iter().any(|p| *p == name) {
            return Err(err(format!(
                "relation name \"{}\" is also a property of the owner join column, use a different name",
                name
            )));
        }

        let variant = match kind {
            RelationKind::HasMany => RelationVariant::HasMany,
            RelationKind::HasOne => RelationVariant::HasOne,
            RelationKind::BelongsToOne => RelationVariant::BelongsToOne,
            RelationKind::ManyToMany | RelationKind::HasOneThrough => {
                let through = through.ok_or_else(|| err("join.through must be defined".to_string()))?;
                let jt = JoinTable::resolve(through, swapped, &owner, &related, &name, registry)?;
                if jt.owner_prop().size() != owner_prop.size()
                    || jt.related_prop().size() != related_prop.size()
                {
                    return Err(err(
                        "join.through.from and join.through.to must have as many references as join.from and join.to".to_string(),
                    ));
                }
                if kind == RelationKind::ManyToMany {
                    RelationVariant::ManyToMany(jt)
                } else {
                    RelationVariant::HasOneThrough(jt)
                }
            }
        };

        let modify = match mapping.modify.as_ref().or(mapping.filter.as_ref()) {
            Some(modifier) => Some(resolve_modifier(modifier, related.as_ref(), None)?),
            None => None,
        };

        Ok(Relation {
            name,
            owner,
            related,
            owner_prop,
            related_prop,
            modify,
            before_insert: mapping.before_insert.clone(),
            variant,
        })
    }
}

fn parse_side<F>(
    side: &str,
    refs: &ColumnRefs,
    resolver: F,
    owner: &ModelRef,
    relation: &str,
) -> Result<RelationProperty>
where
    F: Fn(&str, &str) -> Option<ModelRef>,
{
    RelationProperty::new(refs.as_slice(), resolver).map_err(|e: ReferenceError| {
        Error::Config(
            ConfigError::new(owner.name(), format!("{}: {}", side, e.message))
                .relation(relation)
                .source(e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{ExtraColumn, ThroughMapping};
    use crate::model::ModelDef;
    use crate::modifier::Modifier;

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with_model(ModelDef::new("Person", "persons").columns(["parentId", "name"]))
            .with_model(
                ModelDef::new("Animal", "animals")
                    .columns(["ownerId", "species"])
                    .modifier("dogs", Modifier::predicate([("species", "dog")])),
            )
            .with_model(ModelDef::new("Movie", "movies").columns(["title"]))
            .with_model(
                ModelDef::new("T", "t")
                    .id_columns(["a", "b"])
                    .columns(["a", "b"]),
            )
            .with_model(ModelDef::new("U", "u").columns(["x", "y"]))
    }

    fn resolve(registry: &ModelRegistry, owner: &str, name: &str, mapping: RelationMapping) -> Result<Relation> {
        let owner = registry.model(owner)?;
        Relation::create(name, &mapping, owner)?.set_mapping(&mapping, registry)
    }

    #[test]
    fn test_missing_tag_and_unknown_tag() {
        let reg = registry();
        let owner = reg.model("Person").unwrap();
        let mapping = RelationMapping {
            model_class: Some("Animal".to_string()),
            ..RelationMapping::default()
        };
        let err = Relation::create("pets", &mapping, owner.clone()).unwrap_err();
        assert_eq!(err.to_string(), "Person.relationMappings.pets: relation is not defined");

        let mapping = RelationMapping {
            relation: Some("HasSomeRelation".to_string()),
            ..mapping
        };
        assert!(Relation::create("pets", &mapping, owner).unwrap_err().is_config());
    }

    #[test]
    fn test_has_many_resolves_sides() {
        let reg = registry();
        let rel = resolve(
            &reg,
            "Person",
            "pets",
            RelationMapping::has_many("Animal").join("persons.id", "animals.ownerId"),
        )
        .unwrap();
        assert_eq!(rel.kind(), RelationKind::HasMany);
        assert_eq!(rel.owner_prop().columns(), &["id".to_string()]);
        assert_eq!(rel.related_prop().columns(), &["ownerId".to_string()]);
        assert!(!rel.is_one_to_one());
    }

    #[test]
    fn test_swapped_sides_are_normalized() {
        let reg = registry();
        let rel = resolve(
            &reg,
            "Animal",
            "owner",
            RelationMapping::belongs_to_one("Person").join("persons.id", "animals.ownerId"),
        )
        .unwrap();
        assert_eq!(rel.owner_prop().columns(), &["ownerId".to_string()]);
        assert_eq!(rel.related_prop().columns(), &["id".to_string()]);
    }

    #[test]
    fn test_neither_side_is_owner() {
        let reg = registry();
        let err = resolve(
            &reg,
            "Person",
            "pets",
            RelationMapping::has_many("Animal").join("movies.id", "animals.ownerId"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must point to the owner model class Person"));
    }

    #[test]
    fn test_bad_reference_has_format_hint() {
        let reg = registry();
        let err = resolve(
            &reg,
            "Person",
            "pets",
            RelationMapping::has_many("Animal").join("id", "animals.ownerId"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must have format TableName.columnName"));
    }

    #[test]
    fn test_through_forbidden_on_plain_relation() {
        let reg = registry();
        let err = resolve(
            &reg,
            "Person",
            "pets",
            RelationMapping::has_many("Animal")
                .join("persons.id", "animals.ownerId")
                .through(ThroughMapping::new("x.a", "x.b")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not support join.through"));
    }

    #[test]
    fn test_unregistered_model_class() {
        let reg = registry();
        let err = resolve(
            &reg,
            "Person",
            "toys",
            RelationMapping::has_many("Toy").join("persons.id", "toys.ownerId"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("\"Toy\" is not a registered model class"));
    }

    #[test]
    fn test_name_collision_with_owner_property() {
        let reg = registry();
        let err = resolve(
            &reg,
            "Animal",
            "ownerId",
            RelationMapping::belongs_to_one("Person").join("animals.ownerId", "persons.id"),
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_size_mismatch() {
        let reg = registry();
        let err = resolve(
            &reg,
            "T",
            "us",
            RelationMapping::has_many("U").join(["t.a", "t.b"], "u.x"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("same number of references"));
    }

    #[test]
    fn test_many_to_many_synthesizes_join_table() {
        let reg = registry();
        let rel = resolve(
            &reg,
            "Person",
            "movies",
            RelationMapping::many_to_many("Movie")
                .join("persons.id", "movies.id")
                .through(
                    ThroughMapping::new("persons_movies.personId", "persons_movies.movieId")
                        .extra(ExtraColumn::aliased("role", "character")),
                ),
        )
        .unwrap();
        let jt = rel.join_table().unwrap();
        assert!(jt.model().is_synthetic());
        assert_eq!(jt.table_name(), "persons_movies");
        assert_eq!(jt.model().id_columns(), &["id".to_string()]);
        assert_eq!(jt.owner_prop().columns(), &["personId".to_string()]);
        assert_eq!(jt.related_prop().columns(), &["movieId".to_string()]);
        assert_eq!(jt.extras()[0].alias_col, "role");
        assert_eq!(jt.extras()[0].join_table_col, "character");
    }

    #[test]
    fn test_through_must_share_one_table() {
        let reg = registry();
        let err = resolve(
            &reg,
            "Person",
            "movies",
            RelationMapping::many_to_many("Movie")
                .join("persons.id", "movies.id")
                .through(ThroughMapping::new("a.personId", "b.movieId")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("same join table"));
    }

    #[test]
    fn test_join_plain_table_when_unmodified() {
        let reg = registry();
        let rel = resolve(
            &reg,
            "Person",
            "pets",
            RelationMapping::has_many("Animal").join("persons.id", "animals.ownerId"),
        )
        .unwrap();
        let mut q = Select::new("persons");
        rel.join(&mut q, JoinOptions::new().alias("pets").join_type(JoinType::Left))
            .unwrap();
        assert_eq!(
            q.to_sql(),
            r#"SELECT * FROM "persons" LEFT JOIN "animals" AS "pets" ON "persons"."id" = "pets"."ownerId""#
        );
    }

    #[test]
    fn test_join_subquery_when_modified() {
        let reg = registry();
        let rel = resolve(
            &reg,
            "Person",
            "dogs",
            RelationMapping::has_many("Animal")
                .join("persons.id", "animals.ownerId")
                .modify(Modifier::named("dogs")),
        )
        .unwrap();
        let mut q = Select::new("persons");
        rel.join(&mut q, JoinOptions::new().alias("dogs")).unwrap();
        let (sql, params) = q.build();
        assert_eq!(
            sql,
            r#"SELECT * FROM "persons" INNER JOIN (SELECT * FROM "animals" WHERE "animals"."species" = $1) AS "dogs" ON "persons"."id" = "dogs"."ownerId""#
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_composite_join_pairs_positionally() {
        let reg = registry();
        let rel = resolve(
            &reg,
            "T",
            "us",
            RelationMapping::has_many("U").join(["t.a", "t.b"], ["u.x", "u.y"]),
        )
        .unwrap();
        let mut q = Select::new("t");
        rel.join(&mut q, JoinOptions::new().alias("us")).unwrap();
        assert!(q.to_sql().ends_with(
            r#"ON "t"."a" = "us"."x" AND "t"."b" = "us"."y""#
        ));
    }

    #[test]
    fn test_many_to_many_emits_two_joins() {
        let reg = registry();
        let rel = resolve(
            &reg,
            "Person",
            "movies",
            RelationMapping::many_to_many("Movie")
                .join("persons.id", "movies.id")
                .through(ThroughMapping::new("persons_movies.personId", "persons_movies.movieId")),
        )
        .unwrap();
        let mut q = Select::new("persons");
        rel.join(&mut q, JoinOptions::new().alias("movies")).unwrap();
        assert_eq!(q.joins().len(), 2);
        assert_eq!(
            q.to_sql(),
            concat!(
                r#"SELECT * FROM "persons""#,
                r#" INNER JOIN "persons_movies" AS "movies_join" ON "persons"."id" = "movies_join"."personId""#,
                r#" INNER JOIN "movies" ON "movies_join"."movieId" = "movies"."id""#
            )
        );
    }

    #[test]
    fn test_self_relation_default_alias_uses_name() {
        let reg = registry();
        let rel = resolve(
            &reg,
            "Person",
            "children",
            RelationMapping::has_many("Person").join("persons.id", "persons.parentId"),
        )
        .unwrap();
        let mut q = Select::new("persons");
        rel.join(&mut q, JoinOptions::new()).unwrap();
        assert!(q.to_sql().contains(r#""persons" AS "children" ON "persons"."id" = "children"."parentId""#));
    }
}
