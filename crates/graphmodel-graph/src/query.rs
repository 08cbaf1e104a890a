//! Graph-joined queries.
//!
//! [`GraphQuery`] collects a relation expression, allow-lists and graph
//! modifiers for a root model, then compiles them into one joined SELECT and
//! folds its rows back into model instances.
//!
//! ```ignore
//! let people = GraphQuery::new(&registry, person)
//!     .with_graph_joined("[children.pets, parent]")?
//!     .modify_graph("children", "adults")?
//!     .join_type(JoinType::Left)
//!     .run(&cx, &conn)
//!     .await;
//! ```

use std::collections::BTreeMap;

use graphmodel_core::{Connection, Cx, Error, Outcome, QueryContext, Result};
use graphmodel_query::{Dialect, JoinType, Select};
use graphmodel_relation::{ModelInstance, ModelRef, ModelRegistry, Modifier};

use crate::allow::AllowList;
use crate::compiler::{GraphCompiler, GraphConfig, GraphModifiers, JoinPlan};
use crate::expression::RelationExpression;
use crate::reconstruct::reconstruct;

/// A root-model query with a joined relation graph.
#[derive(Debug)]
pub struct GraphQuery<'r> {
    registry: &'r ModelRegistry,
    model: ModelRef,
    query: Select,
    expression: Option<RelationExpression>,
    allow: AllowList,
    graph_modifiers: GraphModifiers,
    named: BTreeMap<String, Modifier>,
    config: GraphConfig,
}

impl<'r> GraphQuery<'r> {
    pub fn new(registry: &'r ModelRegistry, model: ModelRef) -> Self {
        let query = Select::new(model.table_name());
        Self {
            registry,
            model,
            query,
            expression: None,
            allow: AllowList::new(),
            graph_modifiers: GraphModifiers::new(),
            named: BTreeMap::new(),
            config: GraphConfig::default(),
        }
    }

    /// Start from an existing query over the model's table. Its selects,
    /// filters, ordering and context are kept.
    #[must_use]
    pub fn with_query(mut self, query: Select) -> Self {
        self.query = query;
        self
    }

    /// Join the relations of `expression`. Repeated calls merge.
    pub fn with_graph_joined(self, expression: &str) -> Result<Self> {
        let parsed = RelationExpression::parse(expression)?;
        Ok(self.with_graph_expression(parsed))
    }

    #[must_use]
    pub fn with_graph_expression(mut self, expression: RelationExpression) -> Self {
        match &mut self.expression {
            Some(existing) => existing.merge(expression),
            None => self.expression = Some(expression),
        }
        self
    }

    /// Restrict which expressions may be joined. Registrations are unioned.
    pub fn allow_graph(self, expression: &str) -> Result<Self> {
        let parsed = RelationExpression::parse(expression)?;
        Ok(self.allow_graph_expression(parsed))
    }

    #[must_use]
    pub fn allow_graph_expression(mut self, expression: RelationExpression) -> Self {
        self.allow.add(expression);
        self
    }

    /// Modify the sub-query of every relation `path` names.
    ///
    /// `path` is itself an expression, so `"[children, pets]"` targets both
    /// relations and `"children.pets"` targets the nested one.
    pub fn modify_graph(mut self, path: &str, modifier: impl Into<Modifier>) -> Result<Self> {
        let parsed = RelationExpression::parse(path)?;
        self.graph_modifiers.add(&parsed, modifier.into());
        Ok(self)
    }

    /// Named modifiers usable from `(name)` in expressions. They take
    /// precedence over the related model's own modifiers.
    #[must_use]
    pub fn modifiers<I, K>(mut self, modifiers: I) -> Self
    where
        I: IntoIterator<Item = (K, Modifier)>,
        K: Into<String>,
    {
        self.named
            .extend(modifiers.into_iter().map(|(k, m)| (k.into(), m)));
        self
    }

    #[must_use]
    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.config = self.config.join_type(join_type);
        self
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.config = self.config.dialect(dialect);
        self
    }

    #[must_use]
    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn expression(&self) -> Option<&RelationExpression> {
        self.expression.as_ref()
    }

    pub fn context(&self) -> &QueryContext {
        self.query.context()
    }

    /// Check the expression against the allow-lists and compile it.
    pub fn build(&self) -> Result<JoinPlan> {
        let expression = self.expression.clone().unwrap_or_default();
        self.allow
            .check(&expression, self.config.max_recursion_depth)?;

        GraphCompiler::new(self.registry)
            .config(self.config)
            .graph_modifiers(&self.graph_modifiers)
            .named_modifiers(&self.named)
            .compile(self.shared_query(), &self.model, &expression)
    }

    /// A copy of the base query writing to the same context, so after-find
    /// hooks run during `run` are visible through [`context`](Self::context).
    fn shared_query(&self) -> Select {
        self.query
            .clone()
            .with_context(self.query.context().clone())
    }

    pub fn to_sql(&self) -> Result<String> {
        Ok(self.build()?.query().to_sql())
    }

    /// Run the joined query and rebuild the result graph.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(model = self.model.name()))]
    pub async fn run<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<Vec<ModelInstance>, Error> {
        let plan = match self.build() {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        let rows = match plan.query().rows(cx, conn).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        match reconstruct(&plan, &rows, plan.query().context()) {
            Ok(instances) => Outcome::Ok(instances),
            Err(e) => Outcome::Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use graphmodel_core::{Row, Value};
    use graphmodel_relation::{ModelDef, RelationMapping};
    use std::sync::Mutex;

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with_model(
                ModelDef::new("Person", "persons")
                    .columns(["parentId", "name", "age"])
                    .relation(
                        "children",
                        RelationMapping::has_many("Person").join("persons.id", "persons.parentId"),
                    )
                    .relation(
                        "pets",
                        RelationMapping::has_many("Animal").join("persons.id", "animals.ownerId"),
                    )
                    .modifier("adults", Modifier::function(|q: &mut Select| {
                        let table = q.table_ref().to_string();
                        q.add_filter(graphmodel_query::Expr::qualified(table, "age").ge(Value::from(18_i64)));
                        Ok(())
                    })),
            )
            .with_model(ModelDef::new("Animal", "animals").columns(["ownerId", "name"]))
    }

    struct RowsConnection {
        rows: Vec<Row>,
        queries: Mutex<Vec<String>>,
    }

    impl Connection for RowsConnection {
        fn query(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            self.queries.lock().unwrap().push(sql.to_string());
            let rows = self.rows.clone();
            async move { Outcome::Ok(rows) }
        }

        fn execute(
            &self,
            _cx: &Cx,
            _sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            async { Outcome::Ok(0) }
        }

        fn insert(
            &self,
            _cx: &Cx,
            _sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<i64, Error>> + Send {
            async { Outcome::Ok(0) }
        }
    }

    #[test]
    fn test_repeated_with_graph_joined_merges() {
        let reg = registry();
        let query = GraphQuery::new(&reg, reg.model("Person").unwrap())
            .with_graph_joined("children")
            .unwrap()
            .with_graph_joined("[children.pets, pets]")
            .unwrap();
        assert_eq!(query.expression().unwrap().to_string(), "[children.pets, pets]");
        let plan = query.build().unwrap();
        assert!(plan.node("children.pets").is_some());
        assert!(plan.node("pets").is_some());
    }

    #[test]
    fn test_allow_graph_rejects_before_compiling() {
        let reg = registry();
        let err = GraphQuery::new(&reg, reg.model("Person").unwrap())
            .allow_graph("children")
            .unwrap()
            .allow_graph("pets")
            .unwrap()
            .with_graph_joined("children.nope")
            .unwrap()
            .build()
            .unwrap_err();
        assert!(err.is_not_allowed());
        assert_eq!(err.graph_path(), Some("children.nope"));
    }

    #[test]
    fn test_modify_graph_and_named_modifiers() {
        let reg = registry();
        let sql = GraphQuery::new(&reg, reg.model("Person").unwrap())
            .with_graph_joined("children(grown)")
            .unwrap()
            .modifiers([("grown", Modifier::named("adults"))])
            .modify_graph("children", Modifier::predicate([("name", "Ann")]))
            .unwrap()
            .join_type(JoinType::Left)
            .to_sql()
            .unwrap();
        assert!(sql.contains(
            r#"LEFT JOIN (SELECT * FROM "persons" WHERE "persons"."age" >= $1 AND "persons"."name" = $2) AS "children" ON "persons"."id" = "children"."parentId""#
        ));
    }

    #[test]
    fn test_existing_select_is_kept() {
        let reg = registry();
        let base = Select::new("persons").select(["name"]).where_eq("name", "Ann");
        let sql = GraphQuery::new(&reg, reg.model("Person").unwrap())
            .with_query(base)
            .with_graph_joined("pets")
            .unwrap()
            .to_sql()
            .unwrap();
        assert!(sql.starts_with(r#"SELECT "persons"."name", "persons"."id", "pets"."id" AS "pets:id""#));
    }

    #[test]
    fn test_run_rebuilds_graph() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let reg = registry();
        let pet_row = |pet: i64, name: &str| {
            Row::from_pairs([
                ("id", Value::BigInt(1)),
                ("name", Value::from("Ann")),
                ("pets:id", Value::BigInt(pet)),
                ("pets:ownerId", Value::BigInt(1)),
                ("pets:name", Value::from(name)),
            ])
        };
        let conn = RowsConnection {
            rows: vec![pet_row(7, "Rex"), pet_row(8, "Tom")],
            queries: Mutex::new(Vec::new()),
        };

        rt.block_on(async {
            let query = GraphQuery::new(&reg, reg.model("Person").unwrap())
                .with_graph_joined("pets")
                .unwrap();
            let Outcome::Ok(people) = query.run(&cx, &conn).await else {
                panic!("expected graph results");
            };
            assert_eq!(people.len(), 1);
            assert_eq!(people[0].related_many("pets").len(), 2);
            assert_eq!(people[0].related_many("pets")[1].get("name"), Some(&Value::from("Tom")));
        });
        assert_eq!(conn.queries.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_run_reports_not_allowed_without_querying() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let reg = registry();
        let conn = RowsConnection {
            rows: Vec::new(),
            queries: Mutex::new(Vec::new()),
        };

        rt.block_on(async {
            let query = GraphQuery::new(&reg, reg.model("Person").unwrap())
                .allow_graph("pets")
                .unwrap()
                .with_graph_joined("children")
                .unwrap();
            let Outcome::Err(err) = query.run(&cx, &conn).await else {
                panic!("expected allow-list rejection");
            };
            assert!(err.is_not_allowed());
        });
        assert!(conn.queries.lock().unwrap().is_empty());
    }
}
