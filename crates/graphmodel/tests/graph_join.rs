//! End-to-end graph loading against a recording mock connection.

use std::sync::{Arc, Mutex};

use asupersync::runtime::RuntimeBuilder;
use graphmodel::prelude::*;
use graphmodel::{Dialect, QueryContext, RelationKind};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

struct MockConnection {
    rows: Vec<Row>,
    queries: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockConnection {
    fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            queries: Mutex::new(Vec::new()),
        }
    }

    fn last_sql(&self) -> String {
        self.queries
            .lock()
            .unwrap()
            .last()
            .map(|(sql, _)| sql.clone())
            .unwrap_or_default()
    }
}

impl Connection for MockConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.queries
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        let rows = self.rows.clone();
        async move { Outcome::Ok(rows) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        self.queries
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        async { Outcome::Ok(1) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        self.queries
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        async { Outcome::Ok(1) }
    }
}

fn registry() -> ModelRegistry {
    ModelRegistry::new()
        .with_model(
            ModelDef::new("Person", "persons")
                .id_columns(["personID"])
                .columns(["parentID", "name"])
                .relation(
                    "iChildren",
                    RelationMapping::has_many("Person").join("persons.personID", "persons.parentID"),
                )
                .relation(
                    "movies",
                    RelationMapping::many_to_many("Movie")
                        .join("persons.personID", "movies.id")
                        .through(ThroughMapping::new(
                            "persons_movies.personId",
                            "persons_movies.movieId",
                        )),
                ),
        )
        .with_model(ModelDef::new("Movie", "movies").columns(["title"]))
        .with_model(
            ModelDef::new("Shipment", "shipments")
                .id_columns(["region", "code"])
                .columns(["weight"])
                .relation(
                    "parcels",
                    RelationMapping::has_many("Parcel").join(
                        ["shipments.region", "shipments.code"],
                        ["parcels.shipmentRegion", "parcels.shipmentCode"],
                    ),
                ),
        )
        .with_model(ModelDef::new("Parcel", "parcels").columns(["shipmentRegion", "shipmentCode"]))
}

fn person_row(id: i64, name: &str, child: Option<(i64, &str)>) -> Row {
    Row::from_pairs([
        ("personID", Value::from(id)),
        ("parentID", Value::Null),
        ("name", Value::from(name)),
        ("iChildren:personID", child.map_or(Value::Null, |(c, _)| Value::from(c))),
        ("iChildren:parentID", child.map_or(Value::Null, |_| Value::from(id))),
        ("iChildren:name", child.map_or(Value::Null, |(_, n)| Value::from(n))),
    ])
}

#[test]
fn person_with_joined_children_is_folded() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let reg = registry();
    let conn = MockConnection::new(vec![
        person_row(3, "Parent", Some((4, "First"))),
        person_row(3, "Parent", Some((5, "Second"))),
    ]);

    rt.block_on(async {
        let people = unwrap_outcome(
            GraphQuery::new(&reg, reg.model("Person").unwrap())
                .with_graph_joined("iChildren")
                .unwrap()
                .run(&cx, &conn)
                .await,
        );

        assert_eq!(people.len(), 1);
        assert_eq!(people[0].get("personID"), Some(&Value::from(3_i64)));
        let ids: Vec<&Value> = people[0]
            .related_many("iChildren")
            .iter()
            .filter_map(|c| c.get("personID"))
            .collect();
        assert_eq!(ids, vec![&Value::from(4_i64), &Value::from(5_i64)]);
        assert_eq!(
            people[0].to_json()["iChildren"][1]["name"],
            serde_json::json!("Second")
        );
    });

    assert!(conn.last_sql().contains(
        r#"INNER JOIN "persons" AS "iChildren" ON "persons"."personID" = "iChildren"."parentID""#
    ));
}

#[test]
fn left_join_keeps_childless_people() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let reg = registry();
    let conn = MockConnection::new(vec![
        person_row(1, "Ann", Some((2, "Kid"))),
        person_row(7, "Bob", None),
    ]);

    rt.block_on(async {
        let people = unwrap_outcome(
            GraphQuery::new(&reg, reg.model("Person").unwrap())
                .with_graph_joined("iChildren")
                .unwrap()
                .join_type(JoinType::Left)
                .run(&cx, &conn)
                .await,
        );
        assert_eq!(people.len(), 2);
        assert_eq!(people[0].related_many("iChildren").len(), 1);
        assert!(people[1].related_many("iChildren").is_empty());
    });
    assert!(conn.last_sql().contains(r#"LEFT JOIN "persons" AS "iChildren""#));
}

#[test]
fn allow_list_rejects_path_before_sql() {
    let reg = registry();
    let query = GraphQuery::new(&reg, reg.model("Person").unwrap())
        .allow_graph("[a, b.c.[d, e]]")
        .unwrap()
        .with_graph_joined("a.b")
        .unwrap();

    let err = query.build().unwrap_err();
    assert_eq!(err.to_string(), "Eager expression not allowed: a.b");
    assert_eq!(err.graph_path(), Some("a.b"));
}

#[test]
fn composite_keys_pair_positionally() {
    let reg = registry();
    let sql = GraphQuery::new(&reg, reg.model("Shipment").unwrap())
        .with_graph_joined("parcels")
        .unwrap()
        .to_sql()
        .unwrap();
    assert!(sql.contains(concat!(
        r#"ON "shipments"."region" = "parcels"."shipmentRegion""#,
        r#" AND "shipments"."code" = "parcels"."shipmentCode""#
    )));
}

#[test]
fn many_to_many_joins_through_table_first() {
    let reg = registry();
    let sql = GraphQuery::new(&reg, reg.model("Person").unwrap())
        .with_graph_joined("movies")
        .unwrap()
        .dialect(Dialect::Sqlite)
        .to_sql()
        .unwrap();
    let through = sql
        .find(r#"INNER JOIN "persons_movies" AS "movies_join" ON "persons"."personID" = "movies_join"."personId""#)
        .expect("join table clause");
    let related = sql
        .find(r#"INNER JOIN "movies" ON "movies_join"."movieId" = "movies"."id""#)
        .expect("related clause");
    assert!(through < related);

    let movies = reg
        .relation(&reg.model("Person").unwrap(), "movies")
        .unwrap()
        .unwrap();
    assert_eq!(movies.kind(), RelationKind::ManyToMany);
}

#[test]
fn unsaved_owner_finds_nothing() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let reg = registry();
    let person = reg.model("Person").unwrap();
    let children = reg.relation(&person, "iChildren").unwrap().unwrap();
    let unsaved = ModelInstance::new(Arc::clone(&person));

    let query = children.find(unsaved.clone()).build().unwrap();
    assert!(query.to_sql().ends_with("WHERE 1 = 0"));

    let conn = MockConnection::new(Vec::new());
    rt.block_on(async {
        let found = unwrap_outcome(children.find(unsaved).run(&cx, &conn).await);
        assert!(found.is_empty());
    });
}

#[test]
fn after_find_hooks_share_the_query_context() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook_seen = Arc::clone(&seen);
    let reg = ModelRegistry::new().with_model(
        ModelDef::new("Person", "persons")
            .id_columns(["personID"])
            .columns(["parentID", "name"])
            .relation(
                "iChildren",
                RelationMapping::has_many("Person").join("persons.personID", "persons.parentID"),
            )
            .after_find(move |p: &mut ModelInstance, ctx: &QueryContext| {
                let count = ctx.get("loaded").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
                ctx.set("loaded", serde_json::json!(count));
                hook_seen
                    .lock()
                    .unwrap()
                    .push(p.get("personID").cloned().unwrap_or(Value::Null));
                Ok(())
            }),
    );
    let conn = MockConnection::new(vec![
        person_row(3, "Parent", Some((4, "First"))),
        person_row(3, "Parent", Some((5, "Second"))),
    ]);

    let base = Select::new("persons");
    let context = base.context().clone();
    rt.block_on(async {
        unwrap_outcome(
            GraphQuery::new(&reg, reg.model("Person").unwrap())
                .with_query(base)
                .with_graph_joined("iChildren")
                .unwrap()
                .run(&cx, &conn)
                .await,
        );
    });

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Value::from(4_i64), Value::from(5_i64), Value::from(3_i64)]
    );
    assert_eq!(context.get("loaded"), Some(serde_json::json!(3)));
}
