//! GraphModel Rust - relation graphs for SQL-backed models.
//!
//! GraphModel declares relations between model classes and loads whole
//! relation graphs with a single joined query:
//!
//! - Relation mappings for has-many, has-one, belongs-to-one, many-to-many
//!   and has-one-through relations, with composite and JSON-path keys
//! - Relation-scoped find, insert, update, patch, delete, relate and unrelate
//! - Graph expressions such as `[children.pets, parent.^]` with allow-lists
//!   and per-path modifiers
//! - Graph-joined eager loading that folds flat rows back into nested models
//!
//! # Quick Start
//!
//! ```ignore
//! use graphmodel::prelude::*;
//!
//! let registry = ModelRegistry::new()
//!     .with_model(
//!         ModelDef::new("Person", "persons")
//!             .columns(["parentId", "name"])
//!             .relation(
//!                 "children",
//!                 RelationMapping::has_many("Person").join("persons.id", "persons.parentId"),
//!             )
//!             .relation(
//!                 "pets",
//!                 RelationMapping::has_many("Animal").join("persons.id", "animals.ownerId"),
//!             ),
//!     )
//!     .with_model(ModelDef::new("Animal", "animals").columns(["ownerId", "name"]));
//!
//! async fn load(cx: &Cx, conn: &impl Connection, registry: &ModelRegistry) -> Result<()> {
//!     let people = GraphQuery::new(registry, registry.model("Person")?)
//!         .with_graph_joined("[children.pets, pets]")?
//!         .join_type(JoinType::Left)
//!         .run(cx, conn)
//!         .await;
//!     Ok(())
//! }
//! ```

pub use graphmodel_core::{
    // asupersync re-exports
    Budget,
    // Core types
    Connection,
    Cx,
    Error,
    GraphError,
    GraphErrorKind,
    Outcome,
    QueryContext,
    Reference,
    RegionId,
    Result,
    Row,
    TaskId,
    Value,
};

pub use graphmodel_query::{
    DeleteBuilder, Dialect, Expr, InsertBuilder, Join, JoinType, OrderBy, Patch, Select,
    UpdateBuilder,
};

pub use graphmodel_relation::{
    ExtraColumn, ModelClass, ModelDef, ModelInstance, ModelRef, ModelRegistry, Modifier, Related,
    Relation, RelationKind, RelationMapping, RelationOwner, RelationProperty, ThroughMapping,
};

pub use graphmodel_graph::{
    AllowList, GraphCompiler, GraphConfig, GraphModifiers, GraphQuery, JoinPlan, PlanNode,
    RelationExpression, reconstruct,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Connection, Cx, Error, Expr, GraphQuery, JoinType, ModelDef, ModelInstance, ModelRegistry,
        Modifier, Outcome, Related, RelationExpression, RelationMapping, Result, Row, Select,
        ThroughMapping, Value,
    };
}
