//! Relation graphs for GraphModel Rust.
//!
//! `graphmodel-graph` loads a model together with a tree of its relations in
//! a single joined SELECT:
//!
//! - **Expressions**: [`RelationExpression`] parses `"[children.pets, parent.^]"`
//!   style text (and its JSON object form) into a tree of relation names,
//!   modifiers and recursion markers.
//! - **Allow-lists**: [`AllowList`] rejects requests that reach outside the
//!   registered expressions.
//! - **Compilation**: [`GraphCompiler`] joins every node onto one query and
//!   prefixes node columns with `alias:`, producing a [`JoinPlan`].
//! - **Reconstruction**: [`reconstruct`] folds the flat rows back into nested
//!   [`ModelInstance`](graphmodel_relation::ModelInstance)s.
//!
//! [`GraphQuery`] ties the four together.

pub mod allow;
pub mod compiler;
pub mod expression;
pub mod query;
pub mod reconstruct;

pub use allow::AllowList;
pub use compiler::{
    DEFAULT_MAX_RECURSION_DEPTH, GraphCompiler, GraphConfig, GraphModifiers, JoinPlan,
    PlanColumn, PlanNode,
};
pub use expression::{Recursion, RelationExpression};
pub use query::GraphQuery;
pub use reconstruct::reconstruct;
