//! Graph join compiler.
//!
//! Walks a relation expression depth-first and joins every node onto one
//! query. A node's alias is its parent's alias, `:`, and its relation name
//! (`children`, `children:pets`, ...), and each of its columns is selected
//! as `"<alias>:<column>"`. The resulting [`JoinPlan`] keeps the node tree so
//! result rows can be folded back into nested model instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use graphmodel_core::{Error, GraphError, GraphErrorKind, Result};
use graphmodel_query::{Dialect, Expr, JoinType, Select};
use graphmodel_relation::{
    JoinOptions, ModelRef, ModelRegistry, Modifier, Relation, ResolvedModifier, resolve_modifier,
};

use crate::expression::{RelationExpression, join_path};

/// Unbounded `^` recursion and `*` unfold this many levels by default.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 8;

/// Graph compilation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphConfig {
    pub join_type: JoinType,
    /// Deepest allowed nesting; unlimited when `None`
    pub max_depth: Option<usize>,
    pub max_recursion_depth: usize,
    pub dialect: Dialect,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            join_type: JoinType::Inner,
            max_depth: None,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            dialect: Dialect::default(),
        }
    }
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    /// Use LEFT JOINs so owners without related rows are kept.
    #[must_use]
    pub fn left_join(self) -> Self {
        self.join_type(JoinType::Left)
    }

    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }
}

/// Modifiers registered for graph paths, in registration order.
#[derive(Debug, Clone, Default)]
pub struct GraphModifiers {
    entries: Vec<(String, Modifier)>,
}

impl GraphModifiers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `modifier` for every leaf path of `expression`.
    pub fn add(&mut self, expression: &RelationExpression, modifier: Modifier) {
        for path in expression.leaf_paths() {
            self.entries.push((path, modifier.clone()));
        }
    }

    /// Modifiers registered for a dotted path, in registration order.
    pub fn for_path<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Modifier> + 'a {
        self.entries
            .iter()
            .filter(move |(p, _)| p == path)
            .map(|(_, m)| m)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A selected column of a plan node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanColumn {
    /// Column name in result rows
    pub output: String,
    /// Column name on the node's model
    pub column: String,
}

/// One node of a compiled graph.
#[derive(Debug, Clone)]
pub struct PlanNode {
    name: Option<String>,
    path: String,
    alias: String,
    model: ModelRef,
    relation: Option<Arc<Relation>>,
    columns: Vec<PlanColumn>,
    id_outputs: Vec<String>,
    children: Vec<PlanNode>,
}

impl PlanNode {
    /// Relation name; `None` at the root.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Dotted relation path, empty at the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Result-column prefix, empty at the root.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn relation(&self) -> Option<&Arc<Relation>> {
        self.relation.as_ref()
    }

    pub fn columns(&self) -> &[PlanColumn] {
        &self.columns
    }

    /// Result columns holding the node's primary key.
    pub fn id_outputs(&self) -> &[String] {
        &self.id_outputs
    }

    pub fn children(&self) -> &[PlanNode] {
        &self.children
    }

    pub fn is_one_to_one(&self) -> bool {
        self.relation.as_ref().is_some_and(|r| r.is_one_to_one())
    }
}

/// A query with every graph node joined, plus the node tree.
#[derive(Debug, Clone)]
pub struct JoinPlan {
    query: Select,
    root: PlanNode,
}

impl JoinPlan {
    pub fn query(&self) -> &Select {
        &self.query
    }

    pub fn root(&self) -> &PlanNode {
        &self.root
    }

    pub fn into_parts(self) -> (Select, PlanNode) {
        (self.query, self.root)
    }

    /// Find a node by dotted path.
    pub fn node(&self, path: &str) -> Option<&PlanNode> {
        if path.is_empty() {
            return Some(&self.root);
        }
        path.split('.').try_fold(&self.root, |node, name| {
            node.children.iter().find(|c| c.name() == Some(name))
        })
    }
}

/// Compiles relation expressions into join plans.
pub struct GraphCompiler<'a> {
    registry: &'a ModelRegistry,
    config: GraphConfig,
    modifiers: Option<&'a GraphModifiers>,
    named: Option<&'a BTreeMap<String, Modifier>>,
}

impl<'a> GraphCompiler<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self {
            registry,
            config: GraphConfig::default(),
            modifiers: None,
            named: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Modifiers registered per graph path.
    #[must_use]
    pub fn graph_modifiers(mut self, modifiers: &'a GraphModifiers) -> Self {
        self.modifiers = Some(modifiers);
        self
    }

    /// Named modifiers consulted before the related model's own.
    #[must_use]
    pub fn named_modifiers(mut self, named: &'a BTreeMap<String, Modifier>) -> Self {
        self.named = Some(named);
        self
    }

    /// Join every node of `expression` onto `query`, whose table is `model`'s.
    #[tracing::instrument(level = "debug", skip(self, query, model, expression), fields(model = model.name(), expression = %expression))]
    pub fn compile(&self, query: Select, model: &ModelRef, expression: &RelationExpression) -> Result<JoinPlan> {
        let expression = expression.expand(self.config.max_recursion_depth);
        let mut query = query.dialect(self.config.dialect);
        let root_ref = query.table_ref().to_string();

        let columns = self.select_root(&mut query, model, &root_ref);
        let children = self.compile_children(&mut query, &expression, model, &root_ref, "", "", 1)?;

        tracing::debug!(
            joins = query.joins().len(),
            columns = query.selections().len(),
            "Compiled graph join plan"
        );
        Ok(JoinPlan {
            query,
            root: PlanNode {
                name: None,
                path: String::new(),
                alias: String::new(),
                model: Arc::clone(model),
                relation: None,
                id_outputs: model.id_columns().to_vec(),
                columns,
                children,
            },
        })
    }

    /// Root columns are selected unprefixed. An explicit select list is kept
    /// (with bare columns qualified) and extended with the id columns.
    fn select_root(&self, query: &mut Select, model: &ModelRef, root_ref: &str) -> Vec<PlanColumn> {
        let names = if query.has_selects() {
            let items = query.selections().to_vec();
            query.clear_select();
            for item in items {
                let expr = match item.expr {
                    Expr::Column { table: None, name } => Expr::qualified(root_ref, name),
                    other => other,
                };
                query.add_select(expr, item.alias);
            }
            let mut names = query.selected_names();
            for id in model.id_columns() {
                if !names.contains(id) {
                    query.add_select(Expr::qualified(root_ref, id.as_str()), None);
                    names.push(id.clone());
                }
            }
            names
        } else {
            let columns = self.pruned_columns(model);
            for column in &columns {
                query.add_select(Expr::qualified(root_ref, column.as_str()), None);
            }
            columns
        };

        names
            .into_iter()
            .map(|name| PlanColumn {
                output: name.clone(),
                column: name,
            })
            .collect()
    }

    /// The model's columns that exist in its table, id columns first.
    fn pruned_columns(&self, model: &ModelRef) -> Vec<String> {
        let available = self.registry.table_columns(model.as_ref());
        let declared = model.columns();
        let mut columns: Vec<String> = if declared.is_empty() {
            available.to_vec()
        } else {
            declared
                .iter()
                .filter(|c| available.contains(c))
                .cloned()
                .collect()
        };
        for id in model.id_columns().iter().rev() {
            if !columns.contains(id) {
                columns.insert(0, id.clone());
            }
        }
        columns
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_children(
        &self,
        query: &mut Select,
        node: &RelationExpression,
        model: &ModelRef,
        owner_ref: &str,
        prefix: &str,
        path: &str,
        depth: usize,
    ) -> Result<Vec<PlanNode>> {
        let mut children: Vec<RelationExpression> = node.children().to_vec();
        if node.is_all_recursive() && depth <= self.config.max_recursion_depth {
            for relation in self.registry.relations(model)?.iter() {
                if !children.iter().any(|c| c.name() == Some(relation.name())) {
                    children.push(RelationExpression::node(relation.name()).all_recursive());
                }
            }
        }

        children
            .iter()
            .map(|child| self.compile_node(query, child, model, owner_ref, prefix, path, depth))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_node(
        &self,
        query: &mut Select,
        node: &RelationExpression,
        owner: &ModelRef,
        owner_ref: &str,
        prefix: &str,
        parent_path: &str,
        depth: usize,
    ) -> Result<PlanNode> {
        let name = node.name().unwrap_or_default();
        let path = join_path(parent_path, name);
        if let Some(max) = self.config.max_depth {
            if depth > max {
                return Err(Error::Graph(GraphError::new(
                    GraphErrorKind::MaxDepth,
                    path,
                    format!("relation expression nests deeper than {} levels", max),
                )));
            }
        }

        let relation = self
            .registry
            .relation(owner, name)?
            .ok_or_else(|| Error::Graph(GraphError::unknown_relation(&path, name, owner.name())))?;
        let related = Arc::clone(relation.related_model());
        let alias = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", prefix, name)
        };

        let mut subquery = relation.related_subquery(query)?;
        self.node_modifier(node, &path, &related)?.apply(&mut subquery)?;

        let table = related.table_name();
        let columns = if subquery.has_selects() {
            let mut names = subquery.selected_names();
            for column in related.id_columns().iter().chain(relation.related_prop().columns()) {
                if !names.contains(column) {
                    subquery.add_select(Expr::qualified(table, column.as_str()), None);
                    names.push(column.clone());
                }
            }
            names
        } else {
            self.pruned_columns(&related)
        };

        relation.join(
            query,
            JoinOptions::new()
                .join_type(self.config.join_type)
                .alias(alias.as_str())
                .owner_table(owner_ref)
                .subquery(subquery),
        )?;

        let mut plan_columns = Vec::with_capacity(columns.len());
        for column in columns {
            let output = format!("{}:{}", alias, column);
            query.add_select(Expr::qualified(alias.as_str(), column.as_str()), Some(output.clone()));
            plan_columns.push(PlanColumn { output, column });
        }
        if let Some(jt) = relation.join_table() {
            let join_alias = Relation::join_table_alias(&alias);
            for extra in jt.extras() {
                let output = format!("{}:{}", alias, extra.alias_col);
                query.add_select(
                    Expr::qualified(join_alias.as_str(), extra.join_table_col.as_str()),
                    Some(output.clone()),
                );
                plan_columns.push(PlanColumn {
                    output,
                    column: extra.alias_col.clone(),
                });
            }
        }

        tracing::trace!(path = %path, alias = %alias, relation = %relation.kind(), "Compiled graph node");

        let children = self.compile_children(query, node, &related, &alias, &alias, &path, depth + 1)?;
        Ok(PlanNode {
            name: Some(name.to_string()),
            id_outputs: related
                .id_columns()
                .iter()
                .map(|c| format!("{}:{}", alias, c))
                .collect(),
            path,
            alias,
            model: related,
            relation: Some(relation),
            columns: plan_columns,
            children,
        })
    }

    /// Inline `(name)` modifiers, then path modifiers in registration order.
    fn node_modifier(&self, node: &RelationExpression, path: &str, related: &ModelRef) -> Result<ResolvedModifier> {
        let mut resolved = ResolvedModifier::default();
        for name in node.modifiers() {
            resolved.extend(resolve_modifier(
                &Modifier::named(name.as_str()),
                related.as_ref(),
                self.named,
            )?);
        }
        if let Some(modifiers) = self.modifiers {
            for modifier in modifiers.for_path(path) {
                resolved.extend(resolve_modifier(modifier, related.as_ref(), self.named)?);
            }
        }
        Ok(resolved)
    }
}
