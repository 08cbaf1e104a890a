//! Allow-lists for graph expressions.
//!
//! An allow-list is the union of every expression registered with it. A
//! requested expression passes when each of its nodes exists in at least one
//! registered tree, along the same path. An allowed `*` node admits anything
//! beneath it. Recursion is compared after unfolding both sides, so `a.^`
//! admits `a.a.a` up to the recursion limit.

use graphmodel_core::{Error, GraphError, Result};

use crate::expression::{RelationExpression, join_path};

#[derive(Debug, Clone, Default)]
pub struct AllowList {
    trees: Vec<RelationExpression>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register another allowed expression.
    pub fn add(&mut self, expression: RelationExpression) {
        self.trees.push(expression);
    }

    #[must_use]
    pub fn with(mut self, expression: RelationExpression) -> Self {
        self.add(expression);
        self
    }

    /// No expression registered: everything is allowed.
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn expressions(&self) -> &[RelationExpression] {
        &self.trees
    }

    /// Check a requested expression.
    ///
    /// Fails with a `NotAllowed` graph error naming the dotted path of the
    /// first node not covered, e.g. `Eager expression not allowed: a.b`.
    pub fn check(&self, request: &RelationExpression, max_recursion: usize) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let allowed: Vec<RelationExpression> = self.trees.iter().map(|t| t.expand(max_recursion)).collect();
        let allowed: Vec<&RelationExpression> = allowed.iter().collect();
        check_node(&request.expand(max_recursion), &allowed, "")
    }

    /// Is the request covered? Same rule as [`check`](Self::check).
    pub fn allows(&self, request: &RelationExpression, max_recursion: usize) -> bool {
        self.check(request, max_recursion).is_ok()
    }
}

fn not_allowed(path: String) -> Error {
    tracing::debug!(path = %path, "Graph expression rejected by allow-list");
    Error::Graph(GraphError::not_allowed(path))
}

/// `request` and every node of `allowed` sit at the same path.
fn check_node(request: &RelationExpression, allowed: &[&RelationExpression], path: &str) -> Result<()> {
    if allowed.iter().any(|a| a.is_all_recursive()) {
        return Ok(());
    }
    if request.is_all_recursive() {
        return Err(not_allowed(join_path(path, "*")));
    }

    for child in request.children() {
        let name = child.name().unwrap_or_default();
        let child_path = join_path(path, name);
        let candidates: Vec<&RelationExpression> =
            allowed.iter().filter_map(|a| a.child(name)).collect();
        if candidates.is_empty() {
            return Err(not_allowed(child_path));
        }

        let modifiers_allowed = child
            .modifiers()
            .iter()
            .all(|m| candidates.iter().any(|c| c.modifiers().contains(m)));
        if !modifiers_allowed {
            return Err(not_allowed(child_path));
        }

        check_node(child, &candidates, &child_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(exprs: &[&str]) -> AllowList {
        exprs.iter().fold(AllowList::new(), |list, e| {
            list.with(RelationExpression::parse(e).unwrap())
        })
    }

    fn request(expr: &str) -> RelationExpression {
        RelationExpression::parse(expr).unwrap()
    }

    #[test]
    fn test_rejects_path_with_dotted_name() {
        let list = allow(&["[a, b.c.[d, e]]"]);
        let err = list.check(&request("a.b"), 8).unwrap_err();
        assert!(err.is_not_allowed());
        assert_eq!(err.graph_path(), Some("a.b"));
        assert_eq!(err.to_string(), "Eager expression not allowed: a.b");
    }

    #[test]
    fn test_accepts_sub_expressions() {
        let list = allow(&["[a, b.c.[d, e]]"]);
        for ok in ["a", "b", "b.c", "b.c.e", "[a, b.c.d]", ""] {
            assert!(list.allows(&request(ok), 8), "{ok} should be allowed");
        }
        assert!(!list.allows(&request("c"), 8));
        assert!(!list.allows(&request("b.c.f"), 8));
    }

    #[test]
    fn test_check_is_idempotent() {
        let list = allow(&["a"]);
        let first = list.check(&request("a.x"), 8).unwrap_err().to_string();
        let second = list.check(&request("a.x"), 8).unwrap_err().to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn test_registrations_are_unioned() {
        let list = allow(&["a.b", "a.c"]);
        assert!(list.allows(&request("a.[b, c]"), 8));
        assert!(!list.allows(&request("a.d"), 8));
    }

    #[test]
    fn test_empty_list_allows_everything() {
        assert!(AllowList::new().allows(&request("x.y.z"), 8));
    }

    #[test]
    fn test_all_recursive_admits_subtree() {
        let list = allow(&["a.*"]);
        assert!(list.allows(&request("a.b.c.d"), 8));
        assert!(!list.allows(&request("b"), 8));

        let list = allow(&["a"]);
        let err = list.check(&request("a.*"), 8).unwrap_err();
        assert_eq!(err.graph_path(), Some("a.*"));
    }

    #[test]
    fn test_recursion_is_unfolded() {
        let list = allow(&["parent.^3"]);
        assert!(list.allows(&request("parent.parent.parent"), 8));
        assert!(list.allows(&request("parent.^2"), 8));
        assert!(!list.allows(&request("parent.^4"), 8));
        assert!(!list.allows(&request("parent.^"), 8));
        assert!(allow(&["parent.^"]).allows(&request("parent.^"), 8));
    }

    #[test]
    fn test_modifiers_must_be_allowed() {
        let list = allow(&["pets(dogs)", "pets(cats)"]);
        assert!(list.allows(&request("pets(dogs, cats)"), 8));
        assert!(list.allows(&request("pets"), 8));
        let err = list.check(&request("pets(birds)"), 8).unwrap_err();
        assert_eq!(err.graph_path(), Some("pets"));
    }
}
