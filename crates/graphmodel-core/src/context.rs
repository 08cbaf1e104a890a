//! Mutable query context shared with lifecycle hooks.
//!
//! A [`QueryContext`] is a key/value map that travels with a query and is
//! handed to hooks such as `after_find`. Hooks may write to it and later
//! readers observe the writes.
//!
//! Two inheritance modes exist:
//! - [`QueryContext::fork`] deep-copies the map. Used when a query builder is
//!   cloned, so writes to the clone never leak into the original.
//! - [`QueryContext::clone`] shares the same map. Used for child queries,
//!   which must see (and contribute to) their parent's context.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    values: Arc<RwLock<BTreeMap<String, serde_json::Value>>>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context pre-populated with values.
    pub fn from_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        let map = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            values: Arc::new(RwLock::new(map)),
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Copy every entry of `other` into this context, overwriting duplicates.
    pub fn merge(&self, other: &BTreeMap<String, serde_json::Value>) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        for (k, v) in other {
            values.insert(k.clone(), v.clone());
        }
    }

    /// Deep-copy this context into an independent one.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            values: Arc::new(RwLock::new(self.snapshot())),
        }
    }

    /// Do both contexts write to the same underlying map?
    pub fn is_shared_with(&self, other: &QueryContext) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }

    pub fn snapshot(&self) -> BTreeMap<String, serde_json::Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clone_shares_values() {
        let ctx = QueryContext::new();
        let child = ctx.clone();
        child.set("seen", json!(1));
        assert_eq!(ctx.get("seen"), Some(json!(1)));
        assert!(ctx.is_shared_with(&child));
    }

    #[test]
    fn test_fork_is_independent() {
        let ctx = QueryContext::from_values([("a", json!("x"))]);
        let forked = ctx.fork();
        forked.set("a", json!("y"));
        forked.set("b", json!(true));
        assert_eq!(ctx.get("a"), Some(json!("x")));
        assert!(!ctx.contains("b"));
        assert!(!ctx.is_shared_with(&forked));
    }

    #[test]
    fn test_merge_overwrites() {
        let ctx = QueryContext::from_values([("a", json!(1))]);
        let mut other = BTreeMap::new();
        other.insert("a".to_string(), json!(2));
        other.insert("b".to_string(), json!(3));
        ctx.merge(&other);
        assert_eq!(ctx.get("a"), Some(json!(2)));
        assert_eq!(ctx.remove("b"), Some(json!(3)));
        assert!(!ctx.contains("b"));
    }
}
