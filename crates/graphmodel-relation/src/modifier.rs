//! Query modifiers.
//!
//! A modifier mutates a [`Select`] before it is used. Modifiers can be given
//! as a closure, a name looked up on a model class (or in a graph's named
//! modifier map), a column/value predicate, or a list of any of these.
//! [`resolve_modifier`] flattens a modifier into a list of executable steps,
//! resolving names once so a bad name is reported at declaration time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use graphmodel_core::{ConfigError, Error, Result, Value};
use graphmodel_query::{Expr, Select};

use crate::model::ModelClass;

/// Names are resolved recursively; this bounds named-modifier cycles.
const MAX_RESOLVE_DEPTH: usize = 32;

/// Closure form of a modifier.
pub type ModifierFn = Arc<dyn Fn(&mut Select) -> Result<()> + Send + Sync>;

/// A query modifier as declared.
#[derive(Clone)]
pub enum Modifier {
    /// Name of a registered modifier
    Named(String),
    /// `column = value` conditions on the query's main table
    Predicate(Vec<(String, Value)>),
    Function(ModifierFn),
    List(Vec<Modifier>),
}

impl Modifier {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&mut Select) -> Result<()> + Send + Sync + 'static,
    {
        Modifier::Function(Arc::new(f))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Modifier::Named(name.into())
    }

    pub fn predicate<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Modifier::Predicate(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn list(modifiers: Vec<Modifier>) -> Self {
        Modifier::List(modifiers)
    }

    /// Parse the JSON form: a name, a predicate object, or an array of these.
    pub fn from_json(json: &serde_json::Value) -> std::result::Result<Self, String> {
        match json {
            serde_json::Value::String(name) => Ok(Modifier::Named(name.clone())),
            serde_json::Value::Object(map) => Ok(Modifier::Predicate(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v.clone())))
                    .collect(),
            )),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Modifier::from_json)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Modifier::List),
            other => Err(format!(
                "modifier must be a name, an object or an array, got {}",
                other
            )),
        }
    }
}

impl fmt::Debug for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Modifier::Predicate(pairs) => f.debug_tuple("Predicate").field(pairs).finish(),
            Modifier::Function(_) => f.write_str("Function(..)"),
            Modifier::List(list) => f.debug_tuple("List").field(list).finish(),
        }
    }
}

impl From<&str> for Modifier {
    fn from(name: &str) -> Self {
        Modifier::Named(name.to_string())
    }
}

impl From<String> for Modifier {
    fn from(name: String) -> Self {
        Modifier::Named(name)
    }
}

#[derive(Clone)]
enum Step {
    Predicate(Vec<(String, Value)>),
    Function(ModifierFn),
}

/// A modifier with every name resolved, ready to apply.
#[derive(Clone, Default)]
pub struct ResolvedModifier {
    steps: Vec<Step>,
}

impl ResolvedModifier {
    /// Apply every step to a query, in order.
    pub fn apply(&self, query: &mut Select) -> Result<()> {
        for step in &self.steps {
            match step {
                Step::Predicate(pairs) => {
                    for (column, value) in pairs {
                        let expr = Expr::qualified(query.table_ref(), column.as_str())
                            .eq_value(value.clone());
                        query.add_filter(expr);
                    }
                }
                Step::Function(f) => f(query)?,
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Append another resolved modifier's steps.
    pub fn extend(&mut self, other: ResolvedModifier) {
        self.steps.extend(other.steps);
    }
}

impl fmt::Debug for ResolvedModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedModifier")
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Resolve a modifier against a model class.
///
/// Names are looked up in `named` first (a graph's modifier map), then on the
/// model class. A name that is found nowhere goes through
/// [`ModelClass::modifier_not_found`], which fails by default.
pub fn resolve_modifier(
    modifier: &Modifier,
    model: &dyn ModelClass,
    named: Option<&BTreeMap<String, Modifier>>,
) -> Result<ResolvedModifier> {
    let mut resolved = ResolvedModifier::default();
    resolve_into(modifier, model, named, 0, &mut resolved)?;
    Ok(resolved)
}

fn resolve_into(
    modifier: &Modifier,
    model: &dyn ModelClass,
    named: Option<&BTreeMap<String, Modifier>>,
    depth: usize,
    out: &mut ResolvedModifier,
) -> Result<()> {
    if depth > MAX_RESOLVE_DEPTH {
        return Err(Error::Config(ConfigError::new(
            model.name(),
            format!("modifier {:?} refers to itself", modifier),
        )));
    }

    match modifier {
        Modifier::Function(f) => out.steps.push(Step::Function(Arc::clone(f))),
        Modifier::Predicate(pairs) => out.steps.push(Step::Predicate(pairs.clone())),
        Modifier::List(list) => {
            for m in list {
                resolve_into(m, model, named, depth + 1, out)?;
            }
        }
        Modifier::Named(name) => {
            let found = named
                .and_then(|map| map.get(name).cloned())
                .or_else(|| model.named_modifier(name));
            let target = match found {
                Some(m) => m,
                None => {
                    tracing::debug!(model = model.name(), modifier = %name, "Named modifier not found");
                    model.modifier_not_found(name)?
                }
            };
            resolve_into(&target, model, named, depth + 1, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelDef;
    use serde_json::json;

    fn animal() -> ModelDef {
        ModelDef::new("Animal", "animals")
            .columns(["name", "species", "ownerId"])
            .modifier("dogs", Modifier::predicate([("species", "dog")]))
            .modifier(
                "orderByName",
                Modifier::function(|q: &mut Select| {
                    q.add_filter(Expr::raw("1 = 1"));
                    Ok(())
                }),
            )
            .modifier(
                "dogsByName",
                Modifier::list(vec!["dogs".into(), "orderByName".into()]),
            )
    }

    #[test]
    fn test_predicate_uses_table_ref() {
        let resolved = resolve_modifier(&Modifier::named("dogs"), &animal(), None).unwrap();
        let mut q = Select::new("animals").alias_as("pets");
        resolved.apply(&mut q).unwrap();
        assert_eq!(
            q.to_sql(),
            r#"SELECT * FROM "animals" AS "pets" WHERE "pets"."species" = $1"#
        );
    }

    #[test]
    fn test_named_list_flattens() {
        let resolved = resolve_modifier(&Modifier::named("dogsByName"), &animal(), None).unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn test_graph_map_wins_over_model() {
        let mut map = BTreeMap::new();
        map.insert(
            "dogs".to_string(),
            Modifier::predicate([("species", "wolf")]),
        );
        let resolved = resolve_modifier(&Modifier::named("dogs"), &animal(), Some(&map)).unwrap();
        let mut q = Select::new("animals");
        resolved.apply(&mut q).unwrap();
        let (_, params) = q.build();
        assert_eq!(params, vec![Value::from("wolf")]);
    }

    #[test]
    fn test_unknown_name_fails() {
        let err = resolve_modifier(&Modifier::named("cats"), &animal(), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Unable to determine modify function from provided value: "cats""#
        );
    }

    #[test]
    fn test_unknown_name_uses_fallback() {
        let model = animal().on_modifier_not_found(|_| Ok(Modifier::list(Vec::new())));
        let resolved = resolve_modifier(&Modifier::named("cats"), &model, None).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_self_reference_is_config_error() {
        let model = ModelDef::new("Loop", "loops").modifier("a", Modifier::named("a"));
        let err = resolve_modifier(&Modifier::named("a"), &model, None).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_from_json() {
        let m = Modifier::from_json(&json!(["dogs", {"species": "cat"}])).unwrap();
        assert!(matches!(m, Modifier::List(ref l) if l.len() == 2));
        assert!(Modifier::from_json(&json!(3)).is_err());
    }
}
