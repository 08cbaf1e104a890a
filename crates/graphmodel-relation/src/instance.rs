//! Model instances: property bags with attached relations.

use std::collections::BTreeMap;

use graphmodel_core::{Row, Value};

use crate::model::ModelRef;

/// Loaded value of a relation on a model instance.
#[derive(Debug, Clone)]
pub enum Related {
    /// One-to-one shaped relations (has-one, belongs-to-one, has-one-through)
    One(Option<Box<ModelInstance>>),
    /// Collection shaped relations (has-many, many-to-many)
    Many(Vec<ModelInstance>),
}

impl Related {
    /// Related instances as a slice-like list.
    pub fn instances(&self) -> Vec<&ModelInstance> {
        match self {
            Related::One(one) => one.as_deref().into_iter().collect(),
            Related::Many(many) => many.iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::One(one) => usize::from(one.is_some()),
            Related::Many(many) => many.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An instance of a model class.
#[derive(Debug, Clone)]
pub struct ModelInstance {
    model: ModelRef,
    props: BTreeMap<String, Value>,
    relations: BTreeMap<String, Related>,
}

impl ModelInstance {
    /// Create an empty instance.
    pub fn new(model: ModelRef) -> Self {
        Self {
            model,
            props: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Create an instance from property values.
    pub fn from_props<I, K, V>(model: ModelRef, props: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut instance = Self::new(model);
        for (k, v) in props {
            instance.props.insert(k.into(), v.into());
        }
        instance
    }

    /// Create an instance from column values, mapping columns to properties.
    pub fn from_columns<'a, I>(model: ModelRef, columns: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let mut instance = Self::new(model);
        for (column, value) in columns {
            let property = instance.model.column_to_property(column);
            instance.props.insert(property, value.clone());
        }
        instance
    }

    /// Create an instance from an unprefixed result row.
    pub fn from_row(model: ModelRef, row: &Row) -> Self {
        Self::from_columns(model, row.iter())
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.props.get(property)
    }

    pub fn set(&mut self, property: impl Into<String>, value: impl Into<Value>) {
        self.props.insert(property.into(), value.into());
    }

    /// Mutable access to a property, inserting NULL if absent.
    pub fn get_mut_or_null(&mut self, property: &str) -> &mut Value {
        self.props.entry(property.to_string()).or_insert(Value::Null)
    }

    pub fn has(&self, property: &str) -> bool {
        self.props.contains_key(property)
    }

    pub fn remove(&mut self, property: &str) -> Option<Value> {
        self.props.remove(property)
    }

    pub fn props(&self) -> &BTreeMap<String, Value> {
        &self.props
    }

    /// Primary key values, in id column order. Missing values read as NULL.
    pub fn id_values(&self) -> Vec<Value> {
        self.model
            .id_properties()
            .iter()
            .map(|p| self.props.get(p).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Is every primary key value present and non-null?
    pub fn has_id(&self) -> bool {
        self.id_values().iter().all(|v| !v.is_null())
    }

    /// `(column, value)` pairs for the model's columns that are set.
    pub fn column_values(&self) -> Vec<(String, Value)> {
        self.model
            .columns()
            .iter()
            .filter_map(|column| {
                let property = self.model.column_to_property(column);
                self.props.get(&property).map(|v| (column.clone(), v.clone()))
            })
            .collect()
    }

    // ==================== Relations ====================

    pub fn set_related(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }

    pub fn related(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub fn related_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.relations.get_mut(name)
    }

    /// Instances loaded for a collection relation (empty if not loaded).
    pub fn related_many(&self, name: &str) -> &[ModelInstance] {
        match self.relations.get(name) {
            Some(Related::Many(many)) => many,
            _ => &[],
        }
    }

    /// Instance loaded for a one-to-one relation.
    pub fn related_one(&self, name: &str) -> Option<&ModelInstance> {
        match self.relations.get(name) {
            Some(Related::One(one)) => one.as_deref(),
            _ => None,
        }
    }

    pub fn relations(&self) -> &BTreeMap<String, Related> {
        &self.relations
    }

    /// Serialize properties and loaded relations.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.props {
            map.insert(k.clone(), v.to_json());
        }
        for (name, related) in &self.relations {
            let value = match related {
                Related::One(Some(one)) => one.to_json(),
                Related::One(None) => serde_json::Value::Null,
                Related::Many(many) => {
                    serde_json::Value::Array(many.iter().map(ModelInstance::to_json).collect())
                }
            };
            map.insert(name.clone(), value);
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelDef;
    use serde_json::json;
    use std::sync::Arc;

    fn person() -> ModelRef {
        Arc::new(
            ModelDef::new("Person", "persons")
                .columns(["first_name", "age"])
                .property("first_name", "firstName"),
        )
    }

    #[test]
    fn test_from_columns_maps_properties() {
        let name = Value::from("Jo");
        let id = Value::Int(1);
        let p = ModelInstance::from_columns(person(), [("id", &id), ("first_name", &name)]);
        assert_eq!(p.get("firstName"), Some(&Value::from("Jo")));
        assert!(p.has_id());
        assert_eq!(
            p.column_values(),
            vec![
                ("id".to_string(), Value::Int(1)),
                ("first_name".to_string(), Value::from("Jo"))
            ]
        );
    }

    #[test]
    fn test_unsaved_instance_has_no_id() {
        let p = ModelInstance::from_props(person(), [("firstName", "Jo")]);
        assert!(!p.has_id());
        assert_eq!(p.id_values(), vec![Value::Null]);
    }

    #[test]
    fn test_relations_and_json() {
        let mut parent = ModelInstance::from_props(person(), [("id", 1_i64)]);
        let child = ModelInstance::from_props(person(), [("id", 2_i64)]);
        parent.set_related("children", Related::Many(vec![child.clone()]));
        parent.set_related("parent", Related::One(None));
        assert_eq!(parent.related_many("children").len(), 1);
        assert!(parent.related_one("parent").is_none());
        assert_eq!(parent.related("children").map(Related::len), Some(1));
        assert_eq!(
            parent.to_json(),
            json!({"id": 1, "children": [{"id": 2}], "parent": null})
        );
    }
}
