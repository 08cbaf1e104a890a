//! One side of a relation join: an ordered list of column references.
//!
//! A `RelationProperty` holds N references that all belong to one model's
//! table. Composite keys are simply N > 1; index `i` on the owner side pairs
//! with index `i` on the related side. References may address a value nested
//! in a JSON column, in which case reads and writes go through the JSON path.

use graphmodel_core::{Reference, ReferenceError, Value, json_get, json_set};
use graphmodel_query::{Expr, Patch, Select};

use crate::instance::ModelInstance;
use crate::model::{ModelRef, same_model};

#[derive(Debug, Clone)]
pub struct RelationProperty {
    references: Vec<Reference>,
    columns: Vec<String>,
    properties: Vec<String>,
    model: ModelRef,
}

impl RelationProperty {
    /// Parse references and resolve the model class that owns them.
    ///
    /// `resolver` is called with `(table, column)` for every reference and
    /// must return the model class owning that table.
    pub fn new<S, F>(references: &[S], resolver: F) -> Result<Self, ReferenceError>
    where
        S: AsRef<str>,
        F: Fn(&str, &str) -> Option<ModelRef>,
    {
        if references.is_empty() {
            return Err(ReferenceError::invalid(
                "",
                "a relation property needs at least one reference",
            ));
        }

        let mut parsed = Vec::with_capacity(references.len());
        let mut model: Option<ModelRef> = None;
        for text in references {
            let text = text.as_ref();
            let reference = Reference::parse(text)?;
            let resolved = resolver(reference.table(), reference.column())
                .ok_or_else(|| ReferenceError::model_not_found(text))?;

            if let Some(existing) = &model {
                if !same_model(existing.as_ref(), resolved.as_ref()) {
                    return Err(ReferenceError::invalid(
                        text,
                        format!(
                            "all references of a composite key must point to the same table, \"{}\" does not",
                            text
                        ),
                    ));
                }
            } else {
                model = Some(resolved);
            }
            parsed.push(reference);
        }

        let Some(model) = model else {
            return Err(ReferenceError::invalid("", "no reference resolved"));
        };
        let columns: Vec<String> = parsed.iter().map(|r| r.column().to_string()).collect();
        let properties = columns
            .iter()
            .map(|c| model.column_to_property(c))
            .collect();

        Ok(Self {
            references: parsed,
            columns,
            properties,
            model,
        })
    }

    pub fn size(&self) -> usize {
        self.references.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    /// The `i`-th reference bound to the alias `builder` uses for this
    /// property's table. The stored reference is not modified.
    pub fn ref_for(&self, builder: &Select, index: usize) -> Option<Reference> {
        let alias = builder.table_ref_for(self.model.table_name());
        self.references.get(index).map(|r| r.with_table(alias))
    }

    /// Every reference bound to the alias `builder` uses for this table.
    pub fn refs(&self, builder: &Select) -> Vec<Reference> {
        self.bind(&builder.table_ref_for(self.model.table_name()))
    }

    /// Every reference bound to an explicit alias.
    pub fn bind(&self, alias: &str) -> Vec<Reference> {
        self.references.iter().map(|r| r.with_table(alias)).collect()
    }

    /// Column expressions for every reference bound to `alias`.
    pub fn exprs(&self, alias: &str) -> Vec<Expr> {
        self.bind(alias).iter().map(Expr::reference).collect()
    }

    /// Read the `i`-th property, following its JSON path if any.
    pub fn get_prop(&self, obj: &ModelInstance, index: usize) -> Option<Value> {
        let reference = self.references.get(index)?;
        let value = obj.get(&self.properties[index])?;
        if reference.is_plain() {
            return Some(value.clone());
        }
        let root = value.to_json();
        json_get(&root, reference.json_path()).map(|v| Value::from_json(v.clone()))
    }

    /// Write the `i`-th property, creating intermediate JSON containers.
    pub fn set_prop(&self, obj: &mut ModelInstance, index: usize, value: Value) {
        let Some(reference) = self.references.get(index) else {
            return;
        };
        let property = &self.properties[index];
        if reference.is_plain() {
            obj.set(property.as_str(), value);
            return;
        }
        let slot = obj.get_mut_or_null(property);
        let mut root = slot.to_json();
        json_set(&mut root, reference.json_path(), value.to_json());
        *slot = Value::Json(root);
    }

    /// Is the `i`-th property present (and, for JSON references, the path)?
    pub fn has_prop(&self, obj: &ModelInstance, index: usize) -> bool {
        let Some(reference) = self.references.get(index) else {
            return false;
        };
        match obj.get(&self.properties[index]) {
            None => false,
            Some(_) if reference.is_plain() => true,
            Some(value) => json_get(&value.to_json(), reference.json_path()).is_some(),
        }
    }

    /// Every property value, in reference order. Missing values read as NULL.
    pub fn get_props(&self, obj: &ModelInstance) -> Vec<Value> {
        (0..self.size())
            .map(|i| self.get_prop(obj, i).unwrap_or(Value::Null))
            .collect()
    }

    /// Write the `i`-th value into an update payload.
    ///
    /// Plain references are keyed by column name; JSON references by their
    /// `column:path` expression so the update targets the sub-path only.
    pub fn patch(&self, patch: &mut Patch, index: usize, value: Value) {
        if let Some(reference) = self.references.get(index) {
            let key = if reference.is_plain() {
                reference.column().to_string()
            } else {
                reference.column_expression()
            };
            patch.insert(key, value);
        }
    }

    /// Composite grouping key of an object's property values.
    pub fn prop_key(&self, obj: &ModelInstance) -> String {
        values_key(&self.get_props(obj))
    }
}

/// Composite grouping key of a value tuple: fragments joined with `,`.
pub fn values_key(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::key_fragment)
        .collect::<Vec<_>>()
        .join(",")
}
