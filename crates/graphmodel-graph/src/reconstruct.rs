//! Fold flat join rows back into a graph of model instances.
//!
//! Every result row of a graph join carries one (possibly NULL) row of each
//! joined node. Rows are grouped per node by primary key, so a parent with M
//! children and K pets, which appears in M * K rows, is built once with M
//! children and K pets. Column values are taken from the first row a key is
//! seen in.

use std::collections::HashMap;
use std::sync::Arc;

use graphmodel_core::{QueryContext, Result, Row, Value};
use graphmodel_relation::{ModelInstance, Related, values_key};

use crate::compiler::{JoinPlan, PlanNode};

/// Instances of one plan node under one parent, in first-seen order.
#[derive(Default)]
struct Group {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

struct Entry {
    columns: Vec<(String, Value)>,
    /// One group per child plan node
    children: Vec<Group>,
}

impl Group {
    /// Fold one row's slice of `node` into the group.
    fn fold(&mut self, node: &PlanNode, row: &Row) -> bool {
        let ids: Vec<Value> = node
            .id_outputs()
            .iter()
            .map(|output| row.get_by_name(output).cloned().unwrap_or(Value::Null))
            .collect();
        if ids.iter().all(|v| matches!(v, Value::Null)) {
            return false;
        }

        let key = values_key(&ids);
        let position = match self.index.get(&key) {
            Some(&position) => position,
            None => {
                let columns = node
                    .columns()
                    .iter()
                    .map(|c| {
                        let value = row.get_by_name(&c.output).cloned().unwrap_or(Value::Null);
                        (c.column.clone(), value)
                    })
                    .collect();
                self.entries.push(Entry {
                    columns,
                    children: node.children().iter().map(|_| Group::default()).collect(),
                });
                self.index.insert(key, self.entries.len() - 1);
                self.entries.len() - 1
            }
        };

        let entry = &mut self.entries[position];
        for (child, group) in node.children().iter().zip(entry.children.iter_mut()) {
            group.fold(child, row);
        }
        true
    }

    /// Build instances; children are built, and run `after_find`, before
    /// their parent.
    fn build(self, node: &PlanNode, ctx: &QueryContext) -> Result<Vec<ModelInstance>> {
        self.entries
            .into_iter()
            .map(|entry| {
                let mut instance = ModelInstance::from_columns(
                    Arc::clone(node.model()),
                    entry.columns.iter().map(|(c, v)| (c.as_str(), v)),
                );
                for (child, group) in node.children().iter().zip(entry.children) {
                    let related = group.build(child, ctx)?;
                    let related = if child.is_one_to_one() {
                        Related::One(related.into_iter().next().map(Box::new))
                    } else {
                        Related::Many(related)
                    };
                    instance.set_related(child.name().unwrap_or_default(), related);
                }
                node.model().after_find(&mut instance, ctx)?;
                Ok(instance)
            })
            .collect()
    }
}

/// Rebuild root instances, with every joined relation attached, from the
/// rows of `plan`'s query.
///
/// Relations with no matching rows are attached empty (`Many(vec![])` or
/// `One(None)`). Rows whose root key is entirely NULL are skipped.
#[tracing::instrument(level = "debug", skip_all, fields(rows = rows.len()))]
pub fn reconstruct(plan: &JoinPlan, rows: &[Row], ctx: &QueryContext) -> Result<Vec<ModelInstance>> {
    let root = plan.root();
    let mut group = Group::default();
    let mut skipped = 0_usize;
    for row in rows {
        if !group.fold(root, row) {
            skipped += 1;
        }
    }
    if skipped > 0 {
        tracing::warn!(skipped, model = root.model().name(), "Skipped rows without a root id");
    }

    let instances = group.build(root, ctx)?;
    tracing::debug!(instances = instances.len(), "Reconstructed result graph");
    Ok(instances)
}
