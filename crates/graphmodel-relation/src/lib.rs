//! Relation layer for GraphModel Rust.
//!
//! `graphmodel-relation` turns declarative relation mappings into resolved
//! [`Relation`]s and runs relation-scoped operations. It provides:
//!
//! - **Model classes**: the [`ModelClass`] trait, the [`ModelDef`] builder and
//!   [`ModelInstance`] values with attached related instances.
//! - **Mappings**: [`RelationMapping`] in builder or JSON form, including
//!   `join.through` blocks for join-table relations.
//! - **Resolution**: [`ModelRegistry`] resolves and memoizes each model's
//!   relations in two phases (create, then `set_mapping`) so mutually
//!   referencing models can be declared in any order.
//! - **Join columns**: [`RelationProperty`] for composite and JSON-path
//!   references.
//! - **Modifiers**: named, predicate, function and list [`Modifier`]s.
//! - **Operations**: find, insert, update, patch, delete, relate and unrelate
//!   over a [`RelationOwner`].
//!
//! # Example
//!
//! ```ignore
//! let registry = ModelRegistry::new()
//!     .with_model(
//!         ModelDef::new("Person", "persons").relation(
//!             "pets",
//!             RelationMapping::has_many("Animal").join("persons.id", "animals.ownerId"),
//!         ),
//!     )
//!     .with_model(ModelDef::new("Animal", "animals").columns(["ownerId", "name"]));
//!
//! let person = registry.model("Person")?;
//! let pets = registry.relation(&person, "pets")?.expect("declared");
//! let query = pets.find(ModelInstance::from_props(person, [("id", 1_i64)])).build()?;
//! ```

pub mod instance;
pub mod mapping;
pub mod model;
pub mod modifier;
pub mod operation;
pub mod owner;
pub mod property;
pub mod registry;
pub mod relation;

pub use instance::{ModelInstance, Related};
pub use mapping::{
    BeforeInsertFn, ColumnRefs, ExtraColumn, JoinMapping, RelationKind, RelationMapping,
    ThroughMapping,
};
pub use model::{
    AfterFindHook, ModelClass, ModelDef, ModelRef, ModifierFallback, SyntheticTable, same_model,
};
pub use modifier::{Modifier, ModifierFn, ResolvedModifier, resolve_modifier};
pub use operation::{
    DeleteOperation, FindOperation, InsertOperation, RelateOperation, Statement,
    UnrelateOperation, UpdateOperation,
};
pub use owner::{OwnerKind, OwnerProperties, RelationOwner};
pub use property::{RelationProperty, values_key};
pub use registry::{ColumnSource, ModelRegistry, RelationSet};
pub use relation::{
    JoinOptions, JoinTable, JoinTableExtra, PendingRelation, Relation, RelationVariant,
};
