//! Static type-descriptor table.
//!
//! Each domain type is described once at startup: its table, identity and
//! version columns, scalar fields, child-entity references, value-object
//! compositions and the foreign keys on its own table. The fetcher and
//! persister consume the resulting [`TypeRegistry`] as plain data.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{PersistError, PersistResult};

/// Role a type plays inside an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    AggregateRoot,
    Entity,
    ValueObject,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    One,
    Many,
}

/// Whether a reference is owned by the aggregate or points at another one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Same-aggregate child entity; fetched and cascaded.
    Composition,
    /// Pointer to another aggregate root; stored as a scalar column holding
    /// the target identity. Never traversed, never cascaded.
    AggregateRoot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    pub name: String,
    pub target: String,
    pub multiplicity: Multiplicity,
    pub kind: ReferenceKind,
    /// Foreign-key column on the target table; resolved from the target's
    /// declared foreign keys when absent.
    pub join_column: Option<String>,
}

impl ReferenceDescriptor {
    pub fn one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::composition(name, target, Multiplicity::One)
    }

    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::composition(name, target, Multiplicity::Many)
    }

    pub fn composition(
        name: impl Into<String>,
        target: impl Into<String>,
        multiplicity: Multiplicity,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            multiplicity,
            kind: ReferenceKind::Composition,
            join_column: None,
        }
    }

    pub fn root_pointer(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            multiplicity: Multiplicity::One,
            kind: ReferenceKind::AggregateRoot,
            join_column: None,
        }
    }

    pub fn via(mut self, join_column: impl Into<String>) -> Self {
        self.join_column = Some(join_column.into());
        self
    }

    pub fn is_composition(&self) -> bool {
        self.kind == ReferenceKind::Composition
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSegment {
    pub name: String,
    pub multiplicity: Multiplicity,
}

/// Chain of field names from an owning entity down to a value object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CompositionPath(Vec<PathSegment>);

impl CompositionPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn one(mut self, name: impl Into<String>) -> Self {
        self.0.push(PathSegment {
            name: name.into(),
            multiplicity: Multiplicity::One,
        });
        self
    }

    pub fn many(mut self, name: impl Into<String>) -> Self {
        self.0.push(PathSegment {
            name: name.into(),
            multiplicity: Multiplicity::Many,
        });
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// Path without its final segment, if any segments remain.
    pub fn parent(&self) -> Option<CompositionPath> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn is_strict_prefix_of(&self, other: &CompositionPath) -> bool {
        self.0.len() < other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| a.name == b.name)
    }

    /// Dotted field names, e.g. `billing.location`.
    pub fn dotted(&self) -> String {
        self.0
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl core::fmt::Display for CompositionPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.dotted())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionDescriptor {
    pub target: String,
    pub path: CompositionPath,
    pub join_column: Option<String>,
}

impl CompositionDescriptor {
    pub fn new(target: impl Into<String>, path: CompositionPath) -> Self {
        Self {
            target: target.into(),
            path,
            join_column: None,
        }
    }

    pub fn via(mut self, join_column: impl Into<String>) -> Self {
        self.join_column = Some(join_column.into());
        self
    }

    /// Slot name on the container node.
    pub fn slot(&self) -> &str {
        self.path.last().map(|s| s.name.as_str()).unwrap_or_default()
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.path
            .last()
            .map(|s| s.multiplicity)
            .unwrap_or(Multiplicity::One)
    }
}

/// A foreign-key column on a type's own table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub table: String,
    pub kind: DescriptorKind,
    pub identity_field: Option<String>,
    pub version_field: Option<String>,
    pub fields: Vec<String>,
    pub unique: Vec<String>,
    pub references: Vec<ReferenceDescriptor>,
    pub compositions: Vec<CompositionDescriptor>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TypeDescriptor {
    fn new(name: impl Into<String>, kind: DescriptorKind, identity_field: Option<String>) -> Self {
        let name = name.into();
        Self {
            table: name.clone(),
            name,
            kind,
            identity_field,
            version_field: None,
            fields: Vec::new(),
            unique: Vec::new(),
            references: Vec::new(),
            compositions: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn aggregate_root(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        Self::new(name, DescriptorKind::AggregateRoot, Some(identity_field.into()))
    }

    pub fn entity(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        Self::new(name, DescriptorKind::Entity, Some(identity_field.into()))
    }

    pub fn value_object(name: impl Into<String>) -> Self {
        Self::new(name, DescriptorKind::ValueObject, None)
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn version(mut self, column: impl Into<String>) -> Self {
        self.version_field = Some(column.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    pub fn unique(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if !self.fields.contains(&column) {
            self.fields.push(column.clone());
        }
        self.unique.push(column);
        self
    }

    pub fn reference(mut self, reference: ReferenceDescriptor) -> Self {
        self.references.push(reference);
        self
    }

    pub fn composition(mut self, composition: CompositionDescriptor) -> Self {
        self.compositions.push(composition);
        self
    }

    pub fn foreign_key(mut self, column: impl Into<String>, references: impl Into<String>) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            references: references.into(),
        });
        self
    }

    pub fn is_value_object(&self) -> bool {
        self.kind == DescriptorKind::ValueObject
    }

    /// Entity references that are owned by the aggregate, in declared order.
    pub fn owned_references(&self) -> impl Iterator<Item = &ReferenceDescriptor> {
        self.references.iter().filter(|r| r.is_composition())
    }

    /// Aggregate-root pointers, stored as scalar columns named after the reference.
    pub fn root_pointers(&self) -> impl Iterator<Item = &ReferenceDescriptor> {
        self.references.iter().filter(|r| !r.is_composition())
    }

    pub fn find_reference(&self, name: &str) -> Option<&ReferenceDescriptor> {
        self.references.iter().find(|r| r.name == name)
    }

    pub fn find_composition(&self, dotted: &str) -> Option<&CompositionDescriptor> {
        self.compositions.iter().find(|c| c.path.dotted() == dotted)
    }
}

/// Immutable table of type descriptors with resolved join columns.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeDescriptor>,
    tables: HashMap<String, String>,
    joins: HashMap<(String, String), String>,
}

/// Collects descriptors; [`TypeRegistryBuilder::build`] validates them.
#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    types: Vec<TypeDescriptor>,
}

impl TypeRegistryBuilder {
    pub fn register(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }

    pub fn build(self) -> PersistResult<TypeRegistry> {
        let mut registry = TypeRegistry::default();
        for descriptor in self.types {
            if registry.types.contains_key(&descriptor.name) {
                return Err(PersistError::configuration(format!(
                    "type '{}' registered twice",
                    descriptor.name
                )));
            }
            if let Some(existing) = registry.tables.get(&descriptor.table) {
                return Err(PersistError::configuration(format!(
                    "table '{}' mapped by both '{}' and '{}'",
                    descriptor.table, existing, descriptor.name
                )));
            }
            registry
                .tables
                .insert(descriptor.table.clone(), descriptor.name.clone());
            registry.types.insert(descriptor.name.clone(), descriptor);
        }

        let names: Vec<String> = registry.types.keys().cloned().collect();
        for name in &names {
            registry.validate(name)?;
        }
        for name in &names {
            registry.resolve_joins(name)?;
        }
        for name in &names {
            registry.check_join_columns(name)?;
        }

        tracing::debug!(
            types = registry.types.len(),
            joins = registry.joins.len(),
            "type registry built"
        );
        Ok(registry)
    }
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    pub fn get(&self, type_name: &str) -> PersistResult<&TypeDescriptor> {
        self.types.get(type_name).ok_or_else(|| {
            PersistError::configuration(format!("no type descriptor for '{type_name}'"))
        })
    }

    pub fn by_table(&self, table: &str) -> PersistResult<&TypeDescriptor> {
        let name = self.tables.get(table).ok_or_else(|| {
            PersistError::configuration(format!("no type descriptor maps table '{table}'"))
        })?;
        self.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    pub fn reference(&self, owner: &str, name: &str) -> Option<&ReferenceDescriptor> {
        self.types.get(owner)?.find_reference(name)
    }

    pub fn composition(&self, owner: &str, dotted: &str) -> Option<&CompositionDescriptor> {
        self.types.get(owner)?.find_composition(dotted)
    }

    /// Foreign-key column on the target table linking it to an `owner` row.
    pub fn join_column_for_reference(&self, owner: &str, name: &str) -> PersistResult<&str> {
        self.join(owner, name)
    }

    /// Foreign-key column on a value-object table linking it to its container row.
    pub fn join_column_for_composition(
        &self,
        owner: &str,
        path: &CompositionPath,
    ) -> PersistResult<&str> {
        self.join(owner, &path.dotted())
    }

    /// Compositions of `owner` nested directly below `parent` (or directly
    /// on the entity when `parent` is `None`), in declared order.
    pub fn children_of<'a>(
        &'a self,
        owner: &str,
        parent: Option<&CompositionPath>,
    ) -> Vec<&'a CompositionDescriptor> {
        let Some(descriptor) = self.types.get(owner) else {
            return Vec::new();
        };
        descriptor
            .compositions
            .iter()
            .filter(|c| match parent {
                None => c.path.len() == 1,
                Some(p) => c.path.len() == p.len() + 1 && p.is_strict_prefix_of(&c.path),
            })
            .collect()
    }

    /// Type whose rows contain the value objects of `composition`.
    pub fn container_type<'a>(
        &'a self,
        owner: &'a str,
        composition: &CompositionDescriptor,
    ) -> PersistResult<&'a str> {
        match composition.path.parent() {
            None => Ok(owner),
            Some(parent) => self
                .composition(owner, &parent.dotted())
                .map(|c| c.target.as_str())
                .ok_or_else(|| {
                    PersistError::configuration(format!(
                        "composition '{}' on '{owner}' has no parent composition",
                        composition.path
                    ))
                }),
        }
    }

    /// Columns of `target`'s table that owned references of any type join
    /// through. These hold the owner's key and nothing else.
    pub fn inbound_join_columns(&self, target: &str) -> Vec<&str> {
        let mut columns = Vec::new();
        for owner in self.types.values() {
            for reference in owner.owned_references().filter(|r| r.target == target) {
                if let Ok(column) = self.join(&owner.name, &reference.name) {
                    if !columns.contains(&column) {
                        columns.push(column);
                    }
                }
            }
        }
        columns
    }

    fn join(&self, owner: &str, path: &str) -> PersistResult<&str> {
        self.joins
            .get(&(owner.to_string(), path.to_string()))
            .map(String::as_str)
            .ok_or_else(|| {
                PersistError::configuration(format!("no relation declared for '{owner}.{path}'"))
            })
    }

    fn validate(&self, name: &str) -> PersistResult<()> {
        let descriptor = self.get(name)?;

        match descriptor.kind {
            DescriptorKind::AggregateRoot | DescriptorKind::Entity => {
                if descriptor.identity_field.is_none() {
                    return Err(PersistError::configuration(format!(
                        "'{name}' has no identity field"
                    )));
                }
            }
            DescriptorKind::ValueObject => {
                if !descriptor.references.is_empty() || !descriptor.compositions.is_empty() {
                    return Err(PersistError::configuration(format!(
                        "value object '{name}' declares references; nest value objects through composition paths on the owning entity"
                    )));
                }
            }
        }

        for fk in &descriptor.foreign_keys {
            self.get(&fk.references)?;
        }

        for reference in &descriptor.references {
            let target = self.get(&reference.target)?;
            match reference.kind {
                ReferenceKind::Composition if target.kind != DescriptorKind::Entity => {
                    return Err(PersistError::configuration(format!(
                        "'{name}.{}' composes '{}', which is not an entity",
                        reference.name, reference.target
                    )));
                }
                ReferenceKind::AggregateRoot
                    if target.kind != DescriptorKind::AggregateRoot
                        || reference.multiplicity != Multiplicity::One =>
                {
                    return Err(PersistError::configuration(format!(
                        "'{name}.{}' must be a singular pointer to an aggregate root",
                        reference.name
                    )));
                }
                _ => {}
            }
        }

        let mut relations: Vec<&str> = Vec::new();
        for reference in &descriptor.references {
            if relations.contains(&reference.name.as_str()) {
                return Err(PersistError::configuration(format!(
                    "'{name}' declares reference '{}' twice",
                    reference.name
                )));
            }
            relations.push(&reference.name);
        }

        let mut seen = Vec::new();
        for composition in &descriptor.compositions {
            if composition.path.is_empty() {
                return Err(PersistError::configuration(format!(
                    "'{name}' declares a composition with an empty path"
                )));
            }
            let dotted = composition.path.dotted();
            if seen.contains(&dotted) {
                return Err(PersistError::configuration(format!(
                    "'{name}' declares composition '{dotted}' twice"
                )));
            }
            if relations.contains(&dotted.as_str()) {
                return Err(PersistError::configuration(format!(
                    "'{name}.{dotted}' is both a reference and a composition"
                )));
            }
            seen.push(dotted);

            let target = self.get(&composition.target)?;
            if target.kind != DescriptorKind::ValueObject {
                return Err(PersistError::configuration(format!(
                    "'{name}.{}' composes '{}', which is not a value object",
                    composition.path, composition.target
                )));
            }
            self.container_type(name, composition)?;
        }
        Ok(())
    }

    fn resolve_joins(&mut self, name: &str) -> PersistResult<()> {
        let descriptor = self.get(name)?.clone();
        let mut resolved = Vec::new();

        for reference in descriptor.owned_references() {
            let column = self.resolve_join(
                name,
                &reference.target,
                &reference.name,
                reference.join_column.as_deref(),
            )?;
            resolved.push((reference.name.clone(), column));
        }
        for composition in &descriptor.compositions {
            let container = self.container_type(name, composition)?.to_string();
            let column = self.resolve_join(
                &container,
                &composition.target,
                &composition.path.dotted(),
                composition.join_column.as_deref(),
            )?;
            resolved.push((composition.path.dotted(), column));
        }

        for (path, column) in resolved {
            self.joins.insert((name.to_string(), path), column);
        }
        Ok(())
    }

    /// A join column is written from the owner's key, so it cannot also
    /// carry a scalar field or an aggregate-root pointer.
    fn check_join_columns(&self, name: &str) -> PersistResult<()> {
        let descriptor = self.get(name)?;
        for column in self.inbound_join_columns(name) {
            let clash = descriptor.fields.iter().any(|f| f == column)
                || descriptor.root_pointers().any(|r| r.name == column);
            if clash {
                return Err(PersistError::configuration(format!(
                    "'{name}.{column}' is a join column and cannot also be a field or root pointer"
                )));
            }
        }
        Ok(())
    }

    fn resolve_join(
        &self,
        container: &str,
        target: &str,
        path: &str,
        explicit: Option<&str>,
    ) -> PersistResult<String> {
        let target_descriptor = self.get(target)?;
        let candidates: Vec<&str> = target_descriptor
            .foreign_keys
            .iter()
            .filter(|fk| fk.references == container)
            .map(|fk| fk.column.as_str())
            .collect();

        if let Some(column) = explicit {
            return if candidates.contains(&column) {
                Ok(column.to_string())
            } else {
                Err(PersistError::configuration(format!(
                    "'{target}.{column}' is not a foreign key to '{container}' (relation '{path}')"
                )))
            };
        }

        match candidates.as_slice() {
            [] => Err(PersistError::configuration(format!(
                "no foreign key on '{target}' references '{container}' (relation '{path}')"
            ))),
            [column] => Ok(column.to_string()),
            many => Err(PersistError::MultipleCandidateRelations {
                owner: container.to_string(),
                target: target.to_string(),
                path: path.to_string(),
                columns: many.iter().map(|c| c.to_string()).collect(),
            }),
        }
    }
}
