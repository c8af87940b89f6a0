//! # Type Registry
//!
//! Owns the live model types and the instance identity cache.
//!
//! | Responsibility | Mechanism |
//! |----------------|-----------|
//! | name → type | `declare` builds a [`ModelType`] from a [`ModelDef`] |
//! | tag → type | full `module.Name` tags, with a pluggable resolver for renamed types |
//! | inheritance | subtypes see persisting ancestor entries they neither redeclare nor exclude |
//! | reverse synthesis | declaring `Rig.joints → Joint` puts a `rig` relation on `Joint` |
//! | declare order | reverses for not-yet-declared targets wait in a backlog |
//! | instance identity | one cached [`Instance`] per node id |
//!
//! Relations on a [`ModelType`] sit behind a lock because synthesis can
//! arrive after instances already hold the `Arc`: declaring a new model
//! extends the schema of its targets in place.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::fields::Field;
use crate::instance::Instance;
use crate::model::NodeId;
use crate::relations::Relation;
use crate::schema::{DEFAULT_NODE_KIND, ModelDef};
use crate::{Error, Result};

/// Module and name of the implicit base every model extends. The base
/// carries no schema and is never tagged onto a node.
pub(crate) const BASE_MODULE: &str = "metanode";
pub(crate) const BASE_MODEL: &str = "Model";

/// Maps an unresolvable persisted tag to a registered type name or tag.
pub type TypeResolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

// ============================================================================
// ModelType
// ============================================================================

/// A declared model type, alive in the registry. Instances hold an
/// `Arc` to theirs; schema lookups walk the inheritance chain.
pub struct ModelType {
    module: String,
    name: String,
    tag: String,
    node_kind: String,
    parent: Option<Arc<ModelType>>,
    fields: Vec<Field>,
    /// Own relations plus reverses synthesized by later declarations.
    relations: RwLock<Vec<Relation>>,
    /// Inherited names this type suppresses.
    exclude: Vec<String>,
    base: bool,
}

impl ModelType {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The persisted tag, `<module>.<TypeName>`.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn node_kind(&self) -> &str {
        &self.node_kind
    }

    pub fn parent(&self) -> Option<&Arc<ModelType>> {
        self.parent.as_ref()
    }

    /// The untagged base model.
    pub fn is_base(&self) -> bool {
        self.base
    }

    pub fn is_subtype_of(&self, name: &str) -> bool {
        if self.name == name {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.is_subtype_of(name))
    }

    fn excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|n| n == name)
    }

    /// Whether this type itself declares `name`, either kind. An own
    /// entry shadows the whole ancestor chain under that name.
    fn declares(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name() == name)
            || self.relations.read().iter().any(|r| r.name() == name)
    }

    /// Find a field on the composed schema: own declarations first,
    /// then persisting ancestor entries not excluded or shadowed here.
    pub fn field(&self, name: &str) -> Option<Field> {
        if let Some(field) = self.fields.iter().find(|f| f.name() == name) {
            return Some(field.clone());
        }
        if self.excluded(name) || self.relations.read().iter().any(|r| r.name() == name) {
            return None;
        }
        self.parent
            .as_ref()
            .and_then(|p| p.field(name))
            .filter(|f| f.persists())
    }

    /// Find a relation on the composed schema, same visibility rules as
    /// [`field`](Self::field).
    pub fn relation(&self, name: &str) -> Option<Relation> {
        if let Some(relation) = self.relations.read().iter().find(|r| r.name() == name) {
            return Some(relation.clone());
        }
        if self.excluded(name) || self.fields.iter().any(|f| f.name() == name) {
            return None;
        }
        self.parent
            .as_ref()
            .and_then(|p| p.relation(name))
            .filter(|r| r.persists())
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.field(name).is_some() || self.relation(name).is_some()
    }

    /// Every field on the composed schema, base-most first. Overridden,
    /// excluded, and non-persisting ancestor entries are gone.
    pub fn all_fields(&self) -> Vec<Field> {
        let mut out: Vec<Field> = self
            .parent
            .as_ref()
            .map(|p| p.all_fields())
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f.persists() && !self.excluded(f.name()) && !self.declares(f.name()))
            .collect();
        out.extend(self.fields.iter().cloned());
        out
    }

    /// Every relation on the composed schema, base-most first.
    pub fn all_relations(&self) -> Vec<Relation> {
        let mut out: Vec<Relation> = self
            .parent
            .as_ref()
            .map(|p| p.all_relations())
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.persists() && !self.excluded(r.name()) && !self.declares(r.name()))
            .collect();
        out.extend(self.relations.read().iter().cloned());
        out
    }

    /// Install a synthesized reverse relation. Re-synthesizing a
    /// shape-identical reverse is a no-op, which is what lets both ends
    /// of a relation declare their side explicitly; any other collision
    /// is a declaration error.
    pub(crate) fn add_relation(&self, relation: Relation) -> Result<()> {
        {
            let relations = self.relations.read();
            if let Some(existing) = relations.iter().find(|r| r.name() == relation.name()) {
                if existing.partner() == relation.partner()
                    && existing.target() == relation.target()
                    && existing.is_rev() == relation.is_rev()
                    && existing.is_multi() == relation.is_multi()
                    && existing.is_far_multi() == relation.is_far_multi()
                {
                    return Ok(());
                }
                return Err(Error::Config(format!(
                    "type '{}' already has a member named '{}'",
                    self.name,
                    relation.name()
                )));
            }
        }
        if self.has_member(relation.name()) {
            return Err(Error::Config(format!(
                "reverse relation '{}' collides with a member of '{}'",
                relation.name(),
                self.name
            )));
        }
        self.relations.write().push(relation);
        Ok(())
    }
}

impl std::fmt::Debug for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelType")
            .field("tag", &self.tag)
            .field("node_kind", &self.node_kind)
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
struct RegistryInner {
    types: HashMap<String, Arc<ModelType>>,
    by_tag: HashMap<String, Arc<ModelType>>,
    /// target type name → (owner type name, forward relation)
    pending_reverse: HashMap<String, Vec<(String, Relation)>>,
    instances: HashMap<NodeId, Instance>,
    resolver: Option<TypeResolver>,
}

pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let registry = Self { inner: RwLock::new(RegistryInner::default()) };
        registry.install_base();
        registry
    }

    fn install_base(&self) {
        let base = Arc::new(ModelType {
            module: BASE_MODULE.to_string(),
            name: BASE_MODEL.to_string(),
            tag: format!("{BASE_MODULE}.{BASE_MODEL}"),
            node_kind: DEFAULT_NODE_KIND.to_string(),
            parent: None,
            fields: Vec::new(),
            relations: RwLock::new(Vec::new()),
            exclude: Vec::new(),
            base: true,
        });
        let mut inner = self.inner.write();
        inner.types.insert(base.name.clone(), Arc::clone(&base));
        inner.by_tag.insert(base.tag.clone(), base);
    }

    /// Drop every type and cached instance, back to a fresh registry.
    pub fn reset(&self) {
        *self.inner.write() = RegistryInner::default();
        self.install_base();
    }

    // ------------------------------------------------------------------
    // Declaration
    // ------------------------------------------------------------------

    /// Register a model type. The parent, when named, must already be
    /// declared; reverse relations onto not-yet-declared targets are
    /// synthesized when those targets arrive.
    pub fn declare(&self, def: ModelDef) -> Result<Arc<ModelType>> {
        def.check_definition()?;
        let mut inner = self.inner.write();

        if inner.types.contains_key(def.name()) {
            return Err(Error::Config(format!(
                "model '{}' is already registered",
                def.name()
            )));
        }
        let parent = match def.parent_name() {
            Some(name) => Arc::clone(inner.types.get(name).ok_or_else(|| {
                Error::Config(format!(
                    "model '{}' extends undeclared '{name}'",
                    def.name()
                ))
            })?),
            None => Arc::clone(&inner.types[BASE_MODEL]),
        };

        let node_kind = def
            .declared_node_kind()
            .unwrap_or_else(|| parent.node_kind())
            .to_string();
        let relations: Vec<Relation> = def
            .relations()
            .iter()
            .map(|r| r.clone().with_resolved_partner(def.name()))
            .collect();

        let ty = Arc::new(ModelType {
            module: def.module().to_string(),
            name: def.name().to_string(),
            tag: def.type_tag(),
            node_kind,
            parent: Some(parent),
            fields: def.fields().to_vec(),
            relations: RwLock::new(relations),
            exclude: def.exclusions().to_vec(),
            base: false,
        });
        // Put this type's reverses on targets that already exist; park
        // the rest until the target declares. The type itself is not
        // registered yet, so a relation targeting its own type parks
        // here and installs in the drain below. Snapshot the list:
        // installs write the lock being walked.
        let forwards: Vec<Relation> = ty.relations.read().clone();
        for relation in &forwards {
            let Some(target) = relation.target() else { continue };
            let Some(reverse) = relation.reversed(&ty.name) else { continue };
            match inner.types.get(target) {
                Some(target_ty) => {
                    if target_ty.excluded(relation.name()) || target_ty.excluded(reverse.name()) {
                        debug!(owner = %ty.name, target, relation = relation.name(),
                            "target excludes the reverse; skipping synthesis");
                    } else {
                        target_ty.add_relation(reverse)?;
                    }
                }
                None => {
                    if target != ty.name {
                        debug!(owner = %ty.name, target, relation = relation.name(),
                            "reverse synthesis deferred until target declares");
                    }
                    inner
                        .pending_reverse
                        .entry(target.to_string())
                        .or_default()
                        .push((ty.name.clone(), relation.clone()));
                }
            }
        }

        // Drain reverses other types parked for us.
        if let Some(pending) = inner.pending_reverse.remove(&ty.name) {
            for (owner, forward) in pending {
                let Some(reverse) = forward.reversed(&owner) else { continue };
                if ty.excluded(forward.name()) || ty.excluded(reverse.name()) {
                    debug!(owner = %owner, target = %ty.name, relation = forward.name(),
                        "target excludes the reverse; skipping synthesis");
                    continue;
                }
                ty.add_relation(reverse)?;
            }
        }

        // Register only once every reverse landed; a synthesis error
        // leaves the registry without the failed type.
        inner.types.insert(ty.name.clone(), Arc::clone(&ty));
        inner.by_tag.insert(ty.tag.clone(), Arc::clone(&ty));

        Ok(ty)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn get(&self, name: &str) -> Option<Arc<ModelType>> {
        self.inner.read().types.get(name).cloned()
    }

    pub fn by_tag(&self, tag: &str) -> Option<Arc<ModelType>> {
        self.inner.read().by_tag.get(tag).cloned()
    }

    /// Resolve a persisted tag, falling back to the resolver hook for
    /// tags from renamed or relocated types.
    pub fn resolve_tag(&self, tag: &str) -> Result<Arc<ModelType>> {
        let resolver = {
            let inner = self.inner.read();
            if let Some(ty) = inner.by_tag.get(tag) {
                return Ok(Arc::clone(ty));
            }
            inner.resolver.clone()
        };
        if let Some(resolver) = resolver {
            if let Some(name) = resolver(tag) {
                let inner = self.inner.read();
                if let Some(ty) = inner.types.get(&name).or_else(|| inner.by_tag.get(&name)) {
                    return Ok(Arc::clone(ty));
                }
            }
        }
        Err(Error::Resolution(format!("unknown type tag '{tag}'")))
    }

    pub fn set_resolver(&self, resolver: Option<TypeResolver>) {
        self.inner.write().resolver = resolver;
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().types.keys().cloned().collect();
        names.sort();
        names
    }

    // ------------------------------------------------------------------
    // Instance identity cache
    // ------------------------------------------------------------------

    pub(crate) fn cache(&self, instance: Instance) {
        self.inner.write().instances.insert(instance.id(), instance);
    }

    pub(crate) fn cached(&self, id: NodeId) -> Option<Instance> {
        self.inner.read().instances.get(&id).cloned()
    }

    pub(crate) fn evict(&self, id: NodeId) -> Option<Instance> {
        self.inner.write().instances.remove(&id)
    }

    /// Cached instances of a type or any of its subtypes, in node order.
    pub fn instances_of(&self, type_name: &str) -> Vec<Instance> {
        let mut out: Vec<Instance> = self
            .inner
            .read()
            .instances
            .values()
            .filter(|i| i.model().is_subtype_of(type_name))
            .cloned()
            .collect();
        out.sort_by_key(Instance::id);
        out
    }

    /// Cached instances of exactly this type, in node order.
    pub fn instances_of_exact(&self, type_name: &str) -> Vec<Instance> {
        let mut out: Vec<Instance> = self
            .inner
            .read()
            .instances
            .values()
            .filter(|i| i.type_name() == type_name)
            .cloned()
            .collect();
        out.sort_by_key(Instance::id);
        out
    }

    pub fn cached_count(&self) -> usize {
        self.inner.read().instances.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
