//! # Scene Facade
//!
//! [`Scene`] ties a [`GraphBackend`] to a [`Registry`] and is the one
//! entry point applications hold. Declaring models, creating instances,
//! adopting or sweeping existing nodes, and the migration pass all live
//! here; everything below works through the backend trait.
//!
//! A scene is cheap to clone and shares its state; instances hold a weak
//! reference back, so dropping every `Scene` clone releases the graph
//! even while instance handles linger.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::fields::Field;
use crate::graph::{EditScope, GraphBackend, MemoryGraph};
use crate::instance::Instance;
use crate::managers::TypeManager;
use crate::model::{NodeId, PlugPath, Value};
use crate::registry::{ModelType, Registry, TypeResolver, BASE_MODEL};
use crate::schema::{ModelDef, TAG_ATTRIBUTE};
use crate::{Error, Result};

// ============================================================================
// CreateArgs
// ============================================================================

/// One creation-time argument: a field value or relation links.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Nodes(Vec<Instance>),
}

/// Arguments for creating an instance. Applied after the node carries
/// its full schema: links first, then field values, each in the order
/// they were added.
///
/// ```no_run
/// # use metanode::{CreateArgs, Scene};
/// # let scene = Scene::in_memory();
/// # let rig = scene.create("Rig", CreateArgs::new()).unwrap();
/// let joint = scene.create(
///     "Joint",
///     CreateArgs::new().name("spine_01").set("side", 1).link("rig", &rig),
/// )?;
/// # Ok::<(), metanode::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct CreateArgs {
    pub(crate) name: Option<String>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) values: Vec<(String, Arg)>,
}

impl CreateArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn parent(mut self, parent: &Instance) -> Self {
        self.parent = Some(parent.id());
        self
    }

    pub fn parent_node(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set a field at creation time. Applies even to uneditable fields.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((field.into(), Arg::Value(value.into())));
        self
    }

    /// Link one instance through a relation.
    pub fn link(mut self, relation: impl Into<String>, far: &Instance) -> Self {
        self.values
            .push((relation.into(), Arg::Nodes(vec![far.clone()])));
        self
    }

    /// Link several instances through an array relation.
    pub fn link_many(mut self, relation: impl Into<String>, fars: &[Instance]) -> Self {
        self.values
            .push((relation.into(), Arg::Nodes(fars.to_vec())));
        self
    }
}

// ============================================================================
// MigrationReport
// ============================================================================

/// What one [`Scene::migrate`] pass did, per node and attribute.
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Attributes the node was missing, now created.
    pub created: Vec<(NodeId, String)>,
    /// Attributes whose stored shape drifted; recreated, stored values
    /// and links through them lost.
    pub repaired: Vec<(NodeId, String)>,
    /// Nodes whose tag was rewritten to the current tag of their type.
    pub retagged: Vec<NodeId>,
    /// Tagged nodes no registered type or resolver could claim.
    pub unresolved: Vec<(NodeId, String)>,
    /// Nodes whose repair failed, with the error text.
    pub failed: Vec<(NodeId, String)>,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.created.is_empty()
            && self.repaired.is_empty()
            && self.retagged.is_empty()
            && self.unresolved.is_empty()
            && self.failed.is_empty()
    }

    pub fn changes(&self) -> usize {
        self.created.len() + self.repaired.len() + self.retagged.len()
    }
}

// ============================================================================
// Scene
// ============================================================================

pub(crate) struct SceneInner {
    pub(crate) graph: Arc<dyn GraphBackend>,
    pub(crate) registry: Registry,
}

/// Handle onto one graph plus the model registry bound to it.
#[derive(Clone)]
pub struct Scene {
    inner: Arc<SceneInner>,
}

impl Scene {
    /// Scene over a fresh [`MemoryGraph`].
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryGraph::new()))
    }

    pub fn with_backend(graph: Arc<dyn GraphBackend>) -> Self {
        Scene {
            inner: Arc::new(SceneInner { graph, registry: Registry::new() }),
        }
    }

    pub fn graph(&self) -> &Arc<dyn GraphBackend> {
        &self.inner.graph
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    /// Register a model. See [`Registry::declare`].
    pub fn declare(&self, def: ModelDef) -> Result<Arc<ModelType>> {
        self.inner.registry.declare(def)
    }

    /// Scene-wide manager for exactly this model; subtypes stay out of
    /// view.
    pub fn manager(&self, type_name: &str) -> Result<TypeManager> {
        let ty = self
            .inner
            .registry
            .get(type_name)
            .ok_or_else(|| Error::Config(format!("unknown model '{type_name}'")))?;
        Ok(TypeManager::new(Arc::clone(&self.inner), ty, false))
    }

    /// [`manager`](Self::manager) widened to the model and every
    /// subtype.
    pub fn manager_typed(&self, type_name: &str) -> Result<TypeManager> {
        let ty = self
            .inner
            .registry
            .get(type_name)
            .ok_or_else(|| Error::Config(format!("unknown model '{type_name}'")))?;
        Ok(TypeManager::new(Arc::clone(&self.inner), ty, true))
    }

    /// Hook for resolving tags left behind by renamed or moved types.
    pub fn set_type_resolver(&self, resolver: Option<TypeResolver>) {
        self.inner.registry.set_resolver(resolver);
    }

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    /// Create a node of `type_name`'s kind, stamp the full schema onto
    /// it, then apply `args`. One undoable edit; a failure rolls the
    /// node back out.
    pub fn create(&self, type_name: &str, args: CreateArgs) -> Result<Instance> {
        self.inner.create_instance(type_name, args)
    }

    /// Typed handle for a tagged node.
    pub fn instance(&self, node: NodeId) -> Result<Instance> {
        self.inner.instance_for(node)
    }

    /// Typed handle for a tagged node found by name or `|`-path.
    pub fn find(&self, name: &str) -> Result<Option<Instance>> {
        match self.inner.graph.find_node(name)? {
            Some(node) => Ok(Some(self.inner.instance_for(node)?)),
            None => Ok(None),
        }
    }

    /// Handle for any node. Tagged nodes resolve to their model; plain
    /// nodes come back as base-model handles with no fields, which is
    /// what collections hold.
    pub fn wrap(&self, node: NodeId) -> Result<Instance> {
        self.inner.instance_or_base(node)
    }

    /// Adopt an existing node: stamp the model's schema and tag onto it.
    /// The node keeps its attributes and values; missing ones appear.
    /// Adopting a node tagged with a different live type is an error;
    /// [`Instance::clear`] it first.
    pub fn attach(&self, type_name: &str, node: NodeId) -> Result<Instance> {
        let ty = self
            .inner
            .registry
            .get(type_name)
            .ok_or_else(|| Error::Config(format!("unknown model '{type_name}'")))?;
        if !self.inner.graph.node_exists(node) {
            return Err(Error::DoesNotExist(format!("no node {node}")));
        }
        if let Some(tag) = self.inner.read_tag(node)? {
            if let Ok(current) = self.inner.registry.resolve_tag(&tag) {
                if current.name() != ty.name() {
                    return Err(Error::Usage(format!(
                        "node {node} is already a {}; clear() it before attaching {}",
                        current.name(),
                        ty.name()
                    )));
                }
            }
        }
        let scope = EditScope::new(self.inner.graph.as_ref(), &format!("attach {type_name}"));
        let instance = self.inner.init_node(&ty, node, &CreateArgs::new())?;
        scope.commit()?;
        Ok(instance)
    }

    /// Instance of exactly `type_name` named `name`, created when
    /// absent. Subtypes wearing the name do not count as a hit.
    pub fn get_or_create(&self, type_name: &str, name: &str, args: CreateArgs) -> Result<Instance> {
        self.manager(type_name)?.get_or_create(name, args)
    }

    /// Every cached model instance, in creation order. Instances enter
    /// the cache when created or first bound through this scene;
    /// [`initialize`](Self::initialize) fills it from a loaded file.
    pub fn objects(&self) -> Result<Vec<Instance>> {
        Ok(self.inner.registry.instances_of(BASE_MODEL))
    }

    /// [`objects`](Self::objects) narrowed to one model and its subtypes.
    pub fn objects_typed(&self, type_name: &str) -> Result<Vec<Instance>> {
        if self.inner.registry.get(type_name).is_none() {
            return Err(Error::Config(format!("unknown model '{type_name}'")));
        }
        Ok(self.inner.registry.instances_of(type_name))
    }

    /// Sweep the graph and bind an instance for every resolvable tagged
    /// node. Returns how many were bound; unresolvable tags are skipped
    /// with a warning. Run this after loading a persisted scene.
    pub fn initialize(&self) -> Result<usize> {
        let started = Instant::now();
        let mut count = 0;
        for node in self.inner.graph.all_nodes() {
            let Some(tag) = self.inner.read_tag(node)? else { continue };
            match self.inner.registry.resolve_tag(&tag) {
                Ok(ty) => {
                    Instance::bind(&self.inner, node, ty);
                    count += 1;
                }
                Err(error) => {
                    warn!(node = %node, tag, %error, "skipping node with unresolvable tag");
                }
            }
        }
        info!(count, elapsed_ms = started.elapsed().as_millis() as u64, "scene initialized");
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Migration
    // ------------------------------------------------------------------

    /// Walk every tagged node and repair drift against the registered
    /// schemas: create missing attributes, recreate reshaped ones, and
    /// rewrite stale tags the resolver could map. One undoable edit.
    pub fn migrate(&self) -> Result<MigrationReport> {
        let graph = self.inner.graph.as_ref();
        let mut report = MigrationReport::default();
        let scope = EditScope::new(graph, "migrate");
        for node in graph.all_nodes() {
            let Some(tag) = self.inner.read_tag(node)? else { continue };
            let ty = match self.inner.registry.resolve_tag(&tag) {
                Ok(ty) => ty,
                Err(_) => {
                    report.unresolved.push((node, tag));
                    continue;
                }
            };
            if let Err(error) = self.migrate_node(node, &ty, &tag, &mut report) {
                warn!(node = %node, %error, "migration failed");
                report.failed.push((node, error.to_string()));
            }
        }
        scope.commit()?;
        info!(
            created = report.created.len(),
            repaired = report.repaired.len(),
            retagged = report.retagged.len(),
            unresolved = report.unresolved.len(),
            "migration pass complete"
        );
        Ok(report)
    }

    fn migrate_node(
        &self,
        node: NodeId,
        ty: &Arc<ModelType>,
        tag: &str,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let graph = self.inner.graph.as_ref();
        let was_locked = graph.node_info(node)?.locked;
        if was_locked {
            graph.set_locked(node, false)?;
        }
        let outcome = self.repair_node(node, ty, tag, report);
        if was_locked {
            graph.set_locked(node, true)?;
        }
        outcome
    }

    fn repair_node(
        &self,
        node: NodeId,
        ty: &Arc<ModelType>,
        tag: &str,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let graph = self.inner.graph.as_ref();
        for field in ty.all_fields() {
            let expected = field.spec();
            if !graph.has_attribute(node, field.name()) {
                field.create(graph, node)?;
                report.created.push((node, field.name().to_string()));
            } else if !graph.attribute_spec(node, field.name())?.same_shape(&expected) {
                debug!(node = %node, attr = field.name(), "reshaping drifted field");
                graph.remove_attribute(node, field.name())?;
                field.create(graph, node)?;
                report.repaired.push((node, field.name().to_string()));
            }
        }
        for relation in ty.all_relations() {
            let expected = relation.spec();
            if !graph.has_attribute(node, relation.name()) {
                graph.add_attribute(node, &expected)?;
                report.created.push((node, relation.name().to_string()));
            } else {
                let stored = graph.attribute_spec(node, relation.name())?;
                if !stored.same_shape(&expected) || !stored.same_direction(&expected) {
                    debug!(node = %node, attr = relation.name(), "reshaping drifted relation");
                    graph.remove_attribute(node, relation.name())?;
                    graph.add_attribute(node, &expected)?;
                    report.repaired.push((node, relation.name().to_string()));
                }
            }
        }
        if tag != ty.tag() {
            graph.write(
                &PlugPath::root(node, TAG_ATTRIBUTE),
                Value::String(ty.tag().to_string()),
            )?;
            report.retagged.push(node);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Group the mutations of a block into one undoable batch.
    pub fn edit(&self, label: &str) -> EditScope<'_> {
        EditScope::new(self.inner.graph.as_ref(), label)
    }

    pub fn undo(&self) -> Result<bool> {
        self.inner.graph.undo()
    }

    pub fn redo(&self) -> Result<bool> {
        self.inner.graph.redo()
    }

    /// Drop every declared model and cached instance, releasing their
    /// lifecycle callbacks. Graph contents are untouched.
    pub fn reset(&self) {
        for instance in self.inner.registry.instances_of(BASE_MODEL) {
            instance.release_callbacks(self.inner.graph.as_ref());
        }
        self.inner.registry.reset();
    }
}

// ============================================================================
// SceneInner
// ============================================================================

impl SceneInner {
    /// The node's persisted type tag, if it carries a non-empty one. A
    /// tag attribute of the wrong shape reads as no tag at all.
    pub(crate) fn read_tag(&self, node: NodeId) -> Result<Option<String>> {
        if !self.graph.has_attribute(node, TAG_ATTRIBUTE) {
            return Ok(None);
        }
        match self.graph.read(&PlugPath::root(node, TAG_ATTRIBUTE)) {
            Ok(Value::String(tag)) if !tag.is_empty() => Ok(Some(tag)),
            _ => Ok(None),
        }
    }

    /// Typed handle for a tagged node; cached handles win.
    pub(crate) fn instance_for(self: &Arc<Self>, node: NodeId) -> Result<Instance> {
        if let Some(cached) = self.registry.cached(node) {
            return Ok(cached);
        }
        if !self.graph.node_exists(node) {
            return Err(Error::DoesNotExist(format!("no node {node}")));
        }
        let tag = self.read_tag(node)?.ok_or_else(|| {
            Error::DoesNotExist(format!("node {node} carries no model tag"))
        })?;
        let ty = self.registry.resolve_tag(&tag)?;
        Ok(Instance::bind(self, node, ty))
    }

    /// Like [`instance_for`](Self::instance_for), but untagged or
    /// unresolvable nodes come back as plain base-model handles. This is
    /// the collection path, where far nodes are often native ones.
    pub(crate) fn instance_or_base(self: &Arc<Self>, node: NodeId) -> Result<Instance> {
        if let Some(cached) = self.registry.cached(node) {
            return Ok(cached);
        }
        if !self.graph.node_exists(node) {
            return Err(Error::DoesNotExist(format!("no node {node}")));
        }
        if let Some(tag) = self.read_tag(node)? {
            match self.registry.resolve_tag(&tag) {
                Ok(ty) => return Ok(Instance::bind(self, node, ty)),
                Err(error) => {
                    debug!(node = %node, tag, %error, "binding unresolvable node as base model");
                }
            }
        }
        let base = self
            .registry
            .get(BASE_MODEL)
            .ok_or_else(|| Error::Config("base model missing from registry".into()))?;
        Ok(Instance::bind(self, node, base))
    }

    pub(crate) fn create_instance(
        self: &Arc<Self>,
        type_name: &str,
        args: CreateArgs,
    ) -> Result<Instance> {
        let ty = self
            .registry
            .get(type_name)
            .ok_or_else(|| Error::Config(format!("unknown model '{type_name}'")))?;
        let graph = self.graph.as_ref();
        let scope = EditScope::new(graph, &format!("create {type_name}"));
        let node = graph.create_node(ty.node_kind(), args.name.as_deref(), args.parent)?;
        let instance = match self.init_node(&ty, node, &args) {
            Ok(instance) => instance,
            Err(error) => {
                // roll the half-made node back out
                let _ = graph.delete_node(node);
                return Err(error);
            }
        };
        scope.commit()?;
        Ok(instance)
    }

    /// Stamp `ty`'s schema onto the node, apply `args`, and bind the
    /// handle. The tag goes on first so a node that fails mid-init is
    /// still recognizable to migration.
    fn init_node(self: &Arc<Self>, ty: &Arc<ModelType>, node: NodeId, args: &CreateArgs) -> Result<Instance> {
        let graph = self.graph.as_ref();
        if !ty.is_base() {
            if graph.has_attribute(node, TAG_ATTRIBUTE) {
                graph.write(
                    &PlugPath::root(node, TAG_ATTRIBUTE),
                    Value::String(ty.tag().to_string()),
                )?;
            } else {
                tag_field(ty.tag()).create(graph, node)?;
            }
        }
        for relation in ty.all_relations() {
            if !graph.has_attribute(node, relation.name()) {
                graph.add_attribute(node, &relation.spec())?;
            }
        }
        for field in ty.all_fields() {
            if !graph.has_attribute(node, field.name()) {
                field.create(graph, node)?;
            }
        }
        let instance = Instance::bind(self, node, Arc::clone(ty));
        // link args land before field values, same order as the schema
        for (name, arg) in &args.values {
            let Arg::Nodes(fars) = arg else { continue };
            let manager = instance.relation(name)?;
            if manager.relation().is_multi() {
                for far in fars {
                    manager.add(far)?;
                }
            } else {
                match fars.as_slice() {
                    [] => manager.assign(None)?,
                    [far] => manager.assign(Some(far))?,
                    many => {
                        return Err(Error::Usage(format!(
                            "relation '{name}' links a single node; got {}",
                            many.len()
                        )));
                    }
                }
            }
        }
        for (name, arg) in &args.values {
            let Arg::Value(value) = arg else { continue };
            let field = ty.field(name).ok_or_else(|| {
                if ty.relation(name).is_some() {
                    Error::Config(format!(
                        "'{name}' is a relation on '{}'; use link",
                        ty.name()
                    ))
                } else {
                    Error::Config(format!("'{}' has no field '{name}'", ty.name()))
                }
            })?;
            field.set(graph, node, value, true)?;
        }
        Ok(instance)
    }
}

/// The hidden tag field stamped onto every non-base instance. Written
/// through [`Field::create`] so the string default actually lands.
fn tag_field(tag: &str) -> Field {
    Field::string(TAG_ATTRIBUTE)
        .hidden()
        .default(tag.to_string())
        .default_only()
}
