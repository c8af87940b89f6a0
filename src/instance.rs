//! # Instances
//!
//! An [`Instance`] is a typed handle onto one scene node. It owns no
//! state beyond identity: reads and writes go straight through the
//! node's attributes, so however many handles exist, there is one truth.
//!
//! The registry keeps at most one cached handle per node. Binding hooks
//! the node's lifecycle: `AboutToDelete` runs cascade deletion over the
//! instance's cascading relations, `Destroyed` evicts it from the cache.
//! A handle whose node is gone answers `exists() == false` and fails
//! everything else with [`Error::Stale`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::warn;
use uuid::Uuid;

use crate::graph::{CallbackId, EditScope, NodeEvent};
use crate::managers::{related_node_ids, RelationManager};
use crate::model::{NodeId, PlugPath, Value};
use crate::registry::ModelType;
use crate::scene::SceneInner;
use crate::schema::TAG_ATTRIBUTE;
use crate::{Error, Result};

// ============================================================================
// Instance
// ============================================================================

/// Typed handle onto one scene node. Cheap to clone; equality is node
/// identity.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

struct InstanceInner {
    scene: Weak<SceneInner>,
    id: NodeId,
    model: Arc<ModelType>,
    /// Set while this node is being torn down; breaks cascade cycles.
    deleting: AtomicBool,
    callbacks: [CallbackId; 2],
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Instance {}

impl std::hash::Hash for Instance {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl Instance {
    /// Build the handle for a node and hook its lifecycle. Returns the
    /// cached handle when one already exists (one instance per node).
    pub(crate) fn bind(scene: &Arc<SceneInner>, id: NodeId, model: Arc<ModelType>) -> Instance {
        if let Some(existing) = scene.registry.cached(id) {
            return existing;
        }
        let weak = Arc::downgrade(scene);
        let about_to_delete = scene.graph.on_node_event(id, NodeEvent::AboutToDelete, {
            let weak = weak.clone();
            Arc::new(move |node| cascade_hook(&weak, node))
        });
        let destroyed = scene.graph.on_node_event(id, NodeEvent::Destroyed, {
            let weak = weak.clone();
            Arc::new(move |node| {
                if let Some(scene) = weak.upgrade() {
                    scene.registry.evict(node);
                }
            })
        });
        let instance = Instance {
            inner: Arc::new(InstanceInner {
                scene: weak,
                id,
                model,
                deleting: AtomicBool::new(false),
                callbacks: [about_to_delete, destroyed],
            }),
        };
        scene.registry.cache(instance.clone());
        instance
    }

    pub(crate) fn scene(&self) -> Result<Arc<SceneInner>> {
        self.inner
            .scene
            .upgrade()
            .ok_or_else(|| Error::Stale("the scene owning this instance is gone".into()))
    }

    fn ensure_alive(&self, scene: &SceneInner) -> Result<()> {
        if scene.graph.node_exists(self.inner.id) {
            Ok(())
        } else {
            Err(Error::Stale(format!(
                "{} node {} is gone",
                self.inner.model.name(),
                self.inner.id
            )))
        }
    }

    fn display_name(&self, scene: &SceneInner) -> String {
        scene
            .graph
            .node_info(self.inner.id)
            .map(|info| info.name)
            .unwrap_or_else(|_| self.inner.id.to_string())
    }

    pub(crate) fn is_deleting(&self) -> bool {
        self.inner.deleting.load(Ordering::SeqCst)
    }

    /// Cancel this handle's lifecycle callbacks on the backend.
    pub(crate) fn release_callbacks(&self, graph: &dyn crate::graph::GraphBackend) {
        for callback in self.inner.callbacks {
            graph.remove_callback(callback);
        }
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn model(&self) -> &Arc<ModelType> {
        &self.inner.model
    }

    pub fn type_name(&self) -> &str {
        self.inner.model.name()
    }

    /// Whether the node behind this handle still exists.
    pub fn exists(&self) -> bool {
        self.inner
            .scene
            .upgrade()
            .map(|scene| scene.graph.node_exists(self.inner.id))
            .unwrap_or(false)
    }

    pub fn uuid(&self) -> Result<Uuid> {
        let scene = self.scene()?;
        Ok(scene.graph.node_info(self.inner.id)?.uuid)
    }

    pub fn node_kind(&self) -> Result<String> {
        let scene = self.scene()?;
        Ok(scene.graph.node_info(self.inner.id)?.kind)
    }

    // ------------------------------------------------------------------
    // Naming
    // ------------------------------------------------------------------

    pub fn name(&self) -> Result<String> {
        let scene = self.scene()?;
        Ok(scene.graph.node_info(self.inner.id)?.name)
    }

    pub fn leaf_name(&self) -> Result<String> {
        let scene = self.scene()?;
        Ok(scene.graph.node_info(self.inner.id)?.leaf_name().to_string())
    }

    pub fn namespace(&self) -> Result<Option<String>> {
        let scene = self.scene()?;
        Ok(scene
            .graph
            .node_info(self.inner.id)?
            .namespace()
            .map(str::to_string))
    }

    /// Rename, keeping the current namespace when the new name does not
    /// carry one. Returns the name actually taken (uniquified on clash).
    pub fn rename(&self, name: &str) -> Result<String> {
        let scene = self.scene()?;
        self.ensure_alive(&scene)?;
        let target = if name.contains(':') {
            name.to_string()
        } else {
            match self.namespace()? {
                Some(ns) => format!("{ns}:{name}"),
                None => name.to_string(),
            }
        };
        scene.graph.rename_node(self.inner.id, &target)
    }

    /// Pipe-delimited path from the root, `|parent|child`.
    pub fn path(&self) -> Result<String> {
        let scene = self.scene()?;
        let mut segments = Vec::new();
        let mut cursor = Some(self.inner.id);
        while let Some(id) = cursor {
            let info = scene.graph.node_info(id)?;
            segments.push(info.name);
            cursor = info.parent;
        }
        segments.reverse();
        Ok(format!("|{}", segments.join("|")))
    }

    /// Identical to [`path`](Self::path): this graph model has no
    /// instancing, so every node has exactly one path.
    pub fn full_path(&self) -> Result<String> {
        self.path()
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    pub fn has_attribute(&self, name: &str) -> bool {
        self.inner
            .scene
            .upgrade()
            .map(|scene| scene.graph.has_attribute(self.inner.id, name))
            .unwrap_or(false)
    }

    /// Plug for an attribute on this node, for raw graph access.
    pub fn plug(&self, name: &str) -> Result<PlugPath> {
        let scene = self.scene()?;
        self.ensure_alive(&scene)?;
        if !scene.graph.has_attribute(self.inner.id, name) {
            return Err(Error::NotFound(format!(
                "{} has no attribute '{name}'",
                self.display_name(&scene)
            )));
        }
        Ok(PlugPath::root(self.inner.id, name))
    }

    /// Read a field. The backing attribute is created on the fly when a
    /// schema addition has not been migrated onto this node yet.
    pub fn get(&self, name: &str) -> Result<Value> {
        let scene = self.scene()?;
        self.ensure_alive(&scene)?;
        let field = self.lookup_field(name)?;
        if !scene.graph.has_attribute(self.inner.id, name) {
            field.create(scene.graph.as_ref(), self.inner.id)?;
        }
        field.get(scene.graph.as_ref(), self.inner.id)
    }

    /// Validate and write a field as one undoable edit.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let scene = self.scene()?;
        self.ensure_alive(&scene)?;
        let field = self.lookup_field(name)?;
        let value = value.into();
        let scope = EditScope::new(scene.graph.as_ref(), &format!("set {name}"));
        if !scene.graph.has_attribute(self.inner.id, name) {
            field.create(scene.graph.as_ref(), self.inner.id)?;
        }
        field.set(scene.graph.as_ref(), self.inner.id, &value, false)?;
        scope.commit()
    }

    fn lookup_field(&self, name: &str) -> Result<crate::fields::Field> {
        if let Some(field) = self.inner.model.field(name) {
            return Ok(field);
        }
        if self.inner.model.relation(name).is_some() {
            return Err(Error::Config(format!(
                "'{name}' is a relation on '{}'; use relation(\"{name}\")",
                self.inner.model.name()
            )));
        }
        Err(Error::Config(format!(
            "'{}' has no field '{name}'",
            self.inner.model.name()
        )))
    }

    // ------------------------------------------------------------------
    // Relations
    // ------------------------------------------------------------------

    pub fn relation(&self, name: &str) -> Result<RelationManager> {
        let scene = self.scene()?;
        let relation = self.inner.model.relation(name).ok_or_else(|| {
            Error::Config(format!(
                "'{}' has no relation '{name}'",
                self.inner.model.name()
            ))
        })?;
        Ok(RelationManager::new(scene, self.clone(), relation))
    }

    /// First linked instance of a relation, if any.
    pub fn related(&self, name: &str) -> Result<Option<Instance>> {
        self.relation(name)?.first()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn lock(&self, locked: bool) -> Result<()> {
        let scene = self.scene()?;
        self.ensure_alive(&scene)?;
        scene.graph.set_locked(self.inner.id, locked)
    }

    /// Delete the node (unlocking it first), its child subtree, and,
    /// through the lifecycle hook, everything its cascading relations
    /// reach.
    pub fn delete(&self) -> Result<()> {
        let scene = self.scene()?;
        self.ensure_alive(&scene)?;
        let graph = scene.graph.as_ref();
        let scope = EditScope::new(graph, &format!("delete {}", self.display_name(&scene)));
        if graph.node_info(self.inner.id)?.locked {
            graph.set_locked(self.inner.id, false)?;
        }
        graph.delete_node(self.inner.id)?;
        scope.commit()
    }

    /// Strip every managed attribute and the type tag, leaving a plain
    /// node behind. The handle is evicted and goes stale.
    pub fn clear(&self) -> Result<()> {
        let scene = self.scene()?;
        self.ensure_alive(&scene)?;
        let graph = scene.graph.as_ref();
        let scope = EditScope::new(graph, &format!("clear {}", self.display_name(&scene)));
        for relation in self.inner.model.all_relations() {
            if graph.has_attribute(self.inner.id, relation.name()) {
                graph.remove_attribute(self.inner.id, relation.name())?;
            }
        }
        for field in self.inner.model.all_fields() {
            if graph.has_attribute(self.inner.id, field.name()) {
                graph.remove_attribute(self.inner.id, field.name())?;
            }
        }
        if graph.has_attribute(self.inner.id, TAG_ATTRIBUTE) {
            graph.remove_attribute(self.inner.id, TAG_ATTRIBUTE)?;
        }
        scope.commit()?;
        self.release_callbacks(graph);
        scene.registry.evict(self.inner.id);
        Ok(())
    }
}

/// Cascade deletion over the dying node's cascading relations. Runs on
/// the backend's `AboutToDelete` dispatch, outside its locks, so the
/// nested deletes below re-enter the backend freely.
fn cascade_hook(weak: &Weak<SceneInner>, node: NodeId) {
    let Some(scene) = weak.upgrade() else { return };
    let Some(instance) = scene.registry.cached(node) else { return };
    if instance.inner.deleting.swap(true, Ordering::SeqCst) {
        return;
    }
    for relation in instance.model().all_relations() {
        if relation.is_rev() || !relation.cascades() {
            continue;
        }
        let far_ids = match related_node_ids(scene.graph.as_ref(), node, &relation) {
            Ok(ids) => ids,
            Err(error) => {
                warn!(node = %node, relation = relation.name(), %error,
                    "skipping cascade for unreadable relation");
                continue;
            }
        };
        for far in far_ids {
            let tearing_down = scene
                .registry
                .cached(far)
                .map(|i| i.is_deleting())
                .unwrap_or(false);
            if tearing_down || !scene.graph.node_exists(far) {
                continue;
            }
            if let Err(error) = scene.graph.delete_node(far) {
                warn!(far = %far, %error, "cascade delete failed");
            }
        }
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<#{}>", self.inner.model.name(), self.inner.id)
    }
}

impl std::fmt::Display for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.scene.upgrade() {
            Some(scene) => write!(f, "{}", self.display_name(&scene)),
            None => write!(f, "#{}", self.inner.id),
        }
    }
}
