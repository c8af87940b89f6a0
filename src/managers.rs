//! # Managers
//!
//! Query and link surfaces over the graph. A [`TypeManager`] spans every
//! instance of one model in the scene; a [`RelationManager`] spans the
//! nodes linked through one relation of one instance.
//!
//! ## Filter predicates
//!
//! Both managers filter with `(key, value)` predicates where the key is a
//! field name with an optional comparison suffix:
//!
//! | Key          | Meaning        |
//! |--------------|----------------|
//! | `"side"`     | `side == v`    |
//! | `"side__ne"` | `side != v`    |
//! | `"side__lt"` | `side < v`     |
//! | `"side__le"` | `side <= v`    |
//! | `"side__gt"` | `side > v`     |
//! | `"side__ge"` | `side >= v`    |
//!
//! Ordering across mismatched types never matches; `__ne` counts a
//! mismatch as "not equal". The key `"name"` reads the node's name when
//! the model declares no field called `name`.
//!
//! ## Link bookkeeping
//!
//! Every link is one edge, always oriented forward attribute (source) to
//! reverse attribute (destination). Array endpoints get the next free
//! element slot on link and give it back on unlink, so slot order is
//! insertion order and survives removals in between.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::warn;

use crate::graph::EditScope;
use crate::instance::Instance;
use crate::model::{Direction, NodeId, PlugPath, PlugStep, Value};
use crate::registry::ModelType;
use crate::relations::Relation;
use crate::scene::{CreateArgs, SceneInner};
use crate::{Error, Result};

// ============================================================================
// Filter predicates
// ============================================================================

/// Comparison applied between a field's value and a filter operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl FilterOp {
    /// Split `"side__ge"` into `("side", Ge)`. A key without a suffix is
    /// an equality test.
    pub(crate) fn parse_key(key: &str) -> Result<(&str, FilterOp)> {
        match key.rsplit_once("__") {
            None => Ok((key, FilterOp::Eq)),
            Some((field, op)) => {
                let op = match op {
                    "lt" => FilterOp::Lt,
                    "le" => FilterOp::Le,
                    "eq" => FilterOp::Eq,
                    "ne" => FilterOp::Ne,
                    "gt" => FilterOp::Gt,
                    "ge" => FilterOp::Ge,
                    other => {
                        return Err(Error::Config(format!(
                            "unknown filter operator '{other}' in '{key}'"
                        )));
                    }
                };
                Ok((field, op))
            }
        }
    }

    pub(crate) fn matches(&self, actual: &Value, expected: &Value) -> bool {
        let ordering = actual.compare(expected);
        match self {
            FilterOp::Eq => actual == expected || ordering == Some(Ordering::Equal),
            FilterOp::Ne => !(actual == expected || ordering == Some(Ordering::Equal)),
            FilterOp::Lt => ordering == Some(Ordering::Less),
            FilterOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            FilterOp::Gt => ordering == Some(Ordering::Greater),
            FilterOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

type Predicate = (String, FilterOp, Value);

fn parse_predicates(raw: &[(&str, Value)]) -> Result<Vec<Predicate>> {
    raw.iter()
        .map(|(key, value)| {
            let (field, op) = FilterOp::parse_key(key)?;
            Ok((field.to_string(), op, value.clone()))
        })
        .collect()
}

fn matches_predicates(instance: &Instance, predicates: &[Predicate]) -> Result<bool> {
    for (field, op, expected) in predicates {
        let actual = if field == "name" && instance.model().field("name").is_none() {
            Value::String(instance.name()?)
        } else {
            instance.get(field)?
        };
        if !op.matches(&actual, expected) {
            return Ok(false);
        }
    }
    Ok(true)
}

// ============================================================================
// Edge walking
// ============================================================================

/// Node ids linked through `relation` on `owner`, in slot order. An
/// absent relation attribute reads as no links.
pub(crate) fn related_node_ids(
    graph: &dyn crate::graph::GraphBackend,
    owner: NodeId,
    relation: &Relation,
) -> Result<Vec<NodeId>> {
    if !graph.has_attribute(owner, relation.name()) {
        return Ok(Vec::new());
    }
    let root = PlugPath::root(owner, relation.name());
    let own_plugs: Vec<PlugPath> = if relation.is_multi() {
        graph
            .element_indices(&root)?
            .into_iter()
            .map(|index| root.element(index))
            .collect()
    } else {
        vec![root]
    };
    let direction = if relation.is_rev() {
        Direction::Incoming
    } else {
        Direction::Outgoing
    };
    let mut out = Vec::new();
    for plug in own_plugs {
        for far in graph.connections(&plug, direction)? {
            out.push(far.node);
        }
    }
    Ok(out)
}

// ============================================================================
// RelationManager
// ============================================================================

/// Link and query surface for one relation of one instance. Obtained
/// through [`Instance::relation`]; holds no link state of its own, every
/// call reads the graph.
pub struct RelationManager {
    scene: Arc<SceneInner>,
    owner: Instance,
    relation: Relation,
}

impl RelationManager {
    pub(crate) fn new(scene: Arc<SceneInner>, owner: Instance, relation: Relation) -> Self {
        RelationManager { scene, owner, relation }
    }

    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    pub fn owner(&self) -> &Instance {
        &self.owner
    }

    fn ensure_owner(&self) -> Result<()> {
        if self.scene.graph.node_exists(self.owner.id()) {
            Ok(())
        } else {
            Err(Error::Stale(format!(
                "{} node {} is gone",
                self.owner.type_name(),
                self.owner.id()
            )))
        }
    }

    fn own_root(&self) -> PlugPath {
        PlugPath::root(self.owner.id(), self.relation.name())
    }

    fn partner_name(&self) -> Result<&str> {
        self.relation.partner().ok_or_else(|| {
            Error::Config(format!(
                "relation '{}' has no resolved reverse attribute",
                self.relation.name()
            ))
        })
    }

    /// Current links as `(own plug, far plug)` pairs in slot order.
    fn linked_pairs(&self) -> Result<Vec<(PlugPath, PlugPath)>> {
        let graph = self.scene.graph.as_ref();
        if !graph.has_attribute(self.owner.id(), self.relation.name()) {
            return Ok(Vec::new());
        }
        let root = self.own_root();
        let own_plugs: Vec<PlugPath> = if self.relation.is_multi() {
            graph
                .element_indices(&root)?
                .into_iter()
                .map(|index| root.element(index))
                .collect()
        } else {
            vec![root]
        };
        let direction = if self.relation.is_rev() {
            Direction::Incoming
        } else {
            Direction::Outgoing
        };
        let mut pairs = Vec::new();
        for own in own_plugs {
            for far in graph.connections(&own, direction)? {
                pairs.push((own.clone(), far));
            }
        }
        Ok(pairs)
    }

    fn resolve_far(&self, id: NodeId) -> Result<Instance> {
        if self.relation.target().is_some() {
            self.scene.instance_for(id)
        } else {
            self.scene.instance_or_base(id)
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Every linked instance, in slot order.
    pub fn all(&self) -> Result<Vec<Instance>> {
        self.ensure_owner()?;
        self.linked_pairs()?
            .into_iter()
            .map(|(_, far)| self.resolve_far(far.node))
            .collect()
    }

    /// Lazy variant of [`all`](Self::all): link slots are read up front,
    /// instances resolve one by one.
    pub fn all_iter(&self) -> Result<RelatedIter> {
        self.ensure_owner()?;
        let ids: Vec<NodeId> = self
            .linked_pairs()?
            .into_iter()
            .map(|(_, far)| far.node)
            .collect();
        Ok(RelatedIter {
            scene: self.scene.clone(),
            strict: self.relation.target().is_some(),
            ids: ids.into_iter(),
        })
    }

    pub fn filter(&self, predicates: &[(&str, Value)]) -> Result<Vec<Instance>> {
        self.filter_iter(predicates)?.collect()
    }

    pub fn filter_iter(&self, predicates: &[(&str, Value)]) -> Result<FilteredIter> {
        Ok(FilteredIter {
            iter: self.all_iter()?,
            predicates: parse_predicates(predicates)?,
        })
    }

    /// The linked instance of a single-slot relation, if any. On array
    /// relations this is the first slot.
    pub fn first(&self) -> Result<Option<Instance>> {
        self.all_iter()?.next().transpose()
    }

    /// First linked instance matching the predicates, if any.
    pub fn get(&self, predicates: &[(&str, Value)]) -> Result<Option<Instance>> {
        self.filter_iter(predicates)?.next().transpose()
    }

    pub fn get_at(&self, index: usize) -> Result<Instance> {
        self.ensure_owner()?;
        let pairs = self.linked_pairs()?;
        match pairs.get(index) {
            Some((_, far)) => self.resolve_far(far.node),
            None => Err(Error::DoesNotExist(format!(
                "relation '{}' has no link at {index} (length {})",
                self.relation.name(),
                pairs.len()
            ))),
        }
    }

    pub fn length(&self) -> Result<usize> {
        self.ensure_owner()?;
        Ok(self.linked_pairs()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.length()? == 0)
    }

    pub fn contains(&self, far: &Instance) -> Result<bool> {
        self.ensure_owner()?;
        Ok(self
            .linked_pairs()?
            .iter()
            .any(|(_, plug)| plug.node == far.id()))
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Link `far` into the next free slot of an array relation. Returns
    /// whether a link was made: linking the owner to itself or linking
    /// the same instance twice warns, skips, and returns `false`.
    pub fn add(&self, far: &Instance) -> Result<bool> {
        if !self.relation.is_multi() {
            return Err(Error::Usage(format!(
                "relation '{}' links a single node; use assign",
                self.relation.name()
            )));
        }
        self.ensure_owner()?;
        if far == &self.owner {
            warn!(owner = %self.owner, relation = self.relation.name(),
                "cannot be linked to itself; skipping");
            return Ok(false);
        }
        if self.contains(far)? {
            warn!(owner = %self.owner, relation = self.relation.name(), far = %far,
                "already linked; skipping");
            return Ok(false);
        }
        self.check_far(far)?;
        let scope = EditScope::new(self.scene.graph.as_ref(), &format!("link {}", self.relation.name()));
        self.link_one(far)?;
        scope.commit()?;
        Ok(true)
    }

    /// Replace the membership of an array relation. Slot order follows
    /// `fars`; the owner itself is skipped with a warning.
    pub fn set(&self, fars: &[Instance]) -> Result<()> {
        if !self.relation.is_multi() {
            return Err(Error::Usage(format!(
                "relation '{}' links a single node; use assign",
                self.relation.name()
            )));
        }
        self.ensure_owner()?;
        let mut keep = Vec::with_capacity(fars.len());
        for far in fars {
            if far == &self.owner {
                warn!(owner = %self.owner, relation = self.relation.name(),
                    "cannot be linked to itself; skipping");
                continue;
            }
            self.check_far(far)?;
            keep.push(far);
        }
        let scope = EditScope::new(self.scene.graph.as_ref(), &format!("relink {}", self.relation.name()));
        self.unlink_all()?;
        for far in keep {
            self.link_one(far)?;
        }
        scope.commit()
    }

    /// Point a single-slot relation at `far`, or at nothing. Replaces
    /// whatever was linked; assigning the owner itself warns and clears.
    pub fn assign(&self, far: Option<&Instance>) -> Result<()> {
        if self.relation.is_multi() {
            return Err(Error::Usage(format!(
                "relation '{}' links many nodes; use add or set",
                self.relation.name()
            )));
        }
        self.ensure_owner()?;
        let far = match far {
            Some(far) if far == &self.owner => {
                warn!(owner = %self.owner, relation = self.relation.name(),
                    "cannot be linked to itself; clearing instead");
                None
            }
            other => other,
        };
        if let Some(far) = far {
            self.check_far(far)?;
        }
        let scope = EditScope::new(self.scene.graph.as_ref(), &format!("assign {}", self.relation.name()));
        self.unlink_all()?;
        if let Some(far) = far {
            self.link_one(far)?;
        }
        scope.commit()
    }

    /// Unlink `far`, giving its slots back. Unlinking a stranger warns
    /// and changes nothing.
    pub fn remove(&self, far: &Instance) -> Result<()> {
        self.ensure_owner()?;
        let pair = self
            .linked_pairs()?
            .into_iter()
            .find(|(_, plug)| plug.node == far.id());
        let Some((own, far_plug)) = pair else {
            warn!(owner = %self.owner, relation = self.relation.name(), far = %far,
                "not linked; nothing to remove");
            return Ok(());
        };
        let scope = EditScope::new(self.scene.graph.as_ref(), &format!("unlink {}", self.relation.name()));
        self.unlink_pair(&own, &far_plug)?;
        scope.commit()
    }

    /// Unlink everything.
    pub fn clear(&self) -> Result<()> {
        self.ensure_owner()?;
        let scope = EditScope::new(self.scene.graph.as_ref(), &format!("clear {}", self.relation.name()));
        self.unlink_all()?;
        scope.commit()
    }

    // ------------------------------------------------------------------
    // Create-and-link
    // ------------------------------------------------------------------

    /// Create an instance of the relation's target type and link it.
    pub fn create(&self, args: CreateArgs) -> Result<Instance> {
        let target = self.relation.target().ok_or_else(|| {
            Error::Usage(format!(
                "relation '{}' is untyped; create the node first, then add it",
                self.relation.name()
            ))
        })?;
        let target = target.to_string();
        self.create_as(&target, args)
    }

    /// Like [`create`](Self::create) with an explicit type name. On a
    /// [`typed`](Relation::typed) relation any subtype of the target
    /// qualifies; otherwise the name must be the target itself.
    pub fn create_as(&self, type_name: &str, args: CreateArgs) -> Result<Instance> {
        self.ensure_owner()?;
        if let Some(target) = self.relation.target() {
            let ty = self.scene.registry.get(type_name).ok_or_else(|| {
                Error::Config(format!("unknown model '{type_name}'"))
            })?;
            let fits = if self.relation.is_typed() {
                ty.is_subtype_of(target)
            } else {
                ty.name() == target
            };
            if !fits {
                return Err(Error::TypeError {
                    expected: target.to_string(),
                    got: type_name.to_string(),
                });
            }
        }
        let scope = EditScope::new(
            self.scene.graph.as_ref(),
            &format!("create {}", self.relation.name()),
        );
        let instance = self.scene.create_instance(type_name, args)?;
        let linked = if self.relation.is_multi() {
            self.check_far(&instance).and_then(|_| self.link_one(&instance))
        } else {
            self.check_far(&instance)
                .and_then(|_| self.unlink_all())
                .and_then(|_| self.link_one(&instance))
        };
        if let Err(error) = linked {
            let _ = self.scene.graph.delete_node(instance.id());
            return Err(error);
        }
        scope.commit()?;
        Ok(instance)
    }

    /// First linked instance, or a freshly created and linked one.
    pub fn get_or_create(&self, args: CreateArgs) -> Result<Instance> {
        match self.first()? {
            Some(existing) => Ok(existing),
            None => self.create(args),
        }
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn check_far(&self, far: &Instance) -> Result<()> {
        if !self.scene.graph.node_exists(far.id()) {
            return Err(Error::Stale(format!(
                "{} node {} is gone",
                far.type_name(),
                far.id()
            )));
        }
        if let Some(target) = self.relation.target() {
            let fits = if self.relation.is_typed() {
                far.model().is_subtype_of(target)
            } else {
                far.type_name() == target
            };
            if !fits {
                return Err(Error::TypeError {
                    expected: target.to_string(),
                    got: far.type_name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Relation attributes materialize lazily: a node created before its
    /// model gained this relation grows the attribute on first link.
    fn ensure_attributes(&self, far: &Instance) -> Result<()> {
        let graph = self.scene.graph.as_ref();
        if !graph.has_attribute(self.owner.id(), self.relation.name()) {
            graph.add_attribute(self.owner.id(), &self.relation.spec())?;
        }
        let partner = self.partner_name()?;
        if !graph.has_attribute(far.id(), partner) {
            let spec = far
                .model()
                .relation(partner)
                .map(|r| r.spec())
                .ok_or_else(|| {
                    Error::Config(format!(
                        "'{}' has no relation '{partner}' to receive '{}' links",
                        far.type_name(),
                        self.relation.name()
                    ))
                })?;
            graph.add_attribute(far.id(), &spec)?;
        }
        Ok(())
    }

    fn link_one(&self, far: &Instance) -> Result<()> {
        let graph = self.scene.graph.as_ref();
        self.ensure_attributes(far)?;
        let own_root = self.own_root();
        let own_plug = if self.relation.is_multi() {
            own_root.element(graph.next_element_index(&own_root)?)
        } else {
            own_root
        };
        let far_root = PlugPath::root(far.id(), self.partner_name()?);
        let far_plug = if self.relation.is_far_multi() {
            far_root.element(graph.next_element_index(&far_root)?)
        } else {
            far_root
        };
        let (src, dst) = if self.relation.is_rev() {
            (far_plug, own_plug)
        } else {
            (own_plug, far_plug)
        };
        graph.connect(&src, &dst)
    }

    fn unlink_pair(&self, own: &PlugPath, far: &PlugPath) -> Result<()> {
        let graph = self.scene.graph.as_ref();
        let (src, dst) = if self.relation.is_rev() {
            (far, own)
        } else {
            (own, far)
        };
        graph.disconnect(src, dst)?;
        if let Some(PlugStep::Element(index)) = own.steps.first() {
            graph.remove_element(&PlugPath::root(own.node, own.attr.clone()), *index)?;
        }
        if let Some(PlugStep::Element(index)) = far.steps.first() {
            graph.remove_element(&PlugPath::root(far.node, far.attr.clone()), *index)?;
        }
        Ok(())
    }

    fn unlink_all(&self) -> Result<()> {
        for (own, far) in self.linked_pairs()? {
            self.unlink_pair(&own, &far)?;
        }
        Ok(())
    }
}

/// Iterator over linked instances. Slots were read when the iterator was
/// made; each `next` resolves one node to its instance.
pub struct RelatedIter {
    scene: Arc<SceneInner>,
    strict: bool,
    ids: std::vec::IntoIter<NodeId>,
}

impl Iterator for RelatedIter {
    type Item = Result<Instance>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.next()?;
        Some(if self.strict {
            self.scene.instance_for(id)
        } else {
            self.scene.instance_or_base(id)
        })
    }
}

/// [`RelatedIter`] narrowed by filter predicates.
pub struct FilteredIter {
    iter: RelatedIter,
    predicates: Vec<Predicate>,
}

impl Iterator for FilteredIter {
    type Item = Result<Instance>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let instance = match self.iter.next()? {
                Ok(instance) => instance,
                Err(error) => return Some(Err(error)),
            };
            match matches_predicates(&instance, &self.predicates) {
                Ok(true) => return Some(Ok(instance)),
                Ok(false) => continue,
                Err(error) => return Some(Err(error)),
            }
        }
    }
}

// ============================================================================
// TypeManager
// ============================================================================

/// Scene-wide query surface for one model, backed by the registry's
/// instance cache. [`Scene::manager`](crate::Scene::manager) sees
/// exactly this model; [`Scene::manager_typed`](crate::Scene::manager_typed)
/// folds in every subtype. Nodes from a loaded file enter the cache
/// through [`Scene::initialize`](crate::Scene::initialize).
pub struct TypeManager {
    scene: Arc<SceneInner>,
    ty: Arc<ModelType>,
    typed: bool,
}

impl TypeManager {
    pub(crate) fn new(scene: Arc<SceneInner>, ty: Arc<ModelType>, typed: bool) -> Self {
        TypeManager { scene, ty, typed }
    }

    pub fn model(&self) -> &Arc<ModelType> {
        &self.ty
    }

    /// Whether subtypes of the model are in view.
    pub fn is_typed(&self) -> bool {
        self.typed
    }

    pub fn create(&self, args: CreateArgs) -> Result<Instance> {
        self.scene.create_instance(self.ty.name(), args)
    }

    /// Every cached instance in view, in creation order.
    pub fn all(&self) -> Result<Vec<Instance>> {
        Ok(if self.typed {
            self.scene.registry.instances_of(self.ty.name())
        } else {
            self.scene.registry.instances_of_exact(self.ty.name())
        })
    }

    pub fn filter(&self, predicates: &[(&str, Value)]) -> Result<Vec<Instance>> {
        let predicates = parse_predicates(predicates)?;
        let mut out = Vec::new();
        for instance in self.all()? {
            if matches_predicates(&instance, &predicates)? {
                out.push(instance);
            }
        }
        Ok(out)
    }

    pub fn first(&self) -> Result<Option<Instance>> {
        Ok(self.all()?.into_iter().next())
    }

    /// First instance matching the predicates, if any.
    pub fn get(&self, predicates: &[(&str, Value)]) -> Result<Option<Instance>> {
        let predicates = parse_predicates(predicates)?;
        for instance in self.all()? {
            if matches_predicates(&instance, &predicates)? {
                return Ok(Some(instance));
            }
        }
        Ok(None)
    }

    /// Instance with the given node name, created when absent. Only
    /// instances in this manager's view count; a stranger node wearing
    /// the name just bumps the new node to a numbered variant.
    pub fn get_or_create(&self, name: &str, args: CreateArgs) -> Result<Instance> {
        match self.get(&[("name", Value::from(name))])? {
            Some(existing) => Ok(existing),
            None => self.create(args.name(name)),
        }
    }

    pub fn length(&self) -> Result<usize> {
        Ok(self.all()?.len())
    }
}

// ============================================================================
// Tests
// ============================================================================
