//! # Relation Descriptors
//!
//! A [`Relation`] maps model-to-model links onto message-attribute
//! connections. The forward side owns a readable source attribute; the
//! reverse side owns a writable destination attribute; an edge always
//! runs forward → reverse. Single destinations are severed by the
//! backend on reconnection, which is what makes one-to-one relations
//! hold without any bookkeeping here.
//!
//! | Shape | Own attr | Far attr |
//! |-------|----------|----------|
//! | one-to-one | scalar | scalar |
//! | to-many | array (one element per link) | scalar |
//! | many-to-many | array | array |
//! | collection | writable array | the native `message` attribute |
//!
//! Declaring a relation on one model synthesizes the reverse relation
//! on the target model, named after the owner (`Rig` → `rig`, or
//! `rig_set` when one node can belong to several owners). Collections
//! are reverse-only and untyped: they gather arbitrary nodes without
//! touching their schema.

use convert_case::{Case, Casing};

use crate::graph::MESSAGE_ATTRIBUTE;
use crate::model::{AttrKind, AttributeSpec};
use crate::{Error, Result};

// ============================================================================
// Relation
// ============================================================================

/// Schema descriptor for one connection-backed link between models.
#[derive(Debug, Clone)]
pub struct Relation {
    name: String,
    /// Far model type; `None` for untyped collections.
    target: Option<String>,
    /// This side holds an array attribute (one element per link).
    multi: bool,
    /// The far side holds an array attribute.
    far_multi: bool,
    /// This is the destination side of the edge.
    rev: bool,
    /// Attribute name on the far side. Filled in at declare time when
    /// not set explicitly.
    partner: Option<String>,
    /// Subtypes of `target` also qualify. Off by default: far nodes
    /// must be exactly `target`.
    typed: bool,
    /// Deleting this node deletes linked far nodes.
    cascade: bool,
    hidden: bool,
    persist: bool,
    collection: bool,
}

impl Relation {
    /// A forward relation to `target`. One-to-one by default; linked
    /// nodes must be exactly `target` unless [`typed`](Self::typed).
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: Some(target.into()),
            multi: false,
            far_multi: false,
            rev: false,
            partner: None,
            typed: false,
            cascade: false,
            hidden: false,
            persist: true,
            collection: false,
        }
    }

    /// An untyped reverse-only set: gathers arbitrary nodes through
    /// their native `message` attribute, without touching their schema.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            multi: true,
            far_multi: false,
            rev: true,
            partner: Some(MESSAGE_ATTRIBUTE.to_string()),
            typed: false,
            cascade: false,
            hidden: false,
            persist: true,
            collection: true,
        }
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    /// This node links to many far nodes.
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    /// A far node can be linked by many nodes on this side.
    pub fn far_multi(mut self) -> Self {
        self.far_multi = true;
        self
    }

    /// Declare this side as the destination of the edge.
    pub fn rev(mut self) -> Self {
        self.rev = true;
        self
    }

    /// Accept subtypes of the target, not just the exact type.
    pub fn typed(mut self) -> Self {
        self.typed = true;
        self
    }

    /// Name the synthesized attribute on the far side.
    pub fn reverse_name(mut self, name: impl Into<String>) -> Self {
        self.partner = Some(name.into());
        self
    }

    /// Deleting this node also deletes the linked far nodes.
    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn is_multi(&self) -> bool {
        self.multi
    }

    pub fn is_far_multi(&self) -> bool {
        self.far_multi
    }

    pub fn is_rev(&self) -> bool {
        self.rev
    }

    pub fn is_typed(&self) -> bool {
        self.typed
    }

    pub fn cascades(&self) -> bool {
        self.cascade
    }

    pub fn is_collection(&self) -> bool {
        self.collection
    }

    pub fn persists(&self) -> bool {
        self.persist
    }

    /// Attribute name on the far side of the edge. Resolved for every
    /// registered relation.
    pub fn partner(&self) -> Option<&str> {
        self.partner.as_deref()
    }

    // ------------------------------------------------------------------
    // Declare-time resolution
    // ------------------------------------------------------------------

    pub(crate) fn check_definition(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("relation name is empty".into()));
        }
        if self.typed && self.target.is_none() {
            return Err(Error::Config(format!(
                "relation '{}' is typed but names no target",
                self.name
            )));
        }
        if self.cascade && self.rev {
            return Err(Error::Config(format!(
                "relation '{}' cascades from the reverse side",
                self.name
            )));
        }
        if self.collection && !self.rev {
            return Err(Error::Config(format!(
                "collection '{}' must be a reverse side",
                self.name
            )));
        }
        Ok(())
    }

    /// Reverse attribute name when none was declared: the owner type in
    /// snake case, with a `_set` suffix when the reverse side is an array.
    pub(crate) fn default_reverse_name(owner_type: &str, far_multi: bool) -> String {
        let base = owner_type.to_case(Case::Snake);
        if far_multi { format!("{base}_set") } else { base }
    }

    /// Fill in the partner attribute name if the declaration left it open.
    pub(crate) fn with_resolved_partner(mut self, owner_type: &str) -> Self {
        if self.partner.is_none() {
            self.partner = Some(Self::default_reverse_name(owner_type, self.far_multi));
        }
        self
    }

    /// The relation as seen from the far side. `None` for collections
    /// and other untyped relations, which put nothing on the far schema.
    pub(crate) fn reversed(&self, owner_type: &str) -> Option<Relation> {
        self.target.as_ref()?;
        let partner = self
            .partner
            .clone()
            .unwrap_or_else(|| Self::default_reverse_name(owner_type, self.far_multi));
        Some(Relation {
            name: partner,
            target: Some(owner_type.to_string()),
            multi: self.far_multi,
            far_multi: self.multi,
            rev: !self.rev,
            partner: Some(self.name.clone()),
            typed: self.typed,
            cascade: false,
            hidden: self.hidden,
            persist: self.persist,
            collection: false,
        })
    }

    // ------------------------------------------------------------------
    // Schema generation
    // ------------------------------------------------------------------

    /// The message attribute this relation persists through. Forward
    /// sides are readable sources; reverse sides writable destinations.
    pub fn spec(&self) -> AttributeSpec {
        let mut spec = AttributeSpec::new(&self.name, AttrKind::Message);
        spec.multi = self.multi;
        spec.readable = !self.rev;
        spec.writable = self.rev;
        spec.hidden = self.hidden;
        spec
    }
}

// ============================================================================
// Tests
// ============================================================================
