//! # Model Definitions
//!
//! A [`ModelDef`] declares one node-backed type: the host node kind it
//! materializes as, the fields and relations on its schema, and the
//! base model it extends. A subtype inherits every persisting ancestor
//! entry it neither redeclares nor excludes. Declarations are plain
//! data; the registry turns them into live types and synthesizes the
//! reverse half of every target-bearing relation onto its target.

use crate::fields::Field;
use crate::graph::MESSAGE_ATTRIBUTE;
use crate::relations::Relation;
use crate::{Error, Result};

/// Attribute holding the persisted type tag, `<module>.<TypeName>`.
/// A node carrying it belongs to the model layer; the base model is
/// deliberately never tagged.
pub const TAG_ATTRIBUTE: &str = "metanode";

/// Host node kind used when a definition names none.
pub(crate) const DEFAULT_NODE_KIND: &str = "network";

/// Names claimed by node bookkeeping; fields and relations cannot take them.
pub(crate) const RESERVED: &[&str] = &["name", "parent", TAG_ATTRIBUTE, MESSAGE_ATTRIBUTE];

// ============================================================================
// ModelDef
// ============================================================================

/// Declaration of one model type.
#[derive(Debug, Clone)]
pub struct ModelDef {
    module: String,
    name: String,
    extends: Option<String>,
    node_kind: Option<String>,
    fields: Vec<Field>,
    relations: Vec<Relation>,
    exclude: Vec<String>,
}

impl ModelDef {
    /// Declare a type. `module` namespaces the persisted tag, so two
    /// packages can both ship a `Joint` without colliding on disk.
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            extends: None,
            node_kind: None,
            fields: Vec::new(),
            relations: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Inherit fields and relations from another declared model.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    /// Host node kind to create instances as. Inherited when unset.
    pub fn node_kind(mut self, kind: impl Into<String>) -> Self {
        self.node_kind = Some(kind.into());
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Suppress an inherited field or relation. The entry stays live on
    /// the ancestor; this model and its subtypes never see it, and no
    /// reverse relation under this name is synthesized here.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.exclude.push(name.into());
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tag persisted on every instance node.
    pub fn type_tag(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    pub(crate) fn parent_name(&self) -> Option<&str> {
        self.extends.as_deref()
    }

    pub(crate) fn declared_node_kind(&self) -> Option<&str> {
        self.node_kind.as_deref()
    }

    pub(crate) fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub(crate) fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub(crate) fn exclusions(&self) -> &[String] {
        &self.exclude
    }

    // ------------------------------------------------------------------
    // Definition checks
    // ------------------------------------------------------------------

    pub(crate) fn check_definition(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains('.') {
            return Err(Error::Config(format!("bad model name '{}'", self.name)));
        }
        if self.module.is_empty() {
            return Err(Error::Config(format!("model '{}' has no module", self.name)));
        }

        let mut seen: Vec<&str> = Vec::new();
        let names = self
            .fields
            .iter()
            .map(Field::name)
            .chain(self.relations.iter().map(Relation::name));
        for name in names {
            if RESERVED.contains(&name) {
                return Err(Error::Config(format!(
                    "model '{}' uses reserved name '{name}'",
                    self.name
                )));
            }
            if seen.contains(&name) {
                return Err(Error::Config(format!(
                    "model '{}' declares '{name}' twice",
                    self.name
                )));
            }
            seen.push(name);
        }

        for field in &self.fields {
            field.check_definition()?;
        }
        for relation in &self.relations {
            relation.check_definition()?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
