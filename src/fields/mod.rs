//! # Field Descriptors
//!
//! A [`Field`] maps one model property onto one node attribute. The
//! descriptor itself is pure schema; every byte of state lives in the
//! graph, so two `Field`s with the same shape are interchangeable.
//!
//! | Constructor | Stored as | Notes |
//! |-------------|-----------|-------|
//! | `integer` / `float` / `boolean` / `string` | scalar | |
//! | `degree` | angle | set and get in degrees, stored in radians |
//! | `enumeration` | short | accepts label or index, reads back the index |
//! | `matrix` | matrix | defaults to identity |
//! | `curve` | curve | reads follow the incoming connection to the shape's `create` plug |
//! | `float2` / `float3` / `degree3` / `boolean3` | compound | fixed child suffixes |
//! | `integer_array` / `float_array` / `curve_array` | multi | sparse logical indices |
//!
//! Writes run an ordered validator chain; the first failure wins. The
//! `editable` check is skipped while a node is being initialized, so
//! construction can seed read-only fields.

mod compound;
mod scalar;

pub use scalar::{EnumTable, FieldKind};

use crate::graph::GraphBackend;
use crate::model::{AttrKind, AttributeSpec, NodeId, PlugPath, Value};
use crate::{Error, Result};

// ============================================================================
// Field
// ============================================================================

/// Schema descriptor for one attribute-backed model property.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    /// Child suffixes; empty for scalar fields.
    suffixes: &'static [&'static str],
    multi: bool,
    default: Option<Value>,
    min: Option<f64>,
    max: Option<f64>,
    editable: bool,
    keyable: bool,
    channel_box: bool,
    hidden: bool,
    persist: bool,
    default_only: bool,
}

impl Field {
    fn base(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            suffixes: &[],
            multi: false,
            default: None,
            min: None,
            max: None,
            editable: true,
            keyable: false,
            channel_box: false,
            hidden: false,
            persist: true,
            default_only: false,
        }
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }

    pub fn keyable(mut self) -> Self {
        self.keyable = true;
        self
    }

    pub fn channel_box(mut self) -> Self {
        self.channel_box = true;
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

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// The field may only ever hold its declared default.
    pub fn default_only(mut self) -> Self {
        self.default_only = true;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_multi(&self) -> bool {
        self.multi
    }

    pub fn is_compound(&self) -> bool {
        !self.suffixes.is_empty()
    }

    /// Whether the attribute survives save/reload and migration.
    pub fn persists(&self) -> bool {
        self.persist
    }

    // ------------------------------------------------------------------
    // Definition checks (run once, at declare time)
    // ------------------------------------------------------------------

    pub(crate) fn check_definition(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("field name is empty".into()));
        }
        if let FieldKind::Enum(table) = &self.kind {
            table.check_definition(&self.name)?;
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(Error::Config(format!(
                    "field '{}' has minimum {min} above maximum {max}",
                    self.name
                )));
            }
        }
        if (self.min.is_some() || self.max.is_some()) && !self.kind.is_numeric() {
            return Err(Error::Config(format!(
                "field '{}' takes no bounds",
                self.name
            )));
        }
        if self.default_only && self.default.is_none() {
            return Err(Error::Config(format!(
                "field '{}' is default-only but declares no default",
                self.name
            )));
        }
        if let Some(default) = &self.default {
            self.validate(default, true)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validator chain
    // ------------------------------------------------------------------

    /// Validate a user value. Checks run in a fixed order and the first
    /// failure wins. `initializing` waives the editable check so node
    /// construction can seed read-only fields.
    pub(crate) fn validate(&self, value: &Value, initializing: bool) -> Result<()> {
        for check in CHECKS {
            match check {
                Check::Editable => {
                    if !self.editable && !initializing {
                        return Err(Error::Validation(format!(
                            "field '{}' is not editable",
                            self.name
                        )));
                    }
                }
                Check::Type => {
                    if self.multi || self.is_compound() {
                        self.expect_list(value)?;
                    } else {
                        self.kind.type_check(value)?;
                    }
                }
                Check::Choices => {
                    if let FieldKind::Enum(table) = &self.kind {
                        self.for_each_leaf(value, &mut |leaf| table.resolve(leaf).map(|_| ()))?;
                    }
                }
                Check::Bounds => {
                    if self.min.is_some() || self.max.is_some() {
                        self.for_each_leaf(value, &mut |leaf| self.check_bounds(leaf))?;
                    }
                }
                Check::Length => {
                    if self.is_compound() {
                        let groups: &[Value] = if self.multi {
                            self.expect_list(value)?
                        } else {
                            std::slice::from_ref(value)
                        };
                        for group in groups {
                            let items = self.expect_list(group)?;
                            if items.len() != self.suffixes.len() {
                                return Err(Error::Validation(format!(
                                    "field '{}' expects {} components, got {}",
                                    self.name,
                                    self.suffixes.len(),
                                    items.len()
                                )));
                            }
                        }
                    }
                }
                Check::Elements => {
                    if self.multi || self.is_compound() {
                        self.for_each_leaf(value, &mut |leaf| self.kind.type_check(leaf))?;
                    }
                }
                Check::DefaultOnly => {
                    if self.default_only {
                        if let Some(default) = &self.default {
                            if value != default {
                                return Err(Error::Validation(format!(
                                    "field '{}' only accepts its default value",
                                    self.name
                                )));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn expect_list<'v>(&self, value: &'v Value) -> Result<&'v [Value]> {
        value.as_list().ok_or_else(|| Error::TypeError {
            expected: "LIST".into(),
            got: value.type_name().into(),
        })
    }

    /// Visit every scalar leaf of a user value, per this field's shape.
    fn for_each_leaf(
        &self,
        value: &Value,
        f: &mut dyn FnMut(&Value) -> Result<()>,
    ) -> Result<()> {
        match (self.multi, self.is_compound()) {
            (false, false) => f(value),
            (true, false) | (false, true) => {
                for item in self.expect_list(value)? {
                    f(item)?;
                }
                Ok(())
            }
            (true, true) => {
                for group in self.expect_list(value)? {
                    for item in self.expect_list(group)? {
                        f(item)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn check_bounds(&self, leaf: &Value) -> Result<()> {
        let Some(f) = leaf.as_float() else {
            return Ok(());
        };
        if let Some(min) = self.min {
            if f < min {
                return Err(Error::Validation(format!(
                    "field '{}' value {f} is below minimum {min}",
                    self.name
                )));
            }
        }
        if let Some(max) = self.max {
            if f > max {
                return Err(Error::Validation(format!(
                    "field '{}' value {f} is above maximum {max}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Schema generation
    // ------------------------------------------------------------------

    /// Build the attribute schema this field persists through.
    pub fn spec(&self) -> AttributeSpec {
        let mut spec = if self.is_compound() {
            let defaults = self.default.as_ref().and_then(Value::as_list);
            let children = self
                .suffixes
                .iter()
                .enumerate()
                .map(|(i, suffix)| {
                    let mut child = AttributeSpec::new(
                        format!("{}{}", self.name, suffix),
                        self.kind.attr_kind(),
                    );
                    child.default = defaults
                        .and_then(|d| d.get(i))
                        .and_then(|v| self.kind.encode(v).ok());
                    child.min = self.min;
                    child.max = self.max;
                    child.keyable = self.keyable;
                    child.channel_box = self.channel_box;
                    child
                })
                .collect();
            AttributeSpec::new(&self.name, AttrKind::Compound).with_children(children)
        } else {
            let mut spec = AttributeSpec::new(&self.name, self.kind.attr_kind());
            spec.default = self.default.as_ref().and_then(|v| self.kind.encode(v).ok());
            spec.min = self.min;
            spec.max = self.max;
            spec
        };
        spec.multi = self.multi;
        spec.keyable = self.keyable;
        spec.channel_box = self.channel_box;
        spec.hidden = self.hidden;
        spec
    }

    /// Add this field's attribute to a node. String schema defaults do
    /// not stick in the host, so they are written explicitly afterwards.
    pub(crate) fn create(&self, graph: &dyn GraphBackend, node: NodeId) -> Result<()> {
        graph.add_attribute(node, &self.spec())?;
        if let (FieldKind::String, Some(default), false) = (&self.kind, &self.default, self.multi)
        {
            graph.write(&PlugPath::root(node, &self.name), self.kind.encode(default)?)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Value access
    // ------------------------------------------------------------------

    /// Read the field's value from a node. Arrays come back as a list in
    /// ascending index order; compounds as a component list.
    pub(crate) fn get(&self, graph: &dyn GraphBackend, node: NodeId) -> Result<Value> {
        let root = PlugPath::root(node, &self.name);
        if self.multi {
            let mut items = Vec::new();
            for index in graph.element_indices(&root)? {
                items.push(self.read_at(graph, &root.element(index))?);
            }
            Ok(Value::List(items))
        } else {
            self.read_at(graph, &root)
        }
    }

    /// Validate and write a user value. Array writes fill indices
    /// `0..n-1`, then drop any existing index past the end.
    pub(crate) fn set(
        &self,
        graph: &dyn GraphBackend,
        node: NodeId,
        value: &Value,
        initializing: bool,
    ) -> Result<()> {
        self.validate(value, initializing)?;
        let root = PlugPath::root(node, &self.name);
        if self.multi {
            let items = self.expect_list(value)?;
            let existing = graph.element_indices(&root)?;
            for (i, item) in items.iter().enumerate() {
                self.write_at(graph, &root.element(i as u32), item)?;
            }
            for index in existing {
                if index as usize >= items.len() {
                    graph.remove_element(&root, index)?;
                }
            }
            Ok(())
        } else {
            self.write_at(graph, &root, value)
        }
    }

    fn read_at(&self, graph: &dyn GraphBackend, plug: &PlugPath) -> Result<Value> {
        if self.is_compound() {
            let mut items = Vec::with_capacity(self.suffixes.len());
            for i in 0..self.suffixes.len() {
                let leaf = self.effective_plug(graph, &plug.child(i))?;
                items.push(self.kind.decode(graph.read(&leaf)?));
            }
            Ok(Value::List(items))
        } else {
            let leaf = self.effective_plug(graph, plug)?;
            Ok(self.kind.decode(graph.read(&leaf)?))
        }
    }

    fn write_at(&self, graph: &dyn GraphBackend, plug: &PlugPath, value: &Value) -> Result<()> {
        if self.is_compound() {
            let items = self.expect_list(value)?;
            for (i, item) in items.iter().enumerate() {
                let leaf = self.effective_plug(graph, &plug.child(i))?;
                graph.write(&leaf, self.kind.encode(item)?)?;
            }
            Ok(())
        } else {
            let leaf = self.effective_plug(graph, plug)?;
            graph.write(&leaf, self.kind.encode(value)?)
        }
    }

    /// A connected leaf acts as a proxy for its source. Curve fields go
    /// one step further, to the source shape's `create` plug.
    fn effective_plug(&self, graph: &dyn GraphBackend, leaf: &PlugPath) -> Result<PlugPath> {
        if let Some(source) = graph.source(leaf)? {
            return Ok(match self.kind {
                FieldKind::Curve => PlugPath::root(source.node, "create"),
                _ => source,
            });
        }
        Ok(leaf.clone())
    }
}

// ============================================================================
// Validator chain order
// ============================================================================

#[derive(Clone, Copy)]
enum Check {
    Editable,
    Type,
    Choices,
    Bounds,
    Length,
    Elements,
    DefaultOnly,
}

const CHECKS: [Check; 7] = [
    Check::Editable,
    Check::Type,
    Check::Choices,
    Check::Bounds,
    Check::Length,
    Check::Elements,
    Check::DefaultOnly,
];

// ============================================================================
// Tests
// ============================================================================
