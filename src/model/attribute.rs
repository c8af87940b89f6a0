//! Attribute schema DTO: what `add_attribute` creates and what the
//! migration pass introspects.

use serde::{Deserialize, Serialize};

use super::Value;

/// Native leaf type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrKind {
    Int,
    Float,
    Bool,
    String,
    /// Stored in radians.
    Angle,
    /// Stored as an integer index; labels live in the declaring field.
    Enum,
    Matrix,
    Curve,
    /// Connection-only, holds no value.
    Message,
    /// Parent of named children; leaf kind lives on the children.
    Compound,
}

impl AttrKind {
    /// Whether a value can be stored in a plug of this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (AttrKind::Int, Value::Int(_))
                | (AttrKind::Enum, Value::Int(_))
                | (AttrKind::Float, Value::Float(_))
                | (AttrKind::Bool, Value::Bool(_))
                | (AttrKind::String, Value::String(_))
                | (AttrKind::Angle, Value::Angle(_))
                | (AttrKind::Matrix, Value::Matrix(_))
                | (AttrKind::Curve, Value::Curve(_))
        )
    }

    /// Host default for an unset plug of this kind.
    pub fn zero(&self) -> Value {
        match self {
            AttrKind::Int | AttrKind::Enum => Value::Int(0),
            AttrKind::Float => Value::Float(0.0),
            AttrKind::Bool => Value::Bool(false),
            AttrKind::String => Value::String(String::new()),
            AttrKind::Angle => Value::Angle(0.0),
            AttrKind::Matrix => Value::identity_matrix(),
            AttrKind::Curve | AttrKind::Message | AttrKind::Compound => Value::Null,
        }
    }
}

/// Full shape of one attribute as the backend stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: AttrKind,
    /// Array attribute with sparse logical indices.
    pub multi: bool,
    /// Child specs, non-empty only for `AttrKind::Compound`.
    pub children: Vec<AttributeSpec>,
    /// Schema-level default. Unreliable for `String` kind (host quirk);
    /// string defaults must be written explicitly after creation.
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Can act as a connection source.
    pub readable: bool,
    /// Can act as a connection destination.
    pub writable: bool,
    pub keyable: bool,
    pub channel_box: bool,
    pub hidden: bool,
}

impl AttributeSpec {
    pub fn new(name: impl Into<String>, kind: AttrKind) -> Self {
        Self {
            name: name.into(),
            kind,
            multi: false,
            children: Vec::new(),
            default: None,
            min: None,
            max: None,
            readable: true,
            writable: true,
            keyable: false,
            channel_box: false,
            hidden: false,
        }
    }

    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_children(mut self, children: Vec<AttributeSpec>) -> Self {
        self.children = children;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Shape equality the migration pass cares about: multi-ness,
    /// leaf kind, and compound arity. Flags and defaults do not count.
    pub fn same_shape(&self, other: &AttributeSpec) -> bool {
        self.kind == other.kind
            && self.multi == other.multi
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(other.children.iter())
                .all(|(a, b)| a.kind == b.kind && a.multi == b.multi)
    }

    /// Connection direction bits, checked by relation migration.
    pub fn same_direction(&self, other: &AttributeSpec) -> bool {
        self.readable == other.readable && self.writable == other.writable
    }
}
