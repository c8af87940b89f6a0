//! Scalar field kinds and their stored encoding.
//!
//! User values and stored values differ in two places: degree fields
//! take degrees but store radians, and enumeration fields take a label
//! or an index but store the index.

use crate::model::{AttrKind, Value};
use crate::{Error, Result};

use super::Field;

// ============================================================================
// EnumTable
// ============================================================================

/// Ordered label set for an enumeration field. The index is the stored
/// value and the source of truth; labels are a user-facing convenience.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumTable {
    labels: Vec<String>,
}

impl EnumTable {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { labels: labels.into_iter().map(Into::into).collect() }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, index: i64) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.labels.get(i))
            .map(String::as_str)
    }

    pub fn index(&self, label: &str) -> Option<i64> {
        self.labels.iter().position(|l| l == label).map(|i| i as i64)
    }

    /// Accept a label or an in-range index; return the index.
    pub fn resolve(&self, value: &Value) -> Result<i64> {
        match value {
            Value::Int(i) if self.label(*i).is_some() => Ok(*i),
            Value::Int(i) => Err(Error::Validation(format!(
                "enum index {i} out of range (.. {})",
                self.labels.len()
            ))),
            Value::String(s) => self
                .index(s)
                .ok_or_else(|| Error::Validation(format!("unknown enum label '{s}'"))),
            other => Err(Error::TypeError {
                expected: "INTEGER or STRING".into(),
                got: other.type_name().into(),
            }),
        }
    }

    pub(super) fn check_definition(&self, field: &str) -> Result<()> {
        if self.labels.is_empty() {
            return Err(Error::Config(format!("enum field '{field}' has no labels")));
        }
        for (i, label) in self.labels.iter().enumerate() {
            if self.labels[..i].contains(label) {
                return Err(Error::Config(format!(
                    "enum field '{field}' repeats label '{label}'"
                )));
            }
            // a numeric label may only name its own slot, or resolve()
            // could read it as another entry's index
            if let Ok(n) = label.parse::<i64>() {
                if n != i as i64 && (0..self.labels.len() as i64).contains(&n) {
                    return Err(Error::Config(format!(
                        "enum field '{field}' label '{label}' collides with index {n}"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// FieldKind
// ============================================================================

/// Leaf value kind of a field. Compound fields use this for their
/// children; array fields for their elements.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Integer,
    Float,
    Boolean,
    Degree,
    String,
    Enum(EnumTable),
    Matrix,
    Curve,
}

impl FieldKind {
    pub(super) fn attr_kind(&self) -> AttrKind {
        match self {
            FieldKind::Integer => AttrKind::Int,
            FieldKind::Float => AttrKind::Float,
            FieldKind::Boolean => AttrKind::Bool,
            FieldKind::Degree => AttrKind::Angle,
            FieldKind::String => AttrKind::String,
            FieldKind::Enum(_) => AttrKind::Enum,
            FieldKind::Matrix => AttrKind::Matrix,
            FieldKind::Curve => AttrKind::Curve,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Integer | FieldKind::Float | FieldKind::Degree)
    }

    fn expected(&self) -> &'static str {
        match self {
            FieldKind::Integer => "INTEGER",
            FieldKind::Float => "FLOAT",
            FieldKind::Boolean => "BOOLEAN",
            FieldKind::Degree => "FLOAT (degrees)",
            FieldKind::String => "STRING",
            FieldKind::Enum(_) => "INTEGER or STRING",
            FieldKind::Matrix => "MATRIX",
            FieldKind::Curve => "CURVE",
        }
    }

    /// Structural check of a user leaf value. Enum membership is the
    /// choices validator's job, not this one's.
    pub fn type_check(&self, value: &Value) -> Result<()> {
        let ok = match self {
            FieldKind::Integer => matches!(value, Value::Int(_)),
            FieldKind::Float | FieldKind::Degree => {
                matches!(value, Value::Int(_) | Value::Float(_))
            }
            FieldKind::Boolean => matches!(value, Value::Bool(_)),
            FieldKind::String => matches!(value, Value::String(_)),
            FieldKind::Enum(_) => matches!(value, Value::Int(_) | Value::String(_)),
            FieldKind::Matrix => matches!(value, Value::Matrix(_)),
            FieldKind::Curve => matches!(value, Value::Curve(_)),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::TypeError {
                expected: self.expected().into(),
                got: value.type_name().into(),
            })
        }
    }

    /// User leaf value → stored value.
    pub(super) fn encode(&self, value: &Value) -> Result<Value> {
        self.type_check(value)?;
        Ok(match self {
            FieldKind::Float => Value::Float(value.as_float().unwrap_or(0.0)),
            FieldKind::Degree => Value::Angle(value.as_float().unwrap_or(0.0).to_radians()),
            FieldKind::Enum(table) => Value::Int(table.resolve(value)?),
            _ => value.clone(),
        })
    }

    /// Stored value → user leaf value.
    pub(super) fn decode(&self, value: Value) -> Value {
        match (self, value) {
            (FieldKind::Degree, Value::Angle(r)) => Value::Float(r.to_degrees()),
            (_, v) => v,
        }
    }
}

// ============================================================================
// Scalar constructors
// ============================================================================

impl Field {
    pub fn integer(name: impl Into<String>) -> Self {
        Self::base(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::base(name, FieldKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::base(name, FieldKind::Boolean)
    }

    /// Angle in degrees. Stored in radians.
    pub fn degree(name: impl Into<String>) -> Self {
        Self::base(name, FieldKind::Degree)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::base(name, FieldKind::String)
    }

    pub fn enumeration(name: impl Into<String>, labels: &[&str]) -> Self {
        Self::base(name, FieldKind::Enum(EnumTable::new(labels.iter().copied())))
    }

    pub fn matrix(name: impl Into<String>) -> Self {
        Self::base(name, FieldKind::Matrix)
    }

    /// Curve geometry. Reading a connected curve field follows the
    /// connection to the source shape's `create` plug.
    pub fn curve(name: impl Into<String>) -> Self {
        Self::base(name, FieldKind::Curve)
    }
}

// ============================================================================
// Tests
// ============================================================================
