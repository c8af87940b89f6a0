//! Universal attribute value type matching the host graph's plug types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity matrix, the host default for matrix plugs.
pub const IDENTITY_MATRIX: [[f64; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Host-plug value type.
///
/// Covers every leaf type a plug can hold:
/// - Scalars: Bool, Int, Float, String
/// - Angle: stored in radians (the host's native unit)
/// - Matrix: 4x4 row-major transform
/// - Curve: NURBS geometry blob
/// - List: array elements or compound children, flattened in plug order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Angle(f64),
    Matrix([[f64; 4]; 4]),
    Curve(CurveData),
    List(Vec<Value>),
}

/// NURBS curve geometry as the host serializes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveData {
    pub degree: u32,
    pub form: CurveForm,
    /// Control vertices in local space.
    pub points: Vec<[f64; 3]>,
    pub knots: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveForm {
    Open,
    Closed,
    Periodic,
}

impl CurveData {
    /// A degree-1 polyline through the given points, with uniform knots.
    pub fn polyline(points: Vec<[f64; 3]>) -> Self {
        let knots = (0..points.len()).map(|i| i as f64).collect();
        Self { degree: 1, form: CurveForm::Open, points, knots }
    }
}

// ============================================================================
// Type checking
// ============================================================================

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::Angle(_) => "ANGLE",
            Value::Matrix(_) => "MATRIX",
            Value::Curve(_) => "CURVE",
            Value::List(_) => "LIST",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }
    pub fn is_numeric(&self) -> bool { matches!(self, Value::Int(_) | Value::Float(_) | Value::Angle(_)) }
    pub fn is_string(&self) -> bool { matches!(self, Value::String(_)) }

    /// Attempt to extract as i64
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Attempt to extract as f64 (angles yield radians)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Angle(a) => Some(*a),
            _ => None,
        }
    }

    /// Attempt to extract as &str
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempt to extract as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempt to extract as a list slice
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn identity_matrix() -> Self {
        Value::Matrix(IDENTITY_MATRIX)
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v as i64) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Float(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::String(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::String(v.to_owned()) } }
impl From<[[f64; 4]; 4]> for Value { fn from(v: [[f64; 4]; 4]) -> Self { Value::Matrix(v) } }
impl From<CurveData> for Value { fn from(v: CurveData) -> Self { Value::Curve(v) } }
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self { Value::List(v.into_iter().map(Into::into).collect()) }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Value::Null) }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Value::Angle(a) => write!(f, "{a}rad"),
            Value::Matrix(_) => write!(f, "<matrix 4x4>"),
            Value::Curve(c) => write!(f, "<curve[{} cvs]>", c.points.len()),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ============================================================================
// Comparison (filter predicate rules)
// ============================================================================

impl Value {
    /// Predicate comparison. Returns None for incompatible types, so a
    /// filter on a mismatched attribute simply never matches.
    ///
    /// Numerics (Int, Float, Angle) compare cross-type; everything else
    /// compares only within its own variant.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.as_float()?.partial_cmp(&b.as_float()?)
            }
            _ => None,
        }
    }
}
