//! Compound and array field constructors.
//!
//! Compounds are fixed-width component groups stored as one parent
//! attribute with suffixed children (`uv` → `uvU`, `uvV`). Arrays are
//! multi attributes with sparse logical indices.

use super::{Field, FieldKind};

const UV: &[&str] = &["U", "V"];
const XYZ: &[&str] = &["X", "Y", "Z"];

impl Field {
    fn compound(name: impl Into<String>, kind: FieldKind, suffixes: &'static [&'static str]) -> Self {
        let mut field = Self::base(name, kind);
        field.suffixes = suffixes;
        field
    }

    fn array(name: impl Into<String>, kind: FieldKind) -> Self {
        let mut field = Self::base(name, kind);
        field.multi = true;
        field
    }

    // ------------------------------------------------------------------
    // Compounds
    // ------------------------------------------------------------------

    /// Two floats, `U`/`V` children.
    pub fn float2(name: impl Into<String>) -> Self {
        Self::compound(name, FieldKind::Float, UV)
    }

    /// Three floats, `X`/`Y`/`Z` children.
    pub fn float3(name: impl Into<String>) -> Self {
        Self::compound(name, FieldKind::Float, XYZ)
    }

    /// Three angles in degrees, `X`/`Y`/`Z` children.
    pub fn degree3(name: impl Into<String>) -> Self {
        Self::compound(name, FieldKind::Degree, XYZ)
    }

    /// Three booleans, `X`/`Y`/`Z` children.
    pub fn boolean3(name: impl Into<String>) -> Self {
        Self::compound(name, FieldKind::Boolean, XYZ)
    }

    // ------------------------------------------------------------------
    // Arrays
    // ------------------------------------------------------------------

    pub fn integer_array(name: impl Into<String>) -> Self {
        Self::array(name, FieldKind::Integer)
    }

    pub fn float_array(name: impl Into<String>) -> Self {
        Self::array(name, FieldKind::Float)
    }

    pub fn curve_array(name: impl Into<String>) -> Self {
        Self::array(name, FieldKind::Curve)
    }
}
