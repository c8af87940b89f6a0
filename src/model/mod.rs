//! # Scene Graph Model
//!
//! Clean DTOs shared by every layer: backend ↔ fields ↔ relations ↔ managers.
//!
//! Design rule: this module is pure data. No locks, no backend calls,
//! no registry state.

pub mod node;
pub mod plug;
pub mod value;
pub mod attribute;

pub use node::{NodeId, NodeInfo};
pub use plug::{Direction, PlugPath, PlugStep};
pub use value::{CurveData, CurveForm, Value, IDENTITY_MATRIX};
pub use attribute::{AttrKind, AttributeSpec};
