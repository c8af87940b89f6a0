//! # metanode: Typed Metadata Models over a Live Scene Graph
//!
//! An object-relational layer that turns scene nodes into typed model
//! instances. Schema lives in code, state lives in node attributes, and
//! relations are real plug connections. The scene file itself is the
//! database.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `GraphBackend` is the contract between the model layer and the host graph
//! 2. **Clean DTOs**: `NodeInfo`, `PlugPath`, `Value` cross all boundaries
//! 3. **Descriptors own nothing**: `Field` and `Relation` are pure schema; every byte of state is a node attribute
//! 4. **The graph is the database**: no side tables, so a reloaded scene is already migrated-or-detectable
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metanode::{CreateArgs, Field, ModelDef, Relation, Scene, Value};
//!
//! fn main() -> metanode::Result<()> {
//!     let scene = Scene::in_memory();
//!
//!     scene.declare(
//!         ModelDef::new("rig", "Joint")
//!             .field(Field::integer("side").default(0))
//!             .field(Field::degree3("jointOrient")),
//!     )?;
//!     scene.declare(
//!         ModelDef::new("rig", "Rig")
//!             .relation(Relation::new("joints", "Joint").multi()),
//!     )?;
//!
//!     let rig = scene.create("Rig", CreateArgs::new().name("biped"))?;
//!     let spine = scene.create("Joint", CreateArgs::new().set("side", 1))?;
//!
//!     rig.relation("joints")?.add(&spine)?;
//!     assert_eq!(spine.get("side")?, Value::Int(1));
//!     Ok(())
//! }
//! ```
//!
//! ## Graph Backends
//!
//! | Backend | Description |
//! |---------|-------------|
//! | `MemoryGraph` | In-memory scene graph for tests and headless tools |
//! | Host adapters | Implement [`GraphBackend`] over a live application session |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod graph;
pub mod fields;
pub mod relations;
pub mod schema;
pub mod registry;
pub mod instance;
pub mod managers;
pub mod scene;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    CurveData, CurveForm, Direction, NodeId, NodeInfo, PlugPath, Value,
};

// ============================================================================
// Re-exports: Graph backend
// ============================================================================

pub use graph::{CallbackId, EditScope, GraphBackend, MemoryGraph, NodeEvent};

// ============================================================================
// Re-exports: Schema layer
// ============================================================================

pub use fields::{EnumTable, Field, FieldKind};
pub use relations::Relation;
pub use schema::ModelDef;

// ============================================================================
// Re-exports: Runtime layer
// ============================================================================

pub use instance::Instance;
pub use managers::{FilterOp, FilteredIter, RelatedIter, RelationManager, TypeManager};
pub use registry::{ModelType, Registry, TypeResolver};
pub use scene::{Arg, CreateArgs, MigrationReport, Scene};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A model, field or relation declaration is malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value was rejected by a field's validator chain.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    /// A persisted type tag could not be resolved to a registered model.
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// A lookup matched nothing.
    #[error("Does not exist: {0}")]
    DoesNotExist(String),

    /// The instance's node has been deleted out from under it.
    #[error("Stale instance: {0}")]
    Stale(String),

    /// The call does not apply to this field or relation shape.
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
