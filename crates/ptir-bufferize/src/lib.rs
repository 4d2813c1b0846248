//! Partial bufferization of PTIR tensor programs into strided buffer views.

pub mod analysis;
pub mod bufferize;
pub mod cleanup;
mod env;
pub mod error;
pub mod index;
pub mod legality;
pub mod policy;
pub mod ptir_utils;
pub mod registry;
pub mod rewriter;
pub mod shape_helpers;
pub mod spec;
pub mod state;
pub mod strategies;
pub mod strategy;
pub mod strides;
pub mod walker;

pub use bufferize::{bufferize_program, BufferizationOptions, BufferizePass, BufferizeStats};
pub use error::{BufferizeError, BufferizeResult, ShapeClass};
pub use policy::DialectPolicy;
pub use registry::{default_registry, StrategyRegistry};
pub use spec::{Function, Operation, OperationKind, Program};
pub use state::BufferizationState;
pub use strategy::{BufferRelation, BufferizableOp};
