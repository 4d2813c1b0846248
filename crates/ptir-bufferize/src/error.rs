use thiserror::Error;

use crate::index::FunctionIndexError;
use crate::legality::LegalityReport;
use crate::spec::{OperationKind, ValueId};

pub type BufferizeResult<T> = Result<T, BufferizeError>;

/// Shape class a strategy expected for one of its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeClass {
    Ranked,
    /// Ranked with every extent known at compile time.
    Static,
    Unranked,
}

#[derive(Debug, Error)]
pub enum BufferizeError {
    /// The tensor type of an operand or result is not the class the strategy handles.
    #[error("value %{} is not a {expected:?} tensor", value.0)]
    UnsupportedShapeClass { value: ValueId, expected: ShapeClass },

    /// The buffer for an operand could not be obtained.
    #[error("operand %{} cannot be bufferized", value.0)]
    OperandNotBufferized { value: ValueId },

    /// Phase B of a broadcast was reached without an installed dialect policy.
    #[error("dialect policy was not initialized before rewriting")]
    PolicyMissing,

    #[error("dialect policy is already installed")]
    PolicyAlreadyInstalled,

    #[error(
        "broadcast dimensions {dims:?} are invalid for operand rank {operand_rank} and result rank {result_rank}: {reason}"
    )]
    InvalidBroadcastDimensions {
        dims: Vec<usize>,
        operand_rank: usize,
        result_rank: usize,
        reason: &'static str,
    },

    /// The runtime shape operand is not a 1-D integer tensor matching the result rank.
    #[error("shape operand %{} must be a 1-D integer tensor with one entry per result dimension", value.0)]
    ShapeOperandInvalid { value: ValueId },

    #[error("{kind:?} expects {expected} value operand(s)")]
    MalformedOperands {
        kind: OperationKind,
        expected: usize,
    },

    #[error("strategy for {expected:?} was invoked on {found:?}")]
    UnexpectedOperation {
        expected: OperationKind,
        found: OperationKind,
    },

    #[error(transparent)]
    Index(#[from] FunctionIndexError),

    /// First rewrite failure of a pass, with its location.
    #[error("bufferizing {kind:?} at @{function}[{instruction}] failed: {source}")]
    Pass {
        function: String,
        instruction: usize,
        kind: OperationKind,
        #[source]
        source: Box<BufferizeError>,
    },

    #[error("program is not fully bufferized ({} diagnostic(s))", .0.diagnostics.len())]
    Illegal(LegalityReport),
}

impl BufferizeError {
    /// Returns the innermost error, unwrapping pass location context.
    pub fn root_cause(&self) -> &BufferizeError {
        match self {
            BufferizeError::Pass { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
