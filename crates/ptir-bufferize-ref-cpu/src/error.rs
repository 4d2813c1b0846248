use ptir_bufferize::spec::{DType, OperationKind, ValueId};
use thiserror::Error;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("function `{0}` not found")]
    UnknownFunction(String),
    #[error("function expects {expected} inputs, got {found}")]
    InputArity { expected: usize, found: usize },
    #[error("value {value:?} has no runtime value")]
    MissingValue { value: ValueId },
    #[error("{op} expects {expected} operands, got {found}")]
    OperandArity {
        op: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("expected {expected} operand, got {found}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
    },
    #[error("dtype {0:?} is not supported by the host interpreter")]
    UnsupportedDType(DType),
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    #[error("address {address} outside allocation of {len} elements")]
    OutOfBounds { address: i64, len: usize },
    #[error("allocation #{0} does not exist")]
    UnknownAllocation(usize),
    #[error("malformed instruction: {0}")]
    Malformed(String),
    #[error("{source} (at function `{function}` instruction #{index}, {})", .kind.mnemonic())]
    Instruction {
        function: String,
        index: usize,
        kind: OperationKind,
        #[source]
        source: Box<ExecError>,
    },
}

impl ExecError {
    /// Innermost error, looking through instruction context.
    pub fn root_cause(&self) -> &ExecError {
        match self {
            ExecError::Instruction { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
