use smallvec::{smallvec, SmallVec};

use crate::error::{BufferizeError, BufferizeResult, ShapeClass};
use crate::index::InstId;
use crate::rewriter::ProgramRewriter;
use crate::spec::{Instruction, OperationKind, TensorSpec, ValueId, ValueType};
use crate::state::BufferizationState;

/// Aliasing guarantee between a result buffer and the operand buffer it aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRelation {
    /// Same memory region, same layout.
    Equivalent,
    /// No guarantee; the result may be a fresh allocation or a re-strided view.
    Unknown,
}

/// Result indices aliasing one operand.
pub type AliasingResults = SmallVec<[usize; 1]>;

/// Per-operation-kind bufferization contract.
///
/// Effect queries describe the tensor-level semantics and must not depend on
/// whether the instruction has already been rewritten. `rewrite` replaces the
/// instruction at `root` with buffer operations and erases it, or fails
/// without committing anything the driver cannot roll back.
pub trait BufferizableOp: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> OperationKind;

    fn reads_memory(&self, inst: &Instruction, operand: usize, state: &BufferizationState) -> bool;

    fn writes_memory(&self, inst: &Instruction, operand: usize, state: &BufferizationState) -> bool;

    fn aliasing_results(
        &self,
        inst: &Instruction,
        operand: usize,
        state: &BufferizationState,
    ) -> AliasingResults;

    fn buffer_relation(
        &self,
        inst: &Instruction,
        result: usize,
        state: &BufferizationState,
    ) -> BufferRelation;

    fn rewrite(
        &self,
        root: InstId,
        rewriter: &mut ProgramRewriter<'_>,
        state: &mut BufferizationState,
    ) -> BufferizeResult<()>;
}

/// Aliasing shared by the shape-only ops: the data operand aliases result 0.
pub(crate) fn data_operand_aliases_result(operand: usize) -> AliasingResults {
    if operand == 0 {
        smallvec![0]
    } else {
        SmallVec::new()
    }
}

/// Clones the instruction at `root` after checking its kind.
pub(crate) fn expect_instruction(
    rewriter: &ProgramRewriter<'_>,
    root: InstId,
    expected: OperationKind,
) -> BufferizeResult<Instruction> {
    let inst = rewriter.instruction(root)?;
    let found = inst.op.kind();
    if found != expected {
        return Err(BufferizeError::UnexpectedOperation { expected, found });
    }
    Ok(inst.clone())
}

/// Returns the first `N` operands as SSA values.
pub(crate) fn value_operands<const N: usize>(inst: &Instruction) -> BufferizeResult<[ValueId; N]> {
    let malformed = || BufferizeError::MalformedOperands {
        kind: inst.op.kind(),
        expected: N,
    };
    if inst.operands.len() != N {
        return Err(malformed());
    }
    let mut values = [ValueId(0); N];
    for (slot, operand) in values.iter_mut().zip(&inst.operands) {
        *slot = operand.value().ok_or_else(malformed)?;
    }
    Ok(values)
}

/// Ranked tensor spec of the operand `value`. Operands that are not tensors
/// have no buffer to obtain.
pub(crate) fn ranked_tensor_operand(
    ty: Option<&ValueType>,
    value: ValueId,
) -> BufferizeResult<TensorSpec> {
    match ty {
        Some(ValueType::Tensor(_) | ValueType::UnrankedTensor(_)) => ranked_tensor(ty, value),
        _ => Err(BufferizeError::OperandNotBufferized { value }),
    }
}

/// Ranked tensor spec of `value`, or `UnsupportedShapeClass`.
pub(crate) fn ranked_tensor(ty: Option<&ValueType>, value: ValueId) -> BufferizeResult<TensorSpec> {
    match ty {
        Some(ValueType::Tensor(spec)) => Ok(spec.clone()),
        _ => Err(BufferizeError::UnsupportedShapeClass {
            value,
            expected: ShapeClass::Ranked,
        }),
    }
}
