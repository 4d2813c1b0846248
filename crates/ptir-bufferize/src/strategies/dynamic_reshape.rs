use tracing::trace;

use crate::error::{BufferizeError, BufferizeResult, ShapeClass};
use crate::index::InstId;
use crate::rewriter::ProgramRewriter;
use crate::spec::{Instruction, MemRefSpec, Operand, Operation, OperationKind, ValueType};
use crate::state::BufferizationState;
use crate::strategy::{
    data_operand_aliases_result, expect_instruction, value_operands, AliasingResults,
    BufferRelation, BufferizableOp,
};
use crate::strides::IndexEmitter;

use super::shape_operand_dtype;

/// Reshape to a run-time shape: a reshape view over the data buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicReshapeStrategy;

impl BufferizableOp for DynamicReshapeStrategy {
    fn name(&self) -> &'static str {
        "dynamic_reshape"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::DynamicReshape
    }

    fn reads_memory(&self, _: &Instruction, _: usize, _: &BufferizationState) -> bool {
        false
    }

    fn writes_memory(&self, _: &Instruction, _: usize, _: &BufferizationState) -> bool {
        false
    }

    fn aliasing_results(
        &self,
        _: &Instruction,
        operand: usize,
        _: &BufferizationState,
    ) -> AliasingResults {
        data_operand_aliases_result(operand)
    }

    fn buffer_relation(&self, _: &Instruction, _: usize, _: &BufferizationState) -> BufferRelation {
        BufferRelation::Equivalent
    }

    fn rewrite(
        &self,
        root: InstId,
        rewriter: &mut ProgramRewriter<'_>,
        state: &mut BufferizationState,
    ) -> BufferizeResult<()> {
        let inst = expect_instruction(rewriter, root, OperationKind::DynamicReshape)?;
        let [data, shape] = value_operands::<2>(&inst)?;

        let result_ty = match &inst.output {
            ValueType::Tensor(spec) => {
                ValueType::MemRef(MemRefSpec::identity(spec.dtype, spec.shape.clone()))
            }
            ValueType::UnrankedTensor(dtype) => ValueType::UnrankedMemRef(*dtype),
            _ => {
                return Err(BufferizeError::UnsupportedShapeClass {
                    value: inst.id,
                    expected: ShapeClass::Ranked,
                })
            }
        };
        shape_operand_dtype(rewriter.type_of(shape), shape, inst.output.rank())?;

        let data_buffer = state.get_buffer(rewriter, data)?;
        let shape_buffer = state.get_buffer(rewriter, shape)?;
        let data_buffer = IndexEmitter::new(rewriter, root).dense(data_buffer)?;
        let view = state.replace_with_new_buffer_op(
            rewriter,
            root,
            Operation::ReshapeView,
            vec![Operand::Value(data_buffer), Operand::Value(shape_buffer)],
            result_ty,
        )?;
        trace!(data = data.0, view = view.0, "dynamic_reshape bufferized as reshape view");
        Ok(())
    }
}
