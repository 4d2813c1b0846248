use tracing::trace;

use crate::error::{BufferizeError, BufferizeResult, ShapeClass};
use crate::index::InstId;
use crate::rewriter::ProgramRewriter;
use crate::spec::{Instruction, MemRefSpec, Operand, Operation, OperationKind, ValueType};
use crate::state::BufferizationState;
use crate::strategy::{
    data_operand_aliases_result, expect_instruction, ranked_tensor, value_operands,
    AliasingResults, BufferRelation, BufferizableOp,
};

/// Unranked-to-ranked reshape: a metadata-only cast of the operand buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReshapeStrategy;

impl BufferizableOp for ReshapeStrategy {
    fn name(&self) -> &'static str {
        "reshape"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Reshape
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
        let inst = expect_instruction(rewriter, root, OperationKind::Reshape)?;
        let [source] = value_operands::<1>(&inst)?;
        // Ranked-to-ranked reshapes belong to a different lowering.
        if !matches!(rewriter.type_of(source), Some(ValueType::UnrankedTensor(_))) {
            return Err(BufferizeError::UnsupportedShapeClass {
                value: source,
                expected: ShapeClass::Unranked,
            });
        }
        let result = ranked_tensor(Some(&inst.output), inst.id)?;
        // The cast has no shape operand to recover dynamic extents from.
        if result.shape.dynamic_dim_count() > 0 {
            return Err(BufferizeError::UnsupportedShapeClass {
                value: inst.id,
                expected: ShapeClass::Static,
            });
        }

        let buffer = state.get_buffer(rewriter, source)?;
        let cast = state.replace_with_new_buffer_op(
            rewriter,
            root,
            Operation::Cast,
            vec![Operand::Value(buffer)],
            ValueType::MemRef(MemRefSpec::identity(result.dtype, result.shape)),
        )?;
        trace!(source = source.0, cast = cast.0, "reshape bufferized as cast");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptir_utils::{tensor_spec_mixed, tensor_spec_static, value_type_tensor};
    use crate::spec::{DType, Function, ProgramBuilder, ValueId};

    fn reshape_function(input: ValueType) -> Function {
        let mut builder = ProgramBuilder::new();
        let p0 = builder.add_parameter(input);
        let out = builder.emit_single(
            Operation::Reshape,
            vec![Operand::Value(p0)],
            value_type_tensor(tensor_spec_static(DType::F32, &[2, 3])),
        );
        builder.finish("main", vec![out])
    }

    #[test]
    fn unranked_operand_becomes_cast() {
        let mut function = reshape_function(ValueType::UnrankedTensor(DType::F32));
        let mut state = BufferizationState::new();
        let mut rewriter = ProgramRewriter::new(&mut function).expect("rewriter");
        let root = rewriter.insts_in_order()[0];
        ReshapeStrategy
            .rewrite(root, &mut rewriter, &mut state)
            .expect("rewrite");
        assert!(rewriter.verify());
        drop(rewriter);

        let kinds: Vec<_> = function.body.iter().map(|inst| inst.op.kind()).collect();
        assert_eq!(
            kinds,
            vec![OperationKind::ToBuffer, OperationKind::Cast, OperationKind::ToTensor]
        );
        let cast = &function.body[1];
        assert_eq!(
            cast.output,
            ValueType::MemRef(MemRefSpec::identity(
                DType::F32,
                tensor_spec_static(DType::F32, &[2, 3]).shape
            ))
        );
        assert_eq!(function.result_ids, vec![function.body[2].id]);
    }

    #[test]
    fn ranked_operand_is_rejected_without_edits() {
        let input = value_type_tensor(tensor_spec_static(DType::F32, &[6]));
        let mut function = reshape_function(input);
        let before = function.clone();
        let mut state = BufferizationState::new();
        let mut rewriter = ProgramRewriter::new(&mut function).expect("rewriter");
        let root = rewriter.insts_in_order()[0];
        let err = ReshapeStrategy
            .rewrite(root, &mut rewriter, &mut state)
            .expect_err("ranked operand");
        assert!(matches!(
            err,
            BufferizeError::UnsupportedShapeClass {
                value: ValueId(0),
                expected: ShapeClass::Unranked
            }
        ));
        drop(rewriter);
        assert_eq!(function, before);
    }

    #[test]
    fn dynamic_result_extent_is_rejected() {
        let mut builder = ProgramBuilder::new();
        let p0 = builder.add_parameter(ValueType::UnrankedTensor(DType::F32));
        let out = builder.emit_single(
            Operation::Reshape,
            vec![Operand::Value(p0)],
            value_type_tensor(tensor_spec_mixed(DType::F32, &[Some(2), None])),
        );
        let mut function = builder.finish("main", vec![out]);
        let before = function.clone();
        let mut state = BufferizationState::new();
        let mut rewriter = ProgramRewriter::new(&mut function).expect("rewriter");
        let root = rewriter.insts_in_order()[0];
        let err = ReshapeStrategy
            .rewrite(root, &mut rewriter, &mut state)
            .expect_err("dynamic extent");
        assert!(matches!(
            err,
            BufferizeError::UnsupportedShapeClass {
                expected: ShapeClass::Static,
                value,
            } if value == out
        ));
        drop(rewriter);
        assert_eq!(function, before);
    }

    #[test]
    fn effects_are_metadata_only() {
        let function = reshape_function(ValueType::UnrankedTensor(DType::F32));
        let state = BufferizationState::new();
        let inst = &function.body[0];
        assert!(!ReshapeStrategy.reads_memory(inst, 0, &state));
        assert!(!ReshapeStrategy.writes_memory(inst, 0, &state));
        assert_eq!(ReshapeStrategy.aliasing_results(inst, 0, &state).as_slice(), &[0]);
        assert_eq!(
            ReshapeStrategy.buffer_relation(inst, 0, &state),
            BufferRelation::Equivalent
        );
    }
}
