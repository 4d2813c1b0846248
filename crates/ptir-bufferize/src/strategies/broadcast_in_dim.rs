//! `dynamic_broadcast_in_dim` as a zero-copy strided view.
//!
//! Every output dimension either maps to an operand dimension or is a new
//! broadcast axis. New axes and expanding (size-1) operand axes get stride 0,
//! so the view replicates elements by reading the same address repeatedly.
//! When the dialect policy requires an identity layout, the view is copied
//! into a fresh row-major allocation.

use tracing::{debug, trace};

use crate::error::{BufferizeError, BufferizeResult};
use crate::index::InstId;
use crate::rewriter::ProgramRewriter;
use crate::spec::{
    Instruction, MemRefSpec, Operand, Operation, OperationKind, ReinterpretCastSpec, ValueType,
};
use crate::state::BufferizationState;
use crate::strategy::{
    data_operand_aliases_result, expect_instruction, ranked_tensor, ranked_tensor_operand,
    value_operands, AliasingResults, BufferRelation, BufferizableOp,
};
use crate::strides::{
    broadcast_stride, flattened_strides, validate_broadcast_dimensions, IndexEmitter, IndexExpr,
};

use super::shape_operand_dtype;

#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicBroadcastInDimStrategy;

impl BufferizableOp for DynamicBroadcastInDimStrategy {
    fn name(&self) -> &'static str {
        "dynamic_broadcast_in_dim"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::DynamicBroadcastInDim
    }

    fn reads_memory(&self, _: &Instruction, _: usize, _: &BufferizationState) -> bool {
        true
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
        BufferRelation::Unknown
    }

    fn rewrite(
        &self,
        root: InstId,
        rewriter: &mut ProgramRewriter<'_>,
        state: &mut BufferizationState,
    ) -> BufferizeResult<()> {
        let inst = expect_instruction(rewriter, root, OperationKind::DynamicBroadcastInDim)?;
        let Operation::DynamicBroadcastInDim(spec) = &inst.op else {
            return Err(BufferizeError::UnexpectedOperation {
                expected: OperationKind::DynamicBroadcastInDim,
                found: inst.op.kind(),
            });
        };
        let [data, output_dimensions] = value_operands::<2>(&inst)?;
        let result = ranked_tensor(Some(&inst.output), inst.id)?;
        let operand = ranked_tensor_operand(rewriter.type_of(data), data)?;
        let result_rank = result.shape.rank();
        validate_broadcast_dimensions(
            &spec.broadcast_dimensions,
            operand.shape.rank(),
            result_rank,
        )?;
        let shape_dtype = shape_operand_dtype(
            rewriter.type_of(output_dimensions),
            output_dimensions,
            Some(result_rank),
        )?;
        let materialize = state.policy()?.requires_identity_layout(&inst);

        let buffer = state.get_buffer(rewriter, data)?;

        let (bufferized, emitted) = {
            let mut emitter = IndexEmitter::new(rewriter, root);
            let buffer = emitter.dense(buffer)?;
            let layout = flattened_strides(&mut emitter, buffer, &operand.shape)?;

            let mut target_sizes = Vec::with_capacity(result_rank);
            for (axis, extent) in result.shape.dims().iter().enumerate() {
                let size = match extent.as_static() {
                    Some(size) => IndexExpr::Static(size as i64),
                    None => emitter.extract_index(output_dimensions, axis, shape_dtype)?,
                };
                target_sizes.push(size);
            }

            let mut strides = vec![IndexExpr::Static(0); result_rank];
            for (operand_axis, &output_axis) in spec.broadcast_dimensions.iter().enumerate() {
                strides[output_axis] = broadcast_stride(
                    &mut emitter,
                    layout.sizes[operand_axis],
                    target_sizes[output_axis],
                    layout.strides[operand_axis],
                )?;
            }
            trace!(
                value = inst.id.0,
                strides = ?strides,
                sizes = ?target_sizes,
                "broadcast strides"
            );

            let mut operands = Vec::with_capacity(1 + 2 * result_rank);
            operands.push(Operand::Value(buffer));
            operands.extend(target_sizes.iter().map(|size| size.to_operand()));
            operands.extend(strides.iter().map(|stride| stride.to_operand()));
            let view = emitter.emit(
                Operation::ReinterpretCast(ReinterpretCastSpec { offset: 0 }),
                operands,
                ValueType::MemRef(MemRefSpec::type_erased(operand.dtype, result.shape.clone())),
            )?;

            let bufferized = if materialize {
                let dynamic_sizes = result
                    .shape
                    .dims()
                    .iter()
                    .zip(&target_sizes)
                    .filter(|(extent, _)| extent.is_dynamic())
                    .map(|(_, size)| size.to_operand())
                    .collect();
                let alloc = emitter.emit(
                    Operation::Alloc,
                    dynamic_sizes,
                    ValueType::MemRef(MemRefSpec::identity(result.dtype, result.shape.clone())),
                )?;
                emitter.emit(
                    Operation::Copy,
                    vec![Operand::Value(view), Operand::Value(alloc)],
                    ValueType::unit(),
                )?;
                alloc
            } else {
                view
            };
            (bufferized, emitter.emitted())
        };

        debug!(
            value = inst.id.0,
            materialized = materialize,
            emitted,
            "dynamic_broadcast_in_dim bufferized"
        );
        state.replace_with_buffer_value(rewriter, root, bufferized)
    }
}
