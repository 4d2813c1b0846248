//! Per-invocation bufferization state and the substitution primitives that
//! strategies use to splice buffer values into a function.

use std::collections::HashMap;

use tracing::trace;

use crate::error::{BufferizeError, BufferizeResult};
use crate::index::{DefId, InstId};
use crate::policy::DialectPolicy;
use crate::rewriter::ProgramRewriter;
use crate::spec::{MemRefSpec, Operand, Operation, ValueId, ValueType};

/// Memoization key: a tensor value within one function of the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub function: usize,
    pub value: ValueId,
}

/// Rollback point for the tensor-to-buffer map.
#[derive(Debug, Clone, Copy)]
pub struct StateCheckpoint {
    journal_len: usize,
}

/// Owned by a single pass invocation.
///
/// The tensor-to-buffer map is append-only and write-once per key. The policy
/// is installed once before any rewrite and is read-only afterwards.
#[derive(Debug, Default)]
pub struct BufferizationState {
    buffers: HashMap<BufferKey, ValueId>,
    journal: Vec<BufferKey>,
    policy: Option<DialectPolicy>,
    function: usize,
}

impl BufferizationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_policy(&mut self, policy: DialectPolicy) -> BufferizeResult<()> {
        if self.policy.is_some() {
            return Err(BufferizeError::PolicyAlreadyInstalled);
        }
        self.policy = Some(policy);
        Ok(())
    }

    /// Returns the installed policy; reaching this without one is an internal error.
    pub fn policy(&self) -> BufferizeResult<&DialectPolicy> {
        self.policy.as_ref().ok_or(BufferizeError::PolicyMissing)
    }

    pub fn has_policy(&self) -> bool {
        self.policy.is_some()
    }

    /// Scopes subsequent lookups to the function at `index` in the program.
    pub fn enter_function(&mut self, index: usize) {
        self.function = index;
    }

    pub fn lookup_buffer(&self, tensor: ValueId) -> Option<ValueId> {
        self.buffers.get(&self.key(tensor)).copied()
    }

    /// Number of memoized tensor values across all functions.
    pub fn mapped_len(&self) -> usize {
        self.buffers.len()
    }

    /// Records `buffer` for `tensor` unless a buffer is already recorded.
    pub fn map_buffer(&mut self, tensor: ValueId, buffer: ValueId) -> ValueId {
        let key = self.key(tensor);
        if let Some(existing) = self.buffers.get(&key) {
            return *existing;
        }
        self.buffers.insert(key, buffer);
        self.journal.push(key);
        buffer
    }

    /// Returns the buffer backing `value`, materializing a `to_buffer` bridge
    /// the first time a tensor without a known buffer is requested.
    pub fn get_buffer(
        &mut self,
        rewriter: &mut ProgramRewriter<'_>,
        value: ValueId,
    ) -> BufferizeResult<ValueId> {
        if let Some(buffer) = self.lookup_buffer(value) {
            return Ok(buffer);
        }

        let def = rewriter
            .def_of(value)
            .ok_or(BufferizeError::OperandNotBufferized { value })?;

        if let DefId::Inst(inst) = def {
            if matches!(rewriter.op(inst)?, Operation::ToTensor) {
                let source = rewriter
                    .operands(inst)?
                    .first()
                    .and_then(Operand::value)
                    .ok_or(BufferizeError::OperandNotBufferized { value })?;
                return Ok(self.map_buffer(value, source));
            }
        }

        let buffer_ty = match rewriter.type_of(value) {
            Some(ValueType::Tensor(spec)) => {
                ValueType::MemRef(MemRefSpec::identity(spec.dtype, spec.shape.clone()))
            }
            Some(ValueType::UnrankedTensor(dtype)) => ValueType::UnrankedMemRef(*dtype),
            _ => return Err(BufferizeError::OperandNotBufferized { value }),
        };

        let operands = vec![Operand::Value(value)];
        let (_, buffer) = match def {
            DefId::Inst(inst) => {
                rewriter.insert_after(inst, Operation::ToBuffer, operands, buffer_ty)?
            }
            DefId::Param { .. } => rewriter.insert_front(Operation::ToBuffer, operands, buffer_ty)?,
        };
        trace!(tensor = value.0, buffer = buffer.0, "materialized to_buffer bridge");
        Ok(self.map_buffer(value, buffer))
    }

    /// Substitutes `buffer` for the tensor result of `root` and erases `root`.
    ///
    /// Remaining tensor uses (including function results) are routed through a
    /// `to_tensor` bridge emitted in place of `root`.
    pub fn replace_with_buffer_value(
        &mut self,
        rewriter: &mut ProgramRewriter<'_>,
        root: InstId,
        buffer: ValueId,
    ) -> BufferizeResult<()> {
        let result = rewriter.value_of(root)?;
        let live = !rewriter.users_of(result).is_empty() || rewriter.is_function_result(result);
        if live {
            let tensor_ty = rewriter.instruction(root)?.output.clone();
            let (_, bridge) = rewriter.insert_before(
                root,
                Operation::ToTensor,
                vec![Operand::Value(buffer)],
                tensor_ty,
            )?;
            rewriter.replace_all_uses(result, bridge)?;
            self.map_buffer(bridge, buffer);
        }
        self.map_buffer(result, buffer);
        rewriter.erase_inst(root)?;
        Ok(())
    }

    /// Emits `op` before `root`, then substitutes its result for `root`.
    pub fn replace_with_new_buffer_op(
        &mut self,
        rewriter: &mut ProgramRewriter<'_>,
        root: InstId,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> BufferizeResult<ValueId> {
        let (_, buffer) = rewriter.insert_before(root, op, operands, output)?;
        self.replace_with_buffer_value(rewriter, root, buffer)?;
        Ok(buffer)
    }

    pub fn checkpoint(&self) -> StateCheckpoint {
        StateCheckpoint {
            journal_len: self.journal.len(),
        }
    }

    /// Forgets every mapping recorded after `checkpoint`.
    pub fn restore(&mut self, checkpoint: StateCheckpoint) {
        for key in self.journal.drain(checkpoint.journal_len..) {
            self.buffers.remove(&key);
        }
    }

    fn key(&self, value: ValueId) -> BufferKey {
        BufferKey {
            function: self.function,
            value,
        }
    }
}
