use crate::{
    index::{DefId, FunctionIndexError, FunctionIndices, InstId},
    spec::{Function, Instruction, Operand, Operation, ValueId, ValueType},
};

/// Mutable IR editor with stable instruction identifiers and SSA accounting.
pub struct ProgramRewriter<'a> {
    pub func: &'a mut Function,
    indices: FunctionIndices,
    journal: Vec<Edit>,
}

/// Journal position taken before a rewrite; restoring it undoes every edit
/// made since.
#[derive(Debug, Clone, Copy)]
pub struct RewriterCheckpoint {
    journal_len: usize,
}

/// Inverse information for one mutation.
#[derive(Debug)]
enum Edit {
    Inserted(InstId),
    Erased {
        inst: InstId,
        pos: usize,
        instruction: Instruction,
    },
    ReplacedUses {
        from: ValueId,
        to: ValueId,
        operands: Vec<(InstId, Vec<usize>)>,
        results: Vec<usize>,
    },
}

impl<'a> ProgramRewriter<'a> {
    /// Creates a rewriter for the provided function, indexing its body.
    pub fn new(func: &'a mut Function) -> Result<Self, FunctionIndexError> {
        let indices = FunctionIndices::build(func)?;
        Ok(Self {
            func,
            indices,
            journal: Vec::new(),
        })
    }

    /// Returns the instruction referenced by `inst`.
    pub fn instruction(&self, inst: InstId) -> Result<&Instruction, FunctionIndexError> {
        let pos = self.position(inst)?;
        Ok(&self.func.body[pos])
    }

    /// Returns the operation referenced by `inst`.
    pub fn op(&self, inst: InstId) -> Result<&Operation, FunctionIndexError> {
        self.instruction(inst).map(|instruction| &instruction.op)
    }

    pub fn operands(&self, inst: InstId) -> Result<&[Operand], FunctionIndexError> {
        self.instruction(inst)
            .map(|instruction| instruction.operands.as_slice())
    }

    /// Returns the SSA value produced by the instruction.
    pub fn value_of(&self, inst: InstId) -> Result<ValueId, FunctionIndexError> {
        self.indices
            .value_of(inst)
            .ok_or(FunctionIndexError::UnknownInstruction { inst })
    }

    pub fn type_of(&self, value: ValueId) -> Option<&ValueType> {
        self.indices.type_of(value)
    }

    /// Returns the instruction defining the provided value.
    pub fn inst_of(&self, value: ValueId) -> Option<InstId> {
        self.indices.inst_of(value)
    }

    pub fn def_of(&self, value: ValueId) -> Option<DefId> {
        self.indices.def_of(value)
    }

    /// Returns the operation defining `value`, or `None` for parameters.
    pub fn defining_op(&self, value: ValueId) -> Option<&Operation> {
        match self.def_of(value)? {
            DefId::Param { .. } => None,
            DefId::Inst(inst) => self.op(inst).ok(),
        }
    }

    pub fn users_of(&self, value: ValueId) -> &[InstId] {
        self.indices.users_of(value)
    }

    pub fn is_function_result(&self, value: ValueId) -> bool {
        self.func.result_ids.contains(&value)
    }

    pub fn contains(&self, inst: InstId) -> bool {
        self.indices.contains(inst)
    }

    pub fn len(&self) -> usize {
        self.func.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.func.body.is_empty()
    }

    pub fn insts_in_order(&self) -> Vec<InstId> {
        self.indices.ordered_inst_ids()
    }

    /// Replaces all uses of `from` with `to`, including function results.
    pub fn replace_all_uses(
        &mut self,
        from: ValueId,
        to: ValueId,
    ) -> Result<(), FunctionIndexError> {
        if from == to {
            return Ok(());
        }
        let consumers = self.indices.users_of(from).to_vec();
        let mut operands = Vec::with_capacity(consumers.len());
        for inst in consumers {
            let pos = self.position(inst)?;
            let mut slots = Vec::new();
            for (slot, operand) in self.func.body[pos].operands.iter_mut().enumerate() {
                if *operand == Operand::Value(from) {
                    *operand = Operand::Value(to);
                    slots.push(slot);
                }
            }
            self.indices.update_operand_use(inst, from, to)?;
            operands.push((inst, slots));
        }
        let mut results = Vec::new();
        for (slot, result_id) in self.func.result_ids.iter_mut().enumerate() {
            if *result_id == from {
                *result_id = to;
                results.push(slot);
            }
        }
        self.journal.push(Edit::ReplacedUses {
            from,
            to,
            operands,
            results,
        });
        Ok(())
    }

    /// Erases the instruction identified by `inst`; its value must be dead.
    pub fn erase_inst(&mut self, inst: InstId) -> Result<(), FunctionIndexError> {
        let value = self.value_of(inst)?;
        let uses = self.indices.users_of(value).len() + usize::from(self.is_function_result(value));
        if uses > 0 {
            return Err(FunctionIndexError::LiveUses { value, uses });
        }
        let pos = self.position(inst)?;
        let instruction = self.func.body.remove(pos);
        self.indices.remove_instruction(inst, &instruction.operands);
        self.journal.push(Edit::Erased {
            inst,
            pos,
            instruction,
        });
        Ok(())
    }

    /// Inserts a new instruction before `at`, returning its identifiers.
    pub fn insert_before(
        &mut self,
        at: InstId,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> Result<(InstId, ValueId), FunctionIndexError> {
        let pos = self.position(at)?;
        self.insert_at_pos(pos, op, operands, output)
    }

    /// Inserts a new instruction right after `at`.
    pub fn insert_after(
        &mut self,
        at: InstId,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> Result<(InstId, ValueId), FunctionIndexError> {
        let pos = self.position(at)?;
        self.insert_at_pos(pos + 1, op, operands, output)
    }

    /// Inserts a new instruction at the start of the body.
    pub fn insert_front(
        &mut self,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> Result<(InstId, ValueId), FunctionIndexError> {
        self.insert_at_pos(0, op, operands, output)
    }

    pub fn checkpoint(&self) -> RewriterCheckpoint {
        RewriterCheckpoint {
            journal_len: self.journal.len(),
        }
    }

    /// Undoes every edit made after `checkpoint`, newest first.
    pub fn restore(&mut self, checkpoint: RewriterCheckpoint) -> Result<(), FunctionIndexError> {
        while self.journal.len() > checkpoint.journal_len {
            let Some(edit) = self.journal.pop() else {
                break;
            };
            self.undo(edit)?;
        }
        Ok(())
    }

    /// Verifies basic SSA invariants after mutations.
    pub fn verify(&self) -> bool {
        FunctionIndices::build(self.func).is_ok()
    }

    /// Current body position of `inst`.
    pub fn position(&self, inst: InstId) -> Result<usize, FunctionIndexError> {
        self.indices
            .position(inst)
            .ok_or(FunctionIndexError::UnknownInstruction { inst })
    }

    fn undo(&mut self, edit: Edit) -> Result<(), FunctionIndexError> {
        match edit {
            Edit::Inserted(inst) => {
                let pos = self.position(inst)?;
                let instruction = self.func.body.remove(pos);
                self.indices.remove_instruction(inst, &instruction.operands);
            }
            Edit::Erased {
                inst,
                pos,
                instruction,
            } => {
                self.indices.insert_instruction(
                    inst,
                    pos,
                    instruction.id,
                    instruction.output.clone(),
                    &instruction.operands,
                )?;
                self.func.body.insert(pos, instruction);
            }
            Edit::ReplacedUses {
                from,
                to,
                operands,
                results,
            } => {
                for (inst, slots) in operands {
                    let pos = self.position(inst)?;
                    let instruction = &mut self.func.body[pos];
                    for slot in slots {
                        instruction.operands[slot] = Operand::Value(from);
                    }
                    let still_uses_to = instruction.operands.contains(&Operand::Value(to));
                    self.indices.update_operand_use(inst, to, from)?;
                    if still_uses_to {
                        self.indices.add_user(to, inst);
                    }
                }
                for slot in results {
                    self.func.result_ids[slot] = from;
                }
            }
        }
        Ok(())
    }

    fn insert_at_pos(
        &mut self,
        pos: usize,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> Result<(InstId, ValueId), FunctionIndexError> {
        let inst_id = self.indices.allocate_inst();
        let value_id = self.indices.allocate_value();
        self.indices
            .insert_instruction(inst_id, pos, value_id, output.clone(), &operands)?;
        self.func.body.insert(
            pos,
            Instruction {
                id: value_id,
                op,
                operands,
                output,
            },
        );
        self.journal.push(Edit::Inserted(inst_id));
        Ok((inst_id, value_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptir_utils::{tensor_spec_static, value_type_tensor};
    use crate::spec::{DType, ElementwiseBinaryOp, ProgramBuilder};

    fn add_chain() -> Function {
        let mut builder = ProgramBuilder::new();
        let ty = value_type_tensor(tensor_spec_static(DType::F32, &[4]));
        let p0 = builder.add_parameter(ty.clone());
        let sum = builder.emit_single(
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Add),
            vec![Operand::Value(p0), Operand::Value(p0)],
            ty.clone(),
        );
        let twice = builder.emit_single(
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Add),
            vec![Operand::Value(sum), Operand::Value(p0)],
            ty,
        );
        builder.finish("main", vec![twice, sum])
    }

    #[test]
    fn restore_undoes_inserts_replacements_and_erasures() {
        let mut function = add_chain();
        let before = function.clone();
        let mut rewriter = ProgramRewriter::new(&mut function).expect("rewriter");
        let [first, second] = <[InstId; 2]>::try_from(rewriter.insts_in_order()).expect("two");
        let sum = rewriter.value_of(first).expect("sum");
        let ty = rewriter.type_of(sum).cloned().expect("type");

        let checkpoint = rewriter.checkpoint();
        let (_, copy) = rewriter
            .insert_before(first, Operation::Reshape, vec![Operand::Value(ValueId(0))], ty)
            .expect("insert");
        rewriter.replace_all_uses(sum, copy).expect("replace");
        rewriter.erase_inst(first).expect("erase");
        assert_eq!(rewriter.operands(second).expect("operands")[0], Operand::Value(copy));

        rewriter.restore(checkpoint).expect("restore");
        assert!(rewriter.verify());
        assert_eq!(rewriter.users_of(sum), &[second]);
        assert!(rewriter.users_of(copy).is_empty());
        assert_eq!(rewriter.insts_in_order(), vec![first, second]);
        drop(rewriter);
        assert_eq!(function, before);
    }

    #[test]
    fn restore_keeps_edits_before_the_checkpoint() {
        let mut function = add_chain();
        let mut rewriter = ProgramRewriter::new(&mut function).expect("rewriter");
        let first = rewriter.insts_in_order()[0];
        let ty = value_type_tensor(tensor_spec_static(DType::F32, &[4]));
        let p0 = Operand::Value(ValueId(0));
        rewriter
            .insert_before(first, Operation::Reshape, vec![p0.clone()], ty.clone())
            .expect("kept insert");

        let checkpoint = rewriter.checkpoint();
        rewriter
            .insert_front(Operation::Reshape, vec![p0], ty)
            .expect("undone insert");
        rewriter.restore(checkpoint).expect("restore");
        drop(rewriter);

        assert_eq!(function.body.len(), 3);
        assert_eq!(function.body[0].op, Operation::Reshape);
        assert_eq!(function.count_kind(crate::spec::OperationKind::Reshape), 1);
    }
}
