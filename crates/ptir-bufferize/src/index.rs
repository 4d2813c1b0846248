use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;
use thiserror::Error;

use crate::spec::{Function, Operand, ValueId, ValueType};

/// Stable identifier assigned to each instruction when indexing a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct InstId(pub u32);

/// Total "definition" of a value: a function parameter or an instruction result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefId {
    Param { index: u32 },
    Inst(InstId),
}

/// Use lists, positions and types for a single function body.
///
/// Instruction ids stay stable across insertions and erasures; positions are
/// shifted in place.
#[derive(Debug, Clone)]
pub struct FunctionIndices {
    inst_values: HashMap<InstId, ValueId>,
    value_types: HashMap<ValueId, ValueType>,
    params: Vec<ValueId>,
    param_index_of: HashMap<ValueId, u32>,
    pos_of: HashMap<InstId, usize>,
    value_to_inst: HashMap<ValueId, InstId>,
    users: HashMap<ValueId, SmallVec<[InstId; 4]>>,
    next_value: u32,
    next_inst: u32,
}

impl FunctionIndices {
    /// Indexes `function` and checks that every use is dominated by a definition.
    pub fn build(function: &Function) -> Result<Self, FunctionIndexError> {
        let mut seen_values: HashSet<ValueId> = HashSet::new();
        let mut indices = FunctionIndices {
            inst_values: HashMap::with_capacity(function.body.len()),
            value_types: HashMap::new(),
            params: Vec::with_capacity(function.parameters.len()),
            param_index_of: HashMap::new(),
            pos_of: HashMap::with_capacity(function.body.len()),
            value_to_inst: HashMap::with_capacity(function.body.len()),
            users: HashMap::new(),
            next_value: 0,
            next_inst: function.body.len() as u32,
        };

        for (index, (param_id, param_ty)) in function
            .parameter_ids
            .iter()
            .zip(function.parameters.iter())
            .enumerate()
        {
            if !seen_values.insert(*param_id) {
                return Err(FunctionIndexError::DuplicateValue { value: *param_id });
            }
            indices.params.push(*param_id);
            indices.param_index_of.insert(*param_id, index as u32);
            indices.value_types.insert(*param_id, param_ty.clone());
        }

        for (index, instruction) in function.body.iter().enumerate() {
            let inst_id = InstId(index as u32);
            indices.add_operand_users(inst_id, &instruction.operands)?;

            if !seen_values.insert(instruction.id) {
                return Err(FunctionIndexError::DuplicateValue {
                    value: instruction.id,
                });
            }
            indices.pos_of.insert(inst_id, index);
            indices.value_to_inst.insert(instruction.id, inst_id);
            indices.inst_values.insert(inst_id, instruction.id);
            indices
                .value_types
                .insert(instruction.id, instruction.output.clone());
        }

        for result_id in &function.result_ids {
            if !indices.value_types.contains_key(result_id) {
                return Err(FunctionIndexError::MissingValueDefinition { value: *result_id });
            }
        }

        indices.next_value = seen_values
            .iter()
            .map(|value| value.0 + 1)
            .max()
            .unwrap_or(0);
        Ok(indices)
    }

    pub fn position(&self, inst: InstId) -> Option<usize> {
        self.pos_of.get(&inst).copied()
    }

    pub fn value_of(&self, inst: InstId) -> Option<ValueId> {
        self.inst_values.get(&inst).copied()
    }

    pub fn inst_of(&self, value: ValueId) -> Option<InstId> {
        self.value_to_inst.get(&value).copied()
    }

    pub fn def_of(&self, value: ValueId) -> Option<DefId> {
        if let Some(index) = self.param_index_of.get(&value).copied() {
            return Some(DefId::Param { index });
        }
        self.inst_of(value).map(DefId::Inst)
    }

    pub fn type_of(&self, value: ValueId) -> Option<&ValueType> {
        self.value_types.get(&value)
    }

    pub fn users_of(&self, value: ValueId) -> &[InstId] {
        self.users
            .get(&value)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, inst: InstId) -> bool {
        self.pos_of.contains_key(&inst)
    }

    pub fn len(&self) -> usize {
        self.pos_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos_of.is_empty()
    }

    pub fn ordered_inst_ids(&self) -> Vec<InstId> {
        let mut entries: Vec<_> = self
            .pos_of
            .iter()
            .map(|(inst, pos)| (*inst, *pos))
            .collect();
        entries.sort_by_key(|&(_, pos)| pos);
        entries.into_iter().map(|(inst, _)| inst).collect()
    }

    pub(crate) fn allocate_inst(&mut self) -> InstId {
        let inst = InstId(self.next_inst);
        self.next_inst += 1;
        inst
    }

    pub(crate) fn allocate_value(&mut self) -> ValueId {
        let value = ValueId(self.next_value);
        self.next_value += 1;
        value
    }

    pub(crate) fn insert_instruction(
        &mut self,
        inst_id: InstId,
        pos: usize,
        value_id: ValueId,
        output: ValueType,
        operands: &[Operand],
    ) -> Result<(), FunctionIndexError> {
        if self.value_types.contains_key(&value_id) {
            return Err(FunctionIndexError::DuplicateValue { value: value_id });
        }
        self.add_operand_users(inst_id, operands)?;
        self.shift_positions_from(pos, 1);
        self.pos_of.insert(inst_id, pos);
        self.value_to_inst.insert(value_id, inst_id);
        self.inst_values.insert(inst_id, value_id);
        self.value_types.insert(value_id, output);
        Ok(())
    }

    pub(crate) fn remove_instruction(&mut self, inst: InstId, operands: &[Operand]) {
        if let Some(pos) = self.pos_of.remove(&inst) {
            self.shift_positions_from(pos + 1, -1);
        }
        if let Some(value) = self.inst_values.remove(&inst) {
            self.value_to_inst.remove(&value);
            self.value_types.remove(&value);
            self.users.remove(&value);
        }
        self.remove_operand_users(inst, operands);
    }

    pub(crate) fn update_operand_use(
        &mut self,
        inst: InstId,
        from: ValueId,
        to: ValueId,
    ) -> Result<(), FunctionIndexError> {
        if !self.value_types.contains_key(&to) {
            return Err(FunctionIndexError::MissingValueDefinition { value: to });
        }
        if let Some(list) = self.users.get_mut(&from) {
            list.retain(|id| *id != inst);
            if list.is_empty() {
                self.users.remove(&from);
            }
        }
        let list = self.users.entry(to).or_default();
        if !list.contains(&inst) {
            list.push(inst);
        }
        Ok(())
    }

    pub(crate) fn add_user(&mut self, value: ValueId, inst: InstId) {
        let list = self.users.entry(value).or_default();
        if !list.contains(&inst) {
            list.push(inst);
        }
    }

    fn shift_positions_from(&mut self, start: usize, delta: isize) {
        for pos in self.pos_of.values_mut() {
            if *pos >= start {
                *pos = pos.wrapping_add_signed(delta);
            }
        }
    }

    fn add_operand_users(
        &mut self,
        inst: InstId,
        operands: &[Operand],
    ) -> Result<(), FunctionIndexError> {
        for referenced in operands.iter().filter_map(Operand::value) {
            if !self.value_types.contains_key(&referenced) {
                return Err(FunctionIndexError::MissingValueDefinition { value: referenced });
            }
            let list = self.users.entry(referenced).or_default();
            if !list.contains(&inst) {
                list.push(inst);
            }
        }
        Ok(())
    }

    fn remove_operand_users(&mut self, inst: InstId, operands: &[Operand]) {
        for referenced in operands.iter().filter_map(Operand::value) {
            if let Some(list) = self.users.get_mut(&referenced) {
                list.retain(|id| *id != inst);
                if list.is_empty() {
                    self.users.remove(&referenced);
                }
            }
        }
    }
}

/// Errors surfaced when building or maintaining SSA indices.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FunctionIndexError {
    #[error("duplicate value definition for %{}", value.0)]
    DuplicateValue { value: ValueId },
    #[error("value %{} is used but never defined", value.0)]
    MissingValueDefinition { value: ValueId },
    #[error("instruction {inst:?} is not part of the function")]
    UnknownInstruction { inst: InstId },
    #[error("cannot erase %{} while it still has {uses} use(s)", value.0)]
    LiveUses { value: ValueId, uses: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptir_utils::tensor_spec_static;
    use crate::spec::{DType, ElementwiseBinaryOp, Instruction, Operation, ProgramBuilder};

    #[test]
    fn build_records_users_and_definitions() {
        let mut builder = ProgramBuilder::new();
        let ty = ValueType::Tensor(tensor_spec_static(DType::F32, &[4]));
        let p0 = builder.add_parameter(ty.clone());
        let v0 = builder.emit_single(
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Add),
            vec![Operand::Value(p0), Operand::Value(p0)],
            ty,
        );
        let function = builder.finish("main", vec![v0]);

        let indices = FunctionIndices::build(&function).expect("indices");
        assert_eq!(indices.users_of(p0), &[InstId(0)]);
        assert_eq!(indices.def_of(p0), Some(DefId::Param { index: 0 }));
        assert_eq!(indices.def_of(v0), Some(DefId::Inst(InstId(0))));
        assert_eq!(indices.allocate_value_preview(), ValueId(2));
    }

    #[test]
    fn build_rejects_use_before_definition() {
        let ty = ValueType::Tensor(tensor_spec_static(DType::F32, &[4]));
        let function = Function {
            name: "bad".to_string(),
            parameters: Vec::new(),
            parameter_ids: Vec::new(),
            results: Vec::new(),
            body: vec![Instruction {
                id: ValueId(1),
                op: Operation::Reshape,
                operands: vec![Operand::Value(ValueId(7))],
                output: ty,
            }],
            result_ids: Vec::new(),
        };
        let err = FunctionIndices::build(&function).expect_err("undefined operand");
        assert_eq!(
            err,
            FunctionIndexError::MissingValueDefinition { value: ValueId(7) }
        );
    }

    impl FunctionIndices {
        fn allocate_value_preview(&self) -> ValueId {
            ValueId(self.next_value)
        }
    }
}
