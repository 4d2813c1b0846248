//! Tensor-level aliasing summary built from strategy effect queries.

use std::collections::{BTreeMap, HashMap};

use crate::registry::StrategyRegistry;
use crate::spec::{Function, ValueId, ValueType};
use crate::state::BufferizationState;
use crate::strategy::BufferRelation;

/// Memory effects recorded on one tensor operand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueEffects {
    pub read: bool,
    pub written: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AliasAnalysis {
    effects: HashMap<ValueId, ValueEffects>,
    parents: HashMap<ValueId, ValueId>,
    may_alias: Vec<(ValueId, ValueId)>,
}

impl AliasAnalysis {
    pub fn effects(&self, value: ValueId) -> ValueEffects {
        self.effects.get(&value).copied().unwrap_or_default()
    }

    pub fn is_read(&self, value: ValueId) -> bool {
        self.effects(value).read
    }

    pub fn is_written(&self, value: ValueId) -> bool {
        self.effects(value).written
    }

    /// `true` when both values are guaranteed to share one buffer.
    pub fn equivalent(&self, lhs: ValueId, rhs: ValueId) -> bool {
        find_root(&self.parents, lhs) == find_root(&self.parents, rhs)
    }

    /// `true` when the values share a buffer or are linked by a relation
    /// without a guarantee.
    pub fn may_alias(&self, lhs: ValueId, rhs: ValueId) -> bool {
        let lhs = find_root(&self.parents, lhs);
        let rhs = find_root(&self.parents, rhs);
        if lhs == rhs {
            return true;
        }
        self.may_alias.iter().any(|&(a, b)| {
            let a = find_root(&self.parents, a);
            let b = find_root(&self.parents, b);
            (a == lhs && b == rhs) || (a == rhs && b == lhs)
        })
    }

    /// Equivalence classes with more than one member, each sorted, ordered by
    /// smallest member.
    pub fn equivalence_classes(&self) -> Vec<Vec<ValueId>> {
        let mut classes: BTreeMap<ValueId, Vec<ValueId>> = BTreeMap::new();
        for value in self.parents.keys() {
            classes
                .entry(find_root(&self.parents, *value))
                .or_default()
                .push(*value);
        }
        let mut classes: Vec<Vec<ValueId>> = classes
            .into_values()
            .filter(|members| members.len() > 1)
            .map(|mut members| {
                members.sort();
                members
            })
            .collect();
        classes.sort();
        classes
    }

    fn union(&mut self, lhs: ValueId, rhs: ValueId) {
        self.parents.entry(lhs).or_insert(lhs);
        self.parents.entry(rhs).or_insert(rhs);
        let root_lhs = find_root(&self.parents, lhs);
        let root_rhs = find_root(&self.parents, rhs);
        if root_lhs != root_rhs {
            self.parents.insert(root_lhs, root_rhs);
        }
    }
}

/// Queries every instruction with a registered strategy and summarizes which
/// tensor operands are read or written and which results alias them.
pub fn analyze_aliasing(
    function: &Function,
    registry: &StrategyRegistry,
    state: &BufferizationState,
) -> AliasAnalysis {
    let mut types: HashMap<ValueId, &ValueType> = function
        .parameter_ids
        .iter()
        .copied()
        .zip(function.parameters.iter())
        .collect();
    let mut analysis = AliasAnalysis::default();

    for inst in &function.body {
        if let Some(strategy) = registry.lookup(inst.op.kind()) {
            for (index, operand) in inst.operands.iter().enumerate() {
                let Some(value) = operand.value() else {
                    continue;
                };
                if !types.get(&value).is_some_and(|ty| ty.is_tensor()) {
                    continue;
                }
                let effects = analysis.effects.entry(value).or_default();
                effects.read |= strategy.reads_memory(inst, index, state);
                effects.written |= strategy.writes_memory(inst, index, state);

                for result in strategy.aliasing_results(inst, index, state) {
                    match strategy.buffer_relation(inst, result, state) {
                        BufferRelation::Equivalent => analysis.union(value, inst.id),
                        BufferRelation::Unknown => analysis.may_alias.push((value, inst.id)),
                    }
                }
            }
        }
        types.insert(inst.id, &inst.output);
    }
    analysis
}

fn find_root(parents: &HashMap<ValueId, ValueId>, value: ValueId) -> ValueId {
    let mut current = value;
    loop {
        let next = parents.get(&current).copied().unwrap_or(current);
        if next == current {
            return current;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptir_utils::{tensor_spec_mixed, tensor_spec_static, value_type_tensor};
    use crate::registry::default_registry;
    use crate::spec::{BroadcastInDimSpec, DType, Operand, Operation, ProgramBuilder};

    #[test]
    fn reshape_chain_is_equivalent_and_broadcast_only_may_alias() {
        let mut builder = ProgramBuilder::new();
        let input = builder.add_parameter(ValueType::UnrankedTensor(DType::F32));
        let shape = builder.add_parameter(value_type_tensor(tensor_spec_static(DType::Si64, &[2])));
        let ranked = builder.emit_single(
            Operation::Reshape,
            vec![Operand::Value(input)],
            value_type_tensor(tensor_spec_static(DType::F32, &[1, 4])),
        );
        let reshaped = builder.emit_single(
            Operation::DynamicReshape,
            vec![Operand::Value(ranked), Operand::Value(shape)],
            value_type_tensor(tensor_spec_mixed(DType::F32, &[None, None])),
        );
        let broadcast = builder.emit_single(
            Operation::DynamicBroadcastInDim(BroadcastInDimSpec {
                broadcast_dimensions: vec![0, 1],
            }),
            vec![Operand::Value(reshaped), Operand::Value(shape)],
            value_type_tensor(tensor_spec_mixed(DType::F32, &[None, None])),
        );
        let function = builder.finish("main", vec![broadcast]);

        let state = BufferizationState::new();
        let analysis = analyze_aliasing(&function, &default_registry(), &state);

        assert_eq!(
            analysis.equivalence_classes(),
            vec![vec![input, ranked, reshaped]]
        );
        assert!(analysis.equivalent(input, reshaped));
        assert!(!analysis.equivalent(reshaped, broadcast));
        assert!(analysis.may_alias(input, broadcast));
        assert!(!analysis.may_alias(shape, broadcast));

        assert!(!analysis.is_read(input));
        assert!(analysis.is_read(reshaped));
        assert!(analysis.is_read(shape));
        assert!(!analysis.is_written(reshaped));
    }
}
