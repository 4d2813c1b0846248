//! Removal of bridge pairs and dead helper instructions left by partial
//! bufferization.

use tracing::debug;

use crate::index::{DefId, FunctionIndexError};
use crate::rewriter::ProgramRewriter;
use crate::spec::{Dialect, Function, Operand, Operation};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    /// `to_buffer(to_tensor(b))` pairs rewired to `b`.
    pub folded: usize,
    pub dce_removed: usize,
}

/// Folds bridge round trips and erases dead instructions of the buffer-side
/// dialects. Tensor operations are never touched.
pub fn fold_bridges(function: &mut Function) -> Result<CleanupStats, FunctionIndexError> {
    let mut rewriter = ProgramRewriter::new(function)?;
    let mut stats = CleanupStats::default();

    for inst in rewriter.insts_in_order() {
        if !matches!(rewriter.op(inst)?, Operation::ToBuffer) {
            continue;
        }
        let Some(tensor) = rewriter.operands(inst)?.first().and_then(Operand::value) else {
            continue;
        };
        let Some(DefId::Inst(bridge)) = rewriter.def_of(tensor) else {
            continue;
        };
        if !matches!(rewriter.op(bridge)?, Operation::ToTensor) {
            continue;
        }
        let Some(buffer) = rewriter.operands(bridge)?.first().and_then(Operand::value) else {
            continue;
        };
        let value = rewriter.value_of(inst)?;
        // Only a round trip that preserves the buffer type is an identity.
        if rewriter.type_of(buffer) != rewriter.type_of(value) {
            continue;
        }
        rewriter.replace_all_uses(value, buffer)?;
        rewriter.erase_inst(inst)?;
        stats.folded += 1;
    }

    stats.dce_removed = run_dce(&mut rewriter)?;
    debug!(
        function = %rewriter.func.name,
        folded = stats.folded,
        dce_removed = stats.dce_removed,
        "bridge cleanup"
    );
    Ok(stats)
}

fn run_dce(rewriter: &mut ProgramRewriter<'_>) -> Result<usize, FunctionIndexError> {
    let mut removed_total = 0;
    loop {
        let mut removed_in_pass = 0;
        for inst in rewriter.insts_in_order().into_iter().rev() {
            if !rewriter.contains(inst) {
                continue;
            }
            let op = rewriter.op(inst)?;
            if op.has_side_effects() || !is_buffer_side(op) {
                continue;
            }
            let value = rewriter.value_of(inst)?;
            if rewriter.is_function_result(value) || !rewriter.users_of(value).is_empty() {
                continue;
            }
            rewriter.erase_inst(inst)?;
            removed_in_pass += 1;
        }
        if removed_in_pass == 0 {
            break;
        }
        removed_total += removed_in_pass;
    }
    Ok(removed_total)
}

fn is_buffer_side(op: &Operation) -> bool {
    matches!(
        op.kind().dialect(),
        Dialect::Bufferization | Dialect::MemRef | Dialect::Arith
    )
}
