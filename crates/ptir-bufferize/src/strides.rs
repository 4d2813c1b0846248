//! Stride computation for zero-copy broadcast views.
//!
//! Sizes and strides are [`IndexExpr`]s: folded to constants whenever both
//! inputs are static, otherwise materialized as index arithmetic inserted
//! before the instruction being rewritten.

use crate::error::{BufferizeError, BufferizeResult};
use crate::index::InstId;
use crate::rewriter::ProgramRewriter;
use crate::spec::{
    DType, DimSpec, Dimension, MemRefSpec, Operand, Operation, Shape, StrideDim, ValueId,
    ValueType,
};

/// An index quantity known at compile time or computed at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexExpr {
    Static(i64),
    Value(ValueId),
}

impl IndexExpr {
    pub fn as_static(self) -> Option<i64> {
        match self {
            IndexExpr::Static(value) => Some(value),
            IndexExpr::Value(_) => None,
        }
    }

    pub fn to_operand(self) -> Operand {
        match self {
            IndexExpr::Static(value) => Operand::Index(value),
            IndexExpr::Value(value) => Operand::Value(value),
        }
    }

    pub fn to_stride_dim(self) -> StrideDim {
        match self {
            IndexExpr::Static(value) => StrideDim::Static(value),
            IndexExpr::Value(_) => StrideDim::Dynamic,
        }
    }
}

/// Inserts index computations immediately before a fixed instruction.
pub struct IndexEmitter<'r, 'a> {
    rewriter: &'r mut ProgramRewriter<'a>,
    at: InstId,
    emitted: usize,
}

impl<'r, 'a> IndexEmitter<'r, 'a> {
    pub fn new(rewriter: &'r mut ProgramRewriter<'a>, at: InstId) -> Self {
        Self {
            rewriter,
            at,
            emitted: 0,
        }
    }

    /// Number of instructions inserted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn emit(
        &mut self,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> BufferizeResult<ValueId> {
        let (_, value) = self.rewriter.insert_before(self.at, op, operands, output)?;
        self.emitted += 1;
        Ok(value)
    }

    /// Extent of `axis` of `buffer`: the static size, or a `dim` read.
    pub fn dim(
        &mut self,
        buffer: ValueId,
        axis: usize,
        extent: &Dimension,
    ) -> BufferizeResult<IndexExpr> {
        if let Some(size) = extent.as_static() {
            return Ok(IndexExpr::Static(size as i64));
        }
        let value = self.emit(
            Operation::Dim(DimSpec { axis }),
            vec![Operand::Value(buffer)],
            ValueType::index(),
        )?;
        Ok(IndexExpr::Value(value))
    }

    /// `buffer` itself when it is in identity layout, otherwise a fresh
    /// identity-layout allocation holding a copy of its elements.
    pub fn dense(&mut self, buffer: ValueId) -> BufferizeResult<ValueId> {
        let spec = match self.rewriter.type_of(buffer) {
            Some(ValueType::MemRef(spec)) if !spec.is_identity() => spec.clone(),
            _ => return Ok(buffer),
        };
        let mut dynamic_sizes = Vec::with_capacity(spec.shape.dynamic_dim_count());
        for (axis, extent) in spec.shape.dims().iter().enumerate() {
            if extent.is_dynamic() {
                dynamic_sizes.push(self.dim(buffer, axis, extent)?.to_operand());
            }
        }
        let alloc = self.emit(
            Operation::Alloc,
            dynamic_sizes,
            ValueType::MemRef(MemRefSpec::identity(spec.dtype, spec.shape)),
        )?;
        self.emit(
            Operation::Copy,
            vec![Operand::Value(buffer), Operand::Value(alloc)],
            ValueType::unit(),
        )?;
        Ok(alloc)
    }

    pub fn mul(&mut self, lhs: IndexExpr, rhs: IndexExpr) -> BufferizeResult<IndexExpr> {
        match (lhs, rhs) {
            (IndexExpr::Static(1), other) | (other, IndexExpr::Static(1)) => return Ok(other),
            (IndexExpr::Static(a), IndexExpr::Static(b)) => {
                if let Some(product) = a.checked_mul(b) {
                    return Ok(IndexExpr::Static(product));
                }
            }
            _ => {}
        }
        let value = self.emit(
            Operation::MulI,
            vec![lhs.to_operand(), rhs.to_operand()],
            ValueType::index(),
        )?;
        Ok(IndexExpr::Value(value))
    }

    /// Element `axis` of the 1-D integer tensor `shape`, converted to an index.
    pub fn extract_index(
        &mut self,
        shape: ValueId,
        axis: usize,
        dtype: DType,
    ) -> BufferizeResult<IndexExpr> {
        let element = self.emit(
            Operation::Extract,
            vec![Operand::Value(shape), Operand::Index(axis as i64)],
            ValueType::Scalar(dtype),
        )?;
        if dtype == DType::Index {
            return Ok(IndexExpr::Value(element));
        }
        let index = self.emit(
            Operation::IndexCast,
            vec![Operand::Value(element)],
            ValueType::index(),
        )?;
        Ok(IndexExpr::Value(index))
    }

    /// `if lhs < rhs { if_less } else { otherwise }`, folded when `lhs` and `rhs` are static.
    pub fn select_lt(
        &mut self,
        lhs: IndexExpr,
        rhs: IndexExpr,
        if_less: IndexExpr,
        otherwise: IndexExpr,
    ) -> BufferizeResult<IndexExpr> {
        if let (Some(a), Some(b)) = (lhs.as_static(), rhs.as_static()) {
            return Ok(if a < b { if_less } else { otherwise });
        }
        let predicate = self.emit(
            Operation::CmpISlt,
            vec![lhs.to_operand(), rhs.to_operand()],
            ValueType::Scalar(DType::I1),
        )?;
        let value = self.emit(
            Operation::Select,
            vec![
                Operand::Value(predicate),
                if_less.to_operand(),
                otherwise.to_operand(),
            ],
            ValueType::index(),
        )?;
        Ok(IndexExpr::Value(value))
    }
}

/// Per-dimension sizes and row-major strides of a densely packed buffer.
///
/// Only valid for identity-layout buffers; see [`IndexEmitter::dense`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatLayout {
    pub sizes: Vec<IndexExpr>,
    pub strides: Vec<IndexExpr>,
}

/// Right-to-left scan: the innermost stride is 1 and each stride to its left
/// is the product of all sizes to its right.
pub fn flattened_strides(
    emitter: &mut IndexEmitter<'_, '_>,
    buffer: ValueId,
    shape: &Shape,
) -> BufferizeResult<FlatLayout> {
    let rank = shape.rank();
    let mut sizes = vec![IndexExpr::Static(1); rank];
    let mut strides = vec![IndexExpr::Static(1); rank];
    let mut running = IndexExpr::Static(1);
    for (axis, extent) in shape.dims().iter().enumerate().rev() {
        let size = emitter.dim(buffer, axis, extent)?;
        sizes[axis] = size;
        strides[axis] = running;
        if axis > 0 {
            running = emitter.mul(running, size)?;
        }
    }
    Ok(FlatLayout { sizes, strides })
}

/// The stride-zero rule on constants.
pub fn fold_broadcast_stride(operand_size: i64, target_size: i64, stride: i64) -> i64 {
    if operand_size < target_size {
        0
    } else {
        stride
    }
}

/// Stride of an output dimension mapped to an operand dimension: zero when the
/// operand extent is smaller than the target extent, the operand stride otherwise.
pub fn broadcast_stride(
    emitter: &mut IndexEmitter<'_, '_>,
    operand_size: IndexExpr,
    target_size: IndexExpr,
    stride: IndexExpr,
) -> BufferizeResult<IndexExpr> {
    if let (Some(operand), Some(target), Some(stride)) = (
        operand_size.as_static(),
        target_size.as_static(),
        stride.as_static(),
    ) {
        return Ok(IndexExpr::Static(fold_broadcast_stride(operand, target, stride)));
    }
    emitter.select_lt(operand_size, target_size, IndexExpr::Static(0), stride)
}

/// Checks the operand-to-output dimension mapping of a broadcast.
pub fn validate_broadcast_dimensions(
    dims: &[usize],
    operand_rank: usize,
    result_rank: usize,
) -> BufferizeResult<()> {
    let invalid = |reason: &'static str| BufferizeError::InvalidBroadcastDimensions {
        dims: dims.to_vec(),
        operand_rank,
        result_rank,
        reason,
    };
    if dims.len() != operand_rank {
        return Err(invalid("mapping length differs from operand rank"));
    }
    if operand_rank > result_rank {
        return Err(invalid("operand rank exceeds result rank"));
    }
    if dims.iter().any(|&dim| dim >= result_rank) {
        return Err(invalid("output dimension out of range"));
    }
    if dims.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(invalid("mapping is not strictly increasing"));
    }
    Ok(())
}
