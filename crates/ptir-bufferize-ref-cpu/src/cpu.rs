use std::collections::HashMap;
use std::sync::Arc;

use ptir_bufferize::shape_helpers::static_dims_or_error;
use ptir_bufferize::spec::{
    BroadcastInDimSpec, DType, Dimension, DimSpec, ElementwiseBinaryOp, Function, Instruction,
    MemRefSpec, Operand, Operation, Program, ReinterpretCastSpec, Shape, TensorLiteral, ValueId,
    ValueType,
};
use ptir_bufferize::strides::validate_broadcast_dimensions;
use tracing::{debug, trace};

use crate::error::{ExecError, ExecResult};
use crate::memory::{
    element_count, row_major_strides, strided_addresses, HostTensor, Memory, Storage,
    StridedView, TensorData,
};

/// Runtime value bound to an SSA id.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    Tensor(HostTensor),
    Buffer(StridedView),
    Index(i64),
    Bool(bool),
    Unit,
}

impl RuntimeValue {
    fn label(&self) -> &'static str {
        match self {
            RuntimeValue::Tensor(_) => "tensor",
            RuntimeValue::Buffer(_) => "buffer",
            RuntimeValue::Index(_) => "index",
            RuntimeValue::Bool(_) => "bool",
            RuntimeValue::Unit => "unit",
        }
    }

    fn unexpected(&self, expected: &'static str) -> ExecError {
        ExecError::UnexpectedValue {
            expected,
            found: self.label(),
        }
    }

    pub fn as_tensor(&self) -> ExecResult<&HostTensor> {
        match self {
            RuntimeValue::Tensor(tensor) => Ok(tensor),
            other => Err(other.unexpected("tensor")),
        }
    }

    pub fn as_buffer(&self) -> ExecResult<&StridedView> {
        match self {
            RuntimeValue::Buffer(view) => Ok(view),
            other => Err(other.unexpected("buffer")),
        }
    }

    pub fn as_index(&self) -> ExecResult<i64> {
        match self {
            RuntimeValue::Index(value) => Ok(*value),
            other => Err(other.unexpected("index")),
        }
    }

    pub fn as_bool(&self) -> ExecResult<bool> {
        match self {
            RuntimeValue::Bool(value) => Ok(*value),
            other => Err(other.unexpected("bool")),
        }
    }
}

/// Executes PTIR functions on the host, in tensor form, buffer form or any mix
/// of the two. Buffers live in an interpreter-owned [`Memory`], so views created
/// by one run stay readable afterwards.
#[derive(Debug, Default)]
pub struct Interpreter {
    memory: Memory,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Copies `tensor` into a fresh allocation and returns its identity view.
    pub fn buffer_from_tensor(&mut self, tensor: &HostTensor) -> ExecResult<StridedView> {
        let allocation = self.memory.allocate(Storage::from_data(&tensor.data));
        StridedView::identity(allocation, tensor.dtype, tensor.dims.clone())
    }

    /// Gathers the elements seen through `view` in row-major index order.
    pub fn read_buffer(&self, view: &StridedView) -> ExecResult<HostTensor> {
        let storage = self.memory.get(view.allocation)?;
        let data = storage.gather(&view.addresses()?)?;
        HostTensor::new(view.dtype, view.sizes.clone(), data)
    }

    /// Host tensor for a tensor or buffer value.
    pub fn materialize(&self, value: &RuntimeValue) -> ExecResult<HostTensor> {
        match value {
            RuntimeValue::Tensor(tensor) => Ok(tensor.clone()),
            RuntimeValue::Buffer(view) => self.read_buffer(view),
            other => Err(other.unexpected("tensor or buffer")),
        }
    }

    pub fn run_program(
        &mut self,
        program: &Program,
        inputs: &[RuntimeValue],
    ) -> ExecResult<Vec<RuntimeValue>> {
        let function = program
            .function(&program.entry)
            .ok_or_else(|| ExecError::UnknownFunction(program.entry.clone()))?;
        self.run_function(function, inputs)
    }

    pub fn run_function(
        &mut self,
        function: &Function,
        inputs: &[RuntimeValue],
    ) -> ExecResult<Vec<RuntimeValue>> {
        if function.parameter_ids.len() != inputs.len() {
            return Err(ExecError::InputArity {
                expected: function.parameter_ids.len(),
                found: inputs.len(),
            });
        }
        debug!(
            function = %function.name,
            instructions = function.body.len(),
            "executing function"
        );

        let mut values: HashMap<ValueId, RuntimeValue> = function
            .parameter_ids
            .iter()
            .copied()
            .zip(inputs.iter().cloned())
            .collect();

        for (index, instruction) in function.body.iter().enumerate() {
            let value = instruction
                .operands
                .iter()
                .map(|operand| resolve_operand(&values, operand))
                .collect::<ExecResult<Vec<_>>>()
                .and_then(|operands| self.execute(instruction, &operands))
                .map_err(|err| ExecError::Instruction {
                    function: function.name.clone(),
                    index,
                    kind: instruction.op.kind(),
                    source: Box::new(err),
                })?;
            trace!(
                index,
                op.kind = instruction.op.kind().mnemonic(),
                result = value.label(),
                "executed instruction"
            );
            values.insert(instruction.id, value);
        }

        function
            .result_ids
            .iter()
            .map(|id| {
                values
                    .get(id)
                    .cloned()
                    .ok_or(ExecError::MissingValue { value: *id })
            })
            .collect()
    }

    fn execute(
        &mut self,
        instruction: &Instruction,
        operands: &[RuntimeValue],
    ) -> ExecResult<RuntimeValue> {
        let output = &instruction.output;
        match &instruction.op {
            Operation::Reshape => op_reshape(output, operands),
            Operation::DynamicReshape => op_dynamic_reshape(output, operands),
            Operation::DynamicBroadcastInDim(spec) => op_dynamic_broadcast_in_dim(spec, operands),
            Operation::ElementwiseBinary(op) => op_elementwise_binary(*op, operands),
            Operation::Constant(literal) => literal_to_tensor(literal).map(RuntimeValue::Tensor),
            Operation::Extract => op_extract(operands),
            Operation::ToBuffer => {
                let [tensor] = expect_operands::<1>("to_buffer", operands)?;
                let view = self.buffer_from_tensor(tensor.as_tensor()?)?;
                Ok(RuntimeValue::Buffer(view))
            }
            Operation::ToTensor => {
                let [buffer] = expect_operands::<1>("to_tensor", operands)?;
                self.read_buffer(buffer.as_buffer()?)
                    .map(RuntimeValue::Tensor)
            }
            Operation::Cast => op_cast(output, operands),
            Operation::ReshapeView => self.op_reshape_view(output, operands),
            Operation::ReinterpretCast(spec) => self.op_reinterpret_cast(*spec, output, operands),
            Operation::Alloc => self.op_alloc(output, operands),
            Operation::Copy => self.op_copy(operands),
            Operation::Dim(spec) => op_dim(*spec, operands),
            Operation::MulI => {
                let [lhs, rhs] = expect_operands::<2>("muli", operands)?;
                lhs.as_index()?
                    .checked_mul(rhs.as_index()?)
                    .map(RuntimeValue::Index)
                    .ok_or_else(|| ExecError::Malformed("index multiplication overflows".into()))
            }
            Operation::CmpISlt => {
                let [lhs, rhs] = expect_operands::<2>("cmpi", operands)?;
                Ok(RuntimeValue::Bool(lhs.as_index()? < rhs.as_index()?))
            }
            Operation::Select => {
                let [cond, on_true, on_false] = expect_operands::<3>("select", operands)?;
                let picked = if cond.as_bool()? { on_true } else { on_false };
                Ok(picked.clone())
            }
            Operation::IndexCast => {
                let [value] = expect_operands::<1>("index_cast", operands)?;
                value.as_index().map(RuntimeValue::Index)
            }
        }
    }

    fn op_reshape_view(
        &self,
        output: &ValueType,
        operands: &[RuntimeValue],
    ) -> ExecResult<RuntimeValue> {
        let [source, shape] = expect_operands::<2>("memref.reshape", operands)?;
        let source = source.as_buffer()?;
        let shape = self.read_buffer(shape.as_buffer()?)?;
        let dims = shape_values(&shape)?;
        if let Some(rank) = output.rank() {
            if rank != dims.len() {
                return Err(ExecError::InvalidShape(format!(
                    "shape buffer has {} entries for a rank-{rank} result",
                    dims.len()
                )));
            }
        }
        if !source.is_identity() {
            return Err(ExecError::Malformed(
                "memref.reshape source must be in identity layout".into(),
            ));
        }
        ensure_same_count(&source.sizes, &dims)?;
        StridedView::identity(source.allocation, source.dtype, dims).map(RuntimeValue::Buffer)
    }

    fn op_reinterpret_cast(
        &self,
        spec: ReinterpretCastSpec,
        output: &ValueType,
        operands: &[RuntimeValue],
    ) -> ExecResult<RuntimeValue> {
        let ValueType::MemRef(memref) = output else {
            return Err(ExecError::Malformed(
                "reinterpret_cast result must be a ranked buffer".into(),
            ));
        };
        let rank = memref.rank();
        if operands.len() != 1 + 2 * rank {
            return Err(ExecError::OperandArity {
                op: "reinterpret_cast",
                expected: 1 + 2 * rank,
                found: operands.len(),
            });
        }
        let source = operands[0].as_buffer()?;
        let sizes = operands[1..=rank]
            .iter()
            .map(|value| index_to_extent(value.as_index()?))
            .collect::<ExecResult<Vec<_>>>()?;
        let strides = operands[1 + rank..]
            .iter()
            .map(RuntimeValue::as_index)
            .collect::<ExecResult<Vec<_>>>()?;
        check_static_sizes(&memref.shape, &sizes)?;

        let view = StridedView {
            allocation: source.allocation,
            dtype: source.dtype,
            offset: spec.offset,
            sizes,
            strides,
        };
        let len = self.memory.get(view.allocation)?.len();
        if let Some(&address) = view
            .addresses()?
            .iter()
            .find(|&&address| address < 0 || address as usize >= len)
        {
            return Err(ExecError::OutOfBounds { address, len });
        }
        Ok(RuntimeValue::Buffer(view))
    }

    fn op_alloc(
        &mut self,
        output: &ValueType,
        operands: &[RuntimeValue],
    ) -> ExecResult<RuntimeValue> {
        let ValueType::MemRef(memref) = output else {
            return Err(ExecError::Malformed("alloc result must be a ranked buffer".into()));
        };
        let sizes = alloc_sizes(memref, operands)?;
        let storage = Storage::zeroed(memref.dtype, element_count(&sizes)?)?;
        let allocation = self.memory.allocate(storage);
        StridedView::identity(allocation, memref.dtype, sizes).map(RuntimeValue::Buffer)
    }

    fn op_copy(&mut self, operands: &[RuntimeValue]) -> ExecResult<RuntimeValue> {
        let [source, target] = expect_operands::<2>("copy", operands)?;
        let source = source.as_buffer()?;
        let target = target.as_buffer()?;
        if source.sizes != target.sizes {
            return Err(ExecError::InvalidShape(format!(
                "copy from {:?} into {:?}",
                source.sizes, target.sizes
            )));
        }
        if source.dtype != target.dtype {
            return Err(ExecError::Malformed(format!(
                "copy from {:?} into {:?}",
                source.dtype, target.dtype
            )));
        }
        let data = self
            .memory
            .get(source.allocation)?
            .gather(&source.addresses()?)?;
        self.memory
            .get_mut(target.allocation)?
            .scatter(&target.addresses()?, &data)?;
        Ok(RuntimeValue::Unit)
    }
}

fn resolve_operand(
    values: &HashMap<ValueId, RuntimeValue>,
    operand: &Operand,
) -> ExecResult<RuntimeValue> {
    match operand {
        Operand::Value(id) => values
            .get(id)
            .cloned()
            .ok_or(ExecError::MissingValue { value: *id }),
        Operand::Index(value) => Ok(RuntimeValue::Index(*value)),
    }
}

fn expect_operands<'v, const N: usize>(
    op: &'static str,
    operands: &'v [RuntimeValue],
) -> ExecResult<&'v [RuntimeValue; N]> {
    <&[RuntimeValue; N]>::try_from(operands).map_err(|_| ExecError::OperandArity {
        op,
        expected: N,
        found: operands.len(),
    })
}

fn index_to_extent(value: i64) -> ExecResult<usize> {
    usize::try_from(value)
        .map_err(|_| ExecError::InvalidShape(format!("negative extent {value}")))
}

fn shape_values(shape: &HostTensor) -> ExecResult<Vec<usize>> {
    if shape.dims.len() != 1 {
        return Err(ExecError::InvalidShape(format!(
            "shape operand must be 1-D, got dims {:?}",
            shape.dims
        )));
    }
    shape
        .to_i64_vec()?
        .into_iter()
        .map(index_to_extent)
        .collect()
}

fn static_output_dims(shape: &Shape) -> ExecResult<Vec<usize>> {
    static_dims_or_error(shape, |symbol| {
        ExecError::InvalidShape(format!("result dimension `{}` is dynamic", symbol.as_str()))
    })
}

/// Static result extents must agree with the runtime ones.
fn check_static_sizes(shape: &Shape, sizes: &[usize]) -> ExecResult<()> {
    if shape.rank() != sizes.len() {
        return Err(ExecError::InvalidShape(format!(
            "rank-{} type for sizes {sizes:?}",
            shape.rank()
        )));
    }
    for (dim, &size) in shape.dims().iter().zip(sizes) {
        if let Dimension::Static(expected) = dim {
            if *expected != size {
                return Err(ExecError::InvalidShape(format!(
                    "static extent {expected} but runtime extent {size}"
                )));
            }
        }
    }
    Ok(())
}

fn ensure_same_count(from: &[usize], to: &[usize]) -> ExecResult<()> {
    let (from_count, to_count) = (element_count(from)?, element_count(to)?);
    if from_count != to_count {
        return Err(ExecError::InvalidShape(format!(
            "cannot reshape {from:?} ({from_count} elements) into {to:?} ({to_count} elements)"
        )));
    }
    Ok(())
}

fn alloc_sizes(memref: &MemRefSpec, operands: &[RuntimeValue]) -> ExecResult<Vec<usize>> {
    let dynamic = memref.shape.dynamic_dim_count();
    if operands.len() != dynamic {
        return Err(ExecError::OperandArity {
            op: "alloc",
            expected: dynamic,
            found: operands.len(),
        });
    }
    let mut dynamic_sizes = operands.iter();
    memref
        .shape
        .dims()
        .iter()
        .map(|dim| match dim {
            Dimension::Static(size) => Ok(*size),
            Dimension::Dynamic(_) => dynamic_sizes
                .next()
                .ok_or_else(|| ExecError::Malformed("missing dynamic alloc size".into()))
                .and_then(RuntimeValue::as_index)
                .and_then(index_to_extent),
        })
        .collect()
}

fn literal_to_tensor(literal: &TensorLiteral) -> ExecResult<HostTensor> {
    let dtype = literal.spec.dtype;
    let dims = static_output_dims(&literal.spec.shape)?;
    let width = dtype.size_in_bytes();
    let expected = element_count(&dims)?.checked_mul(width);
    if expected != Some(literal.bytes.len()) {
        return Err(ExecError::Malformed(format!(
            "literal of {dims:?} {dtype:?} carries {} bytes",
            literal.bytes.len()
        )));
    }
    let chunks = literal.bytes.chunks_exact(width);
    let data = match dtype {
        DType::F32 => TensorData::F32(
            chunks
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
        ),
        DType::F64 => TensorData::F64(chunks.map(|chunk| f64::from_le_bytes(le8(chunk))).collect()),
        DType::Bf16 | DType::F16 => return Err(ExecError::UnsupportedDType(dtype)),
        _ => TensorData::I64(chunks.map(|chunk| decode_int(dtype, chunk)).collect()),
    };
    HostTensor::new(dtype, dims, data)
}

fn le8(chunk: &[u8]) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(chunk);
    bytes
}

fn decode_int(dtype: DType, chunk: &[u8]) -> i64 {
    match dtype {
        DType::I1 => i64::from(chunk[0] != 0),
        DType::Si8 => i64::from(chunk[0] as i8),
        DType::Ui8 => i64::from(chunk[0]),
        DType::Si16 => i64::from(i16::from_le_bytes([chunk[0], chunk[1]])),
        DType::Ui16 => i64::from(u16::from_le_bytes([chunk[0], chunk[1]])),
        DType::Si32 => i64::from(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
        DType::Ui32 => i64::from(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
        _ => i64::from_le_bytes(le8(chunk)),
    }
}

fn op_reshape(output: &ValueType, operands: &[RuntimeValue]) -> ExecResult<RuntimeValue> {
    let [input] = expect_operands::<1>("reshape", operands)?;
    let input = input.as_tensor()?;
    let dims = match output {
        ValueType::Tensor(spec) => static_output_dims(&spec.shape)?,
        ValueType::UnrankedTensor(_) => input.dims.clone(),
        _ => return Err(ExecError::Malformed("reshape result must be a tensor".into())),
    };
    ensure_same_count(&input.dims, &dims)?;
    HostTensor::new(input.dtype, dims, input.data.clone()).map(RuntimeValue::Tensor)
}

fn op_dynamic_reshape(output: &ValueType, operands: &[RuntimeValue]) -> ExecResult<RuntimeValue> {
    let [input, shape] = expect_operands::<2>("dynamic_reshape", operands)?;
    let input = input.as_tensor()?;
    let dims = shape_values(shape.as_tensor()?)?;
    if let ValueType::Tensor(spec) = output {
        check_static_sizes(&spec.shape, &dims)?;
    }
    ensure_same_count(&input.dims, &dims)?;
    HostTensor::new(input.dtype, dims, input.data.clone()).map(RuntimeValue::Tensor)
}

/// Tensor semantics: every operand extent equals its mapped target extent or is 1.
fn op_dynamic_broadcast_in_dim(
    spec: &BroadcastInDimSpec,
    operands: &[RuntimeValue],
) -> ExecResult<RuntimeValue> {
    let [input, shape] = expect_operands::<2>("dynamic_broadcast_in_dim", operands)?;
    let input = input.as_tensor()?;
    let target = shape_values(shape.as_tensor()?)?;
    let mapping = &spec.broadcast_dimensions;
    validate_broadcast_dimensions(mapping, input.dims.len(), target.len())
        .map_err(|err| ExecError::InvalidShape(err.to_string()))?;

    let input_strides = row_major_strides(&input.dims)?;
    let mut strides = vec![0i64; target.len()];
    for (axis, &mapped) in mapping.iter().enumerate() {
        let (extent, wanted) = (input.dims[axis], target[mapped]);
        strides[mapped] = if extent == wanted {
            input_strides[axis]
        } else if extent == 1 {
            0
        } else {
            return Err(ExecError::InvalidShape(format!(
                "cannot broadcast extent {extent} to {wanted} along dimension {mapped}"
            )));
        };
    }
    let data = input
        .data
        .gather(&strided_addresses(0, &target, &strides)?)?;
    HostTensor::new(input.dtype, target, data).map(RuntimeValue::Tensor)
}

fn op_elementwise_binary(
    op: ElementwiseBinaryOp,
    operands: &[RuntimeValue],
) -> ExecResult<RuntimeValue> {
    let [lhs, rhs] = expect_operands::<2>("elementwise_binary", operands)?;
    let (lhs, rhs) = (lhs.as_tensor()?, rhs.as_tensor()?);
    if lhs.dims != rhs.dims || lhs.dtype != rhs.dtype {
        return Err(ExecError::InvalidShape(format!(
            "elementwise operands {:?} {:?} and {:?} {:?}",
            lhs.dtype, lhs.dims, rhs.dtype, rhs.dims
        )));
    }
    fn zip<T: Copy>(lhs: &[T], rhs: &[T], f: impl Fn(T, T) -> T) -> Arc<[T]> {
        lhs.iter().zip(rhs).map(|(&a, &b)| f(a, b)).collect()
    }
    let data = match (&lhs.data, &rhs.data) {
        (TensorData::F32(a), TensorData::F32(b)) => TensorData::F32(match op {
            ElementwiseBinaryOp::Add => zip(a, b, |x, y| x + y),
            ElementwiseBinaryOp::Sub => zip(a, b, |x, y| x - y),
            ElementwiseBinaryOp::Mul => zip(a, b, |x, y| x * y),
            ElementwiseBinaryOp::Maximum => zip(a, b, f32::max),
        }),
        (TensorData::F64(a), TensorData::F64(b)) => TensorData::F64(match op {
            ElementwiseBinaryOp::Add => zip(a, b, |x, y| x + y),
            ElementwiseBinaryOp::Sub => zip(a, b, |x, y| x - y),
            ElementwiseBinaryOp::Mul => zip(a, b, |x, y| x * y),
            ElementwiseBinaryOp::Maximum => zip(a, b, f64::max),
        }),
        (TensorData::I64(a), TensorData::I64(b)) => TensorData::I64(match op {
            ElementwiseBinaryOp::Add => zip(a, b, i64::wrapping_add),
            ElementwiseBinaryOp::Sub => zip(a, b, i64::wrapping_sub),
            ElementwiseBinaryOp::Mul => zip(a, b, i64::wrapping_mul),
            ElementwiseBinaryOp::Maximum => zip(a, b, i64::max),
        }),
        _ => return Err(ExecError::UnsupportedDType(lhs.dtype)),
    };
    HostTensor::new(lhs.dtype, lhs.dims.clone(), data).map(RuntimeValue::Tensor)
}

/// `[tensor, indices..]` to the addressed integer element.
fn op_extract(operands: &[RuntimeValue]) -> ExecResult<RuntimeValue> {
    let Some((tensor, indices)) = operands.split_first() else {
        return Err(ExecError::OperandArity {
            op: "extract",
            expected: 1,
            found: 0,
        });
    };
    let tensor = tensor.as_tensor()?;
    if indices.len() != tensor.dims.len() {
        return Err(ExecError::OperandArity {
            op: "extract",
            expected: 1 + tensor.dims.len(),
            found: operands.len(),
        });
    }
    let strides = row_major_strides(&tensor.dims)?;
    let mut address = 0i64;
    for ((index, &extent), stride) in indices.iter().zip(&tensor.dims).zip(strides) {
        let index = index.as_index()?;
        if index < 0 || index as usize >= extent {
            return Err(ExecError::OutOfBounds {
                address: index,
                len: extent,
            });
        }
        address += index * stride;
    }
    match tensor.data.gather(&[address])? {
        TensorData::I64(values) => Ok(RuntimeValue::Index(values[0])),
        _ => Err(ExecError::UnsupportedDType(tensor.dtype)),
    }
}

/// Reinterprets a contiguous buffer under the result type's extents.
fn op_cast(output: &ValueType, operands: &[RuntimeValue]) -> ExecResult<RuntimeValue> {
    let [source] = expect_operands::<1>("memref.cast", operands)?;
    let source = source.as_buffer()?;
    let memref = match output {
        ValueType::MemRef(memref) => memref,
        ValueType::UnrankedMemRef(_) => return Ok(RuntimeValue::Buffer(source.clone())),
        _ => return Err(ExecError::Malformed("cast result must be a buffer".into())),
    };
    let same_rank = memref.rank() == source.rank();
    let sizes = memref
        .shape
        .dims()
        .iter()
        .enumerate()
        .map(|(axis, dim)| match dim {
            Dimension::Static(size) => Ok(*size),
            Dimension::Dynamic(_) if same_rank => Ok(source.sizes[axis]),
            Dimension::Dynamic(symbol) => Err(ExecError::InvalidShape(format!(
                "cannot infer extent `{}` across a rank change",
                symbol.as_str()
            ))),
        })
        .collect::<ExecResult<Vec<_>>>()?;
    if sizes == source.sizes {
        return Ok(RuntimeValue::Buffer(source.clone()));
    }
    if !source.is_identity() {
        return Err(ExecError::Malformed(
            "cast across shapes needs an identity-layout source".into(),
        ));
    }
    ensure_same_count(&source.sizes, &sizes)?;
    StridedView::identity(source.allocation, source.dtype, sizes).map(RuntimeValue::Buffer)
}

fn op_dim(spec: DimSpec, operands: &[RuntimeValue]) -> ExecResult<RuntimeValue> {
    let [buffer] = expect_operands::<1>("dim", operands)?;
    let buffer = buffer.as_buffer()?;
    let size = buffer.sizes.get(spec.axis).copied().ok_or_else(|| {
        ExecError::Malformed(format!(
            "axis {} of a rank-{} buffer",
            spec.axis,
            buffer.rank()
        ))
    })?;
    i64::try_from(size)
        .map(RuntimeValue::Index)
        .map_err(|_| ExecError::InvalidShape(format!("extent {size} overflows an index")))
}
