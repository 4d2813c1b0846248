use std::{collections::HashMap, fmt, fs, io, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// PTIR/memref specification version accepted by program (de)serialization.
pub const SPEC_VERSION: &str = "ptir.memref.v0.1";

fn default_spec_version() -> String {
    SPEC_VERSION.to_string()
}

/// Scalar element types understood by tensor and buffer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum DType {
    I1,
    Si8,
    Si16,
    Si32,
    Si64,
    Ui8,
    Ui16,
    Ui32,
    Ui64,
    Bf16,
    F16,
    F32,
    F64,
    /// Target-sized integer used for sizes, strides and offsets.
    Index,
}

impl DType {
    /// Returns `true` for signed, unsigned and index integers.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::Si8
                | DType::Si16
                | DType::Si32
                | DType::Si64
                | DType::Ui8
                | DType::Ui16
                | DType::Ui32
                | DType::Ui64
                | DType::Index
        )
    }

    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::Bf16 | DType::F16 | DType::F32 | DType::F64)
    }

    /// Returns the storage size in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 | DType::Si8 | DType::Ui8 => 1,
            DType::Si16 | DType::Ui16 | DType::Bf16 | DType::F16 => 2,
            DType::Si32 | DType::Ui32 | DType::F32 => 4,
            DType::Si64 | DType::Ui64 | DType::F64 | DType::Index => 8,
        }
    }
}

/// Names a symbolic dynamic dimension (e.g. `?B`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimSymbol(Arc<str>);

impl DimSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::<str>::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for DimSymbol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DimSymbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(DimSymbol::new(name))
    }
}

/// Represents a single axis extent in a tensor or buffer shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Dynamic(DimSymbol),
}

impl Dimension {
    pub fn as_static(&self) -> Option<usize> {
        match self {
            Dimension::Static(value) => Some(*value),
            Dimension::Dynamic(_) => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Dimension::Dynamic(_))
    }
}

/// Logical shape as an ordered list of dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> Option<&Dimension> {
        self.dims.get(axis)
    }

    /// Returns static dimensions when all dims are static.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.dims.iter().map(Dimension::as_static).collect()
    }

    /// Number of dimensions whose extent is only known at run time.
    pub fn dynamic_dim_count(&self) -> usize {
        self.dims.iter().filter(|dim| dim.is_dynamic()).count()
    }

    /// Returns element count when all dims are static.
    pub fn element_count(&self) -> Option<usize> {
        let mut count = 1usize;
        for dim in self.static_dims()? {
            count = count.checked_mul(dim)?;
        }
        Some(count)
    }
}

/// Ranked tensor metadata coupling dtype and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    pub fn element_count(&self) -> Option<usize> {
        self.shape.element_count()
    }
}

/// A stride or offset that is either fixed at compile time or resolved at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrideDim {
    Static(i64),
    Dynamic,
}

/// Memory layout of a ranked buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    /// Row-major dense packing with unit innermost stride and zero offset.
    Identity,
    /// Explicit per-dimension strides plus a base offset, in elements.
    Strided {
        offset: StrideDim,
        strides: Vec<StrideDim>,
    },
}

/// Ranked buffer type: element type, shape and layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemRefSpec {
    pub dtype: DType,
    pub shape: Shape,
    pub layout: Layout,
}

impl MemRefSpec {
    /// Buffer in identity layout.
    pub fn identity(dtype: DType, shape: Shape) -> Self {
        Self {
            dtype,
            shape,
            layout: Layout::Identity,
        }
    }

    /// Buffer with a zero offset and fully dynamic strides (may include stride 0).
    pub fn type_erased(dtype: DType, shape: Shape) -> Self {
        let strides = vec![StrideDim::Dynamic; shape.rank()];
        Self {
            dtype,
            shape,
            layout: Layout::Strided {
                offset: StrideDim::Static(0),
                strides,
            },
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.layout, Layout::Identity)
    }
}

/// Dense literal tensor payload (little-endian element bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorLiteral {
    pub spec: TensorSpec,
    pub bytes: Arc<[u8]>,
}

impl TensorLiteral {
    pub fn new(spec: TensorSpec, bytes: Arc<[u8]>) -> Self {
        Self { spec, bytes }
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Binary elementwise tensor ops. These have no bufferization strategy and are
/// left to other lowering mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseBinaryOp {
    Add,
    Sub,
    Mul,
    Maximum,
}

/// Attribute payload for `dynamic_broadcast_in_dim`.
///
/// `broadcast_dimensions[i]` is the output dimension that operand dimension `i`
/// maps to. Output dimensions absent from the list are pure broadcast axes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BroadcastInDimSpec {
    pub broadcast_dimensions: Vec<usize>,
}

/// Attribute payload for `memref.reinterpret_cast`.
///
/// Operands are laid out as `[source, sizes.., strides..]`; the rank comes from
/// the result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReinterpretCastSpec {
    pub offset: i64,
}

/// Attribute payload for `memref.dim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimSpec {
    pub axis: usize,
}

/// Unique identifier for SSA values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Typing information for SSA values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Tensor(TensorSpec),
    UnrankedTensor(DType),
    MemRef(MemRefSpec),
    UnrankedMemRef(DType),
    Scalar(DType),
    /// `Tuple(vec![])` types instructions without a result.
    Tuple(Vec<ValueType>),
}

impl ValueType {
    pub fn unit() -> Self {
        ValueType::Tuple(Vec::new())
    }

    pub fn index() -> Self {
        ValueType::Scalar(DType::Index)
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, ValueType::Tensor(_) | ValueType::UnrankedTensor(_))
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, ValueType::MemRef(_) | ValueType::UnrankedMemRef(_))
    }

    /// Element dtype of tensors, buffers and scalars.
    pub fn element_dtype(&self) -> Option<DType> {
        match self {
            ValueType::Tensor(spec) => Some(spec.dtype),
            ValueType::MemRef(spec) => Some(spec.dtype),
            ValueType::UnrankedTensor(dtype)
            | ValueType::UnrankedMemRef(dtype)
            | ValueType::Scalar(dtype) => Some(*dtype),
            ValueType::Tuple(_) => None,
        }
    }

    /// Static rank of ranked tensors and buffers; `None` for unranked or non-shaped values.
    pub fn rank(&self) -> Option<usize> {
        match self {
            ValueType::Tensor(spec) => Some(spec.shape.rank()),
            ValueType::MemRef(spec) => Some(spec.rank()),
            _ => None,
        }
    }
}

/// Operand reference in an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Value(ValueId),
    /// Inline static index (the static half of a size/stride fold result).
    Index(i64),
}

impl Operand {
    /// Returns the SSA value referenced by this operand, if any.
    pub fn value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(value) => Some(*value),
            Operand::Index(_) => None,
        }
    }
}

/// Dialect an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dialect {
    /// Tensor-producing PTIR operations targeted by bufferization.
    Ptir,
    /// Auxiliary tensor utilities (constants, element extraction).
    Tensor,
    /// Bridges between tensor and buffer values.
    Bufferization,
    MemRef,
    Arith,
}

/// Declarative form of the operations known to this IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Reinterprets an unranked tensor under the static shape of the result type.
    Reshape,
    /// `(operand, output_shape)`: reshape to a shape supplied at run time.
    DynamicReshape,
    /// `(operand, output_dimensions)`: broadcast to run-time sized output.
    DynamicBroadcastInDim(BroadcastInDimSpec),
    ElementwiseBinary(ElementwiseBinaryOp),

    Constant(TensorLiteral),
    /// `(tensor, indices..)`: reads one element of a tensor.
    Extract,

    /// Tensor to buffer bridge.
    ToBuffer,
    /// Buffer to tensor bridge.
    ToTensor,

    /// Metadata-only buffer type change.
    Cast,
    /// `(source, shape)`: reshape view parameterized by a run-time shape buffer.
    ReshapeView,
    ReinterpretCast(ReinterpretCastSpec),
    /// Operands are the sizes of the result's dynamic dimensions, in order.
    Alloc,
    /// `(source, target)`: element-wise copy; produces no value.
    Copy,
    Dim(DimSpec),

    MulI,
    CmpISlt,
    Select,
    IndexCast,
}

/// Kind tag for [`Operation`], used as the strategy registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationKind {
    Reshape,
    DynamicReshape,
    DynamicBroadcastInDim,
    ElementwiseBinary,
    Constant,
    Extract,
    ToBuffer,
    ToTensor,
    Cast,
    ReshapeView,
    ReinterpretCast,
    Alloc,
    Copy,
    Dim,
    MulI,
    CmpISlt,
    Select,
    IndexCast,
}

impl OperationKind {
    pub fn from_op(op: &Operation) -> Self {
        match op {
            Operation::Reshape => OperationKind::Reshape,
            Operation::DynamicReshape => OperationKind::DynamicReshape,
            Operation::DynamicBroadcastInDim(_) => OperationKind::DynamicBroadcastInDim,
            Operation::ElementwiseBinary(_) => OperationKind::ElementwiseBinary,
            Operation::Constant(_) => OperationKind::Constant,
            Operation::Extract => OperationKind::Extract,
            Operation::ToBuffer => OperationKind::ToBuffer,
            Operation::ToTensor => OperationKind::ToTensor,
            Operation::Cast => OperationKind::Cast,
            Operation::ReshapeView => OperationKind::ReshapeView,
            Operation::ReinterpretCast(_) => OperationKind::ReinterpretCast,
            Operation::Alloc => OperationKind::Alloc,
            Operation::Copy => OperationKind::Copy,
            Operation::Dim(_) => OperationKind::Dim,
            Operation::MulI => OperationKind::MulI,
            Operation::CmpISlt => OperationKind::CmpISlt,
            Operation::Select => OperationKind::Select,
            Operation::IndexCast => OperationKind::IndexCast,
        }
    }

    pub fn dialect(self) -> Dialect {
        match self {
            OperationKind::Reshape
            | OperationKind::DynamicReshape
            | OperationKind::DynamicBroadcastInDim
            | OperationKind::ElementwiseBinary => Dialect::Ptir,
            OperationKind::Constant | OperationKind::Extract => Dialect::Tensor,
            OperationKind::ToBuffer | OperationKind::ToTensor => Dialect::Bufferization,
            OperationKind::Cast
            | OperationKind::ReshapeView
            | OperationKind::ReinterpretCast
            | OperationKind::Alloc
            | OperationKind::Copy
            | OperationKind::Dim => Dialect::MemRef,
            OperationKind::MulI
            | OperationKind::CmpISlt
            | OperationKind::Select
            | OperationKind::IndexCast => Dialect::Arith,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            OperationKind::Reshape => "ptir.reshape",
            OperationKind::DynamicReshape => "ptir.dynamic_reshape",
            OperationKind::DynamicBroadcastInDim => "ptir.dynamic_broadcast_in_dim",
            OperationKind::ElementwiseBinary => "ptir.elementwise_binary",
            OperationKind::Constant => "tensor.constant",
            OperationKind::Extract => "tensor.extract",
            OperationKind::ToBuffer => "bufferization.to_buffer",
            OperationKind::ToTensor => "bufferization.to_tensor",
            OperationKind::Cast => "memref.cast",
            OperationKind::ReshapeView => "memref.reshape",
            OperationKind::ReinterpretCast => "memref.reinterpret_cast",
            OperationKind::Alloc => "memref.alloc",
            OperationKind::Copy => "memref.copy",
            OperationKind::Dim => "memref.dim",
            OperationKind::MulI => "arith.muli",
            OperationKind::CmpISlt => "arith.cmpi_slt",
            OperationKind::Select => "arith.select",
            OperationKind::IndexCast => "arith.index_cast",
        }
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        OperationKind::from_op(self)
    }

    /// Operations whose effect is not captured by their result value.
    pub fn has_side_effects(&self) -> bool {
        matches!(self, Operation::Copy)
    }
}

/// Single SSA instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<Operand>,
    pub output: ValueType,
}

/// Function describing a straight-line computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<ValueType>,
    pub parameter_ids: Vec<ValueId>,
    pub results: Vec<ValueType>,
    pub body: Vec<Instruction>,
    pub result_ids: Vec<ValueId>,
}

impl Function {
    pub fn instruction(&self, value: ValueId) -> Option<&Instruction> {
        self.body.iter().find(|inst| inst.id == value)
    }

    /// Counts body instructions of the given kind.
    pub fn count_kind(&self, kind: OperationKind) -> usize {
        self.body.iter().filter(|inst| inst.op.kind() == kind).count()
    }
}

/// Complete module: an entry name plus functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default = "default_spec_version")]
    pub spec_version: String,
    pub entry: String,
    pub functions: Vec<Function>,
}

#[derive(Debug, Error)]
pub enum ProgramSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("program spec version '{found}' does not match expected '{expected}'")]
    SpecVersionMismatch {
        found: String,
        expected: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum ProgramIoError {
    #[error(transparent)]
    Serialization(#[from] ProgramSerdeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Program {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            entry: entry.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_functions(mut self, functions: Vec<Function>) -> Self {
        self.functions = functions;
        self
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn to_json_string(&self) -> Result<String, ProgramSerdeError> {
        serde_json::to_string_pretty(self).map_err(ProgramSerdeError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, ProgramSerdeError> {
        let mut program: Program = serde_json::from_str(src)?;
        program.spec_version = normalize_spec_version(program.spec_version)?;
        Ok(program)
    }

    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>, ProgramSerdeError> {
        bincode::serialize(self).map_err(ProgramSerdeError::from)
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> Result<Self, ProgramSerdeError> {
        let mut program: Program = bincode::deserialize(bytes)?;
        program.spec_version = normalize_spec_version(program.spec_version)?;
        Ok(program)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgramIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(ProgramIoError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ProgramIoError> {
        let contents = fs::read_to_string(path)?;
        Program::from_json_str(&contents).map_err(ProgramIoError::from)
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }
}

fn normalize_spec_version(version: String) -> Result<String, ProgramSerdeError> {
    if version.is_empty() {
        return Ok(SPEC_VERSION.to_string());
    }
    if version == SPEC_VERSION {
        Ok(version)
    } else {
        Err(ProgramSerdeError::SpecVersionMismatch {
            found: version,
            expected: SPEC_VERSION,
        })
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_line(
            f,
            0,
            &format!(
                "program @{} (spec_version = {}) {{",
                self.entry, self.spec_version
            ),
        )?;
        for function in &self.functions {
            fmt_function(function, 1, f)?;
        }
        write_line(f, 0, "}")
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_function(self, 0, f)
    }
}

fn fmt_function(function: &Function, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write_line(f, indent, &format!("func @{} {{", function.name))?;
    if !function.parameter_ids.is_empty() {
        write_line(f, indent + 1, "params:")?;
        for (value_id, value_type) in function
            .parameter_ids
            .iter()
            .zip(function.parameters.iter())
        {
            write_line(
                f,
                indent + 2,
                &format!("%{} : {}", value_id.0, format_value_type(value_type)),
            )?;
        }
    }
    if !function.body.is_empty() {
        write_line(f, indent + 1, "body:")?;
        for instruction in &function.body {
            write_line(f, indent + 2, &format_instruction(instruction))?;
        }
    }
    if !function.result_ids.is_empty() {
        let results = function
            .result_ids
            .iter()
            .map(|id| format!("%{}", id.0))
            .collect::<Vec<_>>()
            .join(", ");
        write_line(f, indent + 1, &format!("return {results}"))?;
    }
    write_line(f, indent, "}")
}

fn format_instruction(instruction: &Instruction) -> String {
    let mnemonic = instruction.op.kind().mnemonic();
    let attrs = match &instruction.op {
        Operation::DynamicBroadcastInDim(spec) => {
            format!(" {{broadcast_dimensions = {:?}}}", spec.broadcast_dimensions)
        }
        Operation::ElementwiseBinary(op) => format!(" {{{op:?}}}"),
        Operation::ReinterpretCast(spec) => format!(" {{offset = {}}}", spec.offset),
        Operation::Dim(spec) => format!(" {{axis = {}}}", spec.axis),
        Operation::Constant(literal) => format!(" {{{} bytes}}", literal.byte_len()),
        _ => String::new(),
    };
    let operands = instruction
        .operands
        .iter()
        .map(format_operand)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "%{} = {}{}({}) -> {}",
        instruction.id.0,
        mnemonic,
        attrs,
        operands,
        format_value_type(&instruction.output)
    )
}

pub(crate) fn format_value_type(value_type: &ValueType) -> String {
    match value_type {
        ValueType::Tensor(spec) => {
            format!("tensor<{}x{:?}>", format_shape(&spec.shape), spec.dtype)
        }
        ValueType::UnrankedTensor(dtype) => format!("tensor<*x{dtype:?}>"),
        ValueType::MemRef(spec) => match &spec.layout {
            Layout::Identity => format!("memref<{}x{:?}>", format_shape(&spec.shape), spec.dtype),
            Layout::Strided { offset, strides } => {
                let strides = strides
                    .iter()
                    .map(format_stride)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "memref<{}x{:?}, strided<[{}], offset: {}>>",
                    format_shape(&spec.shape),
                    spec.dtype,
                    strides,
                    format_stride(offset)
                )
            }
        },
        ValueType::UnrankedMemRef(dtype) => format!("memref<*x{dtype:?}>"),
        ValueType::Scalar(DType::Index) => "index".to_string(),
        ValueType::Scalar(dtype) => format!("{dtype:?}"),
        ValueType::Tuple(elements) => {
            let inner = elements
                .iter()
                .map(format_value_type)
                .collect::<Vec<_>>()
                .join(", ");
            format!("({inner})")
        }
    }
}

fn format_stride(stride: &StrideDim) -> String {
    match stride {
        StrideDim::Static(value) => value.to_string(),
        StrideDim::Dynamic => "?".to_string(),
    }
}

fn format_shape(shape: &Shape) -> String {
    let dims = shape
        .dims()
        .iter()
        .map(|dim| match dim {
            Dimension::Static(v) => v.to_string(),
            Dimension::Dynamic(sym) => format!("?{}", sym.as_str()),
        })
        .collect::<Vec<_>>();
    if dims.is_empty() {
        "[]".to_string()
    } else {
        dims.join("x")
    }
}

fn format_operand(operand: &Operand) -> String {
    match operand {
        Operand::Value(id) => format!("%{}", id.0),
        Operand::Index(value) => format!("{value}"),
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, indent: usize, line: &str) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    writeln!(f, "{line}")
}

/// Lightweight builder for constructing functions programmatically.
#[derive(Default)]
pub struct ProgramBuilder {
    next_value_id: u32,
    parameters: Vec<(ValueId, ValueType)>,
    instructions: Vec<Instruction>,
    value_types: HashMap<ValueId, ValueType>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parameter(&mut self, ty: ValueType) -> ValueId {
        let id = self.fresh_id();
        self.value_types.insert(id, ty.clone());
        self.parameters.push((id, ty));
        id
    }

    pub fn emit_single(
        &mut self,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> ValueId {
        let id = self.fresh_id();
        self.value_types.insert(id, output.clone());
        self.instructions.push(Instruction {
            id,
            op,
            operands,
            output,
        });
        id
    }

    pub fn value_type(&self, id: ValueId) -> Option<&ValueType> {
        self.value_types.get(&id)
    }

    pub fn finish(self, name: impl Into<String>, result_ids: Vec<ValueId>) -> Function {
        let mut results = Vec::with_capacity(result_ids.len());
        for id in &result_ids {
            let ty = self
                .value_types
                .get(id)
                .expect("result value id must have a recorded type")
                .clone();
            results.push(ty);
        }
        let (parameter_ids, parameters): (Vec<_>, Vec<_>) = self.parameters.into_iter().unzip();
        Function {
            name: name.into(),
            parameters,
            parameter_ids,
            results,
            body: self.instructions,
            result_ids,
        }
    }

    fn fresh_id(&mut self) -> ValueId {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        id
    }
}
