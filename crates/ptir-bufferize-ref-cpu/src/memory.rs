//! Host memory model: flat typed allocations addressed through strided views.

use std::sync::Arc;

use ptir_bufferize::shape_helpers::{checked_element_count_or_error, contiguous_strides_or_error};
use ptir_bufferize::spec::DType;

use crate::error::{ExecError, ExecResult};

/// Immutable tensor payload, stored in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Arc<[f32]>),
    F64(Arc<[f64]>),
    /// Every integer and index dtype.
    I64(Arc<[i64]>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(values) => values.len(),
            TensorData::F64(values) => values.len(),
            TensorData::I64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn gather(&self, addresses: &[i64]) -> ExecResult<TensorData> {
        Ok(match self {
            TensorData::F32(values) => TensorData::F32(Arc::from(pick(values, addresses)?)),
            TensorData::F64(values) => TensorData::F64(Arc::from(pick(values, addresses)?)),
            TensorData::I64(values) => TensorData::I64(Arc::from(pick(values, addresses)?)),
        })
    }
}

fn pick<T: Copy>(values: &[T], addresses: &[i64]) -> ExecResult<Vec<T>> {
    addresses
        .iter()
        .map(|&address| {
            usize::try_from(address)
                .ok()
                .and_then(|index| values.get(index).copied())
                .ok_or(ExecError::OutOfBounds {
                    address,
                    len: values.len(),
                })
        })
        .collect()
}

/// Host value of a tensor-typed SSA value.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    pub dtype: DType,
    pub dims: Vec<usize>,
    pub data: TensorData,
}

impl HostTensor {
    pub fn new(dtype: DType, dims: Vec<usize>, data: TensorData) -> ExecResult<Self> {
        storage_class(dtype)?.check(&data)?;
        let count = element_count(&dims)?;
        if count != data.len() {
            return Err(ExecError::InvalidShape(format!(
                "dims {dims:?} hold {count} elements but data has {}",
                data.len()
            )));
        }
        Ok(Self { dtype, dims, data })
    }

    pub fn f32(dims: &[usize], values: Vec<f32>) -> ExecResult<Self> {
        Self::new(DType::F32, dims.to_vec(), TensorData::F32(Arc::from(values)))
    }

    pub fn i64(dims: &[usize], values: Vec<i64>) -> ExecResult<Self> {
        Self::new(DType::Si64, dims.to_vec(), TensorData::I64(Arc::from(values)))
    }

    /// `0, 1, 2, ..` in the requested float or integer dtype.
    pub fn iota(dtype: DType, dims: &[usize]) -> ExecResult<Self> {
        let count = element_count(dims)?;
        let data = match storage_class(dtype)? {
            StorageClass::F32 => TensorData::F32((0..count).map(|i| i as f32).collect()),
            StorageClass::F64 => TensorData::F64((0..count).map(|i| i as f64).collect()),
            StorageClass::I64 => TensorData::I64((0..count).map(|i| i as i64).collect()),
        };
        Self::new(dtype, dims.to_vec(), data)
    }

    pub fn element_count(&self) -> usize {
        self.data.len()
    }

    pub fn to_f32_vec(&self) -> ExecResult<Vec<f32>> {
        match &self.data {
            TensorData::F32(values) => Ok(values.to_vec()),
            _ => Err(ExecError::UnsupportedDType(self.dtype)),
        }
    }

    pub fn to_i64_vec(&self) -> ExecResult<Vec<i64>> {
        match &self.data {
            TensorData::I64(values) => Ok(values.to_vec()),
            _ => Err(ExecError::UnsupportedDType(self.dtype)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StorageClass {
    F32,
    F64,
    I64,
}

impl StorageClass {
    fn check(self, data: &TensorData) -> ExecResult<()> {
        let matches = matches!(
            (self, data),
            (StorageClass::F32, TensorData::F32(_))
                | (StorageClass::F64, TensorData::F64(_))
                | (StorageClass::I64, TensorData::I64(_))
        );
        if matches {
            Ok(())
        } else {
            Err(ExecError::Malformed("tensor payload does not match its dtype".to_string()))
        }
    }
}

pub(crate) fn storage_class(dtype: DType) -> ExecResult<StorageClass> {
    match dtype {
        DType::F32 => Ok(StorageClass::F32),
        DType::F64 => Ok(StorageClass::F64),
        DType::Bf16 | DType::F16 => Err(ExecError::UnsupportedDType(dtype)),
        _ => Ok(StorageClass::I64),
    }
}

pub(crate) fn element_count(dims: &[usize]) -> ExecResult<usize> {
    checked_element_count_or_error(dims, || {
        ExecError::InvalidShape(format!("element count of {dims:?} overflows"))
    })
}

pub(crate) fn row_major_strides(dims: &[usize]) -> ExecResult<Vec<i64>> {
    contiguous_strides_or_error(dims, || {
        ExecError::InvalidShape(format!("strides of {dims:?} overflow"))
    })
}

/// Walks `sizes` in row-major order, yielding `offset + sum(idx[d] * strides[d])`.
pub(crate) fn strided_addresses(
    offset: i64,
    sizes: &[usize],
    strides: &[i64],
) -> ExecResult<Vec<i64>> {
    let count = element_count(sizes)?;
    let mut addresses = Vec::with_capacity(count);
    if count == 0 {
        return Ok(addresses);
    }
    let mut index = vec![0usize; sizes.len()];
    let mut address = offset;
    loop {
        addresses.push(address);
        let mut axis = sizes.len();
        loop {
            if axis == 0 {
                return Ok(addresses);
            }
            axis -= 1;
            index[axis] += 1;
            address += strides[axis];
            if index[axis] < sizes[axis] {
                break;
            }
            address -= strides[axis] * sizes[axis] as i64;
            index[axis] = 0;
        }
    }
}

/// Mutable backing store of one allocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I64(Vec<i64>),
}

impl Storage {
    pub(crate) fn zeroed(dtype: DType, len: usize) -> ExecResult<Self> {
        Ok(match storage_class(dtype)? {
            StorageClass::F32 => Storage::F32(vec![0.0; len]),
            StorageClass::F64 => Storage::F64(vec![0.0; len]),
            StorageClass::I64 => Storage::I64(vec![0; len]),
        })
    }

    pub(crate) fn from_data(data: &TensorData) -> Self {
        match data {
            TensorData::F32(values) => Storage::F32(values.to_vec()),
            TensorData::F64(values) => Storage::F64(values.to_vec()),
            TensorData::I64(values) => Storage::I64(values.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Storage::F32(values) => values.len(),
            Storage::F64(values) => values.len(),
            Storage::I64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the elements at `addresses`, in order.
    pub(crate) fn gather(&self, addresses: &[i64]) -> ExecResult<TensorData> {
        Ok(match self {
            Storage::F32(values) => TensorData::F32(Arc::from(pick(values, addresses)?)),
            Storage::F64(values) => TensorData::F64(Arc::from(pick(values, addresses)?)),
            Storage::I64(values) => TensorData::I64(Arc::from(pick(values, addresses)?)),
        })
    }

    /// Writes `data` element-wise to `addresses`.
    pub(crate) fn scatter(&mut self, addresses: &[i64], data: &TensorData) -> ExecResult<()> {
        fn put<T: Copy>(values: &mut [T], addresses: &[i64], source: &[T]) -> ExecResult<()> {
            let len = values.len();
            for (&address, &value) in addresses.iter().zip(source) {
                let slot = usize::try_from(address)
                    .ok()
                    .and_then(|index| values.get_mut(index))
                    .ok_or(ExecError::OutOfBounds { address, len })?;
                *slot = value;
            }
            Ok(())
        }
        if addresses.len() != data.len() {
            return Err(ExecError::InvalidShape(format!(
                "copy of {} elements into {} addresses",
                data.len(),
                addresses.len()
            )));
        }
        match (self, data) {
            (Storage::F32(values), TensorData::F32(source)) => put(values, addresses, source),
            (Storage::F64(values), TensorData::F64(source)) => put(values, addresses, source),
            (Storage::I64(values), TensorData::I64(source)) => put(values, addresses, source),
            _ => Err(ExecError::Malformed("copy between different element types".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationId(pub usize);

#[derive(Debug, Default)]
pub struct Memory {
    allocations: Vec<Storage>,
}

impl Memory {
    pub fn allocate(&mut self, storage: Storage) -> AllocationId {
        self.allocations.push(storage);
        AllocationId(self.allocations.len() - 1)
    }

    pub fn get(&self, id: AllocationId) -> ExecResult<&Storage> {
        self.allocations
            .get(id.0)
            .ok_or(ExecError::UnknownAllocation(id.0))
    }

    pub(crate) fn get_mut(&mut self, id: AllocationId) -> ExecResult<&mut Storage> {
        self.allocations
            .get_mut(id.0)
            .ok_or(ExecError::UnknownAllocation(id.0))
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }
}

/// A window into one allocation: element `idx` lives at
/// `offset + sum(idx[d] * strides[d])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StridedView {
    pub allocation: AllocationId,
    pub dtype: DType,
    pub offset: i64,
    pub sizes: Vec<usize>,
    pub strides: Vec<i64>,
}

impl StridedView {
    /// Row-major view with zero offset.
    pub fn identity(allocation: AllocationId, dtype: DType, sizes: Vec<usize>) -> ExecResult<Self> {
        let strides = row_major_strides(&sizes)?;
        Ok(Self {
            allocation,
            dtype,
            offset: 0,
            sizes,
            strides,
        })
    }

    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    pub fn element_count(&self) -> ExecResult<usize> {
        element_count(&self.sizes)
    }

    pub fn linear_offset(&self, index: &[usize]) -> i64 {
        index
            .iter()
            .zip(&self.strides)
            .fold(self.offset, |acc, (&coord, &stride)| acc + coord as i64 * stride)
    }

    /// Addresses of every element in row-major index order.
    pub fn addresses(&self) -> ExecResult<Vec<i64>> {
        strided_addresses(self.offset, &self.sizes, &self.strides)
    }

    /// Unit innermost stride, row-major strides and zero offset.
    pub fn is_identity(&self) -> bool {
        self.offset == 0
            && row_major_strides(&self.sizes).is_ok_and(|strides| strides == self.strides)
    }
}
