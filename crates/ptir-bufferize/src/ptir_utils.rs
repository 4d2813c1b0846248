use std::sync::Arc;

use crate::spec::{
    DType, DimSymbol, Dimension, MemRefSpec, Shape, TensorLiteral, TensorSpec, ValueType,
};

/// Builds a static shape descriptor from explicit dimensions.
pub fn shape_static(dims: &[usize]) -> Shape {
    Shape::new(
        dims.iter()
            .copied()
            .map(Dimension::Static)
            .collect::<Vec<_>>(),
    )
}

/// Builds a mixed static/dynamic shape descriptor.
pub fn shape_mixed(dims: &[Option<usize>]) -> Shape {
    Shape::new(
        dims.iter()
            .enumerate()
            .map(|(idx, dim)| match dim {
                Some(value) => Dimension::Static(*value),
                None => Dimension::Dynamic(DimSymbol::new(format!("d{idx}"))),
            })
            .collect::<Vec<_>>(),
    )
}

/// Builds a tensor spec with fully static dimensions.
pub fn tensor_spec_static(dtype: DType, dims: &[usize]) -> TensorSpec {
    TensorSpec::new(dtype, shape_static(dims))
}

/// Builds a tensor spec with mixed static/dynamic dimensions.
pub fn tensor_spec_mixed(dtype: DType, dims: &[Option<usize>]) -> TensorSpec {
    TensorSpec::new(dtype, shape_mixed(dims))
}

/// Wraps a tensor spec as a value type.
pub fn value_type_tensor(spec: TensorSpec) -> ValueType {
    ValueType::Tensor(spec)
}

/// Identity-layout buffer type for the provided static dimensions.
pub fn value_type_memref_static(dtype: DType, dims: &[usize]) -> ValueType {
    ValueType::MemRef(MemRefSpec::identity(dtype, shape_static(dims)))
}

/// Creates an `i64` tensor literal from row-major values.
pub fn tensor_literal_i64(dims: &[usize], values: &[i64]) -> TensorLiteral {
    let bytes = values
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect::<Vec<u8>>();
    TensorLiteral::new(tensor_spec_static(DType::Si64, dims), Arc::<[u8]>::from(bytes))
}

/// Creates an `f32` tensor literal from row-major values.
pub fn tensor_literal_f32(dims: &[usize], values: &[f32]) -> TensorLiteral {
    let bytes = values
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect::<Vec<u8>>();
    TensorLiteral::new(tensor_spec_static(DType::F32, dims), Arc::<[u8]>::from(bytes))
}
