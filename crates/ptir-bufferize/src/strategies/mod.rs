//! Bufferization strategies for the tensor-producing PTIR operations.

mod broadcast_in_dim;
mod dynamic_reshape;
mod reshape;

pub use broadcast_in_dim::DynamicBroadcastInDimStrategy;
pub use dynamic_reshape::DynamicReshapeStrategy;
pub use reshape::ReshapeStrategy;

use crate::error::{BufferizeError, BufferizeResult};
use crate::spec::{DType, Dimension, ValueId, ValueType};

/// Checks that `value` is a 1-D integer tensor and returns its element type.
///
/// When `expected_len` is known and the tensor's extent is static, the two must match.
fn shape_operand_dtype(
    ty: Option<&ValueType>,
    value: ValueId,
    expected_len: Option<usize>,
) -> BufferizeResult<DType> {
    let invalid = || BufferizeError::ShapeOperandInvalid { value };
    let spec = match ty {
        Some(ValueType::Tensor(spec)) => spec,
        _ => return Err(invalid()),
    };
    if spec.shape.rank() != 1 || !spec.dtype.is_integer() {
        return Err(invalid());
    }
    if let (Some(Dimension::Static(len)), Some(expected)) = (spec.shape.dim(0), expected_len) {
        if *len != expected {
            return Err(invalid());
        }
    }
    Ok(spec.dtype)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptir_utils::{tensor_spec_mixed, tensor_spec_static};

    #[test]
    fn shape_operand_must_be_one_dimensional_integers() {
        let value = ValueId(3);
        let ok = ValueType::Tensor(tensor_spec_static(DType::Si64, &[2]));
        assert_eq!(shape_operand_dtype(Some(&ok), value, Some(2)).expect("valid"), DType::Si64);

        let dynamic = ValueType::Tensor(tensor_spec_mixed(DType::Index, &[None]));
        assert_eq!(
            shape_operand_dtype(Some(&dynamic), value, Some(4)).expect("dynamic length"),
            DType::Index
        );

        let floats = ValueType::Tensor(tensor_spec_static(DType::F32, &[2]));
        let matrix = ValueType::Tensor(tensor_spec_static(DType::Si32, &[2, 1]));
        for bad in [&floats, &matrix, &ok] {
            assert!(matches!(
                shape_operand_dtype(Some(bad), value, Some(3)),
                Err(BufferizeError::ShapeOperandInvalid { .. })
            ));
        }
    }
}
