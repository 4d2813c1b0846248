//! Host interpreter used to check that bufferized PTIR functions compute the
//! same values as their tensor-form originals.

pub mod cpu;
pub mod error;
pub mod memory;

pub use cpu::{Interpreter, RuntimeValue};
pub use error::{ExecError, ExecResult};
pub use memory::{AllocationId, HostTensor, Memory, Storage, StridedView, TensorData};
