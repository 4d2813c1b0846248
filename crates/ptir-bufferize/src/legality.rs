//! Post-bufferization legality check.
//!
//! A function is bufferized when no operation handled by a registered strategy
//! remains and every buffer type is well formed.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registry::StrategyRegistry;
use crate::spec::{DType, Function, Instruction, Layout, OperationKind, Program, ValueType};
use crate::walker::{walk_program, ProgramVisitor};

#[derive(Debug, Clone)]
pub struct LegalitySpec {
    /// Kinds that must not survive bufferization.
    pub illegal_ops: HashSet<OperationKind>,
    pub allowed_ops: Option<HashSet<OperationKind>>,
    pub allow_dynamic_dims: bool,
    pub allowed_dtypes: Option<HashSet<DType>>,
}

impl Default for LegalitySpec {
    fn default() -> Self {
        Self {
            illegal_ops: HashSet::new(),
            allowed_ops: None,
            allow_dynamic_dims: true,
            allowed_dtypes: None,
        }
    }
}

impl LegalitySpec {
    /// Every kind with a registered strategy is illegal after the pass.
    pub fn for_registry(registry: &StrategyRegistry) -> Self {
        Self {
            illegal_ops: registry.kinds().into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn allow_ops(mut self, ops: impl IntoIterator<Item = OperationKind>) -> Self {
        self.allowed_ops = Some(ops.into_iter().collect());
        self
    }

    pub fn allow_dtypes(mut self, dtypes: impl IntoIterator<Item = DType>) -> Self {
        self.allowed_dtypes = Some(dtypes.into_iter().collect());
        self
    }

    pub fn with_dynamic_dims(mut self, allowed: bool) -> Self {
        self.allow_dynamic_dims = allowed;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferizeDiagnostic {
    pub function: Option<String>,
    pub instruction_index: Option<usize>,
    pub kind: Option<OperationKind>,
    pub message: String,
}

impl BufferizeDiagnostic {
    pub fn new(
        function: Option<String>,
        instruction_index: Option<usize>,
        kind: Option<OperationKind>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            function,
            instruction_index,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for BufferizeDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(function) = &self.function {
            write!(f, "@{function}")?;
        }
        if let Some(index) = self.instruction_index {
            write!(f, "[{index}]")?;
        }
        if let Some(kind) = self.kind {
            write!(f, " {}", kind.mnemonic())?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LegalityReport {
    pub diagnostics: Vec<BufferizeDiagnostic>,
}

impl LegalityReport {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

struct LegalityVisitor<'s> {
    spec: &'s LegalitySpec,
    report: LegalityReport,
}

impl LegalityVisitor<'_> {
    fn check_value_type(
        &mut self,
        ty: &ValueType,
        function: &Function,
        index: Option<usize>,
        kind: Option<OperationKind>,
    ) {
        let (dtype, shape, layout) = match ty {
            ValueType::Tensor(spec) => (spec.dtype, Some(&spec.shape), None),
            ValueType::MemRef(spec) => (spec.dtype, Some(&spec.shape), Some(&spec.layout)),
            ValueType::UnrankedTensor(dtype)
            | ValueType::UnrankedMemRef(dtype)
            | ValueType::Scalar(dtype) => (*dtype, None, None),
            ValueType::Tuple(values) => {
                for value in values {
                    self.check_value_type(value, function, index, kind);
                }
                return;
            }
        };
        let mut messages = Vec::new();
        if let Some(shape) = shape {
            if !self.spec.allow_dynamic_dims && shape.static_dims().is_none() {
                messages.push("dynamic dimensions are not allowed".to_string());
            }
            if let Some(Layout::Strided { strides, .. }) = layout {
                if strides.len() != shape.rank() {
                    messages.push(format!(
                        "layout has {} strides for rank {}",
                        strides.len(),
                        shape.rank()
                    ));
                }
            }
        }
        if let Some(allowed) = &self.spec.allowed_dtypes {
            if !allowed.contains(&dtype) {
                messages.push(format!("dtype {dtype:?} is not allowed"));
            }
        }
        for message in messages {
            self.report.diagnostics.push(BufferizeDiagnostic::new(
                Some(function.name.clone()),
                index,
                kind,
                message,
            ));
        }
    }
}

impl ProgramVisitor for LegalityVisitor<'_> {
    fn on_function(&mut self, function: &Function) {
        for ty in function.parameters.iter().chain(function.results.iter()) {
            self.check_value_type(ty, function, None, None);
        }
    }

    fn on_instruction(&mut self, function: &Function, index: usize, inst: &Instruction) {
        let kind = inst.op.kind();
        if self.spec.illegal_ops.contains(&kind) {
            self.report.diagnostics.push(BufferizeDiagnostic::new(
                Some(function.name.clone()),
                Some(index),
                Some(kind),
                "operation was not bufferized",
            ));
        }
        if let Some(allowed) = &self.spec.allowed_ops {
            if !allowed.contains(&kind) {
                self.report.diagnostics.push(BufferizeDiagnostic::new(
                    Some(function.name.clone()),
                    Some(index),
                    Some(kind),
                    format!("operation {kind:?} is not allowed"),
                ));
            }
        }
        self.check_value_type(&inst.output, function, Some(index), Some(kind));
    }
}

/// Checks `program` against `spec`, collecting every violation.
pub fn check_bufferized(program: &Program, spec: &LegalitySpec) -> Result<(), LegalityReport> {
    let mut visitor = LegalityVisitor {
        spec,
        report: LegalityReport::default(),
    };
    walk_program(program, &mut visitor);
    if visitor.report.is_ok() {
        Ok(())
    } else {
        Err(visitor.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptir_utils::{shape_static, tensor_spec_static, value_type_tensor};
    use crate::registry::default_registry;
    use crate::spec::{MemRefSpec, Operand, Operation, ProgramBuilder, StrideDim};

    fn reshape_program() -> Program {
        let mut builder = ProgramBuilder::new();
        let p0 = builder.add_parameter(ValueType::UnrankedTensor(DType::F32));
        let out = builder.emit_single(
            Operation::Reshape,
            vec![Operand::Value(p0)],
            value_type_tensor(tensor_spec_static(DType::F32, &[4])),
        );
        Program::new("main").with_functions(vec![builder.finish("main", vec![out])])
    }

    #[test]
    fn remaining_strategy_ops_are_reported() {
        let spec = LegalitySpec::for_registry(&default_registry());
        let report = check_bufferized(&reshape_program(), &spec).expect_err("reshape remains");
        assert_eq!(report.diagnostics.len(), 1);
        let diagnostic = &report.diagnostics[0];
        assert_eq!(diagnostic.kind, Some(OperationKind::Reshape));
        assert_eq!(diagnostic.instruction_index, Some(0));
        assert_eq!(
            diagnostic.to_string(),
            "@main[0] ptir.reshape: operation was not bufferized"
        );
    }

    #[test]
    fn malformed_strided_layout_is_reported() {
        let mut builder = ProgramBuilder::new();
        let p0 = builder.add_parameter(ValueType::MemRef(MemRefSpec {
            dtype: DType::F32,
            shape: shape_static(&[2, 2]),
            layout: Layout::Strided {
                offset: StrideDim::Static(0),
                strides: vec![StrideDim::Dynamic],
            },
        }));
        let program = Program::new("main").with_functions(vec![builder.finish("main", vec![p0])]);
        let report = check_bufferized(&program, &LegalitySpec::default()).expect_err("bad layout");
        // reported once for the parameter and once for the result
        assert_eq!(report.diagnostics.len(), 2);
    }

    #[test]
    fn dtype_filter_applies_to_buffers() {
        let spec = LegalitySpec::default()
            .with_dynamic_dims(true)
            .allow_dtypes([DType::F32]);
        assert!(check_bufferized(&reshape_program(), &spec).is_ok());
        let spec = LegalitySpec::default().allow_dtypes([DType::F64]);
        assert!(check_bufferized(&reshape_program(), &spec).is_err());
    }
}
