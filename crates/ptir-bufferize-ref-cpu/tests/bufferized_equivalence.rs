use anyhow::Result;
use ptir_bufferize::ptir_utils::{tensor_spec_mixed, tensor_spec_static, value_type_tensor};
use ptir_bufferize::spec::{
    BroadcastInDimSpec, DType, ElementwiseBinaryOp, Function, Operand, Operation, OperationKind,
    Program, ProgramBuilder, ValueType,
};
use ptir_bufferize::{bufferize_program, BufferizationOptions, DialectPolicy};
use ptir_bufferize_ref_cpu::{HostTensor, Interpreter, RuntimeValue};
use test_case::test_case;

fn program_of(function: Function) -> Program {
    Program::new("main").with_functions(vec![function])
}

fn bufferized(program: &Program, options: BufferizationOptions) -> Program {
    let mut program = program.clone();
    bufferize_program(&mut program, options).expect("bufferize");
    program
}

fn run(program: &Program, inputs: &[HostTensor]) -> Vec<HostTensor> {
    let inputs: Vec<RuntimeValue> = inputs.iter().cloned().map(RuntimeValue::Tensor).collect();
    let mut interpreter = Interpreter::new();
    let outputs = interpreter.run_program(program, &inputs).expect("execute");
    outputs
        .iter()
        .map(|value| interpreter.materialize(value).expect("materialize"))
        .collect()
}

fn reshape_program(dims: &[usize]) -> Program {
    let mut builder = ProgramBuilder::new();
    let input = builder.add_parameter(ValueType::UnrankedTensor(DType::F32));
    let out = builder.emit_single(
        Operation::Reshape,
        vec![Operand::Value(input)],
        value_type_tensor(tensor_spec_static(DType::F32, dims)),
    );
    program_of(builder.finish("main", vec![out]))
}

fn dynamic_reshape_program(input: &[usize], rank: usize) -> Program {
    let mut builder = ProgramBuilder::new();
    let data = builder.add_parameter(value_type_tensor(tensor_spec_static(DType::F32, input)));
    let shape = builder.add_parameter(value_type_tensor(tensor_spec_static(DType::Si64, &[rank])));
    let out = builder.emit_single(
        Operation::DynamicReshape,
        vec![Operand::Value(data), Operand::Value(shape)],
        value_type_tensor(tensor_spec_mixed(DType::F32, &vec![None; rank])),
    );
    program_of(builder.finish("main", vec![out]))
}

fn broadcast_program(
    operand: &[Option<usize>],
    result: &[Option<usize>],
    dims: Vec<usize>,
) -> Program {
    let mut builder = ProgramBuilder::new();
    let data = builder.add_parameter(value_type_tensor(tensor_spec_mixed(DType::F32, operand)));
    let shape = builder.add_parameter(value_type_tensor(tensor_spec_static(
        DType::Si64,
        &[result.len()],
    )));
    let out = builder.emit_single(
        Operation::DynamicBroadcastInDim(BroadcastInDimSpec {
            broadcast_dimensions: dims,
        }),
        vec![Operand::Value(data), Operand::Value(shape)],
        value_type_tensor(tensor_spec_mixed(DType::F32, result)),
    );
    program_of(builder.finish("main", vec![out]))
}

fn shape_tensor(dims: &[i64]) -> HostTensor {
    HostTensor::i64(&[dims.len()], dims.to_vec()).expect("shape tensor")
}

/// Appends the last `view_kind` buffer and the parameter bridge buffer to the
/// function results.
fn expose_buffers(program: &mut Program, view_kind: OperationKind) {
    let function = &mut program.functions[0];
    let view = function
        .body
        .iter()
        .rev()
        .find(|inst| inst.op.kind() == view_kind)
        .expect("view instruction")
        .clone();
    let source = function
        .body
        .iter()
        .find(|inst| inst.op == Operation::ToBuffer)
        .expect("parameter bridge")
        .clone();
    function.results.push(view.output);
    function.result_ids.push(view.id);
    function.results.push(source.output);
    function.result_ids.push(source.id);
}

#[test]
fn reshape_reads_the_same_elements() -> Result<()> {
    let program = reshape_program(&[2, 3]);
    let after = bufferized(&program, BufferizationOptions::default());
    assert_eq!(after.functions[0].count_kind(OperationKind::Cast), 1);

    let input = HostTensor::iota(DType::F32, &[6])?;
    let expected = run(&program, &[input.clone()]);
    let actual = run(&after, &[input]);
    assert_eq!(actual, expected);
    assert_eq!(actual[0].dims, vec![2, 3]);
    Ok(())
}

#[test]
fn dynamic_reshape_follows_runtime_shape() -> Result<()> {
    let program = dynamic_reshape_program(&[2, 6], 2);
    let after = bufferized(&program, BufferizationOptions::default());
    assert_eq!(after.functions[0].count_kind(OperationKind::ReshapeView), 1);

    let inputs = [HostTensor::iota(DType::F32, &[2, 6])?, shape_tensor(&[3, 4])];
    let expected = run(&program, &inputs);
    let actual = run(&after, &inputs);
    assert_eq!(actual, expected);
    assert_eq!(actual[0].dims, vec![3, 4]);
    assert_eq!(
        actual[0].to_f32_vec()?,
        (0..12).map(|i| i as f32).collect::<Vec<_>>()
    );
    Ok(())
}

#[test_case(&[Some(1), Some(5)], &[Some(7), Some(5)], vec![0, 1], &[1, 5], &[7, 5]; "expand leading axis")]
#[test_case(&[Some(5)], &[Some(3), Some(5)], vec![1], &[5], &[3, 5]; "insert leading axis")]
#[test_case(&[None, None], &[None, None], vec![0, 1], &[1, 5], &[4, 5]; "dynamic expand")]
#[test_case(&[Some(3), Some(1)], &[None, None, None], vec![1, 2], &[3, 1], &[2, 3, 4]; "expand trailing and insert")]
fn broadcast_view_matches_tensor_semantics(
    operand: &[Option<usize>],
    result: &[Option<usize>],
    dims: Vec<usize>,
    input_dims: &[usize],
    target: &[i64],
) {
    let program = broadcast_program(operand, result, dims);
    let inputs = [
        HostTensor::iota(DType::F32, input_dims).expect("input"),
        shape_tensor(target),
    ];

    let expected = run(&program, &inputs);
    for policy in [DialectPolicy::never(), DialectPolicy::always()] {
        let after = bufferized(&program, BufferizationOptions::default().with_policy(policy));
        let actual = run(&after, &inputs);
        assert_eq!(actual, expected);
    }
}

#[test]
fn static_expand_aliases_operand_with_zero_stride() {
    let mut program = bufferized(
        &broadcast_program(&[Some(1), Some(5)], &[Some(7), Some(5)], vec![0, 1]),
        BufferizationOptions::default(),
    );
    assert_eq!(program.functions[0].count_kind(OperationKind::Alloc), 0);
    assert_eq!(program.functions[0].count_kind(OperationKind::Copy), 0);
    expose_buffers(&mut program, OperationKind::ReinterpretCast);

    let inputs = [
        RuntimeValue::Tensor(HostTensor::iota(DType::F32, &[1, 5]).expect("input")),
        RuntimeValue::Tensor(shape_tensor(&[7, 5])),
    ];
    let mut interpreter = Interpreter::new();
    let outputs = interpreter.run_program(&program, &inputs).expect("execute");
    let view = outputs[1].as_buffer().expect("view");
    let source = outputs[2].as_buffer().expect("source");

    assert_eq!(view.allocation, source.allocation);
    assert_eq!(view.sizes, vec![7, 5]);
    assert_eq!(view.strides, vec![0, 1]);
    assert_eq!(view.offset, 0);
    let mut seen = view.addresses().expect("view addresses");
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen, source.addresses().expect("source addresses"));
}

#[test]
fn inserted_axis_gets_zero_stride() {
    let mut program = bufferized(
        &broadcast_program(&[Some(5)], &[None, None], vec![1]),
        BufferizationOptions::default(),
    );
    expose_buffers(&mut program, OperationKind::ReinterpretCast);

    let inputs = [
        RuntimeValue::Tensor(HostTensor::iota(DType::F32, &[5]).expect("input")),
        RuntimeValue::Tensor(shape_tensor(&[3, 5])),
    ];
    let mut interpreter = Interpreter::new();
    let outputs = interpreter.run_program(&program, &inputs).expect("execute");
    let view = outputs[1].as_buffer().expect("view");
    assert_eq!(view.sizes, vec![3, 5]);
    assert_eq!(view.strides, vec![0, 1]);

    let values = interpreter.materialize(&outputs[0]).expect("result");
    let row: Vec<f32> = (0..5).map(|i| i as f32).collect();
    assert_eq!(values.to_f32_vec().expect("floats"), row.repeat(3));
}

#[test]
fn identity_policy_materializes_dense_copy() {
    let mut program = bufferized(
        &broadcast_program(&[Some(1), Some(5)], &[None, Some(5)], vec![0, 1]),
        BufferizationOptions::default().with_policy(DialectPolicy::always()),
    );
    let function = &program.functions[0];
    assert_eq!(function.count_kind(OperationKind::Alloc), 1);
    assert_eq!(function.count_kind(OperationKind::Copy), 1);
    expose_buffers(&mut program, OperationKind::Alloc);

    let inputs = [
        RuntimeValue::Tensor(HostTensor::iota(DType::F32, &[1, 5]).expect("input")),
        RuntimeValue::Tensor(shape_tensor(&[4, 5])),
    ];
    let mut interpreter = Interpreter::new();
    let outputs = interpreter.run_program(&program, &inputs).expect("execute");
    let dense = outputs[1].as_buffer().expect("alloc");
    let source = outputs[2].as_buffer().expect("source");

    assert!(dense.is_identity());
    assert_eq!(dense.strides, vec![5, 1]);
    assert!(dense.strides.iter().all(|&stride| stride != 0));
    assert_ne!(dense.allocation, source.allocation);
}

#[test]
fn unhandled_consumer_sees_bridged_tensor() -> Result<()> {
    let mut builder = ProgramBuilder::new();
    let input = builder.add_parameter(ValueType::UnrankedTensor(DType::F32));
    let ty = value_type_tensor(tensor_spec_static(DType::F32, &[2, 2]));
    let ranked = builder.emit_single(Operation::Reshape, vec![Operand::Value(input)], ty.clone());
    let doubled = builder.emit_single(
        Operation::ElementwiseBinary(ElementwiseBinaryOp::Add),
        vec![Operand::Value(ranked), Operand::Value(ranked)],
        ty,
    );
    let program = program_of(builder.finish("main", vec![doubled]));
    let after = bufferized(&program, BufferizationOptions::default().with_verify(true));

    let input = HostTensor::iota(DType::F32, &[4])?;
    let actual = run(&after, &[input.clone()]);
    assert_eq!(actual, run(&program, &[input]));
    assert_eq!(actual[0].to_f32_vec()?, vec![0.0, 2.0, 4.0, 6.0]);
    Ok(())
}

fn rebroadcast_program() -> Program {
    let mut builder = ProgramBuilder::new();
    let data = builder.add_parameter(value_type_tensor(tensor_spec_static(DType::F32, &[1])));
    let row_shape = builder.add_parameter(value_type_tensor(tensor_spec_static(DType::Si64, &[1])));
    let grid_shape =
        builder.add_parameter(value_type_tensor(tensor_spec_static(DType::Si64, &[2])));
    let row = builder.emit_single(
        Operation::DynamicBroadcastInDim(BroadcastInDimSpec {
            broadcast_dimensions: vec![0],
        }),
        vec![Operand::Value(data), Operand::Value(row_shape)],
        value_type_tensor(tensor_spec_static(DType::F32, &[5])),
    );
    let grid = builder.emit_single(
        Operation::DynamicBroadcastInDim(BroadcastInDimSpec {
            broadcast_dimensions: vec![1],
        }),
        vec![Operand::Value(row), Operand::Value(grid_shape)],
        value_type_tensor(tensor_spec_static(DType::F32, &[3, 5])),
    );
    program_of(builder.finish("main", vec![grid]))
}

#[test]
fn rebroadcast_of_broadcast_view_stays_in_bounds() -> Result<()> {
    let program = rebroadcast_program();
    let inputs = [
        HostTensor::f32(&[1], vec![2.5])?,
        shape_tensor(&[5]),
        shape_tensor(&[3, 5]),
    ];
    let expected = run(&program, &inputs);
    assert_eq!(expected[0].to_f32_vec()?, vec![2.5; 15]);

    for policy in [DialectPolicy::never(), DialectPolicy::always()] {
        let after = bufferized(&program, BufferizationOptions::default().with_policy(policy));
        assert_eq!(run(&after, &inputs), expected);
    }
    Ok(())
}

#[test]
fn reshape_of_broadcast_view_matches_tensor_form() -> Result<()> {
    let mut builder = ProgramBuilder::new();
    let data = builder.add_parameter(value_type_tensor(tensor_spec_static(DType::F32, &[1, 3])));
    let shape = builder.add_parameter(value_type_tensor(tensor_spec_static(DType::Si64, &[2])));
    let target = builder.add_parameter(value_type_tensor(tensor_spec_static(DType::Si64, &[1])));
    let expanded = builder.emit_single(
        Operation::DynamicBroadcastInDim(BroadcastInDimSpec {
            broadcast_dimensions: vec![0, 1],
        }),
        vec![Operand::Value(data), Operand::Value(shape)],
        value_type_tensor(tensor_spec_mixed(DType::F32, &[None, Some(3)])),
    );
    let flat = builder.emit_single(
        Operation::DynamicReshape,
        vec![Operand::Value(expanded), Operand::Value(target)],
        value_type_tensor(tensor_spec_mixed(DType::F32, &[None])),
    );
    let program = program_of(builder.finish("main", vec![flat]));
    let after = bufferized(&program, BufferizationOptions::default());
    assert_eq!(after.functions[0].count_kind(OperationKind::Copy), 1);

    let inputs = [
        HostTensor::iota(DType::F32, &[1, 3])?,
        shape_tensor(&[2, 3]),
        shape_tensor(&[6]),
    ];
    let expected = run(&program, &inputs);
    assert_eq!(expected[0].to_f32_vec()?, vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
    assert_eq!(run(&after, &inputs), expected);
    Ok(())
}
