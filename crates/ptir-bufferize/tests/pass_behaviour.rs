use ptir_bufferize::error::ShapeClass;
use ptir_bufferize::legality::{check_bufferized, LegalitySpec};
use ptir_bufferize::ptir_utils::{tensor_spec_mixed, tensor_spec_static, value_type_tensor};
use ptir_bufferize::spec::{
    BroadcastInDimSpec, DType, Operand, Operation, OperationKind, Program, ProgramBuilder,
    ValueType,
};
use ptir_bufferize::{
    bufferize_program, default_registry, BufferizationOptions, BufferizeError, DialectPolicy,
};

fn unranked_f32() -> ValueType {
    ValueType::UnrankedTensor(DType::F32)
}

fn ranked_f32(dims: &[usize]) -> ValueType {
    value_type_tensor(tensor_spec_static(DType::F32, dims))
}

fn dynamic_f32(rank: usize) -> ValueType {
    value_type_tensor(tensor_spec_mixed(DType::F32, &vec![None; rank]))
}

fn broadcast_program() -> Program {
    let mut builder = ProgramBuilder::new();
    let data = builder.add_parameter(ranked_f32(&[1, 5]));
    let shape = builder.add_parameter(value_type_tensor(tensor_spec_static(DType::Si64, &[2])));
    let out = builder.emit_single(
        Operation::DynamicBroadcastInDim(BroadcastInDimSpec {
            broadcast_dimensions: vec![0, 1],
        }),
        vec![Operand::Value(data), Operand::Value(shape)],
        dynamic_f32(2),
    );
    Program::new("main").with_functions(vec![builder.finish("main", vec![out])])
}

#[test]
fn parameter_used_twice_gets_one_buffer() {
    let mut builder = ProgramBuilder::new();
    let input = builder.add_parameter(unranked_f32());
    let matrix = builder.emit_single(
        Operation::Reshape,
        vec![Operand::Value(input)],
        ranked_f32(&[2, 3]),
    );
    let flat = builder.emit_single(
        Operation::Reshape,
        vec![Operand::Value(input)],
        ranked_f32(&[6]),
    );
    let mut program =
        Program::new("main").with_functions(vec![builder.finish("main", vec![matrix, flat])]);

    let stats =
        bufferize_program(&mut program, BufferizationOptions::default()).expect("bufferize");
    assert_eq!(stats.rewritten, 2);

    let function = &program.functions[0];
    assert_eq!(function.count_kind(OperationKind::ToBuffer), 1);
    assert_eq!(function.count_kind(OperationKind::Cast), 2);
    assert_eq!(function.count_kind(OperationKind::ToTensor), 2);
    assert_eq!(function.count_kind(OperationKind::Reshape), 0);
}

#[test]
fn chained_rewrites_consume_buffers_directly() {
    let build = || {
        let mut builder = ProgramBuilder::new();
        let input = builder.add_parameter(unranked_f32());
        let shape =
            builder.add_parameter(value_type_tensor(tensor_spec_static(DType::Si64, &[2])));
        let ranked = builder.emit_single(
            Operation::Reshape,
            vec![Operand::Value(input)],
            ranked_f32(&[2, 6]),
        );
        let reshaped = builder.emit_single(
            Operation::DynamicReshape,
            vec![Operand::Value(ranked), Operand::Value(shape)],
            dynamic_f32(2),
        );
        Program::new("main").with_functions(vec![builder.finish("main", vec![reshaped])])
    };

    let mut plain = build();
    bufferize_program(&mut plain, BufferizationOptions::default()).expect("bufferize");
    let function = &plain.functions[0];
    let view = function
        .body
        .iter()
        .find(|inst| inst.op == Operation::ReshapeView)
        .expect("reshape view");
    let cast = function
        .body
        .iter()
        .find(|inst| inst.op == Operation::Cast)
        .expect("cast");
    assert_eq!(view.operands[0], Operand::Value(cast.id));
    assert_eq!(function.count_kind(OperationKind::ToTensor), 2);

    let mut folded = build();
    let stats = bufferize_program(
        &mut folded,
        BufferizationOptions::default().with_fold_bridges(true),
    )
    .expect("bufferize");
    assert_eq!(stats.dce_removed, 1);
    assert_eq!(folded.functions[0].count_kind(OperationKind::ToTensor), 1);
}

#[test]
fn missing_policy_fails_without_touching_the_function() {
    let mut program = broadcast_program();
    let before = program.clone();
    let err = bufferize_program(&mut program, BufferizationOptions::default().without_policy())
        .expect_err("policy is required");

    assert!(matches!(err.root_cause(), BufferizeError::PolicyMissing));
    assert_eq!(program, before);
}

#[test]
fn failed_rewrite_keeps_earlier_rewrites() {
    let mut builder = ProgramBuilder::new();
    let unranked = builder.add_parameter(unranked_f32());
    let ranked = builder.add_parameter(ranked_f32(&[4]));
    let ok = builder.emit_single(
        Operation::Reshape,
        vec![Operand::Value(unranked)],
        ranked_f32(&[2, 2]),
    );
    let bad = builder.emit_single(
        Operation::Reshape,
        vec![Operand::Value(ranked)],
        ranked_f32(&[2, 2]),
    );
    let mut program =
        Program::new("main").with_functions(vec![builder.finish("main", vec![ok, bad])]);

    let err = bufferize_program(&mut program, BufferizationOptions::default())
        .expect_err("ranked operand is rejected");
    match &err {
        BufferizeError::Pass { function, kind, .. } => {
            assert_eq!(function, "main");
            assert_eq!(*kind, OperationKind::Reshape);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(matches!(
        err.root_cause(),
        BufferizeError::UnsupportedShapeClass {
            value,
            expected: ShapeClass::Unranked,
        } if *value == ranked
    ));

    let function = &program.functions[0];
    assert_eq!(function.count_kind(OperationKind::Cast), 1);
    assert_eq!(function.count_kind(OperationKind::Reshape), 1);
    let survivor = function.instruction(bad).expect("failed op is still present");
    assert_eq!(survivor.operands, vec![Operand::Value(ranked)]);
}

#[test]
fn default_registry_handles_the_three_shape_ops() {
    let registry = default_registry();
    assert_eq!(
        registry.kinds(),
        vec![
            OperationKind::Reshape,
            OperationKind::DynamicReshape,
            OperationKind::DynamicBroadcastInDim,
        ]
    );
    assert!(!registry.contains(OperationKind::ElementwiseBinary));
}

#[test]
fn legality_flags_tensor_form_and_accepts_bufferized_form() {
    let mut program = broadcast_program();
    let spec = LegalitySpec::for_registry(&default_registry());
    let report = check_bufferized(&program, &spec).expect_err("broadcast is still a tensor op");
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(
        report.diagnostics[0].kind,
        Some(OperationKind::DynamicBroadcastInDim)
    );

    bufferize_program(
        &mut program,
        BufferizationOptions::default().with_policy(DialectPolicy::always()),
    )
    .expect("bufferize");
    check_bufferized(&program, &spec).expect("no illegal ops remain");
}

#[test]
fn bufferized_program_survives_serialization() {
    let mut program = broadcast_program();
    bufferize_program(&mut program, BufferizationOptions::default()).expect("bufferize");

    let json = program.to_json_string().expect("json");
    assert_eq!(Program::from_json_str(&json).expect("parse json"), program);

    let bytes = program.to_bincode_bytes().expect("bincode");
    assert_eq!(Program::from_bincode_slice(&bytes).expect("parse bincode"), program);
}
