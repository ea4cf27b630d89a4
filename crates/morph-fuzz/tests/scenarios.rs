use morph_core::{FuzzerConfig, ReplayConfig};
use morph_fuzz::descriptor::make_instruction_descriptor;
use morph_fuzz::fuzzer_pass::PassContext;
use morph_fuzz::transformation::{
    AddConstantBoolean, AddConstantScalar, AddDeadBlock, FunctionCall, SplitBlock, Transformation,
};
use morph_fuzz::{FactManager, FactSequence, FuzzerContext, ReplayStatus, Replayer, Transform, TransformationSequence};
use morph_ir::{samples, Id, Instruction, Module, ModuleBuilder, Opcode, StorageClass, StructuralValidator, TypeKey, Validator};

/// A void entry point and a boolean type, but no boolean constants.
fn module_with_bool_type() -> Module {
    let mut b = ModuleBuilder::new();
    let void = b.type_void();
    b.type_bool();
    let main_ty = b.type_function(void, &[]);
    let main = b.begin_function(void, main_ty);
    b.block();
    b.emit(Instruction::return_void());
    b.end_function();
    b.entry_point("main", main);
    b.build()
}

#[test]
fn test_duplicate_boolean_constants_under_distinct_ids() {
    let mut module = module_with_bool_type();
    let mut facts = FactManager::new();
    assert_eq!(module.id_bound, 6);
    assert_eq!(module.find_bool_constant(true), None);

    let first = AddConstantBoolean { fresh_id: 7, is_true: true };
    assert!(first.is_applicable(&module, &facts));
    let globals_before = module.globals.len();
    first.apply(&mut module, &mut facts).unwrap();
    assert_eq!(module.globals.len(), globals_before + 1);
    let added: Vec<_> = module.globals.iter().filter(|inst| inst.result_id == Some(7)).collect();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].opcode, Opcode::ConstantTrue);
    StructuralValidator.validate(&module).unwrap();

    assert!(!first.is_applicable(&module, &facts));
    let second = AddConstantBoolean { fresh_id: 8, is_true: true };
    assert!(second.is_applicable(&module, &facts));
}

#[test]
fn test_call_closing_an_indirect_cycle_is_rejected() {
    // f -> g -> h, plus an unrelated k.
    let mut b = ModuleBuilder::new();
    let void = b.type_void();
    let fn_ty = b.type_function(void, &[]);
    let k = b.begin_function(void, fn_ty);
    b.block();
    b.emit(Instruction::return_void());
    let h = b.begin_function(void, fn_ty);
    b.block();
    b.emit(Instruction::return_void());
    let g = b.begin_function(void, fn_ty);
    b.block();
    b.value(Opcode::FunctionCall, void, &[h]);
    b.emit(Instruction::return_void());
    let f = b.begin_function(void, fn_ty);
    b.block();
    b.value(Opcode::FunctionCall, void, &[g]);
    b.emit(Instruction::return_void());
    let module = b.build();

    let mut facts = FactManager::new();
    assert!(facts.add_fact_function_is_livesafe(f, &module));
    assert!(facts.add_fact_function_is_livesafe(k, &module));
    let h_block = &module.function(h).unwrap().blocks[0];
    let call_from_h = |callee: Id| FunctionCall {
        fresh_id: module.id_bound,
        callee_id: callee,
        argument_ids: vec![],
        instruction_to_insert_before: make_instruction_descriptor(h_block, 0).unwrap(),
    };
    assert!(!call_from_h(f).is_applicable(&module, &facts));
    assert!(call_from_h(k).is_applicable(&module, &facts));
}

#[test]
fn test_replay_elides_transformation_on_rewritten_block() {
    let module = samples::control_flow_module();
    let int = module.find_type(&TypeKey::Int { width: 32, signed: true }).unwrap();
    let helper = &module.functions[0];
    let entry = helper.blocks[0].label;
    let fresh = module.id_bound;
    let log = TransformationSequence::new(vec![
        Transformation::from(AddConstantScalar {
            fresh_id: fresh,
            type_id: int,
            words: vec![77],
        }),
        Transformation::from(AddConstantScalar {
            fresh_id: fresh + 1,
            type_id: int,
            words: vec![78],
        }),
        // Replaces the helper entry's unconditional branch.
        Transformation::from(AddDeadBlock {
            fresh_id: fresh + 2,
            existing_block: entry,
            condition_value: true,
        }),
        Transformation::from(AddConstantBoolean {
            fresh_id: fresh + 3,
            is_true: false,
        }),
        Transformation::from(SplitBlock {
            instruction_to_split_before: make_instruction_descriptor(&helper.blocks[0], 1).unwrap(),
            fresh_id: fresh + 4,
        }),
        Transformation::from(AddConstantScalar {
            fresh_id: fresh + 5,
            type_id: int,
            words: vec![79],
        }),
    ]);

    let outcome = Replayer::new(ReplayConfig {
        validate_after_each_transformation: true,
    })
    .replay(&module, &FactSequence::default(), &log)
    .unwrap();
    assert_eq!(outcome.status, ReplayStatus::Complete);
    let expected: Vec<_> = log
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != 4)
        .map(|(_, t)| t.clone())
        .collect();
    assert_eq!(outcome.transformations.transformations, expected);
    assert!(outcome.module.is_fresh_id(fresh + 4));
    assert_eq!(outcome.module.find_scalar_constant(int, &[79]), Some(fresh + 5));
}

#[test]
fn test_find_or_create_records_a_declaration_once() {
    let mut module = samples::arithmetic_module();
    let mut facts = FactManager::new();
    let mut context = FuzzerContext::new(&FuzzerConfig::default(), module.id_bound);
    let mut log = TransformationSequence::default();
    let mut pass = PassContext::new(&mut module, &mut facts, &mut context, &mut log);

    let constant = pass.find_or_create_int_constant(32, true, 1234).unwrap();
    assert_eq!(pass.find_or_create_int_constant(32, true, 1234).unwrap(), constant);
    let int = pass.find_or_create_int_type(32, true).unwrap();
    let pointer = pass.find_or_create_pointer_type(StorageClass::Uniform, int).unwrap();
    assert_eq!(pass.find_or_create_pointer_type(StorageClass::Uniform, int).unwrap(), pointer);
    assert_eq!(pass.transformations.len(), 2);
    assert_eq!(log.iter().map(Transformation::name).collect::<Vec<_>>(), vec!["add_constant_scalar", "add_type_pointer"]);
}

#[test]
fn test_descriptor_survives_unrelated_edits() {
    let mut module = samples::arithmetic_module();
    let mut facts = FactManager::new();
    let main = &module.functions[1].blocks[0];
    let product = make_instruction_descriptor(main, 6).unwrap();
    let before = module.instruction_at(product.resolve(&module).unwrap()).cloned();
    assert_eq!(before.as_ref().map(|inst| inst.opcode), Some(Opcode::IMul));

    let add_entry = &module.functions[0].blocks[0];
    let int = module.find_type(&TypeKey::Int { width: 32, signed: true }).unwrap();
    let edits = [
        Transformation::from(SplitBlock {
            instruction_to_split_before: make_instruction_descriptor(add_entry, 1).unwrap(),
            fresh_id: module.id_bound,
        }),
        Transformation::from(AddConstantScalar {
            fresh_id: module.id_bound + 1,
            type_id: int,
            words: vec![99],
        }),
    ];
    for edit in &edits {
        assert!(edit.is_applicable(&module, &facts));
        edit.apply(&mut module, &mut facts).unwrap();
    }
    let after = module.instruction_at(product.resolve(&module).unwrap()).cloned();
    assert_eq!(before, after);
    StructuralValidator.validate(&module).unwrap();
}
