//! Small valid modules used as fuzzing seeds and in tests.

use crate::builder::ModuleBuilder;
use crate::instruction::{Decoration, Instruction, Opcode, Operand, StorageClass};
use crate::module::Module;

/// Straight-line integer code with a helper function, a local variable
/// and a private global.
pub fn arithmetic_module() -> Module {
    let mut b = ModuleBuilder::new();
    let void = b.type_void();
    let bool_ty = b.type_bool();
    let int = b.type_int(32, true);
    let float = b.type_float(32);
    let ptr_function_int = b.type_pointer(StorageClass::Function, int);
    let ptr_private_int = b.type_pointer(StorageClass::Private, int);
    let zero = b.constant(int, &[0]);
    let one = b.constant(int, &[1]);
    let two = b.constant(int, &[2]);
    let three = b.constant(int, &[3]);
    b.constant(float, &[0x3f80_0000]);
    b.constant_bool(bool_ty, true);
    b.constant_bool(bool_ty, false);
    let global = b.global_variable(ptr_private_int, StorageClass::Private, Some(zero));
    let main_ty = b.type_function(void, &[]);
    let add_ty = b.type_function(int, &[int, int]);

    let add = b.begin_function(int, add_ty);
    let lhs = b.param(int);
    let rhs = b.param(int);
    b.block();
    let sum = b.value(Opcode::IAdd, int, &[lhs, rhs]);
    b.emit(Instruction::return_value(sum));
    b.end_function();

    let main = b.begin_function(void, main_ty);
    b.block();
    let local = b.variable(ptr_function_int, None);
    let x = b.value(Opcode::IAdd, int, &[one, two]);
    let y = b.value(Opcode::ISub, int, &[x, one]);
    let called = b.value(Opcode::FunctionCall, int, &[add, x, y]);
    b.emit(Instruction::new(Opcode::Store).with_id_operands([local, called]));
    let loaded = b.value(Opcode::Load, int, &[local]);
    let product = b.value(Opcode::IMul, int, &[loaded, three]);
    b.emit(Instruction::new(Opcode::Store).with_id_operands([global, product]));
    b.emit(Instruction::return_void());
    b.end_function();
    b.entry_point("main", main);
    b.build()
}

/// A selection feeding a phi, a call to a two-block helper, and a
/// counted loop.
pub fn control_flow_module() -> Module {
    let mut b = ModuleBuilder::new();
    let void = b.type_void();
    let bool_ty = b.type_bool();
    let int = b.type_int(32, true);
    let zero = b.constant(int, &[0]);
    let one = b.constant(int, &[1]);
    let two = b.constant(int, &[2]);
    let three = b.constant(int, &[3]);
    b.constant_bool(bool_ty, true);
    b.constant_bool(bool_ty, false);
    let main_ty = b.type_function(void, &[]);
    let helper_ty = b.type_function(int, &[int]);

    let helper = b.begin_function(int, helper_ty);
    let input = b.param(int);
    b.block();
    let next = b.reserve_id();
    let incremented = b.value(Opcode::IAdd, int, &[input, one]);
    b.emit(Instruction::branch(next));
    b.block_with_label(next);
    b.emit(Instruction::return_value(incremented));
    b.end_function();

    let main = b.begin_function(void, main_ty);
    let then_block = b.reserve_id();
    let else_block = b.reserve_id();
    let merge = b.reserve_id();
    let header = b.reserve_id();
    let body = b.reserve_id();
    let continue_block = b.reserve_id();
    let exit = b.reserve_id();

    b.block();
    let cmp = b.value(Opcode::SLessThan, bool_ty, &[one, two]);
    b.emit(Instruction::selection_merge(merge, 0));
    b.emit(Instruction::branch_conditional(cmp, then_block, else_block));

    b.block_with_label(then_block);
    let a = b.value(Opcode::IAdd, int, &[one, two]);
    b.emit(Instruction::branch(merge));

    b.block_with_label(else_block);
    let c = b.value(Opcode::ISub, int, &[two, one]);
    b.emit(Instruction::branch(merge));

    b.block_with_label(merge);
    let p = b.value(Opcode::Phi, int, &[a, then_block, c, else_block]);
    let q = b.value(Opcode::IAdd, int, &[p, p]);
    b.value(Opcode::FunctionCall, int, &[helper, q]);
    b.emit(Instruction::branch(header));

    b.block_with_label(header);
    let induction = b.reserve_id();
    let i = b.value(Opcode::Phi, int, &[zero, merge, induction, continue_block]);
    let keep_going = b.value(Opcode::SLessThan, bool_ty, &[i, three]);
    b.emit(
        Instruction::new(Opcode::LoopMerge)
            .with_operand(Operand::Id(exit))
            .with_operand(Operand::Id(continue_block))
            .with_operand(Operand::Literal(0)),
    );
    b.emit(Instruction::branch_conditional(keep_going, body, exit));

    b.block_with_label(body);
    b.emit(Instruction::branch(continue_block));

    b.block_with_label(continue_block);
    b.emit(Instruction::value(Opcode::IAdd, int, induction, &[i, one]));
    b.emit(Instruction::branch(header));

    b.block_with_label(exit);
    b.emit(Instruction::return_void());
    b.end_function();
    b.entry_point("main", main);
    b.build()
}

/// A uniform block `{ int, float }` at descriptor set 0, binding 0, whose
/// members hold 7 and 2.5, with code using matching constants.
pub fn uniform_module() -> Module {
    let mut b = ModuleBuilder::new();
    let void = b.type_void();
    let int = b.type_int(32, true);
    let float = b.type_float(32);
    let block_ty = b.type_struct(&[int, float]);
    let ptr_uniform_block = b.type_pointer(StorageClass::Uniform, block_ty);
    b.type_pointer(StorageClass::Uniform, int);
    b.type_pointer(StorageClass::Uniform, float);
    let ptr_function_int = b.type_pointer(StorageClass::Function, int);
    let zero = b.constant(int, &[0]);
    let one = b.constant(int, &[1]);
    let seven = b.constant(int, &[7]);
    let two_and_a_half = b.constant(float, &[0x4020_0000]);
    let uniforms = b.global_variable(ptr_uniform_block, StorageClass::Uniform, None);
    b.decorate(uniforms, Decoration::DescriptorSet, Some(0));
    b.decorate(uniforms, Decoration::Binding, Some(0));
    let main_ty = b.type_function(void, &[]);

    let main = b.begin_function(void, main_ty);
    b.block();
    let local = b.variable(ptr_function_int, Some(zero));
    let a = b.value(Opcode::IAdd, int, &[seven, one]);
    b.emit(Instruction::new(Opcode::Store).with_id_operands([local, a]));
    let scaled = b.value(Opcode::IMul, int, &[a, seven]);
    b.emit(Instruction::new(Opcode::Store).with_id_operands([local, scaled]));
    b.value(Opcode::FMul, float, &[two_and_a_half, two_and_a_half]);
    b.emit(Instruction::return_void());
    b.end_function();
    b.entry_point("main", main);
    b.build()
}
