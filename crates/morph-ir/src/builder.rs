//! Incremental construction of modules.
//!
//! Types are interned: asking for a type that already exists returns the
//! existing id. Constants and variables are always freshly declared.

use crate::instruction::{Decoration, Id, Instruction, Opcode, Operand, StorageClass};
use crate::module::{BasicBlock, EntryPoint, Function, Module};
use crate::types::TypeKey;

pub struct ModuleBuilder {
    module: Module,
    next_id: Id,
    function: Option<Function>,
    block: Option<BasicBlock>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self {
            module: Module::new(),
            next_id: 1,
            function: None,
            block: None,
        }
    }

    /// A builder whose ids start at `next_id`, for building pieces that
    /// are later spliced into an existing module.
    pub fn starting_at(next_id: Id) -> Self {
        Self {
            next_id: next_id.max(1),
            ..Self::new()
        }
    }

    /// Allocates an id without defining anything, e.g. for a forward
    /// branch target.
    pub fn reserve_id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn declare_type(&mut self, key: TypeKey) -> Id {
        if let Some(id) = self.module.find_type(&key) {
            return id;
        }
        let id = self.reserve_id();
        self.module.globals.push(key.to_instruction(id));
        id
    }

    pub fn type_void(&mut self) -> Id {
        self.declare_type(TypeKey::Void)
    }

    pub fn type_bool(&mut self) -> Id {
        self.declare_type(TypeKey::Bool)
    }

    pub fn type_int(&mut self, width: u32, signed: bool) -> Id {
        self.declare_type(TypeKey::Int { width, signed })
    }

    pub fn type_float(&mut self, width: u32) -> Id {
        self.declare_type(TypeKey::Float { width })
    }

    pub fn type_vector(&mut self, component: Id, count: u32) -> Id {
        self.declare_type(TypeKey::Vector { component, count })
    }

    pub fn type_array(&mut self, element: Id, length: u32) -> Id {
        self.declare_type(TypeKey::Array { element, length })
    }

    pub fn type_struct(&mut self, members: &[Id]) -> Id {
        self.declare_type(TypeKey::Struct {
            members: members.to_vec(),
        })
    }

    pub fn type_pointer(&mut self, storage: StorageClass, pointee: Id) -> Id {
        self.declare_type(TypeKey::Pointer { storage, pointee })
    }

    pub fn type_function(&mut self, return_type: Id, params: &[Id]) -> Id {
        self.declare_type(TypeKey::Function {
            return_type,
            params: params.to_vec(),
        })
    }

    fn global_value(&mut self, opcode: Opcode, type_id: Id, operands: Vec<Operand>) -> Id {
        let id = self.reserve_id();
        self.module.globals.push(
            Instruction::new(opcode)
                .with_result_type(type_id)
                .with_result_id(id)
                .with_operands(operands),
        );
        id
    }

    pub fn constant(&mut self, type_id: Id, words: &[u32]) -> Id {
        let operands = words.iter().copied().map(Operand::Literal).collect();
        self.global_value(Opcode::Constant, type_id, operands)
    }

    pub fn constant_bool(&mut self, bool_type: Id, value: bool) -> Id {
        let opcode = if value {
            Opcode::ConstantTrue
        } else {
            Opcode::ConstantFalse
        };
        self.global_value(opcode, bool_type, Vec::new())
    }

    pub fn constant_composite(&mut self, type_id: Id, components: &[Id]) -> Id {
        let operands = components.iter().copied().map(Operand::Id).collect();
        self.global_value(Opcode::ConstantComposite, type_id, operands)
    }

    pub fn constant_null(&mut self, type_id: Id) -> Id {
        self.global_value(Opcode::ConstantNull, type_id, Vec::new())
    }

    pub fn undef(&mut self, type_id: Id) -> Id {
        self.global_value(Opcode::Undef, type_id, Vec::new())
    }

    pub fn global_variable(&mut self, pointer_type: Id, storage: StorageClass, initializer: Option<Id>) -> Id {
        let mut operands = vec![Operand::Literal(storage.to_literal())];
        operands.extend(initializer.map(Operand::Id));
        self.global_value(Opcode::Variable, pointer_type, operands)
    }

    pub fn decorate(&mut self, target: Id, decoration: Decoration, value: Option<u32>) {
        let mut inst = Instruction::new(Opcode::Decorate)
            .with_operand(Operand::Id(target))
            .with_operand(Operand::Literal(decoration.to_literal()));
        if let Some(value) = value {
            inst = inst.with_operand(Operand::Literal(value));
        }
        self.module.annotations.push(inst);
    }

    pub fn entry_point(&mut self, name: &str, function_id: Id) {
        self.module.entry_points.push(EntryPoint {
            name: name.to_string(),
            function_id,
        });
    }

    /// Starts a function. Any function under construction is finished first.
    pub fn begin_function(&mut self, return_type: Id, function_type: Id) -> Id {
        self.end_function();
        let id = self.reserve_id();
        self.function = Some(Function {
            def: Instruction::new(Opcode::Function)
                .with_result_type(return_type)
                .with_result_id(id)
                .with_operand(Operand::Literal(0))
                .with_operand(Operand::Id(function_type)),
            params: Vec::new(),
            blocks: Vec::new(),
        });
        id
    }

    pub fn param(&mut self, type_id: Id) -> Id {
        let id = self.reserve_id();
        if let Some(function) = self.function.as_mut() {
            function.params.push(
                Instruction::new(Opcode::FunctionParameter)
                    .with_result_type(type_id)
                    .with_result_id(id),
            );
        }
        id
    }

    /// Starts a new block with a fresh label.
    pub fn block(&mut self) -> Id {
        let label = self.reserve_id();
        self.block_with_label(label);
        label
    }

    /// Starts a new block using a previously reserved label.
    pub fn block_with_label(&mut self, label: Id) {
        self.finish_block();
        self.block = Some(BasicBlock::new(label));
    }

    /// Appends an instruction producing a value and returns its id.
    pub fn value(&mut self, opcode: Opcode, type_id: Id, operands: &[Id]) -> Id {
        let id = self.reserve_id();
        self.emit(Instruction::value(opcode, type_id, id, operands));
        id
    }

    /// Appends a function-storage variable to the current block.
    pub fn variable(&mut self, pointer_type: Id, initializer: Option<Id>) -> Id {
        let id = self.reserve_id();
        let mut inst = Instruction::new(Opcode::Variable)
            .with_result_type(pointer_type)
            .with_result_id(id)
            .with_operand(Operand::Literal(StorageClass::Function.to_literal()));
        if let Some(initializer) = initializer {
            inst = inst.with_operand(Operand::Id(initializer));
        }
        self.emit(inst);
        id
    }

    pub fn emit(&mut self, inst: Instruction) {
        if let Some(block) = self.block.as_mut() {
            block.instructions.push(inst);
        }
    }

    fn finish_block(&mut self) {
        if let (Some(block), Some(function)) = (self.block.take(), self.function.as_mut()) {
            function.blocks.push(block);
        }
    }

    pub fn end_function(&mut self) {
        self.finish_block();
        if let Some(function) = self.function.take() {
            self.module.functions.push(function);
        }
    }

    pub fn build(mut self) -> Module {
        self.end_function();
        self.module.id_bound = self.next_id;
        self.module
    }
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}
