//! Module structure: global declarations plus functions made of basic blocks.

use crate::instruction::{Id, Instruction, Opcode};
use morph_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A basic block: a label followed by instructions, the last of which is
/// the terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub label: Id,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(label: Id) -> Self {
        Self {
            label,
            instructions: Vec::new(),
        }
    }

    pub fn with_instructions(label: Id, instructions: Vec<Instruction>) -> Self {
        Self {
            label,
            instructions,
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions
            .last()
            .filter(|inst| inst.opcode.is_terminator())
    }

    /// The merge instruction directly preceding the terminator, if any.
    pub fn merge_instruction(&self) -> Option<&Instruction> {
        let len = self.instructions.len();
        if len < 2 {
            return None;
        }
        let candidate = &self.instructions[len - 2];
        candidate.opcode.is_merge().then_some(candidate)
    }

    pub fn is_loop_header(&self) -> bool {
        self.merge_instruction()
            .is_some_and(|inst| inst.opcode == Opcode::LoopMerge)
    }

    pub fn successors(&self) -> Vec<Id> {
        self.terminator()
            .map(Instruction::branch_targets)
            .unwrap_or_default()
    }

    /// Number of leading `Phi` instructions.
    pub fn phi_count(&self) -> usize {
        self.instructions
            .iter()
            .take_while(|inst| inst.opcode == Opcode::Phi)
            .count()
    }

    pub fn position_of(&self, result_id: Id) -> Option<usize> {
        self.instructions
            .iter()
            .position(|inst| inst.result_id == Some(result_id))
    }
}

/// A function: its definition, parameters and blocks. The first block is
/// the entry block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub def: Instruction,
    pub params: Vec<Instruction>,
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn id(&self) -> Id {
        self.def.result_id.unwrap_or(0)
    }

    pub fn return_type(&self) -> Id {
        self.def.result_type.unwrap_or(0)
    }

    pub fn control(&self) -> u32 {
        self.def.literal_operand(0).unwrap_or(0)
    }

    pub fn function_type(&self) -> Id {
        self.def.id_operand(1).unwrap_or(0)
    }

    pub fn param_ids(&self) -> Vec<Id> {
        self.params.iter().filter_map(|param| param.result_id).collect()
    }

    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn block(&self, label: Id) -> Option<&BasicBlock> {
        self.blocks.iter().find(|block| block.label == label)
    }

    pub fn block_mut(&mut self, label: Id) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|block| block.label == label)
    }

    pub fn block_index(&self, label: Id) -> Option<usize> {
        self.blocks.iter().position(|block| block.label == label)
    }

    /// All body instructions in block order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|block| block.instructions.iter())
    }

    /// Ids of functions called directly from this function.
    pub fn callees(&self) -> Vec<Id> {
        self.instructions()
            .filter(|inst| inst.opcode == Opcode::FunctionCall)
            .filter_map(|inst| inst.id_operand(0))
            .collect()
    }

    /// Every id this function defines: itself, parameters, labels and
    /// instruction results.
    pub fn defined_ids(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self.def.result_id.into_iter().collect();
        ids.extend(self.param_ids());
        for block in &self.blocks {
            ids.push(block.label);
            ids.extend(block.instructions.iter().filter_map(|inst| inst.result_id));
        }
        ids
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(BasicBlock::len).sum()
    }
}

/// An externally visible function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub name: String,
    pub function_id: Id,
}

/// Location of an instruction inside a function body. Only valid until
/// the next edit of the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstructionPosition {
    pub function: usize,
    pub block: usize,
    pub index: usize,
}

/// Where an id is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefSite {
    Global(usize),
    Function(usize),
    Parameter { function: usize, index: usize },
    Label { function: usize, block: usize },
    Body(InstructionPosition),
}

/// A complete module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Every id in the module is strictly less than this bound.
    pub id_bound: u32,
    pub entry_points: Vec<EntryPoint>,
    pub annotations: Vec<Instruction>,
    /// Types, constants and global variables, in definition order.
    pub globals: Vec<Instruction>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            id_bound: 1,
            entry_points: Vec::new(),
            annotations: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn find_def(&self, id: Id) -> Option<DefSite> {
        if id == 0 {
            return None;
        }
        if let Some(index) = self.globals.iter().position(|inst| inst.result_id == Some(id)) {
            return Some(DefSite::Global(index));
        }
        for (function_index, function) in self.functions.iter().enumerate() {
            if function.def.result_id == Some(id) {
                return Some(DefSite::Function(function_index));
            }
            if let Some(index) = function.params.iter().position(|p| p.result_id == Some(id)) {
                return Some(DefSite::Parameter {
                    function: function_index,
                    index,
                });
            }
            for (block_index, block) in function.blocks.iter().enumerate() {
                if block.label == id {
                    return Some(DefSite::Label {
                        function: function_index,
                        block: block_index,
                    });
                }
                if let Some(index) = block.position_of(id) {
                    return Some(DefSite::Body(InstructionPosition {
                        function: function_index,
                        block: block_index,
                        index,
                    }));
                }
            }
        }
        None
    }

    /// The instruction defining `id`. Labels have no defining instruction.
    pub fn def_instruction(&self, id: Id) -> Option<&Instruction> {
        match self.find_def(id)? {
            DefSite::Global(index) => self.globals.get(index),
            DefSite::Function(index) => self.functions.get(index).map(|f| &f.def),
            DefSite::Parameter { function, index } => self.functions[function].params.get(index),
            DefSite::Label { .. } => None,
            DefSite::Body(position) => self.instruction_at(position),
        }
    }

    pub fn instruction_at(&self, position: InstructionPosition) -> Option<&Instruction> {
        self.functions
            .get(position.function)?
            .blocks
            .get(position.block)?
            .instructions
            .get(position.index)
    }

    pub fn instruction_at_mut(&mut self, position: InstructionPosition) -> Option<&mut Instruction> {
        self.functions
            .get_mut(position.function)?
            .blocks
            .get_mut(position.block)?
            .instructions
            .get_mut(position.index)
    }

    pub fn block_at(&self, function: usize, block: usize) -> Option<&BasicBlock> {
        self.functions.get(function)?.blocks.get(block)
    }

    /// Inserts `inst` so that it ends up at `position`, shifting the
    /// instruction previously there down by one.
    pub fn insert_instruction(&mut self, position: InstructionPosition, inst: Instruction) -> Result<()> {
        let block = self
            .functions
            .get_mut(position.function)
            .and_then(|f| f.blocks.get_mut(position.block))
            .ok_or_else(|| Error::invariant(format!("no block at {:?}", position)))?;
        if position.index > block.instructions.len() {
            return Err(Error::invariant(format!("insertion index out of range at {:?}", position)));
        }
        block.instructions.insert(position.index, inst);
        Ok(())
    }

    /// Locates the block labelled `label`, returning (function, block) indices.
    pub fn find_block(&self, label: Id) -> Option<(usize, usize)> {
        match self.find_def(label)? {
            DefSite::Label { function, block } => Some((function, block)),
            _ => None,
        }
    }

    pub fn type_of(&self, id: Id) -> Option<Id> {
        self.def_instruction(id)?.result_type
    }

    /// An id is fresh if it is non-zero and nothing defines it.
    pub fn is_fresh_id(&self, id: Id) -> bool {
        id != 0 && self.find_def(id).is_none()
    }

    /// Bumps the id bound so that `id` is in range.
    pub fn update_id_bound(&mut self, id: Id) {
        self.id_bound = self.id_bound.max(id.saturating_add(1));
    }

    pub fn function(&self, id: Id) -> Option<&Function> {
        self.functions.iter().find(|f| f.id() == id)
    }

    pub fn function_mut(&mut self, id: Id) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.id() == id)
    }

    pub fn function_index(&self, id: Id) -> Option<usize> {
        self.functions.iter().position(|f| f.id() == id)
    }

    pub fn is_entry_point(&self, function_id: Id) -> bool {
        self.entry_points
            .iter()
            .any(|entry| entry.function_id == function_id)
    }

    pub fn decorations_for(&self, id: Id) -> impl Iterator<Item = &Instruction> {
        self.annotations
            .iter()
            .filter(move |inst| inst.opcode == Opcode::Decorate && inst.id_operand(0) == Some(id))
    }

    pub fn has_decorations(&self, id: Id) -> bool {
        self.decorations_for(id).next().is_some()
    }

    /// Returns true if anything other than the definition refers to `id`.
    pub fn is_id_used(&self, id: Id) -> bool {
        self.entry_points.iter().any(|entry| entry.function_id == id)
            || self.annotations.iter().any(|inst| inst.references(id))
            || self.globals.iter().any(|inst| inst.references(id))
            || self.functions.iter().any(|function| {
                function.def.references(id)
                    || function.params.iter().any(|param| param.references(id))
                    || function.instructions().any(|inst| inst.references(id))
            })
    }

    /// Positions of all body instructions calling `function_id`.
    pub fn call_sites(&self, function_id: Id) -> Vec<InstructionPosition> {
        let mut sites = Vec::new();
        for (f, function) in self.functions.iter().enumerate() {
            for (b, block) in function.blocks.iter().enumerate() {
                for (index, inst) in block.instructions.iter().enumerate() {
                    if inst.opcode == Opcode::FunctionCall && inst.id_operand(0) == Some(function_id) {
                        sites.push(InstructionPosition {
                            function: f,
                            block: b,
                            index,
                        });
                    }
                }
            }
        }
        sites
    }

    pub fn instruction_count(&self) -> usize {
        self.globals.len()
            + self
                .functions
                .iter()
                .map(|f| 1 + f.params.len() + f.instruction_count())
                .sum::<usize>()
    }

    /// Serialize the module to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a module from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Operand;

    fn tiny_module() -> Module {
        // %1 = void, %2 = fn() -> void, %3 = function, %4 = entry label
        let mut module = Module::new();
        module.globals.push(Instruction::new(Opcode::TypeVoid).with_result_id(1));
        module.globals.push(
            Instruction::new(Opcode::TypeFunction)
                .with_result_id(2)
                .with_operand(Operand::Id(1)),
        );
        module.functions.push(Function {
            def: Instruction::new(Opcode::Function)
                .with_result_type(1)
                .with_result_id(3)
                .with_operand(Operand::Literal(0))
                .with_operand(Operand::Id(2)),
            params: Vec::new(),
            blocks: vec![BasicBlock::with_instructions(4, vec![Instruction::return_void()])],
        });
        module.entry_points.push(EntryPoint {
            name: "main".to_string(),
            function_id: 3,
        });
        module.id_bound = 5;
        module
    }

    #[test]
    fn test_find_def() {
        let module = tiny_module();
        assert_eq!(module.find_def(1), Some(DefSite::Global(0)));
        assert_eq!(module.find_def(3), Some(DefSite::Function(0)));
        assert_eq!(module.find_def(4), Some(DefSite::Label { function: 0, block: 0 }));
        assert_eq!(module.find_def(9), None);
        assert_eq!(module.find_def(0), None);
        assert!(module.def_instruction(4).is_none());
    }

    #[test]
    fn test_fresh_ids_and_bound() {
        let mut module = tiny_module();
        assert!(!module.is_fresh_id(0));
        assert!(!module.is_fresh_id(2));
        assert!(module.is_fresh_id(5));
        module.update_id_bound(10);
        assert_eq!(module.id_bound, 11);
        module.update_id_bound(3);
        assert_eq!(module.id_bound, 11);
    }

    #[test]
    fn test_function_queries() {
        let module = tiny_module();
        let function = module.function(3).unwrap();
        assert_eq!(function.return_type(), 1);
        assert_eq!(function.function_type(), 2);
        assert_eq!(function.defined_ids(), vec![3, 4]);
        assert!(module.is_entry_point(3));
        assert!(module.is_id_used(1));
        assert!(module.is_id_used(3));
    }

    #[test]
    fn test_block_queries() {
        let block = BasicBlock::with_instructions(
            7,
            vec![
                Instruction::selection_merge(9, 0),
                Instruction::branch_conditional(5, 8, 9),
            ],
        );
        assert_eq!(block.successors(), vec![8, 9]);
        assert!(block.merge_instruction().is_some());
        assert!(!block.is_loop_header());
        assert_eq!(block.phi_count(), 0);
    }

    #[test]
    fn test_module_serialization() {
        let module = tiny_module();
        let bytes = module.to_bytes().unwrap();
        assert_eq!(Module::from_bytes(&bytes).unwrap(), module);

        let json = module.to_json().unwrap();
        assert_eq!(Module::from_json(&json).unwrap(), module);
    }
}
