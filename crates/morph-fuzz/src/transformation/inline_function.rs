use super::{ensure_applicable, Transform};
use crate::fact_manager::FactManager;
use morph_core::{Error, Result};
use morph_ir::{
    BasicBlock, DefSite, Function, Id, Instruction, InstructionPosition, Module, Opcode, Operand,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Replaces a call with a copy of the callee's body. `result_id_map` gives
/// a fresh id for every label (except the entry label) and every result id
/// in the callee. The call must be directly followed by an unconditional
/// branch, and the callee must return from exactly one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineFunction {
    pub function_call_id: Id,
    pub result_id_map: BTreeMap<Id, Id>,
}

struct CallSite<'a> {
    position: InstructionPosition,
    call: &'a Instruction,
    callee: &'a Function,
    successor: Id,
}

impl InlineFunction {
    fn call_site<'a>(&self, module: &'a Module) -> Option<CallSite<'a>> {
        let Some(DefSite::Body(position)) = module.find_def(self.function_call_id) else {
            return None;
        };
        let block = module.block_at(position.function, position.block)?;
        let call = block.instructions.get(position.index)?;
        if call.opcode != Opcode::FunctionCall || position.index + 2 != block.len() {
            return None;
        }
        let terminator = block.terminator()?;
        if terminator.opcode != Opcode::Branch {
            return None;
        }
        let callee = module.function(call.id_operand(0)?)?;
        Some(CallSite {
            position,
            call,
            callee,
            successor: terminator.id_operand(0)?,
        })
    }

    /// Rewrites a callee id into its caller-side counterpart.
    fn map_id(&self, id: Id, callee: &Function, call: &Instruction, caller_block: Id) -> Id {
        if callee.entry_block().is_some_and(|entry| entry.label == id) {
            return caller_block;
        }
        if let Some(mapped) = self.result_id_map.get(&id) {
            return *mapped;
        }
        match callee.params.iter().position(|param| param.result_id == Some(id)) {
            Some(index) => call.id_operand(index + 1).unwrap_or(id),
            None => id,
        }
    }

    /// Adapts one callee instruction. Returns become a branch to the
    /// successor, preceded by a copy into the call's result id.
    fn adapt(&self, inst: &Instruction, site: &CallSite, caller_block: Id) -> Vec<Instruction> {
        let mut inst = inst.clone();
        inst.map_ids(|id| self.map_id(id, site.callee, site.call, caller_block));
        match inst.opcode {
            Opcode::Return => vec![Instruction::branch(site.successor)],
            Opcode::ReturnValue => {
                let value = inst.id_operand(0).unwrap_or(0);
                vec![
                    Instruction::value(
                        Opcode::CopyObject,
                        site.call.result_type.unwrap_or(0),
                        self.function_call_id,
                        &[value],
                    ),
                    Instruction::branch(site.successor),
                ]
            }
            _ => vec![inst],
        }
    }
}

impl Transform for InlineFunction {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        let fresh: BTreeSet<Id> = self.result_id_map.values().copied().collect();
        if fresh.len() != self.result_id_map.len() || !fresh.iter().all(|id| module.is_fresh_id(*id)) {
            return false;
        }
        let Some(site) = self.call_site(module) else {
            return false;
        };
        let callee = site.callee;
        if callee.id() == module.functions[site.position.function].id() {
            return false;
        }
        if module.is_void_type(callee.return_type()) && module.is_id_used(self.function_call_id) {
            return false;
        }
        let returning_blocks = callee
            .blocks
            .iter()
            .filter(|block| block.terminator().is_some_and(|t| t.opcode.is_return()))
            .count();
        if returning_blocks != 1 {
            return false;
        }
        if callee
            .instructions()
            .any(|inst| matches!(inst.opcode, Opcode::Kill | Opcode::Unreachable))
        {
            return false;
        }
        if callee
            .param_ids()
            .iter()
            .any(|param| self.result_id_map.contains_key(param))
        {
            return false;
        }
        let labels_mapped = callee
            .blocks
            .iter()
            .skip(1)
            .all(|block| self.result_id_map.contains_key(&block.label));
        let results_mapped = callee
            .instructions()
            .filter_map(|inst| inst.result_id)
            .all(|id| self.result_id_map.contains_key(&id));
        labels_mapped && results_mapped
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let site = self
            .call_site(module)
            .ok_or_else(|| Error::invariant(format!("call {} is not inlinable", self.function_call_id)))?;
        let position = site.position;
        let caller_block = module.functions[position.function].blocks[position.block].label;

        let mut hoisted = Vec::new();
        let mut inlined = Vec::new();
        let mut returning_block = caller_block;
        let mut new_blocks = Vec::new();
        for (index, block) in site.callee.blocks.iter().enumerate() {
            let label = self.map_id(block.label, site.callee, site.call, caller_block);
            let mut body = Vec::new();
            for inst in &block.instructions {
                if inst.opcode == Opcode::Variable {
                    // Variables move to the caller's entry block; an
                    // initializer becomes a store at the inlined point.
                    let mut variable = self.adapt(inst, &site, caller_block).remove(0);
                    if let (Some(pointer), Some(init)) = (variable.result_id, variable.id_operand(1)) {
                        variable.operands.truncate(1);
                        body.push(Instruction::new(Opcode::Store).with_id_operands([pointer, init]));
                    }
                    hoisted.push(variable);
                    continue;
                }
                body.extend(self.adapt(inst, &site, caller_block));
            }
            if block.terminator().is_some_and(|t| t.opcode.is_return()) {
                returning_block = label;
            }
            if index == 0 {
                inlined = body;
            } else {
                new_blocks.push(BasicBlock::with_instructions(label, body));
            }
        }

        let successor = site.successor;
        let function = &mut module.functions[position.function];
        let block = &mut function.blocks[position.block];
        block.instructions.truncate(position.index);
        block.instructions.extend(inlined);
        let tail = function.blocks.split_off(position.block + 1);
        function.blocks.extend(new_blocks);
        function.blocks.extend(tail);
        if let Some(entry) = function.blocks.first_mut() {
            for (offset, variable) in hoisted.into_iter().enumerate() {
                entry.instructions.insert(offset, variable);
            }
        }
        if returning_block != caller_block {
            if let Some(target) = function.block_mut(successor) {
                for phi in target.instructions.iter_mut().take_while(|inst| inst.opcode == Opcode::Phi) {
                    for pair in phi.operands.chunks_mut(2) {
                        if pair.get(1) == Some(&Operand::Id(caller_block)) {
                            pair[1] = Operand::Id(returning_block);
                        }
                    }
                }
            }
        }

        for fresh in self.result_id_map.values() {
            module.update_id_bound(*fresh);
        }
        let caller_is_dead = facts.block_is_dead(caller_block);
        for (original, fresh) in &self.result_id_map {
            if facts.id_is_irrelevant(*original) {
                facts.add_fact_id_is_irrelevant(*fresh, module);
            }
            if facts.pointee_value_is_irrelevant(*original) {
                facts.add_fact_value_of_pointee_is_irrelevant(*fresh, module);
            }
            if facts.block_is_dead(*original) || (caller_is_dead && module.find_block(*fresh).is_some()) {
                facts.add_fact_block_is_dead(*fresh, module);
            }
        }
        Ok(())
    }
}
