use super::{ensure_applicable, Transform};
use crate::fact_manager::FactManager;
use morph_core::{Error, Result};
use morph_ir::{Id, Module, Operand, TypeKey};
use serde::{Deserialize, Serialize};

/// Reorders a function's parameters and the arguments of every call to
/// it. Position `i` of the new list holds old parameter `permutation[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermuteFunctionParameters {
    pub function_id: Id,
    pub new_type_id: Id,
    pub permutation: Vec<u32>,
}

impl PermuteFunctionParameters {
    fn is_permutation(&self, len: usize) -> bool {
        let mut seen = vec![false; len];
        self.permutation.len() == len
            && self.permutation.iter().all(|i| {
                let i = *i as usize;
                i < len && !std::mem::replace(&mut seen[i], true)
            })
    }

    fn permute<T: Clone>(&self, items: &[T]) -> Vec<T> {
        self.permutation.iter().map(|i| items[*i as usize].clone()).collect()
    }
}

impl Transform for PermuteFunctionParameters {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        if module.is_entry_point(self.function_id) {
            return false;
        }
        let Some(function) = module.function(self.function_id) else {
            return false;
        };
        if !self.is_permutation(function.params.len()) {
            return false;
        }
        let param_types: Vec<Id> = function.params.iter().map(|p| p.result_type.unwrap_or(0)).collect();
        let expected = TypeKey::Function {
            return_type: function.return_type(),
            params: self.permute(&param_types),
        };
        module.type_key(self.new_type_id) == Some(expected)
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let call_sites = module.call_sites(self.function_id);
        let function = module
            .function_mut(self.function_id)
            .ok_or_else(|| Error::invariant(format!("function {} vanished", self.function_id)))?;
        function.params = self.permute(&function.params);
        function.def.operands[1] = Operand::Id(self.new_type_id);

        for site in call_sites {
            let call = module
                .instruction_at_mut(site)
                .ok_or_else(|| Error::invariant("call site vanished"))?;
            let args = self.permute(&call.operands[1..]);
            call.operands.truncate(1);
            call.operands.extend(args);
        }
        Ok(())
    }
}
