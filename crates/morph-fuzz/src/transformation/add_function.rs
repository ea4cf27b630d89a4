use super::{ensure_applicable, Transform};
use crate::fact_manager::FactManager;
use crate::util::function_is_livesafe_candidate;
use morph_core::Result;
use morph_ir::{Function, Module, StructuralValidator, Validator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Adds a complete function. A livesafe function may later be called
/// from live code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddFunction {
    pub function: Function,
    pub is_livesafe: bool,
}

impl AddFunction {
    fn with_function_added(&self, module: &Module) -> Module {
        let mut extended = module.clone();
        extended.functions.push(self.function.clone());
        for id in self.function.defined_ids() {
            extended.update_id_bound(id);
        }
        extended
    }
}

impl Transform for AddFunction {
    fn is_applicable(&self, module: &Module, facts: &FactManager) -> bool {
        let ids = self.function.defined_ids();
        let distinct: BTreeSet<_> = ids.iter().copied().collect();
        if distinct.len() != ids.len() || !ids.iter().all(|id| module.is_fresh_id(*id)) {
            return false;
        }
        let extended = self.with_function_added(module);
        if StructuralValidator.validate(&extended).is_err() {
            return false;
        }
        !self.is_livesafe || function_is_livesafe_candidate(&extended, facts, self.function.id())
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        *module = self.with_function_added(module);
        if self.is_livesafe {
            facts.add_fact_function_is_livesafe(self.function.id(), module);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_ir::{samples, Instruction, ModuleBuilder, Opcode, TypeKey};

    /// Builds `int f(int a) { return a + 1; }` with ids starting at the
    /// module's bound.
    fn increment_function(module: &Module) -> Function {
        let int = module.find_type(&TypeKey::Int { width: 32, signed: true }).unwrap();
        let fn_ty = module
            .find_type(&TypeKey::Function {
                return_type: int,
                params: vec![int, int],
            })
            .unwrap();
        let one = module.find_scalar_constant(int, &[1]).unwrap();
        let mut b = ModuleBuilder::starting_at(module.id_bound);
        let id = b.begin_function(int, fn_ty);
        let a = b.param(int);
        b.param(int);
        b.block();
        let sum = b.value(Opcode::IAdd, int, &[a, one]);
        b.emit(Instruction::return_value(sum));
        b.end_function();
        let built = b.build();
        let function = built.functions.into_iter().next().unwrap();
        assert_eq!(function.id(), id);
        function
    }

    #[test]
    fn test_add_livesafe_function() {
        let mut module = samples::arithmetic_module();
        let mut facts = FactManager::new();
        let t = AddFunction {
            function: increment_function(&module),
            is_livesafe: true,
        };
        assert!(t.is_applicable(&module, &facts));
        t.apply(&mut module, &mut facts).unwrap();
        assert!(facts.function_is_livesafe(t.function.id()));
        assert!(StructuralValidator.is_valid(&module));
        // Ids are no longer fresh.
        assert!(!t.is_applicable(&module, &facts));
    }

    #[test]
    fn test_reject_invalid_body() {
        let module = samples::arithmetic_module();
        let mut function = increment_function(&module);
        function.blocks[0].instructions.pop();
        let t = AddFunction {
            function,
            is_livesafe: false,
        };
        assert!(!t.is_applicable(&module, &FactManager::new()));
    }
}
