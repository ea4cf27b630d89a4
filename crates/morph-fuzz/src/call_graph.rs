//! Direct and transitive call relations between functions.

use morph_ir::{Id, Module};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct CallGraph {
    direct_callees: BTreeMap<Id, BTreeSet<Id>>,
}

impl CallGraph {
    pub fn new(module: &Module) -> Self {
        let direct_callees = module
            .functions
            .iter()
            .map(|function| (function.id(), function.callees().into_iter().collect()))
            .collect();
        Self { direct_callees }
    }

    pub fn direct_callees(&self, function_id: Id) -> BTreeSet<Id> {
        self.direct_callees
            .get(&function_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every function reachable through one or more calls from `function_id`.
    pub fn indirect_callees(&self, function_id: Id) -> BTreeSet<Id> {
        let mut result = BTreeSet::new();
        let mut worklist: Vec<Id> = self.direct_callees(function_id).into_iter().collect();
        while let Some(callee) = worklist.pop() {
            if result.insert(callee) {
                worklist.extend(self.direct_callees(callee));
            }
        }
        result
    }

    /// Returns true if a call from `caller` to `callee` would close a cycle.
    pub fn call_would_recurse(&self, caller: Id, callee: Id) -> bool {
        caller == callee || self.indirect_callees(callee).contains(&caller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_ir::{Instruction, ModuleBuilder, Opcode};

    #[test]
    fn test_transitive_callees_block_recursion() {
        // f -> g -> h
        let mut builder = ModuleBuilder::new();
        let void = builder.type_void();
        let fn_ty = builder.type_function(void, &[]);
        let h = builder.begin_function(void, fn_ty);
        builder.block();
        builder.emit(Instruction::return_void());
        let g = builder.begin_function(void, fn_ty);
        builder.block();
        builder.value(Opcode::FunctionCall, void, &[h]);
        builder.emit(Instruction::return_void());
        let f = builder.begin_function(void, fn_ty);
        builder.block();
        builder.value(Opcode::FunctionCall, void, &[g]);
        builder.emit(Instruction::return_void());
        let module = builder.build();

        let graph = CallGraph::new(&module);
        assert_eq!(graph.indirect_callees(f), BTreeSet::from([g, h]));
        assert!(graph.call_would_recurse(h, f));
        assert!(graph.call_would_recurse(g, g));
        assert!(!graph.call_would_recurse(f, h));
    }
}
