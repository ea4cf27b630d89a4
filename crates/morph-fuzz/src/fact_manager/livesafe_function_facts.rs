use morph_ir::{Id, Module};
use std::collections::BTreeSet;

/// Functions that always terminate, never trap and only write memory they
/// own or memory whose value is irrelevant, so they can be called from
/// live code.
#[derive(Debug, Clone, Default)]
pub struct LivesafeFunctionFacts {
    livesafe: BTreeSet<Id>,
}

impl LivesafeFunctionFacts {
    pub fn add_fact(&mut self, function_id: Id, module: &Module) -> bool {
        if module.function(function_id).is_none() {
            return false;
        }
        self.livesafe.insert(function_id);
        true
    }

    pub fn function_is_livesafe(&self, function_id: Id) -> bool {
        self.livesafe.contains(&function_id)
    }
}
