//! Ids whose values, or whose pointees' values, do not affect the result
//! of the module.

use morph_ir::{Id, Module};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct IrrelevantValueFacts {
    irrelevant_ids: BTreeSet<Id>,
    irrelevant_pointees: BTreeSet<Id>,
}

impl IrrelevantValueFacts {
    /// Pointers cannot be irrelevant themselves; use a pointee fact.
    pub fn add_id_is_irrelevant(&mut self, id: Id, module: &Module) -> bool {
        match module.type_of(id) {
            Some(ty) if !module.is_pointer_type(ty) => {
                self.irrelevant_ids.insert(id);
                true
            }
            _ => false,
        }
    }

    pub fn add_pointee_value_is_irrelevant(&mut self, pointer_id: Id, module: &Module) -> bool {
        match module.type_of(pointer_id) {
            Some(ty) if module.is_pointer_type(ty) => {
                self.irrelevant_pointees.insert(pointer_id);
                true
            }
            _ => false,
        }
    }

    pub fn id_is_irrelevant(&self, id: Id) -> bool {
        self.irrelevant_ids.contains(&id)
    }

    pub fn pointee_value_is_irrelevant(&self, pointer_id: Id) -> bool {
        self.irrelevant_pointees.contains(&pointer_id)
    }

    pub fn irrelevant_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.irrelevant_ids.iter().copied()
    }
}
