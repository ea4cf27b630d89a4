use morph_ir::{Id, Module};
use std::collections::BTreeSet;

/// Blocks that are never executed.
#[derive(Debug, Clone, Default)]
pub struct DeadBlockFacts {
    dead_blocks: BTreeSet<Id>,
}

impl DeadBlockFacts {
    pub fn add_fact(&mut self, block_id: Id, module: &Module) -> bool {
        if module.find_block(block_id).is_none() {
            return false;
        }
        self.dead_blocks.insert(block_id);
        true
    }

    pub fn block_is_dead(&self, block_id: Id) -> bool {
        self.dead_blocks.contains(&block_id)
    }

    pub fn dead_blocks(&self) -> impl Iterator<Item = Id> + '_ {
        self.dead_blocks.iter().copied()
    }
}
