//! Control-flow and dominance analyses over a single function.

use crate::instruction::Id;
use crate::module::Function;
use std::collections::HashMap;

/// Successor and predecessor relation between the blocks of a function.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    entry: Option<Id>,
    successors: HashMap<Id, Vec<Id>>,
    predecessors: HashMap<Id, Vec<Id>>,
    reverse_post_order: Vec<Id>,
}

impl ControlFlowGraph {
    pub fn new(function: &Function) -> Self {
        let mut successors: HashMap<Id, Vec<Id>> = HashMap::new();
        let mut predecessors: HashMap<Id, Vec<Id>> = HashMap::new();
        for block in &function.blocks {
            predecessors.entry(block.label).or_default();
        }
        for block in &function.blocks {
            let mut targets = block.successors();
            targets.dedup();
            targets.retain(|target| function.block(*target).is_some());
            for target in &targets {
                let preds = predecessors.entry(*target).or_default();
                if !preds.contains(&block.label) {
                    preds.push(block.label);
                }
            }
            successors.insert(block.label, targets);
        }

        let entry = function.entry_block().map(|block| block.label);
        let reverse_post_order = entry
            .map(|entry| Self::compute_reverse_post_order(entry, &successors))
            .unwrap_or_default();

        Self {
            entry,
            successors,
            predecessors,
            reverse_post_order,
        }
    }

    fn compute_reverse_post_order(entry: Id, successors: &HashMap<Id, Vec<Id>>) -> Vec<Id> {
        let mut visited = vec![entry];
        let mut post_order = Vec::new();
        let mut stack: Vec<(Id, usize)> = vec![(entry, 0)];

        while let Some((label, next)) = stack.pop() {
            let succs = successors.get(&label).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&succ) = succs.get(next) {
                stack.push((label, next + 1));
                if !visited.contains(&succ) {
                    visited.push(succ);
                    stack.push((succ, 0));
                }
            } else {
                post_order.push(label);
            }
        }

        post_order.reverse();
        post_order
    }

    pub fn entry(&self) -> Option<Id> {
        self.entry
    }

    pub fn successors(&self, label: Id) -> &[Id] {
        self.successors.get(&label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, label: Id) -> &[Id] {
        self.predecessors.get(&label).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reachable blocks in reverse post-order, starting at the entry.
    pub fn reverse_post_order(&self) -> &[Id] {
        &self.reverse_post_order
    }

    pub fn is_reachable(&self, label: Id) -> bool {
        self.reverse_post_order.contains(&label)
    }
}

/// Dominator tree of a function, computed with the iterative algorithm of
/// Cooper, Harvey and Kennedy. Unreachable blocks dominate nothing and are
/// dominated by nothing.
#[derive(Debug, Clone)]
pub struct DominatorAnalysis {
    cfg: ControlFlowGraph,
    idom: HashMap<Id, Id>,
    order: HashMap<Id, usize>,
}

impl DominatorAnalysis {
    pub fn new(function: &Function) -> Self {
        let cfg = ControlFlowGraph::new(function);
        let order: HashMap<Id, usize> = cfg
            .reverse_post_order()
            .iter()
            .enumerate()
            .map(|(index, label)| (*label, index))
            .collect();

        let mut idom: HashMap<Id, Id> = HashMap::new();
        if let Some(entry) = cfg.entry() {
            idom.insert(entry, entry);
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &block in cfg.reverse_post_order().iter().skip(1) {
                let mut new_idom: Option<Id> = None;
                for &pred in cfg.predecessors(block) {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => Self::intersect(&idom, &order, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        Self { cfg, idom, order }
    }

    fn intersect(idom: &HashMap<Id, Id>, order: &HashMap<Id, usize>, mut a: Id, mut b: Id) -> Id {
        while a != b {
            while order[&a] > order[&b] {
                a = idom[&a];
            }
            while order[&b] > order[&a] {
                b = idom[&b];
            }
        }
        a
    }

    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    pub fn is_reachable(&self, label: Id) -> bool {
        self.order.contains_key(&label)
    }

    /// Immediate dominator; `None` for the entry and unreachable blocks.
    pub fn immediate_dominator(&self, label: Id) -> Option<Id> {
        self.idom
            .get(&label)
            .copied()
            .filter(|idom| *idom != label)
    }

    /// Returns true if every path from the entry to `b` passes through `a`.
    pub fn dominates(&self, a: Id, b: Id) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    pub fn strictly_dominates(&self, a: Id, b: Id) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Dominance between instruction slots given as (block label, index).
    /// Within a block, an earlier slot dominates a later one.
    pub fn instruction_dominates(&self, def: (Id, usize), use_site: (Id, usize)) -> bool {
        if def.0 == use_site.0 {
            self.is_reachable(def.0) && def.1 < use_site.1
        } else {
            self.strictly_dominates(def.0, use_site.0)
        }
    }

    /// An edge is a back edge if its target dominates its source.
    pub fn is_back_edge(&self, from: Id, to: Id) -> bool {
        self.dominates(to, from)
    }
}
