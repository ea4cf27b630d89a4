//! Donation: copies the declarations and functions of another module into
//! the one being fuzzed, under fresh ids.
//!
//! Donated globals become private variables with irrelevant values, so
//! nothing the donated code reads or writes can leak into the recipient's
//! behavior. Donated functions are only ever reached through calls added
//! later, from dead blocks unless they turn out to be livesafe.

use super::{FuzzerPass, PassContext};
use crate::transformation::{AddFunction, AddGlobalVariable};
use morph_core::{Chance, Result};
use morph_ir::{function_control, Function, Id, Instruction, Module, Opcode, Operand, StorageClass, TypeKey};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub struct DonateModules {
    donors: Vec<Module>,
}

impl DonateModules {
    pub fn new(donors: Vec<Module>) -> Self {
        Self { donors }
    }
}

impl FuzzerPass for DonateModules {
    fn name(&self) -> &'static str {
        "donate_modules"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        if !pass.context.roll(Chance::DonatingAdditionalModule) {
            return Ok(());
        }
        let Some(donor) = pass.context.choose(&self.donors) else {
            return Ok(());
        };
        let mut donation = Donation::default();
        for inst in &donor.globals {
            donation.donate_global(pass, inst)?;
        }
        for index in callee_first_order(donor) {
            donation.donate_function(pass, &donor.functions[index])?;
        }
        debug!(
            mapped_ids = donation.id_map.len(),
            functions = donation.functions_added,
            "module donated"
        );
        Ok(())
    }
}

/// Donor function indices ordered so every function comes after the
/// functions it calls. Functions on call cycles are left out.
fn callee_first_order(donor: &Module) -> Vec<usize> {
    let mut order = Vec::new();
    let mut placed = BTreeSet::new();
    loop {
        let before = order.len();
        for (index, function) in donor.functions.iter().enumerate() {
            if placed.contains(&function.id()) {
                continue;
            }
            if function.callees().iter().all(|callee| placed.contains(callee)) {
                placed.insert(function.id());
                order.push(index);
            }
        }
        if order.len() == before {
            return order;
        }
    }
}

#[derive(Default)]
struct Donation {
    /// Donor id to recipient id. Donor ids missing here could not be
    /// donated, and neither can anything that uses them.
    id_map: BTreeMap<Id, Id>,
    functions_added: usize,
}

impl Donation {
    fn map(&self, id: Id) -> Option<Id> {
        self.id_map.get(&id).copied()
    }

    /// Rewrites a donor type in terms of recipient ids. Pointers into any
    /// storage other than function-local memory become private pointers.
    fn remap_type(&self, key: TypeKey) -> Option<TypeKey> {
        Some(match key {
            TypeKey::Vector { component, count } => TypeKey::Vector {
                component: self.map(component)?,
                count,
            },
            TypeKey::Array { element, length } => TypeKey::Array {
                element: self.map(element)?,
                length,
            },
            TypeKey::Struct { members } => TypeKey::Struct {
                members: members.into_iter().map(|id| self.map(id)).collect::<Option<_>>()?,
            },
            TypeKey::Pointer { storage, pointee } => TypeKey::Pointer {
                storage: match storage {
                    StorageClass::Function => StorageClass::Function,
                    _ => StorageClass::Private,
                },
                pointee: self.map(pointee)?,
            },
            TypeKey::Function { return_type, params } => TypeKey::Function {
                return_type: self.map(return_type)?,
                params: params.into_iter().map(|id| self.map(id)).collect::<Option<_>>()?,
            },
            scalar => scalar,
        })
    }

    fn donate_global(&mut self, pass: &mut PassContext<'_>, inst: &Instruction) -> Result<()> {
        let Some(donor_id) = inst.result_id else {
            return Ok(());
        };
        let recipient_id = if inst.opcode.is_type_declaration() {
            self.donate_type(pass, inst)?
        } else if inst.opcode.is_constant() {
            self.donate_constant(pass, inst)?
        } else if inst.opcode == Opcode::Variable {
            self.donate_global_variable(pass, inst)?
        } else {
            None
        };
        if let Some(recipient_id) = recipient_id {
            self.id_map.insert(donor_id, recipient_id);
        }
        Ok(())
    }

    fn donate_type(&self, pass: &mut PassContext<'_>, inst: &Instruction) -> Result<Option<Id>> {
        let Some(key) = TypeKey::from_instruction(inst).and_then(|key| self.remap_type(key)) else {
            return Ok(None);
        };
        if key == TypeKey::Void {
            return Ok(pass.module.find_type(&TypeKey::Void));
        }
        pass.find_or_create_type(key)
    }

    fn donate_constant(&self, pass: &mut PassContext<'_>, inst: &Instruction) -> Result<Option<Id>> {
        let Some(type_id) = inst.result_type.and_then(|ty| self.map(ty)) else {
            return Ok(None);
        };
        let id = match inst.opcode {
            Opcode::ConstantTrue => Some(pass.find_or_create_bool_constant(true)?),
            Opcode::ConstantFalse => Some(pass.find_or_create_bool_constant(false)?),
            Opcode::Constant => {
                let words = inst.operands.iter().filter_map(Operand::as_literal).collect();
                Some(pass.find_or_create_scalar_constant(type_id, words)?)
            }
            Opcode::ConstantComposite => {
                let Some(constituents) = inst.id_operands().map(|id| self.map(id)).collect::<Option<Vec<_>>>()
                else {
                    return Ok(None);
                };
                Some(pass.find_or_create_composite_constant(type_id, constituents)?)
            }
            Opcode::ConstantNull | Opcode::Undef => pass.find_or_create_zero_constant(type_id)?,
            _ => None,
        };
        Ok(id)
    }

    fn donate_global_variable(&self, pass: &mut PassContext<'_>, inst: &Instruction) -> Result<Option<Id>> {
        let Some(type_id) = inst.result_type.and_then(|ty| self.map(ty)) else {
            return Ok(None);
        };
        let Some((_, pointee)) = pass.module.pointee_type(type_id) else {
            return Ok(None);
        };
        let initializer = match inst.id_operand(1).and_then(|init| self.map(init)) {
            Some(init) => Some(init),
            None => pass.find_or_create_zero_constant(pointee)?,
        };
        let fresh_id = pass.context.fresh_id();
        let added = pass.maybe_apply(AddGlobalVariable {
            fresh_id,
            type_id,
            initializer_id: initializer,
            value_is_irrelevant: true,
        })?;
        Ok(added.then_some(fresh_id))
    }

    fn donate_function(&mut self, pass: &mut PassContext<'_>, donor: &Function) -> Result<()> {
        let mut local = self.id_map.clone();
        for id in donor.defined_ids() {
            local.insert(id, pass.context.fresh_id());
        }
        let instructions = std::iter::once(&donor.def)
            .chain(&donor.params)
            .chain(donor.instructions());
        let mut referenced = instructions.flat_map(|inst| inst.result_type.into_iter().chain(inst.id_operands()));
        if !referenced.all(|id| local.contains_key(&id)) {
            debug!(function = donor.id(), "function refers to ids that could not be donated");
            return Ok(());
        }

        let remap = |id: Id| local.get(&id).copied().unwrap_or(id);
        let mut function = donor.clone();
        function.def.map_ids(remap);
        if let Some(control) = function.def.operands.first_mut() {
            *control = Operand::Literal(function_control::NONE);
        }
        for param in &mut function.params {
            param.map_ids(remap);
        }
        for block in &mut function.blocks {
            block.label = remap(block.label);
            for inst in &mut block.instructions {
                inst.map_ids(remap);
            }
        }

        let livesafe = AddFunction {
            function: function.clone(),
            is_livesafe: true,
        };
        let added = pass.maybe_apply(livesafe)?
            || pass.maybe_apply(AddFunction {
                function,
                is_livesafe: false,
            })?;
        if added {
            self.id_map.insert(donor.id(), remap(donor.id()));
            self.functions_added += 1;
        }
        Ok(())
    }
}
