//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

use std::collections::BTreeMap;

use varscope::dwarf::index::{DieOffset, FunctionEntry, TypeEntry, TypeKind, VarEntry};
use varscope::dwarf::machine::{LocationScript, Operation};

/// x86-64 frame-pointer register in the DWARF numbering
pub const RBP: u16 = 6;

pub fn op(opcode: gimli::DwOp, operand1: u64, byte_offset: u64) -> Operation {
    Operation {
        opcode: opcode.0,
        operand1,
        operand2: 0,
        byte_offset,
    }
}

pub fn everywhere(ops: Vec<Operation>) -> Vec<LocationScript> {
    vec![LocationScript::everywhere(ops)]
}

pub fn int_type() -> TypeEntry {
    TypeEntry {
        kind: TypeKind::Base,
        name: "int".to_string(),
        size: 4,
        base_type_offset: 0,
        base_type: None,
        upper_bound: 0,
    }
}

/// Builder for test FunctionEntry values
pub struct FunctionBuilder {
    function: FunctionEntry,
    next_local: DieOffset,
}

impl FunctionBuilder {
    pub fn new(name: &str, low_pc: u64, high_pc: u64) -> Self {
        Self {
            function: FunctionEntry {
                name: name.to_string(),
                unique_id: format!("{}_{:x}", name, low_pc),
                low_pc,
                high_pc,
                frame_base: everywhere(vec![op(gimli::DW_OP_breg6, 0, 0)]),
                ..Default::default()
            },
            next_local: 0x1000,
        }
    }

    /// Add a frame-relative local of type offset 0x10.
    pub fn frame_local(mut self, name: &str, offset: i64) -> Self {
        let entry = VarEntry {
            name: name.to_string(),
            function_id: self.function.unique_id.clone(),
            type_offset: 0x10,
            location: everywhere(vec![op(gimli::DW_OP_fbreg, offset as u64, 0)]),
            has_location: true,
            ..Default::default()
        };
        self.function.locals.insert(self.next_local, entry);
        self.next_local += 0x10;
        self
    }

    pub fn build(self) -> FunctionEntry {
        self.function
    }
}

/// A type table containing only `int` at offset 0x10.
pub fn int_only_types() -> BTreeMap<DieOffset, TypeEntry> {
    let mut types = BTreeMap::new();
    types.insert(0x10, int_type());
    types
}

/// A global of type `int` whose location is a fixed address.
pub fn addr_global(name: &str, address: u64) -> VarEntry {
    VarEntry {
        name: name.to_string(),
        type_offset: 0x10,
        location: everywhere(vec![op(gimli::DW_OP_addr, address, 0)]),
        has_location: true,
        ..Default::default()
    }
}
