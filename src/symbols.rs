//! Symbols exposed to the surrounding tool
//!
//! The resolver answers queries with materialized symbol values rather
//! than references into its tables, so callers can hold on to them
//! across events. A symbol exposes at minimum its name; richer
//! accessors (address range, owning function, type) are extension
//! points beyond that minimum.

use crate::dwarf::index::{FunctionEntry, VarEntry};

/// Minimum contract of anything the resolver hands out.
pub trait Symbol {
    fn name(&self) -> &str;
}

/// A resolved function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSymbol {
    name: String,
    unique_id: String,
    low_pc: u64,
    high_pc: u64,
}

impl FunctionSymbol {
    pub(crate) fn from_entry(entry: &FunctionEntry) -> Self {
        Self {
            name: entry.name.clone(),
            unique_id: entry.unique_id.clone(),
            low_pc: entry.low_pc,
            high_pc: entry.high_pc,
        }
    }

    /// Stable identity, distinct even for same-named static functions.
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// `[low_pc, high_pc)` address range of the function body.
    pub fn address_range(&self) -> (u64, u64) {
        (self.low_pc, self.high_pc)
    }
}

impl Symbol for FunctionSymbol {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A resolved variable or formal parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSymbol {
    name: String,
    function_id: String,
    type_name: String,
    type_size: u64,
}

impl VariableSymbol {
    pub(crate) fn from_entry(entry: &VarEntry) -> Self {
        Self {
            name: entry.name.clone(),
            function_id: entry.function_id.clone(),
            type_name: entry.ty.name.clone(),
            type_size: entry.ty.size,
        }
    }

    /// Unique id of the owning function; `None` for globals.
    pub fn owning_function_id(&self) -> Option<&str> {
        if self.function_id.is_empty() {
            None
        } else {
            Some(&self.function_id)
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn type_size(&self) -> u64 {
        self.type_size
    }
}

impl Symbol for VariableSymbol {
    fn name(&self) -> &str {
        &self.name
    }
}
