//! Error handling for the varscope library
//!
//! This module defines the crate-wide error type and a `Result` alias.
//! The taxonomy mirrors the failure layers of the resolver: structural
//! debug-info problems, location-expression evaluation failures, and
//! execution-context (live target) failures. "Not found" lookup outcomes
//! are not errors and are modelled as `Option` by the resolver API.

use thiserror::Error;

use crate::dwarf::machine::EvalError;

/// Main error type for varscope operations
#[derive(Error, Debug)]
pub enum VarScopeError {
    /// Errors from the DWARF reader while iterating units or attributes
    #[error("DWARF error: {0}")]
    Dwarf(#[from] gimli::Error),

    /// Errors from parsing the container object file
    #[error("object parsing error: {0}")]
    Object(#[from] object::Error),

    /// Malformed or missing debug information that could not be recovered
    #[error("malformed debug info: {0}")]
    DebugInfo(String),

    /// A location expression terminated in the failed state
    #[error("location evaluation failed: {0}")]
    Evaluation(#[from] EvalError),

    /// The execution context could not read or write a register
    #[error("register {0} unavailable in execution context")]
    Register(u16),

    /// The execution context could not access target memory
    #[error("memory access error at address 0x{address:08X}: {message}")]
    MemoryAccess { address: u64, message: String },

    /// The execution context could not supply an instruction pointer
    #[error("instruction pointer unavailable")]
    InstructionPointer,

    /// A call/return event referenced an address outside every indexed
    /// function
    #[error("no function indexed at address 0x{0:08X}")]
    UnknownFunction(u64),

    /// Errors related to configuration loading/saving
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for varscope operations
pub type Result<T> = std::result::Result<T, VarScopeError>;
