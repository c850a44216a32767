//! DWARF symbolic core
//!
//! This module group reconstructs a queryable model of a binary's
//! source-level types, variables and functions from its DWARF debug
//! information, and resolves raw runtime (address, size) pairs back to
//! symbols while the target executes.
//!
//! # Components
//!
//! - [`walker`] - materializes the sibling/child tree of debug-info
//!   entries for one compilation unit
//! - [`index`] - walks the tree and builds cross-referenced tables of
//!   types, global variables and functions with nested locals
//! - [`machine`] - a stack interpreter for the location-expression
//!   bytecode that describes where a variable lives at a given point in
//!   execution
//! - [`resolver`] - combines the tables, the machine and live call-stack
//!   state to answer address-to-symbol queries
//!
//! Indexing runs once at load time and the resulting tables are immutable
//! afterwards; only the resolver's per-thread call-stack state changes at
//! runtime.

pub mod index;
pub mod machine;
pub mod resolver;
pub mod walker;

/// Concrete gimli reader used throughout the indexer.
pub type Reader<'a> = gimli::EndianSlice<'a, gimli::RunTimeEndian>;
