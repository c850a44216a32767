//! # varscope: runtime symbol resolution from DWARF debug info
//!
//! A symbolic layer for dynamic-analysis tools: given a memory access
//! observed during execution, it answers "which source variable is
//! this?". At load time the [`dwarf::index::DwarfIndexer`] parses a
//! binary's debug information once into immutable tables of types,
//! global variables and functions. At runtime the
//! [`dwarf::resolver::DwarfSymbolResolver`] combines those tables with
//! the [`dwarf::machine`] location-expression interpreter and live
//! call-stack state to resolve raw (address, size) pairs back to
//! symbols, including picking the currently-live local among recursive
//! invocations that reuse the same stack-relative storage.
//!
//! ## Architecture
//!
//! - **Indexing**: one synchronous pass over the DWARF entry tree per
//!   compilation unit, then an indirect-type resolution post-pass
//! - **Evaluation**: a per-query stack machine over decoded location
//!   expressions, driven by the execution state of the target
//! - **Resolution**: layered global / local / shadow-cache lookup, with
//!   call and return hooks maintaining per-thread call-stack state
//!
//! The host instrumentation engine supplies target state through the
//! [`context::ExecutionContext`] trait; this crate never touches the
//! target directly.
//!
//! ## Example
//!
//! ```no_run
//! use varscope::dwarf::resolver::DwarfSymbolResolver;
//! use varscope::mock_context::MockContext;
//! use varscope::symbols::Symbol;
//!
//! # fn main() -> varscope::error::Result<()> {
//! let image = std::fs::read("target-binary")?;
//! let resolver = DwarfSymbolResolver::from_elf_bytes(&image)?;
//!
//! // Delivered by the instrumentation engine on each call/return/access:
//! let ctx = MockContext::new().with_instruction_pointer(0x1000);
//! resolver.enter_function(&ctx, 0x1000)?;
//! if let Some(symbol) = resolver.resolve_variable(&ctx, 0x7fff_0000, 4) {
//!     println!("access hits {}", symbol.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod dwarf;
pub mod error;
pub mod mock_context;
pub mod symbols;

pub use config::ResolverConfig;
pub use context::{ExecutionContext, RegisterId, ThreadId};
pub use dwarf::index::DwarfIndexer;
pub use dwarf::resolver::DwarfSymbolResolver;
pub use error::{Result, VarScopeError};
pub use symbols::{FunctionSymbol, Symbol, VariableSymbol};
