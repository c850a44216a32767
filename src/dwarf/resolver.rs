//! Runtime symbol resolver
//!
//! Combines the indexer's static tables with the location-expression
//! machine and live call-stack state to answer address-to-symbol queries
//! during execution.
//!
//! The static tables are built once and never change; they may be shared
//! across threads freely. The dynamic state - the current-function marker
//! and the shadow cache that tracks which variable claims each stack byte
//! across nested invocations - is partitioned per instrumented target
//! thread and mutated only by the call/return hooks.
//!
//! Resolution is best-effort and layered: globals first, then the current
//! function's locals, then the shadow cache. A layer that finds nothing
//! is an ordinary negative result, not an error; only the final "no
//! symbol" outcome is reported to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::config::ResolverConfig;
use crate::context::{ExecutionContext, ThreadId};
use crate::dwarf::index::{DieOffset, DwarfIndexer, FunctionEntry, VarEntry};
use crate::dwarf::machine::{self, VarLocation};
use crate::error::{Result, VarScopeError};
use crate::symbols::{FunctionSymbol, VariableSymbol};

/// Precomputed per-function index from instruction address to the locals
/// whose location-validity range covers that address, plus a wildcard
/// bucket for locals valid everywhere. Exists to turn the per-query scan
/// over (variables x ranges) into an O(1) average lookup.
#[derive(Debug, Default, Clone)]
struct RelevanceMap {
    by_pc: HashMap<u64, Vec<DieOffset>>,
    always: Vec<DieOffset>,
}

impl RelevanceMap {
    fn build(function: &FunctionEntry) -> Self {
        let mut map = Self::default();
        for (offset, ve) in &function.locals {
            if !ve.has_location {
                continue;
            }
            let mut always = false;
            for script in &ve.location {
                if script.low_pc == 0 && (script.high_pc == 0 || script.high_pc == u64::MAX) {
                    always = true;
                } else {
                    for pc in script.low_pc..script.high_pc {
                        map.by_pc.entry(pc).or_default().push(*offset);
                    }
                }
            }
            if always {
                map.always.push(*offset);
            }
        }
        map
    }

    fn candidates(&self, pc: u64) -> impl Iterator<Item = DieOffset> + '_ {
        self.by_pc
            .get(&pc)
            .into_iter()
            .flatten()
            .chain(self.always.iter())
            .copied()
    }
}

/// Call-stack state of one instrumented target thread.
#[derive(Debug, Default)]
struct ThreadState {
    current_function: Option<DieOffset>,
    /// Per occupied byte, the stack of variables that have claimed it
    /// across nested invocations.
    shadow: HashMap<u64, Vec<VarEntry>>,
}

/// Resolves runtime (address, size) pairs back to symbols.
pub struct DwarfSymbolResolver {
    indexer: DwarfIndexer,
    relevance: HashMap<String, RelevanceMap>,
    pointer_width: u8,
    shadow_enabled: bool,
    threads: Mutex<HashMap<ThreadId, ThreadState>>,
    function_symbols: RwLock<HashMap<String, Arc<FunctionSymbol>>>,
    variable_symbols: RwLock<HashMap<(String, String), Arc<VariableSymbol>>>,
}

impl DwarfSymbolResolver {
    /// Build a resolver over an indexer's tables with default settings.
    pub fn new(indexer: DwarfIndexer) -> Self {
        Self::with_config(indexer, &ResolverConfig::default())
    }

    /// Build a resolver over an indexer's tables.
    pub fn with_config(indexer: DwarfIndexer, config: &ResolverConfig) -> Self {
        let relevance = indexer
            .functions()
            .values()
            .map(|fe| (fe.unique_id.clone(), RelevanceMap::build(fe)))
            .collect();
        let pointer_width = config.effective_pointer_width(indexer.pointer_width());

        Self {
            indexer,
            relevance,
            pointer_width,
            shadow_enabled: config.shadow_cache,
            threads: Mutex::new(HashMap::new()),
            function_symbols: RwLock::new(HashMap::new()),
            variable_symbols: RwLock::new(HashMap::new()),
        }
    }

    /// Index an ELF image and build a resolver over it.
    pub fn from_elf_bytes(data: &[u8]) -> Result<Self> {
        Ok(Self::new(DwarfIndexer::from_elf_bytes(data)?))
    }

    pub fn indexer(&self) -> &DwarfIndexer {
        &self.indexer
    }

    /// Find the function whose `[low_pc, high_pc)` range contains the
    /// address.
    pub fn find_function(&self, address: u64) -> Option<&FunctionEntry> {
        self.indexer
            .functions()
            .values()
            .find(|fe| fe.contains_address(address))
    }

    fn find_function_with_key(&self, address: u64) -> Option<(DieOffset, &FunctionEntry)> {
        self.indexer
            .functions()
            .iter()
            .find(|(_, fe)| fe.contains_address(address))
            .map(|(offset, fe)| (*offset, fe))
    }

    /// Find the global variable whose storage contains the whole queried
    /// `[address, address + size)` range.
    pub fn find_global_variable(
        &self,
        context: &dyn ExecutionContext,
        address: u64,
        size: u64,
    ) -> Option<VarEntry> {
        for ve in self.indexer.global_variables().values() {
            if !ve.has_location {
                continue;
            }
            match machine::evaluate_address(context, &ve.location, None, self.pointer_width) {
                Ok(VarLocation::Address(var_addr)) => {
                    if range_contains(var_addr, ve.ty.size, address, size) {
                        return Some(ve.clone());
                    }
                }
                Ok(VarLocation::Register(_)) => {
                    debug!(variable = %ve.name, "global lives in a register");
                }
                Err(error) => {
                    debug!(variable = %ve.name, %error, "global location did not evaluate");
                }
            }
        }
        None
    }

    /// Find the local of `function` whose storage contains the whole
    /// queried range, using the function's relevance map keyed by the
    /// current instruction pointer to shrink the candidate set.
    pub fn find_local_variable(
        &self,
        context: &dyn ExecutionContext,
        address: u64,
        size: u64,
        function: &FunctionEntry,
    ) -> Option<VarEntry> {
        let map = self.relevance.get(&function.unique_id)?;
        let pc = context.get_instruction_pointer().ok()?;

        for offset in map.candidates(pc) {
            let Some(ve) = function.locals.get(&offset) else {
                continue;
            };
            match machine::evaluate_address(context, &ve.location, Some(function), self.pointer_width)
            {
                Ok(VarLocation::Address(var_addr)) => {
                    if range_contains(var_addr, ve.ty.size, address, size) {
                        return Some(ve.clone());
                    }
                }
                Ok(VarLocation::Register(_)) => {
                    // Register-resident locals are an expected outcome,
                    // not an error; they simply cannot match an address.
                    debug!(variable = %ve.name, "local is register-resident at this pc");
                }
                Err(error) => {
                    debug!(variable = %ve.name, %error, "local location did not evaluate");
                }
            }
        }
        None
    }

    /// Record a call event: the target address becomes the thread's
    /// current function. The previous current function's live locals are
    /// snapshotted into the shadow cache first, one entry per occupied
    /// byte, so they stay resolvable while shadowed by the new frame.
    pub fn enter_function(&self, context: &dyn ExecutionContext, address: u64) -> Result<()> {
        let (offset, function) = self
            .find_function_with_key(address)
            .ok_or(VarScopeError::UnknownFunction(address))?;

        let mut threads = self.lock_threads();
        let state = threads.entry(context.thread_id()).or_default();

        if self.shadow_enabled {
            if let Some(previous) = state
                .current_function
                .and_then(|key| self.indexer.functions().get(&key))
            {
                store_local_variables(context, previous, &mut state.shadow, self.pointer_width);
            }
        }

        debug!(function = %function.name, thread = context.thread_id(), "enter");
        state.current_function = Some(offset);
        Ok(())
    }

    /// Record a return event: shadow entries owned by the returning
    /// function's invocation are popped and it becomes the thread's
    /// current function again.
    pub fn leave_function(
        &self,
        context: &dyn ExecutionContext,
        address: u64,
        return_address: u64,
    ) -> Result<()> {
        if self.find_function(address).is_none() {
            debug!(address, "leave event from unindexed function");
        }
        let (offset, returning) = self
            .find_function_with_key(return_address)
            .ok_or(VarScopeError::UnknownFunction(return_address))?;

        let mut threads = self.lock_threads();
        let state = threads.entry(context.thread_id()).or_default();

        if self.shadow_enabled {
            remove_local_variables(&returning.unique_id, &mut state.shadow);
        }

        debug!(function = %returning.name, thread = context.thread_id(), "leave");
        state.current_function = Some(offset);
        Ok(())
    }

    /// Resolve an address to a function symbol. Repeated queries for the
    /// same function return the same symbol identity.
    pub fn resolve_function(
        &self,
        _context: &dyn ExecutionContext,
        address: u64,
    ) -> Option<Arc<FunctionSymbol>> {
        let function = self.find_function(address)?;
        Some(self.function_symbol(function))
    }

    /// Resolve an (address, size) pair to a variable symbol.
    ///
    /// Tries globals, then the currently-live function's locals, then the
    /// shadow cache entry for that exact byte address (catching addresses
    /// of a just-exited invocation still being touched by cleanup code).
    pub fn resolve_variable(
        &self,
        context: &dyn ExecutionContext,
        address: u64,
        size: u64,
    ) -> Option<Arc<VariableSymbol>> {
        if let Some(ve) = self.find_global_variable(context, address, size) {
            return Some(self.variable_symbol(&ve));
        }

        if let Ok(pc) = context.get_instruction_pointer() {
            let current = self
                .current_function_entry(context)
                .or_else(|| self.find_function(pc));
            if let Some(function) = current {
                if let Some(ve) = self.find_local_variable(context, address, size, function) {
                    return Some(self.variable_symbol(&ve));
                }
            }
        }

        let threads = self.lock_threads();
        if let Some(ve) = threads
            .get(&context.thread_id())
            .and_then(|state| state.shadow.get(&address))
            .and_then(|stack| stack.last())
        {
            return Some(self.variable_symbol(ve));
        }

        debug!(address, size, "no symbol for address");
        None
    }

    fn current_function_entry(&self, context: &dyn ExecutionContext) -> Option<&FunctionEntry> {
        let threads = self.lock_threads();
        let offset = threads.get(&context.thread_id())?.current_function?;
        self.indexer.functions().get(&offset)
    }

    fn lock_threads(&self) -> std::sync::MutexGuard<'_, HashMap<ThreadId, ThreadState>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn function_symbol(&self, function: &FunctionEntry) -> Arc<FunctionSymbol> {
        if let Some(symbol) = self
            .function_symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&function.unique_id)
        {
            return symbol.clone();
        }
        let mut cache = self
            .function_symbols
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(function.unique_id.clone())
            .or_insert_with(|| Arc::new(FunctionSymbol::from_entry(function)))
            .clone()
    }

    fn variable_symbol(&self, ve: &VarEntry) -> Arc<VariableSymbol> {
        let key = (ve.name.clone(), ve.function_id.clone());
        if let Some(symbol) = self
            .variable_symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return symbol.clone();
        }
        let mut cache = self
            .variable_symbols
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(key)
            .or_insert_with(|| Arc::new(VariableSymbol::from_entry(ve)))
            .clone()
    }
}

/// Whether `[address, address + size)` lies entirely within the variable
/// storage `[var_addr, var_addr + var_size)`.
fn range_contains(var_addr: u64, var_size: u64, address: u64, size: u64) -> bool {
    match (var_addr.checked_add(var_size), address.checked_add(size)) {
        (Some(var_end), Some(end)) => address >= var_addr && end <= var_end,
        _ => false,
    }
}

/// Push every live local's occupied bytes into the shadow cache.
fn store_local_variables(
    context: &dyn ExecutionContext,
    function: &FunctionEntry,
    shadow: &mut HashMap<u64, Vec<VarEntry>>,
    pointer_width: u8,
) {
    for ve in function.locals.values() {
        if !ve.has_location {
            continue;
        }
        match machine::evaluate_address(context, &ve.location, Some(function), pointer_width) {
            Ok(VarLocation::Address(address)) => {
                for byte in 0..ve.ty.size {
                    shadow
                        .entry(address.wrapping_add(byte))
                        .or_default()
                        .push(ve.clone());
                }
            }
            Ok(VarLocation::Register(_)) => {
                debug!(variable = %ve.name, "not shadowing register-resident local");
            }
            Err(error) => {
                debug!(variable = %ve.name, %error, "not shadowing unevaluated local");
            }
        }
    }
}

/// Pop one shadow layer per byte where the top entry belongs to the
/// returning function's invocation; empty stacks are pruned.
fn remove_local_variables(function_id: &str, shadow: &mut HashMap<u64, Vec<VarEntry>>) {
    shadow.retain(|_, stack| {
        if stack
            .last()
            .is_some_and(|ve| ve.function_id == function_id)
        {
            stack.pop();
        }
        !stack.is_empty()
    });
}
