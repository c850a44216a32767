//! Debug-info indexer
//!
//! Walks every compilation unit of a binary's DWARF debug information and
//! builds three offset-keyed tables: types, global variables and functions
//! with their nested locals. Parsing is done in a single pass with
//! deferred resolution: type entries first record only the debug-info
//! offset of the type they reference, and a post-pass resolves those
//! references into embedded copies, synthesizing names and sizes for the
//! composite kinds. A second pass re-snapshots every variable's type from
//! the fully resolved table.
//!
//! One malformed type or function never invalidates the tables: entries
//! are skipped, zeroed or given the unknown-type marker, and the only
//! fatal failure mode is being unable to iterate the compilation-unit
//! sequence itself.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

use gimli::{AttributeValue, DebuggingInformationEntry, Dwarf, EndianSlice, RunTimeEndian, Unit};
use object::{Object, ObjectSection};
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::dwarf::machine::{LocationScript, Operation, ScriptList};
use crate::dwarf::walker::{self, DieNode};
use crate::dwarf::Reader;
use crate::error::Result;

/// Section-global debug-info offset of a DIE. Zero means "no reference".
pub type DieOffset = u64;

/// Name carried by the explicit unknown-type marker.
pub const UNKNOWN_TYPE_NAME: &str = "<unknown>";

/// Placeholder for entries that carry no name attribute.
pub const UNNAMED: &str = "<unnamed>";

/// The DWARF type kinds the indexer models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Base,
    Typedef,
    Array,
    BoundedArray,
    Pointer,
    Const,
    Struct,
}

/// One indexed DWARF type.
///
/// For Typedef, Const and BoundedArray kinds the size is always derived
/// from the resolved base type, never read from debug info directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    pub kind: TypeKind,
    /// Source name; synthesized for composite kinds during resolution.
    pub name: String,
    pub size: u64,
    /// Debug-info offset of the referenced type, 0 = none.
    pub base_type_offset: DieOffset,
    /// Resolved copy of the referenced entry; absent until the
    /// resolution post-pass runs.
    pub base_type: Option<Box<TypeEntry>>,
    /// Element count minus one; only meaningful for BoundedArray.
    pub upper_bound: u64,
}

impl TypeEntry {
    /// The explicit marker a dangling or cyclic type reference resolves to.
    pub fn unknown() -> Self {
        Self {
            kind: TypeKind::Base,
            name: UNKNOWN_TYPE_NAME.to_string(),
            size: 0,
            base_type_offset: 0,
            base_type: None,
            upper_bound: 0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.kind == TypeKind::Base && self.size == 0 && self.name == UNKNOWN_TYPE_NAME
    }
}

impl Default for TypeEntry {
    fn default() -> Self {
        Self::unknown()
    }
}

/// A global variable, local variable or formal parameter.
#[derive(Debug, Clone, Default)]
pub struct VarEntry {
    pub name: String,
    /// Unique id of the owning function; empty for globals.
    pub function_id: String,
    pub type_offset: DieOffset,
    /// Type snapshot copied in at resolution time, not shared with the
    /// master table.
    pub ty: TypeEntry,
    pub location: ScriptList,
    /// False for variables with no resolvable location (e.g. optimized
    /// out); such variables are retained but never match an address.
    pub has_location: bool,
}

/// An indexed subprogram with its local variables and parameters.
#[derive(Debug, Clone, Default)]
pub struct FunctionEntry {
    pub name: String,
    /// Deterministic name+entry-address id, disambiguating same-named
    /// static functions across compilation units.
    pub unique_id: String,
    pub return_type_offset: DieOffset,
    pub low_pc: u64,
    pub high_pc: u64,
    pub frame_base: ScriptList,
    /// Locals and parameters keyed by debug-info offset, scoped to this
    /// function only.
    pub locals: BTreeMap<DieOffset, VarEntry>,
}

impl FunctionEntry {
    pub fn contains_address(&self, address: u64) -> bool {
        self.low_pc <= address && address < self.high_pc
    }
}

/// Derive the deterministic unique id for a function.
pub(crate) fn function_unique_id(name: &str, low_pc: u64) -> String {
    format!("{}_{:x}", name, low_pc)
}

/// Counters describing one indexing run.
#[derive(Debug, Default, Clone)]
pub struct IndexStats {
    pub compilation_units: usize,
    pub types: usize,
    pub global_variables: usize,
    pub functions: usize,
    pub local_variables: usize,
    /// Variables retained without a resolvable location
    pub missing_locations: usize,
    /// Functions discarded because their child walk failed
    pub discarded_functions: usize,
    /// Type references that resolved to the unknown marker
    pub dangling_type_refs: usize,
}

/// Builds and owns the static symbol tables for one binary.
pub struct DwarfIndexer {
    types: BTreeMap<DieOffset, TypeEntry>,
    globals: BTreeMap<DieOffset, VarEntry>,
    functions: BTreeMap<DieOffset, FunctionEntry>,
    pointer_width: u8,
    max_resolve_depth: usize,
    stats: IndexStats,
}

impl DwarfIndexer {
    fn empty(config: &ResolverConfig) -> Self {
        Self {
            types: BTreeMap::new(),
            globals: BTreeMap::new(),
            functions: BTreeMap::new(),
            pointer_width: config.effective_pointer_width(8),
            max_resolve_depth: config.max_resolve_depth,
            stats: IndexStats::default(),
        }
    }

    /// Index the DWARF sections of an ELF image.
    pub fn from_elf_bytes(data: &[u8]) -> Result<Self> {
        let file = object::File::parse(data)?;

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let load_section = |id: gimli::SectionId| -> std::result::Result<Cow<[u8]>, gimli::Error> {
            Ok(file
                .section_by_name(id.name())
                .and_then(|s| s.data().ok())
                .map(Cow::Borrowed)
                .unwrap_or(Cow::Borrowed(&[])))
        };

        let dwarf_sections = gimli::DwarfSections::load(load_section)?;
        let dwarf = dwarf_sections.borrow(|section| EndianSlice::new(section, endian));

        Self::index(&dwarf)
    }

    /// Index already-loaded DWARF sections with the default configuration.
    pub fn index(dwarf: &Dwarf<Reader<'_>>) -> Result<Self> {
        Self::index_with_config(dwarf, &ResolverConfig::default())
    }

    /// Index already-loaded DWARF sections.
    pub fn index_with_config(dwarf: &Dwarf<Reader<'_>>, config: &ResolverConfig) -> Result<Self> {
        let mut indexer = Self::empty(config);

        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let unit = dwarf.unit(header)?;
            indexer.visit_unit(dwarf, &unit)?;
        }

        indexer.resolve_indirect_types();
        indexer.resolve_variable_types();
        indexer.finish_stats();
        Ok(indexer)
    }

    /// Build an indexer from pre-populated tables.
    ///
    /// Runs the same resolution post-passes as [`DwarfIndexer::index`].
    /// Intended for producers other than the ELF/DWARF loader and for
    /// tests.
    pub fn from_tables(
        types: BTreeMap<DieOffset, TypeEntry>,
        globals: BTreeMap<DieOffset, VarEntry>,
        functions: BTreeMap<DieOffset, FunctionEntry>,
    ) -> Self {
        let mut indexer = Self::empty(&ResolverConfig::default());
        indexer.types = types;
        indexer.globals = globals;
        indexer.functions = functions;
        indexer.resolve_indirect_types();
        indexer.resolve_variable_types();
        indexer.finish_stats();
        indexer
    }

    pub fn types(&self) -> &BTreeMap<DieOffset, TypeEntry> {
        &self.types
    }

    pub fn global_variables(&self) -> &BTreeMap<DieOffset, VarEntry> {
        &self.globals
    }

    pub fn functions(&self) -> &BTreeMap<DieOffset, FunctionEntry> {
        &self.functions
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Address width of the indexed binary, in bytes.
    pub fn pointer_width(&self) -> u8 {
        self.pointer_width
    }

    /// Copy the resolved type at the given offset, or the unknown marker
    /// if the offset is absent from the table.
    pub fn lookup_type(&self, offset: DieOffset) -> TypeEntry {
        self.types
            .get(&offset)
            .cloned()
            .unwrap_or_else(TypeEntry::unknown)
    }

    fn visit_unit<'a>(&mut self, dwarf: &Dwarf<Reader<'a>>, unit: &Unit<Reader<'a>>) -> Result<()> {
        self.stats.compilation_units += 1;
        self.pointer_width = unit.header.address_size();

        let tree = walker::unit_tree(unit)?;
        if tree.tag != gimli::DW_TAG_compile_unit {
            debug!(tag = ?tree.tag, "skipping non-compile-unit root");
            return Ok(());
        }

        // The unit's own range anchors range biasing; the location-list
        // reader applies it through `unit.low_pc`.
        if unit.low_pc == 0 {
            warn!("compilation unit has no base address");
        }

        let mut globals = std::mem::take(&mut self.globals);
        for child in &tree.children {
            if let Err(error) = self.visit_die(dwarf, unit, child, &mut globals, "") {
                warn!(%error, "skipping unreadable debug entry");
            }
        }
        self.globals = globals;
        Ok(())
    }

    /// Dispatch one DIE by tag. `vars` is the variable table to populate:
    /// the global table at unit level, a function's local table while
    /// visiting a subprogram's children. Unrecognized tags and their
    /// children are skipped without error.
    fn visit_die<'a>(
        &mut self,
        dwarf: &Dwarf<Reader<'a>>,
        unit: &Unit<Reader<'a>>,
        node: &DieNode,
        vars: &mut BTreeMap<DieOffset, VarEntry>,
        function_id: &str,
    ) -> Result<()> {
        match node.tag {
            gimli::DW_TAG_base_type => self.visit_base_type(dwarf, unit, node),
            gimli::DW_TAG_typedef => self.visit_typedef(dwarf, unit, node),
            gimli::DW_TAG_array_type => self.visit_array_type(unit, node),
            gimli::DW_TAG_pointer_type => self.visit_pointer_type(unit, node),
            gimli::DW_TAG_const_type => self.visit_const_type(unit, node),
            gimli::DW_TAG_structure_type => self.visit_struct_type(dwarf, unit, node),
            gimli::DW_TAG_variable | gimli::DW_TAG_formal_parameter => {
                self.visit_variable(dwarf, unit, node, vars, function_id)
            }
            gimli::DW_TAG_subprogram => self.visit_subprogram(dwarf, unit, node),
            _ => Ok(()),
        }
    }

    fn visit_base_type<'a>(
        &mut self,
        dwarf: &Dwarf<Reader<'a>>,
        unit: &Unit<Reader<'a>>,
        node: &DieNode,
    ) -> Result<()> {
        let entry = unit.entry(node.offset)?;
        let Some(offset) = global_offset(unit, node) else {
            return Ok(());
        };
        let name = entry_name(dwarf, unit, &entry);
        let size = attr_udata(&entry, gimli::DW_AT_byte_size).unwrap_or(0);

        self.types.insert(
            offset,
            TypeEntry {
                kind: TypeKind::Base,
                name,
                size,
                base_type_offset: 0,
                base_type: None,
                upper_bound: 0,
            },
        );
        Ok(())
    }

    fn visit_typedef<'a>(
        &mut self,
        dwarf: &Dwarf<Reader<'a>>,
        unit: &Unit<Reader<'a>>,
        node: &DieNode,
    ) -> Result<()> {
        let entry = unit.entry(node.offset)?;
        let Some(offset) = global_offset(unit, node) else {
            return Ok(());
        };
        let name = entry_name(dwarf, unit, &entry);
        let base_type_offset = type_ref(unit, &entry);

        self.types.insert(
            offset,
            TypeEntry {
                kind: TypeKind::Typedef,
                name,
                size: 0,
                base_type_offset,
                base_type: None,
                upper_bound: 0,
            },
        );
        Ok(())
    }

    /// An array type with a subrange child that supplies an upper bound is
    /// promoted to a bounded array; otherwise the element count stays
    /// unknown.
    fn visit_array_type(&mut self, unit: &Unit<Reader<'_>>, node: &DieNode) -> Result<()> {
        let entry = unit.entry(node.offset)?;
        let Some(offset) = global_offset(unit, node) else {
            return Ok(());
        };
        let base_type_offset = type_ref(unit, &entry);

        let mut kind = TypeKind::Array;
        let mut upper_bound = 0;
        for child in &node.children {
            if child.tag != gimli::DW_TAG_subrange_type {
                continue;
            }
            let child_entry = unit.entry(child.offset)?;
            if let Some(bound) = attr_udata(&child_entry, gimli::DW_AT_upper_bound) {
                kind = TypeKind::BoundedArray;
                upper_bound = bound;
            }
        }

        self.types.insert(
            offset,
            TypeEntry {
                kind,
                name: String::new(),
                size: 0,
                base_type_offset,
                base_type: None,
                upper_bound,
            },
        );
        Ok(())
    }

    fn visit_pointer_type(&mut self, unit: &Unit<Reader<'_>>, node: &DieNode) -> Result<()> {
        let entry = unit.entry(node.offset)?;
        let Some(offset) = global_offset(unit, node) else {
            return Ok(());
        };
        let base_type_offset = type_ref(unit, &entry);
        let size = attr_udata(&entry, gimli::DW_AT_byte_size)
            .unwrap_or(unit.header.address_size() as u64);

        self.types.insert(
            offset,
            TypeEntry {
                kind: TypeKind::Pointer,
                name: String::new(),
                size,
                base_type_offset,
                base_type: None,
                upper_bound: 0,
            },
        );
        Ok(())
    }

    fn visit_const_type(&mut self, unit: &Unit<Reader<'_>>, node: &DieNode) -> Result<()> {
        let entry = unit.entry(node.offset)?;
        let Some(offset) = global_offset(unit, node) else {
            return Ok(());
        };
        let base_type_offset = type_ref(unit, &entry);

        self.types.insert(
            offset,
            TypeEntry {
                kind: TypeKind::Const,
                name: String::new(),
                size: 0,
                base_type_offset,
                base_type: None,
                upper_bound: 0,
            },
        );
        Ok(())
    }

    fn visit_struct_type<'a>(
        &mut self,
        dwarf: &Dwarf<Reader<'a>>,
        unit: &Unit<Reader<'a>>,
        node: &DieNode,
    ) -> Result<()> {
        let entry = unit.entry(node.offset)?;
        let Some(offset) = global_offset(unit, node) else {
            return Ok(());
        };
        let name = entry_name(dwarf, unit, &entry);
        let size = attr_udata(&entry, gimli::DW_AT_byte_size).unwrap_or(0);

        self.types.insert(
            offset,
            TypeEntry {
                kind: TypeKind::Struct,
                name,
                size,
                base_type_offset: 0,
                base_type: None,
                upper_bound: 0,
            },
        );
        Ok(())
    }

    fn visit_variable<'a>(
        &mut self,
        dwarf: &Dwarf<Reader<'a>>,
        unit: &Unit<Reader<'a>>,
        node: &DieNode,
        vars: &mut BTreeMap<DieOffset, VarEntry>,
        function_id: &str,
    ) -> Result<()> {
        let entry = unit.entry(node.offset)?;
        let Some(offset) = global_offset(unit, node) else {
            return Ok(());
        };
        let name = entry_name(dwarf, unit, &entry);
        let type_offset = type_ref(unit, &entry);

        let (location, has_location) =
            match read_script_list(dwarf, unit, &entry, gimli::DW_AT_location) {
                Ok(Some(list)) => (list, true),
                Ok(None) => {
                    debug!(variable = %name, "variable has no location");
                    (ScriptList::new(), false)
                }
                Err(error) => {
                    warn!(variable = %name, %error, "malformed location list");
                    (ScriptList::new(), false)
                }
            };
        if !has_location {
            self.stats.missing_locations += 1;
        }

        vars.insert(
            offset,
            VarEntry {
                name,
                function_id: function_id.to_string(),
                type_offset,
                ty: TypeEntry::unknown(),
                location,
                has_location,
            },
        );
        Ok(())
    }

    /// Index a subprogram and recurse into its children with the
    /// function's own local table substituted for the global one. If the
    /// child walk fails the entire function entry is discarded rather
    /// than left partially indexed.
    fn visit_subprogram<'a>(
        &mut self,
        dwarf: &Dwarf<Reader<'a>>,
        unit: &Unit<Reader<'a>>,
        node: &DieNode,
    ) -> Result<()> {
        let entry = unit.entry(node.offset)?;
        let Some(offset) = global_offset(unit, node) else {
            return Ok(());
        };
        let name = entry_name(dwarf, unit, &entry);
        let return_type_offset = type_ref(unit, &entry);

        let (low_pc, high_pc) = match pc_range(dwarf, unit, &entry) {
            Some(range) => range,
            None => {
                warn!(function = %name, "subprogram has no usable address range");
                (0, 0)
            }
        };

        let frame_base = match read_script_list(dwarf, unit, &entry, gimli::DW_AT_frame_base) {
            Ok(Some(list)) => list,
            Ok(None) => {
                debug!(function = %name, "subprogram has no frame base");
                ScriptList::new()
            }
            Err(error) => {
                warn!(function = %name, %error, "malformed frame-base expression");
                ScriptList::new()
            }
        };

        let unique_id = function_unique_id(&name, low_pc);
        let mut function = FunctionEntry {
            name,
            unique_id: unique_id.clone(),
            return_type_offset,
            low_pc,
            high_pc,
            frame_base,
            locals: BTreeMap::new(),
        };

        for child in &node.children {
            if let Err(error) = self.visit_die(dwarf, unit, child, &mut function.locals, &unique_id)
            {
                warn!(function = %function.name, %error, "discarding partially indexed function");
                self.stats.discarded_functions += 1;
                return Ok(());
            }
        }

        self.functions.insert(offset, function);
        Ok(())
    }

    /// Resolve every indirect type reference, depth-first and memoized by
    /// writing the resolved copy back into the table.
    fn resolve_indirect_types(&mut self) {
        let offsets: Vec<DieOffset> = self.types.keys().copied().collect();
        for offset in offsets {
            let mut visiting = HashSet::new();
            self.resolve_type(offset, &mut visiting, 0);
        }
    }

    fn resolve_type(
        &mut self,
        offset: DieOffset,
        visiting: &mut HashSet<DieOffset>,
        depth: usize,
    ) -> TypeEntry {
        let Some(current) = self.types.get(&offset).cloned() else {
            self.stats.dangling_type_refs += 1;
            return TypeEntry::unknown();
        };
        if current.base_type_offset == 0 || current.base_type.is_some() {
            return current;
        }
        if depth >= self.max_resolve_depth || !visiting.insert(offset) {
            warn!(offset, "type reference cycle; failing closed");
            return TypeEntry::unknown();
        }

        let base = self.resolve_type(current.base_type_offset, visiting, depth + 1);
        visiting.remove(&offset);

        let mut resolved = current;
        match resolved.kind {
            TypeKind::Typedef => resolved.size = base.size,
            TypeKind::Array => resolved.name = format!("{}[]", base.name),
            TypeKind::BoundedArray => {
                let count = resolved.upper_bound.saturating_add(1);
                resolved.name = format!("{}[{}]", base.name, count);
                resolved.size = base.size.saturating_mul(count);
            }
            TypeKind::Pointer => resolved.name = format!("{}*", base.name),
            TypeKind::Const => {
                resolved.name = format!("{} const", base.name);
                resolved.size = base.size;
            }
            TypeKind::Base | TypeKind::Struct => {}
        }
        resolved.base_type = Some(Box::new(base));

        self.types.insert(offset, resolved.clone());
        resolved
    }

    /// Re-snapshot every variable's type from the resolved table.
    fn resolve_variable_types(&mut self) {
        let types = &self.types;
        let mut dangling = 0usize;

        let mut snapshot = |ve: &mut VarEntry| {
            if ve.type_offset == 0 {
                return;
            }
            ve.ty = match types.get(&ve.type_offset) {
                Some(entry) => entry.clone(),
                None => {
                    dangling += 1;
                    TypeEntry::unknown()
                }
            };
        };

        for ve in self.globals.values_mut() {
            snapshot(ve);
        }
        for fe in self.functions.values_mut() {
            for ve in fe.locals.values_mut() {
                snapshot(ve);
            }
        }

        self.stats.dangling_type_refs += dangling;
    }

    fn finish_stats(&mut self) {
        self.stats.types = self.types.len();
        self.stats.global_variables = self.globals.len();
        self.stats.functions = self.functions.len();
        self.stats.local_variables = self
            .functions
            .values()
            .map(|fe| fe.locals.len())
            .sum();

        info!(
            units = self.stats.compilation_units,
            types = self.stats.types,
            globals = self.stats.global_variables,
            functions = self.stats.functions,
            locals = self.stats.local_variables,
            "indexed debug information"
        );
    }
}

/// Section-global offset of a DIE, or `None` for exotic unit kinds.
fn global_offset(unit: &Unit<Reader<'_>>, node: &DieNode) -> Option<DieOffset> {
    node.offset
        .to_debug_info_offset(&unit.header)
        .map(|offset| offset.0 as u64)
}

/// Resolve a `DW_AT_type`-style reference to a section-global offset.
fn type_ref<'a>(unit: &Unit<Reader<'a>>, entry: &DebuggingInformationEntry<Reader<'a>>) -> DieOffset {
    match entry.attr_value(gimli::DW_AT_type) {
        Ok(Some(AttributeValue::UnitRef(offset))) => offset
            .to_debug_info_offset(&unit.header)
            .map(|o| o.0 as u64)
            .unwrap_or(0),
        Ok(Some(AttributeValue::DebugInfoRef(offset))) => offset.0 as u64,
        _ => 0,
    }
}

fn attr_udata(entry: &DebuggingInformationEntry<Reader<'_>>, attr: gimli::DwAt) -> Option<u64> {
    entry.attr_value(attr).ok()??.udata_value()
}

fn attr_string<'a>(
    dwarf: &Dwarf<Reader<'a>>,
    unit: &Unit<Reader<'a>>,
    entry: &DebuggingInformationEntry<Reader<'a>>,
    attr: gimli::DwAt,
) -> Option<String> {
    let value = entry.attr_value(attr).ok()??;
    match value {
        AttributeValue::String(s) => Some(s.to_string_lossy().to_string()),
        AttributeValue::DebugStrRef(offset) => dwarf
            .debug_str
            .get_str(offset)
            .ok()
            .map(|s| s.to_string_lossy().to_string()),
        other => dwarf
            .attr_string(unit, other)
            .ok()
            .map(|s| s.to_string_lossy().to_string()),
    }
}

/// Source-level name of an entry: `DW_AT_name`, else the demangled
/// linkage name, else the unnamed placeholder.
fn entry_name<'a>(
    dwarf: &Dwarf<Reader<'a>>,
    unit: &Unit<Reader<'a>>,
    entry: &DebuggingInformationEntry<Reader<'a>>,
) -> String {
    if let Some(name) = attr_string(dwarf, unit, entry, gimli::DW_AT_name) {
        return name;
    }
    if let Some(linkage) = attr_string(dwarf, unit, entry, gimli::DW_AT_linkage_name) {
        return demangle_name(&linkage);
    }
    UNNAMED.to_string()
}

/// Demangle a linkage name (supports C++ and Rust mangling).
pub fn demangle_name(mangled: &str) -> String {
    if let Ok(symbol) = cpp_demangle::Symbol::new(mangled) {
        if let Ok(demangled) = symbol.demangle(&cpp_demangle::DemangleOptions::default()) {
            return demangled;
        }
    }

    let demangled = rustc_demangle::demangle(mangled).to_string();
    if demangled != mangled {
        return demangled;
    }

    mangled.to_string()
}

/// Read a `[low_pc, high_pc)` range; `DW_AT_high_pc` may be an address or
/// an offset from the low pc.
fn pc_range<'a>(
    dwarf: &Dwarf<Reader<'a>>,
    unit: &Unit<Reader<'a>>,
    entry: &DebuggingInformationEntry<Reader<'a>>,
) -> Option<(u64, u64)> {
    let low_value = entry.attr_value(gimli::DW_AT_low_pc).ok()??;
    let low = match low_value {
        AttributeValue::Addr(address) => address,
        other => dwarf.attr_address(unit, other).ok()??,
    };

    let high = match entry.attr_value(gimli::DW_AT_high_pc).ok()?? {
        AttributeValue::Addr(address) => address,
        other => low.checked_add(other.udata_value()?)?,
    };

    Some((low, high))
}

/// Read a location attribute into a script list.
///
/// A single expression (exprloc or legacy block form) becomes one script
/// with the "valid everywhere" sentinel range; a location-list reference
/// yields one script per list entry, with ranges already biased against
/// the unit base address by the reader.
fn read_script_list<'a>(
    dwarf: &Dwarf<Reader<'a>>,
    unit: &Unit<Reader<'a>>,
    entry: &DebuggingInformationEntry<Reader<'a>>,
    attr: gimli::DwAt,
) -> Result<Option<ScriptList>> {
    let value = match entry.attr_value(attr)? {
        Some(value) => value,
        None => return Ok(None),
    };

    match value {
        AttributeValue::Exprloc(expr) => {
            let ops = decode_expression(&expr, unit.encoding())?;
            Ok(Some(vec![LocationScript::everywhere(ops)]))
        }
        AttributeValue::Block(data) => {
            let ops = decode_expression(&gimli::Expression(data), unit.encoding())?;
            Ok(Some(vec![LocationScript::everywhere(ops)]))
        }
        AttributeValue::LocationListsRef(offset) => read_loclist(dwarf, unit, offset),
        AttributeValue::SecOffset(offset) => {
            read_loclist(dwarf, unit, gimli::LocationListsOffset(offset))
        }
        AttributeValue::DebugLocListsIndex(index) => {
            let offset = dwarf.locations_offset(unit, index)?;
            read_loclist(dwarf, unit, offset)
        }
        _ => Ok(None),
    }
}

fn read_loclist<'a>(
    dwarf: &Dwarf<Reader<'a>>,
    unit: &Unit<Reader<'a>>,
    offset: gimli::LocationListsOffset,
) -> Result<Option<ScriptList>> {
    let mut iter = dwarf.locations(unit, offset)?;
    let mut list = ScriptList::new();
    while let Some(entry) = iter.next()? {
        let ops = decode_expression(&entry.data, unit.encoding())?;
        if entry.range.begin == 0 && (entry.range.end == 0 || entry.range.end == u64::MAX) {
            list.push(LocationScript::everywhere(ops));
        } else {
            list.push(LocationScript {
                low_pc: entry.range.begin,
                high_pc: entry.range.end,
                ops,
            });
        }
    }
    Ok(Some(list))
}

/// Decode an expression into operation records.
///
/// gimli advances over each operation's variable-length operands, so the
/// recorded byte offsets are exact without an operand-width table here;
/// they are what the machine later matches its position counter against.
fn decode_expression(
    expr: &gimli::Expression<Reader<'_>>,
    encoding: gimli::Encoding,
) -> Result<Vec<Operation>> {
    let total = expr.0.len();
    let mut pc = expr.0;
    let mut ops = Vec::new();

    while !pc.is_empty() {
        let byte_offset = (total - pc.len()) as u64;
        let opcode = pc.slice()[0];
        let parsed = gimli::Operation::parse(&mut pc, encoding)?;
        let (operand1, operand2) = operands(&parsed);
        ops.push(Operation {
            opcode,
            operand1,
            operand2,
            byte_offset,
        });
    }

    Ok(ops)
}

fn operands(op: &gimli::Operation<Reader<'_>>) -> (u64, u64) {
    use gimli::Operation as Op;
    match op {
        Op::Address { address } => (*address, 0),
        Op::UnsignedConstant { value } => (*value, 0),
        Op::SignedConstant { value } => (*value as u64, 0),
        Op::Register { register } => (register.0 as u64, 0),
        Op::RegisterOffset {
            register, offset, ..
        } => (*offset as u64, register.0 as u64),
        Op::FrameOffset { offset } => (*offset as u64, 0),
        Op::PlusConstant { value } => (*value, 0),
        _ => (0, 0),
    }
}
