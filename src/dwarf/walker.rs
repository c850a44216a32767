//! Debug-entry tree walker
//!
//! gimli exposes the entries of a compilation unit as a flat depth-first
//! cursor. The indexer wants to recurse over explicit child lists so it
//! can substitute a function-local variable table while visiting a
//! subprogram's children, so this module folds one cursor pass into an
//! owned tree of [`DieNode`]s (offset and tag per node; attributes are
//! re-read by offset during visitation).

use gimli::{DwTag, Unit, UnitOffset};

use crate::dwarf::Reader;
use crate::error::{Result, VarScopeError};

/// One debug-information entry with its children.
#[derive(Debug, Clone)]
pub struct DieNode {
    pub offset: UnitOffset,
    pub tag: DwTag,
    pub children: Vec<DieNode>,
}

fn underflow() -> VarScopeError {
    VarScopeError::DebugInfo("entry tree underflowed its root".to_string())
}

/// Build the entry tree of one compilation unit.
///
/// The returned root is the unit's top-level entry (normally
/// `DW_TAG_compile_unit`).
pub fn unit_tree(unit: &Unit<Reader<'_>>) -> Result<DieNode> {
    let mut entries = unit.entries();

    let (_, root) = entries
        .next_dfs()?
        .ok_or_else(|| VarScopeError::DebugInfo("compilation unit has no entries".to_string()))?;
    let mut stack = vec![DieNode {
        offset: root.offset(),
        tag: root.tag(),
        children: Vec::new(),
    }];

    while let Some((delta, entry)) = entries.next_dfs()? {
        // delta is the depth change relative to the previous entry:
        // 1 = child, 0 = sibling, negative = up that many levels.
        for _ in 0..(1 - delta) {
            let finished = match stack.pop() {
                Some(node) if !stack.is_empty() => node,
                _ => return Err(underflow()),
            };
            if let Some(parent) = stack.last_mut() {
                parent.children.push(finished);
            }
        }
        stack.push(DieNode {
            offset: entry.offset(),
            tag: entry.tag(),
            children: Vec::new(),
        });
    }

    while stack.len() > 1 {
        let finished = match stack.pop() {
            Some(node) => node,
            None => return Err(underflow()),
        };
        if let Some(parent) = stack.last_mut() {
            parent.children.push(finished);
        }
    }

    stack.pop().ok_or_else(underflow)
}
