// id.rs — Stable node handles for the resolution tree
//
// Nodes live in the `Tree` arena and are addressed by index. Handles are
// allocated in insertion order and never reused: nothing is removed from the
// arena once analysis starts, so a handle stays valid for the whole
// compilation. Declaration references are stored as plain handles (non-owning
// back-references) in the compiler-property side table.

use std::fmt;

/// Handle of a node inside a `Tree` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Allocator for generated symbol names (domain bridges and similar).
/// Produces monotonically increasing suffixes in allocation order, so
/// generated names are deterministic for a given input.
#[derive(Debug, Clone, Default)]
pub struct NameAllocator {
    next_bridge: u32,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_bridge(&mut self) -> String {
        let name = format!("_DomainBridge_{}", self.next_bridge);
        self.next_bridge += 1;
        name
    }
}
