//! Generational node arena with structural mutation operations.
//!
//! Slot reuse follows a free pool (O(1) allocation); every reuse bumps the
//! slot's generation so a stale [`NodeId`] can never address the new
//! occupant. Side tables elsewhere in the engine rely on that.

use std::fmt::Write as _;

use crate::types::PropValue;

use super::node::LiveNode;

// =============================================================================
// NodeId
// =============================================================================

/// Stable handle to a live node: arena index plus slot generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Packed form, for diagnostics.
    pub fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}.{}", self.index, self.generation)
    }
}

// =============================================================================
// Arena
// =============================================================================

struct Slot {
    generation: u32,
    record: Option<Record>,
}

struct Record {
    node: LiveNode,
    parent: Option<NodeId>,
}

/// The live document: a generational arena of [`LiveNode`]s.
#[derive(Default)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes (attached or detached).
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.record.is_some()).count()
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    fn allocate(&mut self, node: LiveNode) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(Record { node, parent: None });
            NodeId { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                record: Some(Record { node, parent: None }),
            });
            NodeId { index, generation: 0 }
        }
    }

    /// Create a detached element node.
    pub fn create_element(&mut self, tag: impl Into<String>) -> NodeId {
        self.allocate(LiveNode::element(tag))
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, data: impl Into<String>) -> NodeId {
        self.allocate(LiveNode::text(data))
    }

    fn record(&self, id: NodeId) -> Option<&Record> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_ref()
    }

    fn record_mut(&mut self, id: NodeId) -> Option<&mut Record> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_mut()
    }

    /// Whether the handle still addresses a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.record(id).is_some()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn node(&self, id: NodeId) -> Option<&LiveNode> {
        self.record(id).map(|r| &r.node)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.record(id).and_then(|r| r.parent)
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.node(id)? {
            LiveNode::Element { tag, .. } => Some(tag),
            LiveNode::Text { .. } => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.node(id)? {
            LiveNode::Text { data } => Some(data),
            LiveNode::Element { .. } => None,
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.node(id) {
            Some(LiveNode::Element { children, .. }) => children,
            _ => &[],
        }
    }

    pub fn index_of(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.children(parent).iter().position(|&c| c == child)
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&PropValue> {
        match self.node(id)? {
            LiveNode::Element { attrs, .. } => attrs.get(name),
            LiveNode::Text { .. } => None,
        }
    }

    /// Snapshot of the attributes currently applied to an element.
    pub fn attrs(&self, id: NodeId) -> Vec<(String, PropValue)> {
        match self.node(id) {
            Some(LiveNode::Element { attrs, .. }) => {
                attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            _ => Vec::new(),
        }
    }

    // =========================================================================
    // Leaf Mutation
    // =========================================================================

    /// Update a text node's data in place.
    pub fn set_text(&mut self, id: NodeId, data: impl Into<String>) {
        if let Some(Record { node: LiveNode::Text { data: slot }, .. }) = self.record_mut(id) {
            *slot = data.into();
        } else {
            debug_assert!(false, "set_text on non-text node {id}");
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: impl Into<String>, value: PropValue) {
        if let Some(Record { node: LiveNode::Element { attrs, .. }, .. }) = self.record_mut(id) {
            attrs.insert(name.into(), value);
        } else {
            debug_assert!(false, "set_attr on non-element node {id}");
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(Record { node: LiveNode::Element { attrs, .. }, .. }) = self.record_mut(id) {
            attrs.shift_remove(name);
        }
    }

    // =========================================================================
    // Structural Mutation
    // =========================================================================

    /// Detach a node from its parent (the node itself stays alive).
    pub fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.parent(child) else { return };
        if let Some(Record { node: LiveNode::Element { children, .. }, .. }) =
            self.record_mut(parent)
        {
            children.retain(|&c| c != child);
        }
        if let Some(record) = self.record_mut(child) {
            record.parent = None;
        }
    }

    /// Append a child (detaching it from any previous parent first).
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Insert `child` before `anchor` under `parent`; `None` appends.
    ///
    /// A child already attached elsewhere (or elsewhere in this parent) is
    /// detached first, so this doubles as the move operation.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, anchor: Option<NodeId>) {
        debug_assert!(self.contains(child), "insert of dead node {child}");
        self.detach(child);
        let Some(Record { node: LiveNode::Element { children, .. }, .. }) =
            self.record_mut(parent)
        else {
            debug_assert!(false, "insert_before on non-element {parent}");
            return;
        };
        let position = match anchor {
            Some(anchor) => children.iter().position(|&c| c == anchor),
            None => None,
        };
        match position {
            Some(at) => children.insert(at, child),
            None => children.push(child),
        }
        if let Some(record) = self.record_mut(child) {
            record.parent = Some(parent);
        }
    }

    /// Put `new` in `old`'s position under `parent`; `old` ends up detached.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        debug_assert!(self.parent(old) == Some(parent), "replace of non-child {old}");
        let anchor = {
            let children = self.children(parent);
            children
                .iter()
                .position(|&c| c == old)
                .and_then(|at| children.get(at + 1).copied())
        };
        self.detach(old);
        self.insert_before(parent, new, anchor);
    }

    /// Swap a parent's entire child list in one operation.
    ///
    /// Every node in `new_children` is detached from wherever it currently
    /// sits (including this parent) and attached in order. Returns the
    /// previous children that do not appear in the new list, now detached,
    /// so the caller can destroy them.
    pub fn replace_children(&mut self, parent: NodeId, new_children: Vec<NodeId>) -> Vec<NodeId> {
        let old = self.children(parent).to_vec();
        for &child in &old {
            if let Some(record) = self.record_mut(child) {
                record.parent = None;
            }
        }
        if let Some(Record { node: LiveNode::Element { children, .. }, .. }) =
            self.record_mut(parent)
        {
            children.clear();
        }
        for &child in &new_children {
            // Detach from any other parent; old-parent links were cleared above.
            if self.parent(child).is_some() {
                self.detach(child);
            }
            if let Some(record) = self.record_mut(child) {
                record.parent = Some(parent);
            }
        }
        if let Some(Record { node: LiveNode::Element { children, .. }, .. }) =
            self.record_mut(parent)
        {
            *children = new_children.clone();
        }
        old.into_iter().filter(|c| !new_children.contains(c)).collect()
    }

    /// Collect a subtree's ids depth-first (the root included).
    pub fn collect_subtree(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if !self.contains(id) {
            return;
        }
        out.push(id);
        for &child in self.children(id) {
            self.collect_subtree(child, out);
        }
    }

    /// Detach and free a subtree. Freed slots go back to the pool with a
    /// bumped generation.
    pub fn remove_subtree(&mut self, id: NodeId) {
        self.detach(id);
        let mut ids = Vec::new();
        self.collect_subtree(id, &mut ids);
        for id in ids {
            let slot = &mut self.slots[id.index as usize];
            if slot.generation == id.generation && slot.record.is_some() {
                slot.record = None;
                slot.generation += 1;
                self.free.push(id.index);
            }
        }
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Deterministic structural dump for tests and debugging.
    ///
    /// Attribute names are sorted so construction order never leaks into
    /// comparisons. This is a debug format, not markup serialization.
    pub fn snapshot(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.snapshot_into(id, &mut out);
        out
    }

    fn snapshot_into(&self, id: NodeId, out: &mut String) {
        match self.node(id) {
            Some(LiveNode::Text { data }) => {
                let _ = write!(out, "{data:?}");
            }
            Some(LiveNode::Element { tag, attrs, children }) => {
                let _ = write!(out, "<{tag}");
                let mut names: Vec<&String> = attrs.keys().collect();
                names.sort();
                for name in names {
                    let _ = write!(out, " {name}={}", attrs[name.as_str()]);
                }
                out.push('>');
                for (i, &child) in children.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    self.snapshot_into(child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
            None => out.push_str("<dead>"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
