//! Prop and listener diffing.
//!
//! Per live node, the delta against previously applied props:
//! - removed or removal-valued entries clear attributes / detach listeners
//! - changed handler identity replaces the listener in the node's table
//! - unchanged identity is a strict no-op: a handler attaches exactly once
//!   across any number of re-renders with the same `Rc`

use std::collections::HashMap;

use bitflags::bitflags;
use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::host::{Document, NodeId};
use crate::types::{Listener, PropValue, Props};

use super::ops::MutationOp;

bitflags! {
    /// Summary of what a diff touched; feeds the fast-path gate and trace
    /// logging.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct DeltaFlags: u8 {
        const ATTRS = 1;
        const LISTENERS = 1 << 1;
        const TEXT = 1 << 2;
        const STRUCTURE = 1 << 3;
    }
}

/// Computed attribute/listener delta for one node.
#[derive(Default)]
pub(crate) struct PropDelta {
    pub set_attrs: SmallVec<[(String, PropValue); 4]>,
    pub removed_attrs: SmallVec<[String; 2]>,
    pub set_listeners: SmallVec<[(String, Listener); 2]>,
    pub removed_listeners: SmallVec<[String; 2]>,
}

impl PropDelta {
    pub fn is_empty(&self) -> bool {
        self.set_attrs.is_empty()
            && self.removed_attrs.is_empty()
            && self.set_listeners.is_empty()
            && self.removed_listeners.is_empty()
    }

    pub fn flags(&self) -> DeltaFlags {
        let mut flags = DeltaFlags::empty();
        if !self.set_attrs.is_empty() || !self.removed_attrs.is_empty() {
            flags |= DeltaFlags::ATTRS;
        }
        if !self.set_listeners.is_empty() || !self.removed_listeners.is_empty() {
            flags |= DeltaFlags::LISTENERS;
        }
        flags
    }

    /// Turn the delta into mutation ops against `node`.
    pub fn emit(self, node: NodeId, ops: &mut Vec<MutationOp>) {
        for name in self.removed_attrs {
            ops.push(MutationOp::RemoveAttr { node, name });
        }
        for (name, value) in self.set_attrs {
            ops.push(MutationOp::SetAttr { node, name, value });
        }
        for event in self.removed_listeners {
            ops.push(MutationOp::RemoveListener { node, event });
        }
        for (event, listener) in self.set_listeners {
            ops.push(MutationOp::SetListener { node, event, listener });
        }
    }
}

/// Diff `new_props` against what is currently applied to `node`.
pub(crate) fn diff_props(
    doc: &Document,
    listener_table: &HashMap<NodeId, IndexMap<String, Listener>>,
    node: NodeId,
    new_props: &Props,
) -> PropDelta {
    let mut delta = PropDelta::default();

    let old_attrs = doc.attrs(node);
    for (name, value) in new_props.attrs() {
        let old = old_attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v);
        if value.is_removal() {
            if old.is_some() {
                delta.removed_attrs.push(name.to_string());
            }
        } else if old != Some(value) {
            delta.set_attrs.push((name.to_string(), value.clone()));
        }
    }
    for (name, _) in &old_attrs {
        if new_props.get(name).is_none() {
            delta.removed_attrs.push(name.clone());
        }
    }

    let empty = IndexMap::new();
    let old_listeners = listener_table.get(&node).unwrap_or(&empty);
    for (event, listener) in new_props.listeners() {
        match old_listeners.get(event) {
            // Same identity: strict no-op.
            Some(old) if old.same_identity(listener) => {}
            _ => delta.set_listeners.push((event.to_string(), listener.clone())),
        }
    }
    for event in old_listeners.keys() {
        if new_props.listener(event).is_none() {
            delta.removed_listeners.push(event.clone());
        }
    }

    delta
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn element_with(doc: &mut Document, attrs: &[(&str, PropValue)]) -> NodeId {
        let node = doc.create_element("div");
        for (name, value) in attrs {
            doc.set_attr(node, *name, value.clone());
        }
        node
    }

    #[test]
    fn test_attr_set_remove_and_noop() {
        let mut doc = Document::new();
        let node = element_with(
            &mut doc,
            &[("keep", PropValue::from(1)), ("drop", PropValue::from(2)), ("change", PropValue::from(3))],
        );
        let table = HashMap::new();

        let new_props = Props::new()
            .attr("keep", 1)
            .attr("change", 4)
            .attr("fresh", 5)
            .attr("cleared", false);

        let delta = diff_props(&doc, &table, node, &new_props);
        assert_eq!(delta.flags(), DeltaFlags::ATTRS);

        let set: Vec<&str> = delta.set_attrs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(set, vec!["change", "fresh"]);
        let removed: Vec<&str> = delta.removed_attrs.iter().map(String::as_str).collect();
        assert_eq!(removed, vec!["drop"]);
    }

    #[test]
    fn test_removal_value_clears_present_attr() {
        let mut doc = Document::new();
        let node = element_with(&mut doc, &[("disabled", PropValue::from(true))]);
        let table = HashMap::new();

        let delta = diff_props(&doc, &table, node, &Props::new().attr("disabled", false));
        assert_eq!(delta.removed_attrs.as_slice(), &["disabled".to_string()]);
        assert!(delta.set_attrs.is_empty());

        // Absent before: nothing to clear, nothing to set.
        let bare = element_with(&mut doc, &[]);
        let delta = diff_props(&doc, &table, bare, &Props::new().attr("disabled", false));
        assert!(delta.is_empty());
    }

    #[test]
    fn test_listener_identity_noop_and_replace() {
        let mut doc = Document::new();
        let node = element_with(&mut doc, &[]);

        let stable = Listener::new(|_| {});
        let mut table: HashMap<NodeId, IndexMap<String, Listener>> = HashMap::new();
        table
            .entry(node)
            .or_default()
            .insert("click".to_string(), stable.clone());

        // Same identity: no ops at all.
        let delta = diff_props(&doc, &table, node, &Props::new().on("click", stable.clone()));
        assert!(delta.is_empty());

        // New identity: replaced.
        let delta = diff_props(&doc, &table, node, &Props::new().on("click", Listener::new(|_| {})));
        assert_eq!(delta.flags(), DeltaFlags::LISTENERS);
        assert_eq!(delta.set_listeners.len(), 1);
        assert!(delta.removed_listeners.is_empty());

        // Gone: detached.
        let delta = diff_props(&doc, &table, node, &Props::new());
        assert_eq!(delta.removed_listeners.as_slice(), &["click".to_string()]);
    }
}
