//! The planning walk: diff a virtual child list against the live tree.
//!
//! Planning never mutates the attached tree. Reused nodes get update ops;
//! replaced slots get their successor built detached and a `ReplaceNode`
//! op; keyed lists run through the reorder plan (move estimate + LIS +
//! fast-path gate, computed once); component slots re-render their
//! instances in place and recurse into the output one layer deeper.
//!
//! Component layering: a live node produced through nested components
//! carries a backref chain `(layer, instance)`. Matching at a slot happens
//! layer by layer - the outermost component first, then its output, and so
//! on down to the concrete element.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::error::EngineError;
use crate::host::NodeId;
use crate::instance::InstanceId;
use crate::runtime::{render_instance, Runtime};
use crate::vnode::same_render_fn;

use super::keyed::{self, ReorderPlan};
use super::normalize::{self, ConcreteNode, NormItem};
use super::ops::{MutationOp, PlanCx};
use super::props;
use super::text;

fn chain_entry(rt: &Runtime, node: NodeId, layer: usize) -> Option<InstanceId> {
    rt.inner.backrefs.borrow().get(&node).and_then(|chain| {
        chain
            .iter()
            .find(|&&(l, _)| l == layer)
            .map(|&(_, instance)| instance)
    })
}

fn chain_occupied(rt: &Runtime, node: NodeId, layer: usize) -> bool {
    chain_entry(rt, node, layer).is_some()
}

// =============================================================================
// Child Lists
// =============================================================================

/// Plan a parent's child list against `items`.
pub(crate) fn plan_children(
    cx: &mut PlanCx,
    parent: NodeId,
    items: Vec<NormItem>,
) -> Result<(), EngineError> {
    let old_children = cx.doc.borrow().children(parent).to_vec();

    if text::bulk_eligible(&items) {
        return text::plan_bulk_text(cx, parent, &old_children, &items);
    }

    let old_keyed: IndexMap<String, NodeId> = cx
        .rt
        .inner
        .keyed
        .borrow()
        .get(&parent)
        .cloned()
        .unwrap_or_default();
    let any_new_keys = items.iter().any(|item| item.key().is_some());

    if !any_new_keys && old_keyed.is_empty() {
        plan_children_positional(cx, parent, &old_children, &items)
    } else {
        plan_children_keyed(cx, parent, old_children, old_keyed, items)
    }
}

/// Unkeyed children reconcile purely positionally: matching slots update in
/// place, extra old nodes are removed, extra new ones appended.
fn plan_children_positional(
    cx: &mut PlanCx,
    parent: NodeId,
    old_children: &[NodeId],
    items: &[NormItem],
) -> Result<(), EngineError> {
    let shared = old_children.len().min(items.len());
    for i in 0..shared {
        plan_slot(cx, parent, old_children[i], &items[i], 0)?;
    }
    for item in &items[shared..] {
        let staged = build_staged(cx, item, 0)?;
        cx.push(MutationOp::InsertBefore { parent, node: staged, anchor: None });
    }
    for &node in &old_children[shared..] {
        cx.push(MutationOp::RemoveSubtree { node });
    }
    Ok(())
}

/// Keyed reconciliation: reuse by key, relocate outside the LIS, fall into
/// the bulk rebuild on pathological reorders.
fn plan_children_keyed(
    cx: &mut PlanCx,
    parent: NodeId,
    old_children: Vec<NodeId>,
    old_keyed: IndexMap<String, NodeId>,
    items: Vec<NormItem>,
) -> Result<(), EngineError> {
    let old_pos: HashMap<NodeId, usize> = old_children
        .iter()
        .enumerate()
        .map(|(i, &n)| (n, i))
        .collect();
    // The commit keeps the map fresh; stale entries would alias freed slots.
    debug_assert!(old_keyed.values().all(|n| old_pos.contains_key(n)));

    let new_keys: Vec<&str> = items.iter().filter_map(NormItem::key).collect();
    let new_key_set: HashSet<&str> = new_keys.iter().copied().collect();
    let old_survivors: Vec<&str> = old_keyed
        .keys()
        .map(String::as_str)
        .filter(|k| new_key_set.contains(k))
        .collect();
    let new_survivors: Vec<&str> = new_keys
        .iter()
        .copied()
        .filter(|k| old_keyed.contains_key(*k))
        .collect();
    let estimate = keyed::move_estimate(&old_survivors, &new_survivors);

    // Probe reused nodes for prop/listener deltas (and shape mismatches,
    // which make a blind key->node rebuild unsafe).
    let items_by_key: HashMap<&str, &NormItem> = items
        .iter()
        .filter_map(|item| item.key().map(|k| (k, item)))
        .collect();
    let mut any_delta = false;
    for &key in &new_survivors {
        if !survivor_clean(cx, old_keyed[key], items_by_key[key]) {
            any_delta = true;
            break;
        }
    }

    // The one live-tree read: previous positions for the new key order.
    let positions: Vec<usize> = new_survivors
        .iter()
        .map(|&k| old_pos[&old_keyed[k]])
        .collect();
    let plan = keyed::build_reorder_plan(
        new_keys.len(),
        estimate,
        &positions,
        any_delta,
        cx.rt.inner.fast_path_enabled.get(),
    );
    debug!(
        parent = %parent,
        keyed = plan.keyed_len,
        moves = plan.move_estimate,
        keep = plan.keep_count,
        fast = plan.fast_path,
        blocked = plan.blocked_by_delta,
        "keyed reorder plan"
    );

    if plan.fast_path {
        return plan_fast_rebuild(cx, parent, &old_keyed, &items, &plan);
    }

    // ---- general path ----
    for (key, &node) in &old_keyed {
        if !new_key_set.contains(key.as_str()) {
            cx.push(MutationOp::RemoveSubtree { node });
        }
    }
    let keyed_nodes: HashSet<NodeId> = old_keyed.values().copied().collect();
    let old_unkeyed: Vec<NodeId> = old_children
        .iter()
        .copied()
        .filter(|n| !keyed_nodes.contains(n))
        .collect();
    let mut unkeyed_cursor = 0usize;
    let mut lis_iter = plan.in_lis.iter().copied();

    struct Resolved {
        node: NodeId,
        is_new: bool,
        stay: bool,
    }
    let mut resolved: Vec<Resolved> = Vec::with_capacity(items.len());
    let mut entries: Vec<(String, NodeId)> = Vec::new();

    for item in &items {
        let slot = if let Some(key) = item.key() {
            if let Some(&node) = old_keyed.get(key) {
                let stay = lis_iter.next().unwrap_or(false);
                let node = plan_slot(cx, parent, node, item, 0)?;
                Resolved { node, is_new: false, stay }
            } else {
                let node = build_staged(cx, item, 0)?;
                Resolved { node, is_new: true, stay: false }
            }
        } else if unkeyed_cursor < old_unkeyed.len() {
            let node = old_unkeyed[unkeyed_cursor];
            unkeyed_cursor += 1;
            let node = plan_slot(cx, parent, node, item, 0)?;
            Resolved { node, is_new: false, stay: false }
        } else {
            let node = build_staged(cx, item, 0)?;
            Resolved { node, is_new: true, stay: false }
        };
        if let Some(key) = item.key() {
            entries.push((key.to_string(), slot.node));
        }
        resolved.push(slot);
    }
    for &node in &old_unkeyed[unkeyed_cursor..] {
        cx.push(MutationOp::RemoveSubtree { node });
    }

    // Relocate everything outside the LIS: one insert each, end to start,
    // anchoring on the already-settled successor.
    let mut anchor: Option<NodeId> = None;
    for slot in resolved.iter().rev() {
        if slot.is_new || !slot.stay {
            cx.push(MutationOp::InsertBefore { parent, node: slot.node, anchor });
        }
        anchor = Some(slot.node);
    }

    cx.push(MutationOp::SetKeyedEntries { parent, entries });
    Ok(())
}

/// Can a keyed survivor be reused by the bulk rebuild with zero ops?
fn survivor_clean(cx: &PlanCx, node: NodeId, item: &NormItem) -> bool {
    match &item.vnode {
        // Keys never sit on text leaves.
        ConcreteNode::Text(_) => false,
        ConcreteNode::Intrinsic(n) => {
            if chain_occupied(&cx.rt, node, 0) {
                return false;
            }
            if cx.doc.borrow().tag(node) != Some(n.tag.as_str()) {
                return false;
            }
            let delta = props::diff_props(
                &cx.doc.borrow(),
                &cx.rt.inner.listeners.borrow(),
                node,
                &n.props,
            );
            delta.is_empty()
        }
        ConcreteNode::Component(c) => {
            let Some(instance_id) = chain_entry(&cx.rt, node, 0) else {
                return false;
            };
            let found = cx.rt.inner.instances.borrow().get(instance_id);
            let Some(instance) = found else { return false };
            if !same_render_fn(&instance.render, &c.render) {
                return false;
            }
            let st = instance.state.borrow();
            st.key.as_deref() == c.key.as_deref()
                && st.props.same(&c.props)
                && Rc::ptr_eq(&st.owner_frame, &item.frame)
        }
    }
}

/// The fast path: rebuild the full position list from the key -> node map
/// and commit it as a single atomic tree replacement.
fn plan_fast_rebuild(
    cx: &mut PlanCx,
    parent: NodeId,
    old_keyed: &IndexMap<String, NodeId>,
    items: &[NormItem],
    plan: &ReorderPlan,
) -> Result<(), EngineError> {
    debug!(parent = %parent, keyed = plan.keyed_len, "fast path: bulk position rebuild");
    let mark = cx.ops.len();

    let mut final_children = Vec::with_capacity(items.len());
    let mut entries = Vec::new();
    for item in items {
        let node = match item.key().and_then(|k| old_keyed.get(k)) {
            Some(&node) => match &item.vnode {
                // The probe verified a zero delta; descend for child updates.
                ConcreteNode::Intrinsic(_) => plan_slot(cx, parent, node, item, 0)?,
                // Identical props and frame: reuse as-is, no re-render.
                _ => node,
            },
            None => build_staged(cx, item, 0)?,
        };
        if let Some(key) = item.key() {
            entries.push((key.to_string(), node));
        }
        final_children.push(node);
    }

    cx.push(MutationOp::ReplaceChildren { parent, children: final_children });
    cx.push(MutationOp::SetKeyedEntries { parent, entries });

    #[cfg(debug_assertions)]
    {
        let structural = cx.ops[mark..]
            .iter()
            .filter(|op| op.is_structural_on(parent))
            .count();
        if structural != 1 {
            return Err(EngineError::CommitInvariant(format!(
                "fast path emitted {structural} structural mutations on one parent"
            )));
        }
    }
    #[cfg(not(debug_assertions))]
    let _ = mark;

    Ok(())
}

// =============================================================================
// Slots
// =============================================================================

/// Reuse-or-replace one position. Returns the node that ends up in the
/// slot (the same node, or its staged replacement).
pub(crate) fn plan_slot(
    cx: &mut PlanCx,
    parent: NodeId,
    node: NodeId,
    item: &NormItem,
    layer: usize,
) -> Result<NodeId, EngineError> {
    match &item.vnode {
        ConcreteNode::Text(data) => {
            let occupied = chain_occupied(&cx.rt, node, layer);
            let old_text = cx.doc.borrow().text(node).map(str::to_string);
            match old_text {
                // Update the existing text node's data in place.
                Some(old) if !occupied => {
                    if old != *data {
                        cx.push(MutationOp::SetText { node, data: data.clone() });
                    }
                    Ok(node)
                }
                _ => replace_slot(cx, parent, node, item, layer),
            }
        }
        ConcreteNode::Intrinsic(n) => {
            let occupied = chain_occupied(&cx.rt, node, layer);
            let tag_matches = cx.doc.borrow().tag(node) == Some(n.tag.as_str());
            if !occupied && tag_matches {
                let delta = props::diff_props(
                    &cx.doc.borrow(),
                    &cx.rt.inner.listeners.borrow(),
                    node,
                    &n.props,
                );
                if !delta.is_empty() {
                    trace!(node = %node, flags = ?delta.flags(), "prop delta");
                }
                delta.emit(node, &mut cx.ops);
                let mut child_items = Vec::new();
                normalize::normalize_children(&n.children, &item.frame, &mut child_items);
                plan_children(cx, node, child_items)?;
                Ok(node)
            } else {
                replace_slot(cx, parent, node, item, layer)
            }
        }
        ConcreteNode::Component(c) => {
            if let Some(instance_id) = chain_entry(&cx.rt, node, layer) {
                let found = cx.rt.inner.instances.borrow().get(instance_id);
                if let Some(instance) = found {
                    let matches = same_render_fn(&instance.render, &c.render)
                        && instance.state.borrow().key.as_deref() == c.key.as_deref();
                    if matches {
                        {
                            let mut st = instance.state.borrow_mut();
                            st.props = c.props.clone();
                            st.owner_frame = item.frame.clone();
                        }
                        let output = render_instance(&cx.rt, &instance)?;
                        let single = normalize::normalize_single(&output, &item.frame)?;
                        return plan_slot(cx, parent, node, &single, layer + 1);
                    }
                }
            }
            replace_slot(cx, parent, node, item, layer)
        }
    }
}

/// Type/key mismatch: build the successor detached and swap it in. Shared
/// outer component layers (below `layer`) migrate to the replacement.
fn replace_slot(
    cx: &mut PlanCx,
    parent: NodeId,
    node: NodeId,
    item: &NormItem,
    layer: usize,
) -> Result<NodeId, EngineError> {
    let staged = build_staged(cx, item, layer)?;
    cx.push(MutationOp::ReplaceNode { parent, old: node, new: staged, layer });
    Ok(staged)
}

// =============================================================================
// Staged Builds
// =============================================================================

/// Build a fresh subtree detached in the document. Attributes go straight
/// onto the staged nodes; listeners, keyed entries, and instance mounts are
/// recorded as ops so a failed plan leaves no side-table residue. Every
/// created node registers itself in the staging list, so a failure halfway
/// through a build still frees everything on discard.
pub(crate) fn build_staged(
    cx: &mut PlanCx,
    item: &NormItem,
    layer: usize,
) -> Result<NodeId, EngineError> {
    match &item.vnode {
        ConcreteNode::Text(data) => {
            let node = cx.doc.borrow_mut().create_text(data.clone());
            cx.staged.push(node);
            Ok(node)
        }
        ConcreteNode::Intrinsic(n) => {
            let node = cx.doc.borrow_mut().create_element(n.tag.clone());
            cx.staged.push(node);
            for (name, value) in n.props.attrs() {
                if !value.is_removal() {
                    cx.doc.borrow_mut().set_attr(node, name, value.clone());
                }
            }
            for (event, listener) in n.props.listeners() {
                cx.push(MutationOp::SetListener {
                    node,
                    event: event.to_string(),
                    listener: listener.clone(),
                });
            }
            let mut child_items = Vec::new();
            normalize::normalize_children(&n.children, &item.frame, &mut child_items);
            let mut entries = Vec::new();
            for child in &child_items {
                let child_node = build_staged(cx, child, 0)?;
                cx.doc.borrow_mut().append_child(node, child_node);
                if let Some(key) = child.key() {
                    entries.push((key.to_string(), child_node));
                }
            }
            if !entries.is_empty() {
                cx.push(MutationOp::SetKeyedEntries { parent: node, entries });
            }
            Ok(node)
        }
        ConcreteNode::Component(c) => {
            let instance = cx.rt.inner.instances.borrow_mut().insert(
                c.render.clone(),
                c.props.clone(),
                c.key.clone(),
                item.frame.clone(),
                layer,
                false,
            );
            cx.created.push(instance.id);
            let output = render_instance(&cx.rt, &instance)?;
            let single = normalize::normalize_single(&output, &item.frame)?;
            let node = build_staged(cx, &single, layer + 1)?;
            cx.push(MutationOp::MountInstance { instance: instance.id, node, layer });
            Ok(node)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::super::ops;
    use super::*;
    use crate::context::ContextFrame;
    use crate::host::Document;
    use crate::vnode::{el, text, VNode};

    fn rig() -> (Runtime, Rc<RefCell<Document>>, NodeId) {
        let doc = Rc::new(RefCell::new(Document::new()));
        let parent = doc.borrow_mut().create_element("ul");
        (Runtime::new(), doc, parent)
    }

    fn items_of(children: Vec<VNode>) -> Vec<NormItem> {
        let frame = ContextFrame::root();
        let mut out = Vec::new();
        normalize::normalize_children(&children, &frame, &mut out);
        out
    }

    fn plan(rt: &Runtime, doc: &Rc<RefCell<Document>>, parent: NodeId, children: Vec<VNode>) -> PlanCx {
        let mut cx = PlanCx::new(rt.clone(), doc.clone());
        plan_children(&mut cx, parent, items_of(children)).unwrap();
        cx
    }

    fn commit(rt: &Runtime, doc: &Rc<RefCell<Document>>, parent: NodeId, children: Vec<VNode>) {
        let cx = plan(rt, doc, parent, children);
        ops::apply(rt, doc, cx.ops).unwrap();
    }

    fn rows(keys: &[&str]) -> Vec<VNode> {
        keys.iter()
            .map(|k| el("li").key(*k).child(text(*k)).into())
            .collect()
    }

    fn structural_count(cx: &PlanCx, parent: NodeId) -> usize {
        cx.ops.iter().filter(|op| op.is_structural_on(parent)).count()
    }

    #[test]
    fn test_positional_text_update_is_non_structural() {
        let (rt, doc, parent) = rig();
        commit(&rt, &doc, parent, vec![el("div").child(text("a")).into()]);

        let cx = plan(&rt, &doc, parent, vec![el("div").child(text("b")).into()]);
        assert_eq!(structural_count(&cx, parent), 0);
        assert_eq!(cx.ops.len(), 1);
        assert!(matches!(cx.ops[0], MutationOp::SetText { .. }));

        ops::apply(&rt, &doc, cx.ops).unwrap();
        assert_eq!(doc.borrow().snapshot(parent), "<ul><div>\"b\"</div></ul>");
    }

    #[test]
    fn test_keyed_permutation_moves_only_outside_lis() {
        let (rt, doc, parent) = rig();
        commit(&rt, &doc, parent, rows(&["a", "b", "c", "d"]));
        let before = doc.borrow().children(parent).to_vec();

        // [d,a,b,c]: LIS is a,b,c - exactly one insert relocates d.
        let cx = plan(&rt, &doc, parent, rows(&["d", "a", "b", "c"]));
        let inserts = cx
            .ops
            .iter()
            .filter(|op| matches!(op, MutationOp::InsertBefore { .. }))
            .count();
        assert_eq!(inserts, 1);

        ops::apply(&rt, &doc, cx.ops).unwrap();
        let after = doc.borrow().children(parent).to_vec();
        assert_eq!(after, vec![before[3], before[0], before[1], before[2]]);
    }

    #[test]
    fn test_keyed_removal_and_addition() {
        let (rt, doc, parent) = rig();
        commit(&rt, &doc, parent, rows(&["a", "b", "c"]));
        let before = doc.borrow().children(parent).to_vec();

        commit(&rt, &doc, parent, rows(&["b", "x"]));
        let after = doc.borrow().children(parent).to_vec();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0], before[1]);
        assert!(!doc.borrow().contains(before[0]));
        assert!(!doc.borrow().contains(before[2]));
        assert_eq!(
            doc.borrow().snapshot(parent),
            "<ul><li>\"b\"</li> <li>\"x\"</li></ul>"
        );
    }

    #[test]
    fn test_fast_rebuild_emits_single_structural_mutation() {
        let (rt, doc, parent) = rig();
        let keys: Vec<String> = (0..150).map(|i| format!("k{i}")).collect();
        let initial: Vec<&str> = keys.iter().map(String::as_str).collect();
        commit(&rt, &doc, parent, rows(&initial));
        let before = doc.borrow().children(parent).to_vec();

        let reversed: Vec<&str> = keys.iter().rev().map(String::as_str).collect();
        let cx = plan(&rt, &doc, parent, rows(&reversed));
        assert_eq!(structural_count(&cx, parent), 1);
        assert!(cx
            .ops
            .iter()
            .any(|op| matches!(op, MutationOp::ReplaceChildren { .. })));

        ops::apply(&rt, &doc, cx.ops).unwrap();
        let after = doc.borrow().children(parent).to_vec();
        let mut expected = before;
        expected.reverse();
        assert_eq!(after, expected);
    }

    #[test]
    fn test_attribute_delta_forces_general_path() {
        let (rt, doc, parent) = rig();
        let keys: Vec<String> = (0..150).map(|i| format!("k{i}")).collect();
        let initial: Vec<VNode> = keys
            .iter()
            .map(|k| el("li").key(k.clone()).attr("tone", 0).child(text(k.clone())).into())
            .collect();
        commit(&rt, &doc, parent, initial);

        // Reversal plus one attribute change: the bulk rebuild would have to
        // drop the update, so the general diff runs instead.
        let updated: Vec<VNode> = keys
            .iter()
            .rev()
            .map(|k| {
                let tone = if k == "k7" { 1 } else { 0 };
                el("li").key(k.clone()).attr("tone", tone).child(text(k.clone())).into()
            })
            .collect();
        let cx = plan(&rt, &doc, parent, updated);
        assert!(!cx
            .ops
            .iter()
            .any(|op| matches!(op, MutationOp::ReplaceChildren { .. })));
        assert!(cx
            .ops
            .iter()
            .any(|op| matches!(op, MutationOp::SetAttr { .. })));
    }
}
