//! Mutation ops and the commit/teardown machinery.
//!
//! Planning renders components and builds replacement subtrees detached in
//! the document, recording everything it wants to do as [`MutationOp`]s.
//! Nothing attached is touched until the whole plan succeeded; then
//! [`apply`] runs the ops in order, keeping the side tables (listeners,
//! keyed maps, instance backrefs) consistent with every structural change
//! it makes. A failed plan is thrown away with [`discard`] - staged nodes
//! freed, never-mounted instances destroyed, the live tree untouched.
//!
//! Teardown runs inside apply: removed subtrees detach their listeners,
//! abort their instances' resource cells, and run cleanup lists. Cleanup
//! failures are collected per instance and never block siblings; they
//! surface after the commit according to the engine's cleanup mode.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::warn;

use crate::error::{CleanupFailure, EngineError};
use crate::host::{Document, NodeId};
use crate::instance::InstanceId;
use crate::resource;
use crate::runtime::Runtime;
use crate::types::{CleanupMode, Listener, PropValue};

// =============================================================================
// Ops
// =============================================================================

/// One planned mutation. Applied in plan order.
pub(crate) enum MutationOp {
    SetAttr { node: NodeId, name: String, value: PropValue },
    RemoveAttr { node: NodeId, name: String },
    SetListener { node: NodeId, event: String, listener: Listener },
    RemoveListener { node: NodeId, event: String },
    SetText { node: NodeId, data: String },
    /// Insert (or move) `node` before `anchor` under `parent`; `None`
    /// appends.
    InsertBefore { parent: NodeId, node: NodeId, anchor: Option<NodeId> },
    /// Tear down and free a subtree.
    RemoveSubtree { node: NodeId },
    /// Swap `new` into `old`'s position. Instances on `old`'s backref chain
    /// below `layer` are shared with the replacement and migrate to `new`;
    /// everything from `layer` up is torn down with the old subtree.
    ReplaceNode { parent: NodeId, old: NodeId, new: NodeId, layer: usize },
    /// Swap a parent's entire child list in one structural mutation; the
    /// children no longer present are torn down.
    ReplaceChildren { parent: NodeId, children: Vec<NodeId> },
    /// Rebuild a parent's key -> node map (empty entries clear it).
    SetKeyedEntries { parent: NodeId, entries: Vec<(String, NodeId)> },
    /// Point one key at a new node (slot-level re-render replaced its root).
    SetKeyedEntry { parent: NodeId, key: String, node: NodeId },
    /// Register a freshly built instance at its host node.
    MountInstance { instance: InstanceId, node: NodeId, layer: usize },
}

impl MutationOp {
    /// Whether this op structurally mutates `parent`'s child list.
    pub fn is_structural_on(&self, target: NodeId) -> bool {
        match self {
            MutationOp::InsertBefore { parent, .. }
            | MutationOp::ReplaceNode { parent, .. }
            | MutationOp::ReplaceChildren { parent, .. } => *parent == target,
            _ => false,
        }
    }
}

// =============================================================================
// Plan Context
// =============================================================================

/// Accumulator for one planning pass.
pub(crate) struct PlanCx {
    pub rt: Runtime,
    pub doc: Rc<RefCell<Document>>,
    pub ops: Vec<MutationOp>,
    /// Every node created detached this pass; freed if the plan fails.
    pub staged: Vec<NodeId>,
    /// Instances created this pass; destroyed without cleanup if the plan
    /// fails (they never mounted).
    pub created: Vec<InstanceId>,
}

impl PlanCx {
    pub fn new(rt: Runtime, doc: Rc<RefCell<Document>>) -> Self {
        Self {
            rt,
            doc,
            ops: Vec::new(),
            staged: Vec::new(),
            created: Vec::new(),
        }
    }

    pub fn push(&mut self, op: MutationOp) {
        self.ops.push(op);
    }
}

// =============================================================================
// Apply
// =============================================================================

/// Apply a successful plan: mutate the live tree and side tables, tear down
/// what the ops remove, then run mount operations for fresh instances.
///
/// Cleanup failures are collected across the whole commit and surfaced at
/// the end per the engine's cleanup mode; the commit itself stands.
pub(crate) fn apply(
    rt: &Runtime,
    doc: &Rc<RefCell<Document>>,
    ops: Vec<MutationOp>,
) -> Result<(), EngineError> {
    let mut failures: Vec<CleanupFailure> = Vec::new();
    let mut mounted: Vec<InstanceId> = Vec::new();

    for op in ops {
        match op {
            MutationOp::SetAttr { node, name, value } => {
                doc.borrow_mut().set_attr(node, name, value);
            }
            MutationOp::RemoveAttr { node, name } => {
                doc.borrow_mut().remove_attr(node, &name);
            }
            MutationOp::SetListener { node, event, listener } => {
                rt.inner
                    .listeners
                    .borrow_mut()
                    .entry(node)
                    .or_default()
                    .insert(event, listener);
            }
            MutationOp::RemoveListener { node, event } => {
                let mut table = rt.inner.listeners.borrow_mut();
                let emptied = match table.get_mut(&node) {
                    Some(entries) => {
                        entries.shift_remove(&event);
                        entries.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    table.remove(&node);
                }
            }
            MutationOp::SetText { node, data } => {
                doc.borrow_mut().set_text(node, data);
            }
            MutationOp::InsertBefore { parent, node, anchor } => {
                doc.borrow_mut().insert_before(parent, node, anchor);
            }
            MutationOp::RemoveSubtree { node } => {
                teardown_subtree(rt, doc, node, &mut failures);
                doc.borrow_mut().remove_subtree(node);
            }
            MutationOp::ReplaceNode { parent, old, new, layer } => {
                teardown_subtree_partial(rt, doc, old, layer, &mut failures);
                migrate_chain_prefix(rt, old, new);
                doc.borrow_mut().replace_child(parent, old, new);
                doc.borrow_mut().remove_subtree(old);
            }
            MutationOp::ReplaceChildren { parent, children } => {
                let dropped = doc.borrow_mut().replace_children(parent, children);
                for node in dropped {
                    teardown_subtree(rt, doc, node, &mut failures);
                    doc.borrow_mut().remove_subtree(node);
                }
            }
            MutationOp::SetKeyedEntries { parent, entries } => {
                let mut keyed = rt.inner.keyed.borrow_mut();
                if entries.is_empty() {
                    keyed.remove(&parent);
                } else {
                    keyed.insert(parent, entries.into_iter().collect::<IndexMap<_, _>>());
                }
            }
            MutationOp::SetKeyedEntry { parent, key, node } => {
                rt.inner
                    .keyed
                    .borrow_mut()
                    .entry(parent)
                    .or_default()
                    .insert(key, node);
            }
            MutationOp::MountInstance { instance, node, layer } => {
                {
                    let mut backrefs = rt.inner.backrefs.borrow_mut();
                    let chain = backrefs.entry(node).or_default();
                    let at = chain.partition_point(|&(l, _)| l < layer);
                    chain.insert(at, (layer, instance));
                }
                let found = rt.inner.instances.borrow().get(instance);
                if let Some(inst) = found {
                    let mut st = inst.state.borrow_mut();
                    st.host = Some(node);
                    st.mounted = true;
                    mounted.push(instance);
                }
            }
        }
    }

    // Mount operations run after the whole tree settled.
    for id in mounted {
        let found = rt.inner.instances.borrow().get(id);
        let Some(inst) = found else { continue };
        let mount_ops = std::mem::take(&mut inst.state.borrow_mut().mount_ops);
        for op in mount_ops {
            op();
        }
    }

    finish_cleanup(rt, failures)
}

/// Move the shared backref prefix (outer component layers) from a replaced
/// node to its replacement, retargeting those instances' hosts.
fn migrate_chain_prefix(rt: &Runtime, old: NodeId, new: NodeId) {
    let prefix = rt.inner.backrefs.borrow_mut().remove(&old).unwrap_or_default();
    if prefix.is_empty() {
        return;
    }
    {
        let mut backrefs = rt.inner.backrefs.borrow_mut();
        let chain = backrefs.entry(new).or_default();
        for &(layer, instance) in prefix.iter().rev() {
            chain.insert(0, (layer, instance));
        }
    }
    for &(_, instance) in &prefix {
        let found = rt.inner.instances.borrow().get(instance);
        if let Some(inst) = found {
            inst.state.borrow_mut().host = Some(new);
        }
    }
}

// =============================================================================
// Teardown
// =============================================================================

/// Tear down every instance, listener, and keyed map in a subtree.
pub(crate) fn teardown_subtree(
    rt: &Runtime,
    doc: &Rc<RefCell<Document>>,
    node: NodeId,
    failures: &mut Vec<CleanupFailure>,
) {
    teardown_subtree_partial(rt, doc, node, 0, failures)
}

/// Like [`teardown_subtree`], but instances on the root node's chain below
/// `from_layer` are spared (they are shared with a replacement).
pub(crate) fn teardown_subtree_partial(
    rt: &Runtime,
    doc: &Rc<RefCell<Document>>,
    node: NodeId,
    from_layer: usize,
    failures: &mut Vec<CleanupFailure>,
) {
    let nodes = {
        let d = doc.borrow();
        let mut out = Vec::new();
        d.collect_subtree(node, &mut out);
        out
    };
    for (i, &n) in nodes.iter().enumerate() {
        rt.inner.listeners.borrow_mut().remove(&n);
        rt.inner.keyed.borrow_mut().remove(&n);

        let drained: SmallVec<[(usize, InstanceId); 2]> = {
            let mut backrefs = rt.inner.backrefs.borrow_mut();
            if i == 0 && from_layer > 0 {
                let mut dropped: SmallVec<[(usize, InstanceId); 2]> = SmallVec::new();
                let mut emptied = false;
                if let Some(chain) = backrefs.get_mut(&n) {
                    chain.retain(|&mut (layer, instance)| {
                        if layer >= from_layer {
                            dropped.push((layer, instance));
                            false
                        } else {
                            true
                        }
                    });
                    emptied = chain.is_empty();
                }
                if emptied {
                    backrefs.remove(&n);
                }
                dropped
            } else {
                backrefs.remove(&n).unwrap_or_default()
            }
        };
        for (_, instance) in drained {
            teardown_instance(rt, instance, failures);
        }
    }
}

/// Destroy one instance: abort its resource cells, run its cleanup list,
/// release its arena slot. A failing cleanup never blocks the rest.
pub(crate) fn teardown_instance(
    rt: &Runtime,
    id: InstanceId,
    failures: &mut Vec<CleanupFailure>,
) {
    let removed = rt.inner.instances.borrow_mut().remove(id);
    let Some(instance) = removed else { return };

    let (cleanups, cells) = {
        let mut st = instance.state.borrow_mut();
        st.mounted = false;
        (std::mem::take(&mut st.cleanups), st.cell_ids())
    };
    for cell in cells {
        resource::destroy_cell(rt, cell);
    }
    for cleanup in cleanups {
        if let Err(err) = cleanup() {
            failures.push(CleanupFailure { instance: id.as_u64(), message: err.0 });
        }
    }
    rt.inner.pending_renders.borrow_mut().remove(&id);
}

/// Surface collected cleanup failures per the engine's cleanup mode.
pub(crate) fn finish_cleanup(
    rt: &Runtime,
    failures: Vec<CleanupFailure>,
) -> Result<(), EngineError> {
    if failures.is_empty() {
        return Ok(());
    }
    match rt.inner.cleanup_mode.get() {
        CleanupMode::Strict => Err(EngineError::CleanupFailure { failures }),
        CleanupMode::Lenient => {
            for failure in &failures {
                warn!(
                    instance = failure.instance,
                    error = %failure.message,
                    "cleanup failed, continuing"
                );
            }
            Ok(())
        }
    }
}

// =============================================================================
// Discard
// =============================================================================

/// Throw away a failed plan: free staged nodes and destroy never-mounted
/// instances (no cleanups ran for them; their cells are aborted). The live
/// tree was never touched.
pub(crate) fn discard(rt: &Runtime, doc: &Rc<RefCell<Document>>, cx: &PlanCx) {
    // Subtree removal is generation-guarded, so a child freed through its
    // parent is a harmless no-op when its own entry comes up.
    for &node in &cx.staged {
        doc.borrow_mut().remove_subtree(node);
    }
    for &id in &cx.created {
        let removed = rt.inner.instances.borrow_mut().remove(id);
        if let Some(instance) = removed {
            let cells = instance.state.borrow().cell_ids();
            for cell in cells {
                resource::destroy_cell(rt, cell);
            }
        }
        rt.inner.pending_renders.borrow_mut().remove(&id);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use smallvec::smallvec;

    use super::super::diff;
    use super::super::normalize::{normalize_children, NormItem};
    use super::*;
    use crate::context::ContextFrame;
    use crate::types::{Event, Listener, Props};
    use crate::vnode::{component, el, text, VNode};

    fn rig() -> (Runtime, Rc<RefCell<Document>>, NodeId) {
        let doc = Rc::new(RefCell::new(Document::new()));
        let host = doc.borrow_mut().create_element("app");
        (Runtime::new(), doc, host)
    }

    fn items_of(children: Vec<VNode>) -> Vec<NormItem> {
        let frame = ContextFrame::root();
        let mut out = Vec::new();
        normalize_children(&children, &frame, &mut out);
        out
    }

    fn commit(rt: &Runtime, doc: &Rc<RefCell<Document>>, parent: NodeId, children: Vec<VNode>) {
        let mut cx = PlanCx::new(rt.clone(), doc.clone());
        diff::plan_children(&mut cx, parent, items_of(children)).unwrap();
        apply(rt, doc, cx.ops).unwrap();
    }

    #[test]
    fn test_listener_table_pruned_when_emptied() {
        let (rt, doc, host) = rig();
        let node = doc.borrow_mut().create_element("button");
        doc.borrow_mut().append_child(host, node);

        let listener = Listener::new(|_| {});
        apply(
            &rt,
            &doc,
            vec![MutationOp::SetListener {
                node,
                event: "click".into(),
                listener,
            }],
        )
        .unwrap();
        assert!(rt.inner.listeners.borrow().contains_key(&node));

        apply(
            &rt,
            &doc,
            vec![MutationOp::RemoveListener { node, event: "click".into() }],
        )
        .unwrap();
        assert!(!rt.inner.listeners.borrow().contains_key(&node));
    }

    #[test]
    fn test_replace_migrates_outer_instance_to_new_node() {
        let (rt, doc, host) = rig();
        let flip = Rc::new(Cell::new(false));

        let flip_slot = flip.clone();
        let comp = component(move |_, _| {
            let root: VNode = if flip_slot.get() {
                el("b").into()
            } else {
                el("a").into()
            };
            Ok(root)
        });

        commit(&rt, &doc, host, vec![comp.clone().into()]);
        let old = doc.borrow().children(host)[0];
        assert_eq!(doc.borrow().tag(old), Some("a"));
        let chain = rt.inner.backrefs.borrow().get(&old).cloned().unwrap();
        assert_eq!(chain.len(), 1);
        let instance = chain[0].1;

        // The output root's tag flips: the node is replaced, the instance
        // survives and follows its host.
        flip.set(true);
        commit(&rt, &doc, host, vec![comp.into()]);
        let new = doc.borrow().children(host)[0];
        assert_ne!(new, old);
        assert_eq!(doc.borrow().tag(new), Some("b"));
        assert!(!doc.borrow().contains(old));

        let chain = rt.inner.backrefs.borrow().get(&new).cloned().unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0], (0, instance));
        let found = rt.inner.instances.borrow().get(instance).unwrap();
        assert_eq!(found.state.borrow().host, Some(new));
    }

    #[test]
    fn test_teardown_collects_failures_without_blocking_siblings() {
        let (rt, doc, host) = rig();
        let a = doc.borrow_mut().create_element("a");
        let b = doc.borrow_mut().create_element("b");
        doc.borrow_mut().append_child(host, a);
        doc.borrow_mut().append_child(host, b);

        let render = component(|_, _| Ok(text(""))).render;
        let sibling_ran = Rc::new(Cell::new(false));

        let failing = rt.inner.instances.borrow_mut().insert(
            render.clone(),
            Props::new(),
            None,
            ContextFrame::root(),
            0,
            false,
        );
        failing
            .state
            .borrow_mut()
            .cleanups
            .push(Box::new(|| Err("boom".into())));
        rt.inner
            .backrefs
            .borrow_mut()
            .insert(a, smallvec![(0usize, failing.id)]);

        let clean = rt.inner.instances.borrow_mut().insert(
            render,
            Props::new(),
            None,
            ContextFrame::root(),
            0,
            false,
        );
        let flag = sibling_ran.clone();
        clean.state.borrow_mut().cleanups.push(Box::new(move || {
            flag.set(true);
            Ok(())
        }));
        rt.inner
            .backrefs
            .borrow_mut()
            .insert(b, smallvec![(0usize, clean.id)]);

        let mut failures = Vec::new();
        teardown_subtree(&rt, &doc, host, &mut failures);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "boom");
        assert!(sibling_ran.get());
        assert!(rt.inner.instances.borrow().get(failing.id).is_none());
        assert!(rt.inner.instances.borrow().get(clean.id).is_none());
    }

    #[test]
    fn test_discard_frees_staging_and_pending_instances() {
        let (rt, doc, host) = rig();
        let baseline = doc.borrow().node_count();

        let comp = component(|_, _| Ok(el("inner").child(text("x")).into()));
        let mut cx = PlanCx::new(rt.clone(), doc.clone());
        diff::plan_children(
            &mut cx,
            host,
            items_of(vec![el("outer").child(comp).into()]),
        )
        .unwrap();
        assert!(doc.borrow().node_count() > baseline);
        assert_eq!(cx.created.len(), 1);
        let created = cx.created[0];

        discard(&rt, &doc, &cx);
        assert_eq!(doc.borrow().node_count(), baseline);
        assert!(rt.inner.instances.borrow().get(created).is_none());
        // Nothing reached the live tree or the side tables.
        assert_eq!(doc.borrow().children(host), &[] as &[NodeId]);
        assert!(rt.inner.listeners.borrow().is_empty());
    }

    #[test]
    fn test_committed_listener_dispatches() {
        let (rt, doc, host) = rig();
        let hits = Rc::new(Cell::new(0u32));

        let hits_slot = hits.clone();
        let press = Listener::new(move |_| hits_slot.set(hits_slot.get() + 1));
        commit(
            &rt,
            &doc,
            host,
            vec![el("button").on("click", press).into()],
        );

        let button = doc.borrow().children(host)[0];
        rt.dispatch(button, &Event::new("click")).unwrap();
        assert_eq!(hits.get(), 1);
    }
}
