//! Runtime - the shell-facing engine object.
//!
//! Owns the scheduler, the instance and cell arenas, the side tables
//! (listener table, keyed maps, instance backrefs), the current context
//! frame, and a weak reference to the host document (the shell owns the
//! document; the engine never extends its lifetime).
//!
//! Entry points:
//! - [`Runtime::mount`] - render a tree into a host node, synchronously
//! - [`Runtime::dispatch`] - deliver an event: the handler runs to
//!   completion with implicit flushes suppressed, then the queue drains to
//!   quiescence before dispatch returns (happens-before for the next event)
//! - [`Runtime::flush`] - drain scheduled work explicitly
//!
//! Failures surface synchronously at the triggering call; a failed render's
//! staging is discarded before the error reaches the caller, so the live
//! tree is exactly as the last successful commit left it.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::context::{self, ContextFrame, FrameSlot};
use crate::error::{EngineError, RenderError};
use crate::host::{Document, NodeId};
use crate::instance::{Instance, InstanceArena, InstanceId};
use crate::reconcile::{self, MutationOp, PlanCx};
use crate::resource::CellArena;
use crate::scheduler::{Scheduler, SchedulerState, Task};
use crate::scope::Scope;
use crate::types::{CleanupMode, Event, Listener, Props, RenderMode};
use crate::vnode::{RenderFn, VNode};

// =============================================================================
// Runtime
// =============================================================================

pub(crate) struct RuntimeInner {
    pub scheduler: Scheduler,
    pub instances: RefCell<InstanceArena>,
    pub cells: RefCell<CellArena>,
    /// Listener table: node -> event name -> handler.
    pub listeners: RefCell<HashMap<NodeId, IndexMap<String, Listener>>>,
    /// KeyedElementMap: parent -> key -> node, in document order.
    pub keyed: RefCell<HashMap<NodeId, IndexMap<String, NodeId>>>,
    /// Instance backrefs: node -> (layer, instance), outermost first.
    pub backrefs: RefCell<HashMap<NodeId, SmallVec<[(usize, InstanceId); 2]>>>,
    pub current_frame: FrameSlot,
    pub doc: RefCell<Weak<RefCell<Document>>>,
    pub render_mode: Cell<RenderMode>,
    pub cleanup_mode: Cell<CleanupMode>,
    /// Instances with a scheduled-but-not-run re-render.
    pub pending_renders: RefCell<HashSet<InstanceId>>,
    /// Commit window re-entrancy guard.
    pub committing: Cell<bool>,
    pub fast_path_enabled: Cell<bool>,
}

/// The engine. Cheap to clone; all clones share one inner state.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                scheduler: Scheduler::new(),
                instances: RefCell::new(InstanceArena::new()),
                cells: RefCell::new(CellArena::new()),
                listeners: RefCell::new(HashMap::new()),
                keyed: RefCell::new(HashMap::new()),
                backrefs: RefCell::new(HashMap::new()),
                current_frame: RefCell::new(None),
                doc: RefCell::new(Weak::new()),
                render_mode: Cell::new(RenderMode::default()),
                cleanup_mode: Cell::new(CleanupMode::default()),
                pending_renders: RefCell::new(HashSet::new()),
                committing: Cell::new(false),
                fast_path_enabled: Cell::new(true),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    // =========================================================================
    // Modes and Diagnostics
    // =========================================================================

    pub fn set_render_mode(&self, mode: RenderMode) {
        self.inner.render_mode.set(mode);
    }

    pub fn render_mode(&self) -> RenderMode {
        self.inner.render_mode.get()
    }

    pub fn set_cleanup_mode(&self, mode: CleanupMode) {
        self.inner.cleanup_mode.set(mode);
    }

    pub fn cleanup_mode(&self) -> CleanupMode {
        self.inner.cleanup_mode.get()
    }

    /// Test/diagnostic knob: force the general per-node diff.
    pub fn set_keyed_fast_path(&self, enabled: bool) {
        self.inner.fast_path_enabled.set(enabled);
    }

    /// Scheduler diagnostics. Debug/test surface, not a stability contract.
    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler().state()
    }

    /// Suppress implicit flushes while a handler-like span runs.
    pub fn set_in_handler(&self, value: bool) {
        self.inner.scheduler.set_in_handler(value);
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Drain scheduled work to quiescence.
    pub fn flush(&self) -> Result<(), EngineError> {
        self.inner.scheduler.flush(self)
    }

    /// Enqueue a task; flush inline unless a handler or flush is active.
    pub(crate) fn schedule(&self, task: Task) -> Result<(), EngineError> {
        self.inner.scheduler.enqueue(task);
        if self.inner.scheduler.may_flush_inline() {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Schedule an instance's re-evaluation, deduplicated per flush.
    pub(crate) fn schedule_render(&self, id: InstanceId) -> Result<(), EngineError> {
        let inserted = self.inner.pending_renders.borrow_mut().insert(id);
        if inserted {
            self.inner.scheduler.enqueue(Box::new(move |rt| {
                rt.inner.pending_renders.borrow_mut().remove(&id);
                rerender_instance(rt, id)
            }));
        }
        if self.inner.scheduler.may_flush_inline() {
            self.flush()
        } else {
            Ok(())
        }
    }

    pub(crate) fn upgrade_doc(&self) -> Result<Rc<RefCell<Document>>, EngineError> {
        self.inner
            .doc
            .borrow()
            .upgrade()
            .ok_or(EngineError::DocumentDetached)
    }

    // =========================================================================
    // Mount / Dispatch
    // =========================================================================

    /// Render `tree` into `host`'s child list. Runs synchronously; a render
    /// failure surfaces here and leaves `host` untouched.
    pub fn mount(
        &self,
        doc: &Rc<RefCell<Document>>,
        tree: VNode,
        host: NodeId,
    ) -> Result<MountHandle, EngineError> {
        *self.inner.doc.borrow_mut() = Rc::downgrade(doc);

        let render: RenderFn =
            Rc::new(move |_scope: &mut Scope<'_>, _props: &Props| Ok(tree.clone()));
        let instance = self.inner.instances.borrow_mut().insert(
            render,
            Props::new(),
            None,
            ContextFrame::root(),
            0,
            true,
        );
        {
            let mut st = instance.state.borrow_mut();
            st.host = Some(host);
            st.mounted = true;
        }
        let root = instance.id;
        debug!(root = %root, host = %host, "mount");
        if let Err(err) = self.schedule_render(root) {
            // The failed commit already rolled itself back; drop the root
            // wrapper so a re-mount starts clean.
            let mut failures = Vec::new();
            reconcile::teardown_instance(self, root, &mut failures);
            return Err(err);
        }
        Ok(MountHandle { rt: self.clone(), host, root, active: true })
    }

    /// Deliver an event to `node`'s listener for `event.name`.
    ///
    /// Returns `Ok(false)` when no listener is attached. The handler runs
    /// synchronously to completion; renders it triggers are flushed before
    /// dispatch returns, so everything it caused is visible to the next
    /// event.
    pub fn dispatch(&self, node: NodeId, event: &Event) -> Result<bool, EngineError> {
        let listener = self
            .inner
            .listeners
            .borrow()
            .get(&node)
            .and_then(|m| m.get(&event.name))
            .cloned();
        let Some(listener) = listener else {
            return Ok(false);
        };

        {
            let previous = self.inner.scheduler.in_handler();
            self.inner.scheduler.set_in_handler(true);
            let _guard = HandlerGuard { scheduler: &self.inner.scheduler, previous };
            listener.call(event);
        }
        // A nested dispatch inside a handler leaves the outer window open;
        // only the outermost dispatch drains.
        if !self.inner.scheduler.in_handler() {
            self.flush()?;
        }
        Ok(true)
    }
}

struct HandlerGuard<'a> {
    scheduler: &'a Scheduler,
    previous: bool,
}

impl Drop for HandlerGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.set_in_handler(self.previous);
    }
}

struct CommitGuard<'a>(&'a Cell<bool>);

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Evaluate an instance's render function inside its owner frame.
pub(crate) fn render_instance(
    rt: &Runtime,
    instance: &Rc<Instance>,
) -> Result<VNode, RenderError> {
    let frame = instance.state.borrow().owner_frame.clone();
    instance.state.borrow_mut().begin_render();
    let props = instance.state.borrow().props.clone();
    let render = instance.render.clone();
    let output = context::with_frame(&rt.inner.current_frame, frame, || {
        let mut scope = Scope::new(rt, instance.clone());
        (*render)(&mut scope, &props)
    })?;
    instance.state.borrow_mut().finish_render()?;
    Ok(output)
}

/// One scheduled re-render: plan against the live tree, then commit - or
/// discard the staging and propagate the failure.
pub(crate) fn rerender_instance(rt: &Runtime, id: InstanceId) -> Result<(), EngineError> {
    let found = rt.inner.instances.borrow().get(id);
    let Some(instance) = found else {
        // Unmounted between scheduling and execution.
        return Ok(());
    };
    let (mounted, is_root, host, layer, key) = {
        let st = instance.state.borrow();
        (st.mounted, st.is_root, st.host, st.layer, st.key.clone())
    };
    if !mounted {
        return Ok(());
    }
    let Some(host) = host else { return Ok(()) };
    let doc = rt.upgrade_doc()?;

    #[cfg(debug_assertions)]
    if rt.inner.committing.get() {
        return Err(EngineError::CommitInvariant(
            "re-entrant render commit".into(),
        ));
    }
    rt.inner.committing.set(true);
    let _guard = CommitGuard(&rt.inner.committing);

    let mut cx = PlanCx::new(rt.clone(), doc.clone());
    let planned: Result<(), EngineError> = (|| {
        if is_root {
            let output = render_instance(rt, &instance)?;
            let frame = instance.state.borrow().owner_frame.clone();
            let mut items = Vec::new();
            reconcile::normalize_children(std::slice::from_ref(&output), &frame, &mut items);
            reconcile::plan_children(&mut cx, host, items)
        } else {
            let output = render_instance(rt, &instance)?;
            let frame = instance.state.borrow().owner_frame.clone();
            let single = reconcile::normalize_single(&output, &frame)?;
            let parent = cx.doc.borrow().parent(host).ok_or_else(|| {
                EngineError::CommitInvariant("instance host has no parent".into())
            })?;
            let new_node = reconcile::plan_slot(&mut cx, parent, host, &single, layer + 1)?;
            if new_node != host {
                if let Some(key) = key {
                    cx.push(MutationOp::SetKeyedEntry { parent, key, node: new_node });
                }
            }
            Ok(())
        }
    })();

    match planned {
        Ok(()) => {
            let generation = instance.state.borrow().generation;
            trace!(instance = %id, generation, ops = cx.ops.len(), "commit");
            let ops = std::mem::take(&mut cx.ops);
            reconcile::apply(rt, &doc, ops)
        }
        Err(err) => {
            debug!(instance = %id, error = %err, "render failed, staging discarded");
            reconcile::discard(rt, &doc, &cx);
            Err(err)
        }
    }
}

// =============================================================================
// Mount Handle
// =============================================================================

/// Handle returned by [`Runtime::mount`] that allows unmounting.
pub struct MountHandle {
    rt: Runtime,
    host: NodeId,
    root: InstanceId,
    active: bool,
}

impl MountHandle {
    pub fn host(&self) -> NodeId {
        self.host
    }

    /// Tear the mounted tree down: abort in-flight resources, run cleanup
    /// lists, free the host's children.
    pub fn unmount(mut self) -> Result<(), EngineError> {
        self.active = false;
        unmount_root(&self.rt, self.root, self.host)
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        if self.active {
            // Best effort: the shell may already have dropped the document.
            let _ = unmount_root(&self.rt, self.root, self.host);
        }
    }
}

fn unmount_root(rt: &Runtime, root: InstanceId, host: NodeId) -> Result<(), EngineError> {
    let doc = rt.upgrade_doc()?;
    let mut failures = Vec::new();
    let children = doc.borrow().children(host).to_vec();
    for child in children {
        reconcile::teardown_subtree(rt, &doc, child, &mut failures);
        doc.borrow_mut().remove_subtree(child);
    }
    rt.inner.keyed.borrow_mut().remove(&host);
    reconcile::teardown_instance(rt, root, &mut failures);
    reconcile::finish_cleanup(rt, failures)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vnode::{el, text};

    fn rig() -> (Runtime, Rc<RefCell<Document>>, NodeId) {
        let doc = Rc::new(RefCell::new(Document::new()));
        let host = doc.borrow_mut().create_element("app");
        (Runtime::new(), doc, host)
    }

    #[test]
    fn test_mount_renders_synchronously() {
        let (rt, doc, host) = rig();
        let tree: VNode = el("div")
            .attr("id", "greeting")
            .child(text("hello"))
            .into();

        let handle = rt.mount(&doc, tree, host).unwrap();
        assert_eq!(
            doc.borrow().snapshot(host),
            "<app><div id=greeting>\"hello\"</div></app>"
        );
        handle.unmount().unwrap();
        assert_eq!(doc.borrow().snapshot(host), "<app></app>");
    }

    #[test]
    fn test_mount_failure_leaves_host_untouched() {
        let (rt, doc, host) = rig();
        let broken = crate::vnode::component(|_, _| Err(RenderError::msg("boom")));

        let result = rt.mount(&doc, broken.into(), host);
        assert!(matches!(result, Err(EngineError::StructuralRender(_))));
        assert_eq!(doc.borrow().snapshot(host), "<app></app>");
        // Nothing staged survives the discard.
        assert_eq!(doc.borrow().node_count(), 1);
    }

    #[test]
    fn test_dispatch_without_listener() {
        let (rt, doc, host) = rig();
        let _handle = rt.mount(&doc, text("leaf"), host).unwrap();
        assert_eq!(rt.dispatch(host, &Event::new("click")).unwrap(), false);
    }

    #[test]
    fn test_document_detached() {
        let (rt, doc, host) = rig();
        let handle = rt.mount(&doc, text("x"), host).unwrap();
        drop(doc);
        assert!(matches!(handle.unmount(), Err(EngineError::DocumentDetached)));
    }
}
