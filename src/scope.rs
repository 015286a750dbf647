//! Scope - the hook API handed to component render functions.
//!
//! A scope is only valid for the duration of one synchronous render of one
//! instance. Hooks fill the instance's ordered slot list; the validator in
//! the instance model rejects renders whose hook sequence diverges from the
//! first one.
//!
//! All hooks return `Result` so a component body propagates failures with
//! `?` instead of unwinding through the commit call chain.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use crate::context::{self, Context};
use crate::error::{CleanupError, EngineError, RenderError};
use crate::instance::{HookKind, HookSlot, Instance, InstanceId};
use crate::resource::{
    self, AbortSignal, CellState, Resource, ResourceJob, ResourceOutcome,
};
use crate::runtime::{Runtime, RuntimeInner};
use crate::types::{deps_equal, Dep, RenderMode};

/// In-render handle to the engine and the instance being rendered.
pub struct Scope<'a> {
    rt: &'a Runtime,
    instance: Rc<Instance>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(rt: &'a Runtime, instance: Rc<Instance>) -> Self {
        Self { rt, instance }
    }

    // =========================================================================
    // State
    // =========================================================================

    /// A per-instance state slot. Returns the current value and a handle
    /// whose `set`/`update` schedule a re-render through the scheduler.
    pub fn use_state<T: Clone + 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> Result<(T, StateHandle<T>), RenderError> {
        let existing = self.instance.state.borrow_mut().expect_slot(HookKind::State)?;
        let slot = match existing {
            Some(HookSlot::State(slot)) => slot,
            Some(HookSlot::Resource(_)) => {
                // expect_slot already validated the kind.
                return Err(RenderError::msg("hook slot kind mismatch"));
            }
            None => {
                let slot: Rc<RefCell<Box<dyn Any>>> = Rc::new(RefCell::new(Box::new(init())));
                self.instance
                    .state
                    .borrow_mut()
                    .push_slot(HookKind::State, HookSlot::State(slot.clone()));
                slot
            }
        };
        self.instance.state.borrow_mut().advance();

        let value = slot
            .borrow()
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| RenderError::msg("state slot holds a foreign type"))?;

        Ok((
            value,
            StateHandle {
                slot,
                instance: self.instance.id,
                runtime: Rc::downgrade(&self.rt.inner),
                _marker: PhantomData,
            },
        ))
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// The async primitive: a cell created lazily on first call, bound to a
    /// frozen snapshot of the current context frame, restarted whenever a
    /// dependency changes (shallow per-element comparison).
    ///
    /// In [`RenderMode::SyncOnly`] a cell still pending after its
    /// synchronous prefix is a [`RenderError::DataMissing`] failure.
    pub fn resource<T: 'static>(
        &mut self,
        deps: Vec<Dep>,
        fetcher: impl Fn(&ResourceJob<T>) -> ResourceOutcome<T> + 'static,
    ) -> Result<Resource<T>, RenderError> {
        let existing = self.instance.state.borrow_mut().expect_slot(HookKind::Resource)?;
        let raw = resource::erase_fetcher(fetcher);
        let snapshot = self
            .rt
            .inner
            .current_frame
            .borrow()
            .clone()
            .unwrap_or_else(|| self.instance.state.borrow().owner_frame.clone());
        let owner = self.instance.id;

        let cell = match existing {
            Some(HookSlot::Resource(cell_id)) => {
                let cell = self
                    .rt
                    .inner
                    .cells
                    .borrow()
                    .get(cell_id)
                    .ok_or_else(|| RenderError::msg("resource cell vanished"))?;

                let deps_changed = {
                    let st = cell.state.borrow();
                    !deps_equal(&st.deps, &deps)
                };
                {
                    // The latest closure captures the latest environment;
                    // restarts must not run a stale one.
                    let mut st = cell.state.borrow_mut();
                    st.fetcher = raw;
                }
                if deps_changed {
                    {
                        let mut st = cell.state.borrow_mut();
                        st.deps = deps;
                        st.snapshot = snapshot;
                        st.generation += 1;
                        // The rendering instance reads the fresh state right
                        // below; only a later turn should notify it again.
                        st.subscribers.swap_remove(&owner);
                    }
                    resource::start_cell(self.rt, &cell).map_err(as_render_error)?;
                }
                cell
            }
            Some(HookSlot::State(_)) => {
                return Err(RenderError::msg("hook slot kind mismatch"));
            }
            None => {
                let cell = self.rt.inner.cells.borrow_mut().insert(|id| CellState {
                    value: None,
                    pending: true,
                    error: None,
                    generation: 0,
                    deps,
                    abort: AbortSignal::new(),
                    subscribers: IndexSet::new(),
                    snapshot,
                    fetcher: raw,
                    owner,
                    label: format!("{owner}/{id}"),
                });
                self.instance
                    .state
                    .borrow_mut()
                    .push_slot(HookKind::Resource, HookSlot::Resource(cell.id));
                resource::start_cell(self.rt, &cell).map_err(as_render_error)?;
                cell
            }
        };
        self.instance.state.borrow_mut().advance();

        // Subscribe after start: a synchronously-resolved start has already
        // committed, and this instance sees the value in this very render.
        cell.state.borrow_mut().subscribers.insert(owner);

        let (value_any, pending, error) = {
            let st = cell.state.borrow();
            (st.value.clone(), st.pending, st.error.clone())
        };
        if pending && self.rt.inner.render_mode.get() == RenderMode::SyncOnly {
            let label = cell.state.borrow().label.clone();
            return Err(RenderError::DataMissing { label });
        }
        let value = match value_any {
            Some(any) => Some(
                any.downcast::<T>()
                    .map_err(|_| RenderError::msg("resource cell holds a foreign type"))?,
            ),
            None => None,
        };

        Ok(Resource {
            value,
            pending,
            error,
            cell: cell.id,
            runtime: Rc::downgrade(&self.rt.inner),
        })
    }

    // =========================================================================
    // Context
    // =========================================================================

    /// Nearest provided value for `ctx`, or its static default.
    pub fn read_context<T: 'static>(&self, ctx: &Context<T>) -> Result<Rc<T>, RenderError> {
        context::read_in(&self.rt.inner.current_frame, ctx)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Register a mount operation: runs once, after the commit that mounts
    /// this instance. Registrations from later re-renders are ignored.
    pub fn on_mount(&mut self, f: impl FnOnce() + 'static) {
        let mut st = self.instance.state.borrow_mut();
        if !st.mounted {
            st.mount_ops.push(Box::new(f));
        }
    }

    /// Register a cleanup: runs on unmount or replacement. Registrations
    /// from later re-renders are ignored.
    pub fn on_cleanup(&mut self, f: impl FnOnce() + 'static) {
        self.on_cleanup_fallible(move || {
            f();
            Ok(())
        })
    }

    /// Fallible cleanup variant; failures follow the engine's cleanup mode.
    pub fn on_cleanup_fallible(
        &mut self,
        f: impl FnOnce() -> Result<(), CleanupError> + 'static,
    ) {
        let mut st = self.instance.state.borrow_mut();
        if !st.mounted {
            st.cleanups.push(Box::new(f));
        }
    }
}

fn as_render_error(err: EngineError) -> RenderError {
    RenderError::Message(err.to_string())
}

// =============================================================================
// State Handle
// =============================================================================

/// Writable handle to one state slot.
///
/// Writes never run renders inline; they schedule the owning instance's
/// re-evaluation and, outside a handler or flush, drain the queue before
/// returning - which is where any render failure surfaces.
pub struct StateHandle<T: Clone + 'static> {
    slot: Rc<RefCell<Box<dyn Any>>>,
    instance: InstanceId,
    runtime: Weak<RuntimeInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Clone + 'static> Clone for StateHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            instance: self.instance,
            runtime: self.runtime.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Clone + 'static> StateHandle<T> {
    /// Current value of the slot.
    pub fn get(&self) -> T {
        // The hook validated the slot type when it produced this handle.
        self.slot.borrow().downcast_ref::<T>().cloned().unwrap()
    }

    /// Write the slot and schedule the owning instance's re-render.
    pub fn set(&self, value: T) -> Result<(), EngineError> {
        *self.slot.borrow_mut() = Box::new(value);
        let Some(inner) = self.runtime.upgrade() else {
            return Ok(());
        };
        Runtime::from_inner(inner).schedule_render(self.instance)
    }

    /// Read-modify-write convenience.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<(), EngineError> {
        let next = f(&self.get());
        self.set(next)
    }
}
