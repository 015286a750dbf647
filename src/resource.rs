//! Resource cells - the async primitive's state machine.
//!
//! A cell is pending | resolved(value) | rejected(error), tagged by a
//! monotonically increasing generation. Starting a cell runs the fetcher's
//! synchronous prefix inside the cell's frozen context snapshot; a `Ready`
//! return commits immediately, while a `Pending` return parks until the
//! shell resolves the [`ResourceJob`]. A continuation commits only if the
//! cell's generation still equals the generation captured at start -
//! otherwise the result is silently discarded (staleness is not an error).
//!
//! Subscribers are instance ids; every state change schedules their
//! re-evaluation through the scheduler, never inline, so even a
//! synchronously-resolved refresh defers notification until after the
//! current turn.

use std::any::Any;
use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use tracing::trace;

use crate::context::{self, Context, ContextFrame};
use crate::error::{EngineError, RenderError, ResourceError};
use crate::instance::InstanceId;
use crate::runtime::{Runtime, RuntimeInner};
use crate::types::Dep;

// =============================================================================
// Identity
// =============================================================================

/// Stable handle to a resource cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellId {
    index: u32,
    generation: u32,
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}.{}", self.index, self.generation)
    }
}

// =============================================================================
// Abort Signal
// =============================================================================

/// Cancellation handle for one in-flight execution.
///
/// Aborting fires every registered listener once; a listener registered
/// after the fact runs immediately.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Rc<AbortInner>,
}

struct AbortInner {
    aborted: StdCell<bool>,
    listeners: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(AbortInner {
                aborted: StdCell::new(false),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.get()
    }

    /// Register a cancellation listener.
    pub fn on_abort(&self, f: impl FnOnce() + 'static) {
        if self.inner.aborted.get() {
            f();
        } else {
            self.inner.listeners.borrow_mut().push(Box::new(f));
        }
    }

    pub(crate) fn fire(&self) {
        if self.inner.aborted.replace(true) {
            return;
        }
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        for listener in listeners {
            listener();
        }
    }
}

// =============================================================================
// Outcomes and Jobs
// =============================================================================

/// What a fetcher's synchronous prefix produced.
pub enum ResourceOutcome<T> {
    /// Value or rejection available right now; commits immediately.
    Ready(Result<T, ResourceError>),
    /// The continuation will arrive through the job later.
    Pending,
}

/// Type-erased outcome stored alongside the erased fetcher.
pub(crate) enum RawOutcome {
    Ready(Result<Rc<dyn Any>, ResourceError>),
    Pending,
}

pub(crate) type RawFetcher = Rc<dyn Fn(&RawJob) -> RawOutcome>;

/// Untyped completion token: cell id plus the generation captured at start.
#[derive(Clone)]
pub(crate) struct RawJob {
    pub runtime: Weak<RuntimeInner>,
    pub cell: CellId,
    pub generation: u64,
    pub signal: AbortSignal,
}

impl RawJob {
    fn deliver(&self, result: Result<Rc<dyn Any>, ResourceError>) -> Result<(), EngineError> {
        let Some(inner) = self.runtime.upgrade() else {
            return Ok(());
        };
        let rt = Runtime::from_inner(inner);
        let cell = self.cell;
        let generation = self.generation;
        rt.schedule(Box::new(move |rt| commit_result(rt, cell, generation, result)))
    }
}

/// Typed completion token handed to a fetcher.
///
/// Clone it out of the synchronous prefix to resolve later; the engine
/// commits the result only if the cell has not been superseded meanwhile.
pub struct ResourceJob<T: 'static> {
    raw: RawJob,
    _marker: PhantomData<fn(T)>,
}

impl<T: 'static> Clone for ResourceJob<T> {
    fn clone(&self) -> Self {
        Self { raw: self.raw.clone(), _marker: PhantomData }
    }
}

impl<T: 'static> ResourceJob<T> {
    /// Deliver a value. Enqueued through the scheduler; discarded without
    /// error if the cell's generation moved on.
    pub fn resolve(&self, value: T) -> Result<(), EngineError> {
        self.raw.deliver(Ok(Rc::new(value)))
    }

    /// Deliver a rejection. Same staleness rules as [`resolve`].
    ///
    /// [`resolve`]: ResourceJob::resolve
    pub fn reject(&self, error: impl Into<ResourceError>) -> Result<(), EngineError> {
        self.raw.deliver(Err(error.into()))
    }

    /// The cancellation signal for this execution.
    pub fn signal(&self) -> AbortSignal {
        self.raw.signal.clone()
    }

    /// Register a cancellation listener on this execution's signal.
    pub fn on_abort(&self, f: impl FnOnce() + 'static) {
        self.raw.signal.on_abort(f)
    }

    /// Generation this job was issued under.
    pub fn generation(&self) -> u64 {
        self.raw.generation
    }

    /// Read a context through the frozen snapshot.
    ///
    /// Only valid during the synchronous prefix (the snapshot is installed
    /// as the replay frame); after suspension there is no live frame.
    pub fn read_context<C: 'static>(&self, ctx: &Context<C>) -> Result<Rc<C>, RenderError> {
        let Some(inner) = self.runtime_inner() else {
            return Err(RenderError::NoActiveFrame);
        };
        context::read_in(&inner.current_frame, ctx)
    }

    fn runtime_inner(&self) -> Option<Rc<RuntimeInner>> {
        self.raw.runtime.upgrade()
    }
}

/// Wrap a typed fetcher into the erased form stored on the cell.
pub(crate) fn erase_fetcher<T: 'static>(
    fetcher: impl Fn(&ResourceJob<T>) -> ResourceOutcome<T> + 'static,
) -> RawFetcher {
    Rc::new(move |raw: &RawJob| {
        let typed = ResourceJob::<T> { raw: raw.clone(), _marker: PhantomData };
        match fetcher(&typed) {
            ResourceOutcome::Ready(Ok(value)) => RawOutcome::Ready(Ok(Rc::new(value))),
            ResourceOutcome::Ready(Err(error)) => RawOutcome::Ready(Err(error)),
            ResourceOutcome::Pending => RawOutcome::Pending,
        }
    })
}

// =============================================================================
// Cell Storage
// =============================================================================

pub(crate) struct CellState {
    pub value: Option<Rc<dyn Any>>,
    pub pending: bool,
    pub error: Option<ResourceError>,
    pub generation: u64,
    pub deps: Vec<Dep>,
    pub abort: AbortSignal,
    pub subscribers: IndexSet<InstanceId>,
    pub snapshot: Rc<ContextFrame>,
    pub fetcher: RawFetcher,
    pub owner: InstanceId,
    pub label: String,
}

pub(crate) struct ResourceCell {
    pub id: CellId,
    pub state: RefCell<CellState>,
}

struct Slot {
    generation: u32,
    value: Option<Rc<ResourceCell>>,
}

/// Generational cell arena with a free pool.
#[derive(Default)]
pub(crate) struct CellArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl CellArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, build: impl FnOnce(CellId) -> CellState) -> Rc<ResourceCell> {
        let (index, generation) = if let Some(index) = self.free.pop() {
            (index, self.slots[index as usize].generation)
        } else {
            self.slots.push(Slot { generation: 0, value: None });
            (self.slots.len() as u32 - 1, 0)
        };
        let id = CellId { index, generation };
        let cell = Rc::new(ResourceCell { id, state: RefCell::new(build(id)) });
        self.slots[index as usize].value = Some(cell.clone());
        cell
    }

    pub fn get(&self, id: CellId) -> Option<Rc<ResourceCell>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.clone()
    }

    pub fn remove(&mut self, id: CellId) -> Option<Rc<ResourceCell>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation += 1;
        self.free.push(id.index);
        Some(value)
    }
}

// =============================================================================
// Cell Lifecycle
// =============================================================================

/// Start an execution: abort anything in flight, allocate a fresh abort
/// handle, run the fetcher's synchronous prefix inside the frozen snapshot.
///
/// A `Ready` return commits inline (generation unchanged since capture);
/// `Pending` leaves the cell pending until its job delivers.
pub(crate) fn start_cell(rt: &Runtime, cell: &Rc<ResourceCell>) -> Result<(), EngineError> {
    let old_abort = {
        let mut st = cell.state.borrow_mut();
        std::mem::replace(&mut st.abort, AbortSignal::new())
    };
    old_abort.fire();

    let (fetcher, snapshot, generation, job) = {
        let mut st = cell.state.borrow_mut();
        st.pending = true;
        st.error = None;
        let job = RawJob {
            runtime: Rc::downgrade(&rt.inner),
            cell: cell.id,
            generation: st.generation,
            signal: st.abort.clone(),
        };
        (st.fetcher.clone(), st.snapshot.clone(), st.generation, job)
    };

    let outcome = context::with_frame(&rt.inner.current_frame, snapshot, || (fetcher)(&job));

    match outcome {
        RawOutcome::Ready(result) => commit_result(rt, cell.id, generation, result),
        RawOutcome::Pending => Ok(()),
    }
}

/// Increment the generation and restart (the restart aborts what is in
/// flight).
pub(crate) fn refresh_cell(rt: &Runtime, cell: &Rc<ResourceCell>) -> Result<(), EngineError> {
    cell.state.borrow_mut().generation += 1;
    start_cell(rt, cell)
}

/// Commit a delivered result if its generation still matches.
///
/// Subscriber notification goes through the scheduler - a commit never
/// re-renders anything inline.
pub(crate) fn commit_result(
    rt: &Runtime,
    cell_id: CellId,
    generation: u64,
    result: Result<Rc<dyn Any>, ResourceError>,
) -> Result<(), EngineError> {
    let Some(cell) = rt.inner.cells.borrow().get(cell_id) else {
        trace!(cell = %cell_id, "result for destroyed cell discarded");
        return Ok(());
    };
    let subscribers: Vec<InstanceId> = {
        let mut st = cell.state.borrow_mut();
        if st.generation != generation {
            trace!(
                cell = %cell_id,
                issued = generation,
                current = st.generation,
                "stale result discarded"
            );
            return Ok(());
        }
        match result {
            Ok(value) => {
                st.value = Some(value);
                st.error = None;
            }
            Err(error) => st.error = Some(error),
        }
        st.pending = false;
        st.subscribers.iter().copied().collect()
    };
    for id in subscribers {
        rt.schedule_render(id)?;
    }
    Ok(())
}

/// Abort and destroy a cell (owner instance going away).
pub(crate) fn destroy_cell(rt: &Runtime, cell_id: CellId) {
    let removed = rt.inner.cells.borrow_mut().remove(cell_id);
    if let Some(cell) = removed {
        let (abort, owner) = {
            let st = cell.state.borrow();
            (st.abort.clone(), st.owner)
        };
        trace!(cell = %cell_id, owner = %owner, "cell destroyed");
        abort.fire();
    }
}

// =============================================================================
// Resource Handle
// =============================================================================

/// Snapshot of a cell's state at hook time, plus a refresh handle.
pub struct Resource<T: 'static> {
    pub(crate) value: Option<Rc<T>>,
    pub(crate) pending: bool,
    pub(crate) error: Option<ResourceError>,
    pub(crate) cell: CellId,
    pub(crate) runtime: Weak<RuntimeInner>,
}

impl<T: 'static> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            pending: self.pending,
            error: self.error.clone(),
            cell: self.cell,
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: 'static> Resource<T> {
    pub fn value(&self) -> Option<&T> {
        self.value.as_deref()
    }

    pub fn pending(&self) -> bool {
        self.pending
    }

    pub fn error(&self) -> Option<&ResourceError> {
        self.error.as_ref()
    }

    /// Supersede the in-flight execution and start over.
    pub fn refresh(&self) -> Result<(), EngineError> {
        let Some(inner) = self.runtime.upgrade() else {
            return Ok(());
        };
        let rt = Runtime::from_inner(inner);
        let cell = rt.inner.cells.borrow().get(self.cell);
        match cell {
            Some(cell) => refresh_cell(&rt, &cell),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
