//! Scheduler - single-threaded cooperative task queue.
//!
//! Every render-triggering operation (event handlers, state writes,
//! resource completions) goes through this queue, which serializes them
//! relative to external events:
//! - tasks execute FIFO; `enqueue` never runs a task inline
//! - `flush` drains to quiescence and is re-entrant-safe (an inner call
//!   returns immediately, the outer loop picks up new work)
//! - while `in_handler` is set, implicit flushes are suppressed so a
//!   handler completes fully before its side effects are committed
//!
//! A task error propagates to the flush caller; by the time it does, the
//! failed task has already rolled back its own subtree (commit staging is
//! discarded before the error leaves the reconciler). Tasks enqueued after
//! the failed one stay queued.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::error::EngineError;
use crate::runtime::Runtime;

/// A unit of scheduled work.
pub type Task = Box<dyn FnOnce(&Runtime) -> Result<(), EngineError>>;

/// Debug/test snapshot of the queue. Not a stability contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerState {
    /// Tasks currently waiting.
    pub queue_length: usize,
    /// Whether a flush is in progress.
    pub running: bool,
    /// Total tasks ever enqueued.
    pub task_count: u64,
}

/// Single-threaded FIFO task queue.
pub struct Scheduler {
    queue: RefCell<VecDeque<Task>>,
    running: Cell<bool>,
    in_handler: Cell<bool>,
    task_count: Cell<u64>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            running: Cell::new(false),
            in_handler: Cell::new(false),
            task_count: Cell::new(0),
        }
    }

    /// Append a task. Never runs it inline.
    pub fn enqueue(&self, task: Task) {
        self.task_count.set(self.task_count.get() + 1);
        self.queue.borrow_mut().push_back(task);
    }

    /// Drain the queue to quiescence.
    ///
    /// Tasks enqueued while draining are drained too. Re-entrant calls
    /// return immediately; the outer flush owns the loop.
    pub fn flush(&self, rt: &Runtime) -> Result<(), EngineError> {
        if self.running.get() {
            return Ok(());
        }
        self.running.set(true);
        loop {
            let task = self.queue.borrow_mut().pop_front();
            let Some(task) = task else { break };
            if let Err(err) = task(rt) {
                self.running.set(false);
                return Err(err);
            }
        }
        self.running.set(false);
        Ok(())
    }

    /// While true, implicit flushes are suppressed; the handler's work is
    /// committed in one flush after it returns.
    pub fn set_in_handler(&self, value: bool) {
        self.in_handler.set(value);
    }

    pub fn in_handler(&self) -> bool {
        self.in_handler.get()
    }

    /// Whether an enqueue may trigger an inline flush right now.
    pub fn may_flush_inline(&self) -> bool {
        !self.in_handler.get() && !self.running.get()
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState {
            queue_length: self.queue.borrow().len(),
            running: self.running.get(),
            task_count: self.task_count.get(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn test_fifo_order() {
        let rt = Runtime::new();
        let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));

        for i in 0..4 {
            let order = order.clone();
            rt.scheduler().enqueue(Box::new(move |_| {
                order.borrow_mut().push(i);
                Ok(())
            }));
        }

        rt.flush().unwrap();
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_reentrant_enqueue_drains_before_flush_returns() {
        let rt = Runtime::new();
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let order_outer = order.clone();
        rt.scheduler().enqueue(Box::new(move |rt| {
            order_outer.borrow_mut().push("outer");
            let order_inner = order_outer.clone();
            rt.scheduler().enqueue(Box::new(move |_| {
                order_inner.borrow_mut().push("inner");
                Ok(())
            }));
            // Nested flush is a no-op; the outer loop drains.
            rt.flush()?;
            assert_eq!(*order_outer.borrow(), vec!["outer"]);
            Ok(())
        }));

        rt.flush().unwrap();
        assert_eq!(*order.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_error_leaves_later_tasks_queued() {
        let rt = Runtime::new();
        let ran: Rc<Cell<bool>> = Rc::new(Cell::new(false));

        rt.scheduler()
            .enqueue(Box::new(|_| Err(EngineError::CommitInvariant("boom".into()))));
        let ran_clone = ran.clone();
        rt.scheduler().enqueue(Box::new(move |_| {
            ran_clone.set(true);
            Ok(())
        }));

        assert!(rt.flush().is_err());
        assert!(!ran.get());
        assert_eq!(rt.scheduler().state().queue_length, 1);

        rt.flush().unwrap();
        assert!(ran.get());
    }

    #[test]
    fn test_state_counts_tasks() {
        let rt = Runtime::new();
        rt.scheduler().enqueue(Box::new(|_| Ok(())));
        rt.scheduler().enqueue(Box::new(|_| Ok(())));

        let state = rt.scheduler().state();
        assert_eq!(state.queue_length, 2);
        assert_eq!(state.task_count, 2);
        assert!(!state.running);

        rt.flush().unwrap();
        assert_eq!(rt.scheduler().state().queue_length, 0);
        assert_eq!(rt.scheduler().state().task_count, 2);
    }
}
