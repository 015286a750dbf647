//! Context frames - lexical, snapshot-based propagation of provider values.
//!
//! Frames form a parent chain mirroring provider nesting. A frame is built
//! once and never mutated afterward: a provider re-render builds a fresh
//! frame, so any snapshot captured earlier (by a resource cell, say) stays
//! exactly as captured no matter what providers do later.
//!
//! The engine's "current frame" only exists during a synchronous span - a
//! render, or a replayed resource snapshot. [`with_frame`] installs a frame
//! with guaranteed restoration on every exit path, including early returns
//! from `?`.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RenderError;
use crate::vnode::{ProviderNode, VNode};

// =============================================================================
// Context Identity
// =============================================================================

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a defined context, shared by every clone of its handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

// =============================================================================
// Frames
// =============================================================================

/// One link in the provider chain: values defined at this level plus the
/// enclosing frame.
///
/// The value map is lazily allocated - render-entry frames carry none.
pub struct ContextFrame {
    parent: Option<Rc<ContextFrame>>,
    values: Option<HashMap<ContextId, Rc<dyn Any>>>,
}

impl ContextFrame {
    /// The empty frame a root render starts from.
    pub fn root() -> Rc<ContextFrame> {
        Rc::new(ContextFrame { parent: None, values: None })
    }

    /// A provider frame: `parent` plus one defined value.
    pub fn with_value(
        parent: Rc<ContextFrame>,
        id: ContextId,
        value: Rc<dyn Any>,
    ) -> Rc<ContextFrame> {
        let mut values = HashMap::new();
        values.insert(id, value);
        Rc::new(ContextFrame { parent: Some(parent), values: Some(values) })
    }

    /// Nearest defined value for `id`, walking frame -> parent.
    pub fn lookup(&self, id: ContextId) -> Option<Rc<dyn Any>> {
        let mut frame = self;
        loop {
            if let Some(values) = &frame.values {
                if let Some(value) = values.get(&id) {
                    return Some(value.clone());
                }
            }
            match &frame.parent {
                Some(parent) => frame = parent,
                None => return None,
            }
        }
    }
}

// =============================================================================
// Current Frame (scoped acquisition)
// =============================================================================

/// Slot holding the engine's current frame. Owned by the runtime; `None`
/// outside synchronous spans.
pub(crate) type FrameSlot = RefCell<Option<Rc<ContextFrame>>>;

struct FrameGuard<'a> {
    slot: &'a FrameSlot,
    previous: Option<Rc<ContextFrame>>,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        *self.slot.borrow_mut() = self.previous.take();
    }
}

/// Install `frame` for the duration of `f`, restoring the previous frame on
/// every exit path.
pub(crate) fn with_frame<R>(slot: &FrameSlot, frame: Rc<ContextFrame>, f: impl FnOnce() -> R) -> R {
    let previous = slot.replace(Some(frame));
    let _guard = FrameGuard { slot, previous };
    f()
}

/// Read through the current frame; fails when no frame is live.
pub(crate) fn read_in<T: 'static>(slot: &FrameSlot, ctx: &Context<T>) -> Result<Rc<T>, RenderError> {
    let current = slot.borrow().clone();
    let Some(frame) = current else {
        return Err(RenderError::NoActiveFrame);
    };
    match frame.lookup(ctx.id) {
        Some(value) => value
            .downcast::<T>()
            .map_err(|_| RenderError::msg(format!("context {} holds a foreign type", ctx.id))),
        None => Ok(ctx.default.clone()),
    }
}

// =============================================================================
// Context API
// =============================================================================

/// A defined context: identity plus static default.
pub struct Context<T> {
    id: ContextId,
    default: Rc<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, default: self.default.clone(), _marker: PhantomData }
    }
}

/// Define a context with a static default value.
pub fn define_context<T: 'static>(default: T) -> Context<T> {
    Context {
        id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
        default: Rc::new(default),
        _marker: PhantomData,
    }
}

impl<T: 'static> Context<T> {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Provide `value` to `children`: builds a [`VNode::Provider`] whose
    /// subtree renders under a frame parented on the frame current where
    /// the provider sits.
    pub fn provide(&self, value: T, children: impl IntoIterator<Item = VNode>) -> VNode {
        VNode::Provider(ProviderNode {
            context: self.id,
            value: Rc::new(value),
            children: children.into_iter().collect(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_walks_chain() {
        let theme = define_context::<&'static str>("light");
        let size = define_context::<i64>(12);

        let root = ContextFrame::root();
        let outer = ContextFrame::with_value(root, theme.id(), Rc::new("dark"));
        let inner = ContextFrame::with_value(outer.clone(), size.id(), Rc::new(20i64));

        let slot: FrameSlot = RefCell::new(None);
        with_frame(&slot, inner, || {
            assert_eq!(*read_in(&slot, &theme).unwrap(), "dark");
            assert_eq!(*read_in(&slot, &size).unwrap(), 20);
        });

        with_frame(&slot, outer, || {
            // Falls back to the static default below the provider.
            assert_eq!(*read_in(&slot, &size).unwrap(), 12);
        });
    }

    #[test]
    fn test_no_active_frame() {
        let ctx = define_context(0i64);
        let slot: FrameSlot = RefCell::new(None);
        assert_eq!(read_in(&slot, &ctx).unwrap_err(), RenderError::NoActiveFrame);
    }

    #[test]
    fn test_with_frame_restores_on_exit() {
        let slot: FrameSlot = RefCell::new(None);
        let a = ContextFrame::root();
        let b = ContextFrame::root();

        with_frame(&slot, a.clone(), || {
            assert!(slot.borrow().is_some());
            with_frame(&slot, b, || {
                assert!(slot.borrow().is_some());
            });
            // Inner frame popped, outer restored.
            let current = slot.borrow().clone().unwrap();
            assert!(Rc::ptr_eq(&current, &a));
        });
        assert!(slot.borrow().is_none());
    }

    #[test]
    fn test_snapshot_stays_frozen() {
        let ctx = define_context::<i64>(0);
        let root = ContextFrame::root();
        let first = ContextFrame::with_value(root.clone(), ctx.id(), Rc::new(1i64));

        // A later "provider re-render" builds a fresh frame; the earlier
        // snapshot still sees the value it captured.
        let second = ContextFrame::with_value(root, ctx.id(), Rc::new(2i64));

        let slot: FrameSlot = RefCell::new(None);
        with_frame(&slot, first, || {
            assert_eq!(*read_in(&slot, &ctx).unwrap(), 1);
        });
        with_frame(&slot, second, || {
            assert_eq!(*read_in(&slot, &ctx).unwrap(), 2);
        });
    }
}
