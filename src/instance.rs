//! Component instances - per-position render state.
//!
//! An instance maps 1:1 to a tree position for as long as it is re-invoked
//! from the same parent slot under the same key (or position, if unkeyed).
//! It owns:
//! - the ordered hook-slot list plus the hook-order validator
//! - the cleanup-function and mount-operation lists
//! - the owner context frame replayed on every re-render
//! - an evaluation-generation counter bumped on each reuse, so stale async
//!   work can detect obsolescence
//!
//! Instances live in a generational arena with a free pool, mirroring the
//! node arena: a freed id never aliases a later occupant.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::context::ContextFrame;
use crate::error::{CleanupError, RenderError};
use crate::host::NodeId;
use crate::resource::CellId;
use crate::types::Props;
use crate::vnode::RenderFn;

// =============================================================================
// Identity
// =============================================================================

/// Stable handle to an instance: arena index plus slot generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceId {
    index: u32,
    generation: u32,
}

impl InstanceId {
    /// Packed form, for diagnostics and cleanup reports.
    pub fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}.{}", self.index, self.generation)
    }
}

#[cfg(test)]
impl InstanceId {
    /// Placeholder id for unit tests that need an owner.
    pub(crate) fn from_raw_for_tests() -> Self {
        Self { index: 0, generation: 0 }
    }
}

// =============================================================================
// Hook Slots
// =============================================================================

/// What kind of hook occupies a slot. Checked on every render: a kind
/// mismatch means conditional hook usage, which the validator rejects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HookKind {
    State,
    Resource,
}

impl HookKind {
    pub fn name(self) -> &'static str {
        match self {
            HookKind::State => "state",
            HookKind::Resource => "resource",
        }
    }
}

/// Storage for one hook slot.
#[derive(Clone)]
pub(crate) enum HookSlot {
    /// Type-erased state value, shared with outstanding [`StateHandle`]s.
    ///
    /// [`StateHandle`]: crate::scope::StateHandle
    State(Rc<RefCell<Box<dyn Any>>>),
    /// Backing resource cell.
    Resource(CellId),
}

impl core::fmt::Debug for HookSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HookSlot::State(_) => f.write_str("State(..)"),
            HookSlot::Resource(cell) => f.debug_tuple("Resource").field(cell).finish(),
        }
    }
}

/// Fallible teardown callback.
pub(crate) type CleanupFn = Box<dyn FnOnce() -> Result<(), CleanupError>>;

/// Post-commit mount callback.
pub(crate) type MountFn = Box<dyn FnOnce()>;

// =============================================================================
// Instance
// =============================================================================

/// A component instance. The render function is fixed at creation; all
/// mutable state lives behind one `RefCell` so hook calls can borrow it
/// briefly without pinning the arena.
pub struct Instance {
    pub(crate) id: InstanceId,
    pub(crate) render: RenderFn,
    pub(crate) state: RefCell<InstanceState>,
}

pub(crate) struct InstanceState {
    pub props: Props,
    pub key: Option<String>,
    pub slots: SmallVec<[HookSlot; 4]>,
    pub kinds: SmallVec<[HookKind; 4]>,
    pub cursor: usize,
    pub first_render_done: bool,
    pub cleanups: Vec<CleanupFn>,
    pub mount_ops: Vec<MountFn>,
    pub owner_frame: Rc<ContextFrame>,
    pub mounted: bool,
    /// Bumped on every evaluation; async work captured under an older value
    /// is obsolete.
    pub generation: u64,
    /// Root live node this instance produced, once mounted.
    pub host: Option<NodeId>,
    /// Component layer index at the host slot (0 = outermost).
    pub layer: usize,
    /// Root instances diff a whole child list instead of a single slot.
    pub is_root: bool,
}

impl InstanceState {
    /// Reset the hook cursor and bump the evaluation generation.
    pub fn begin_render(&mut self) {
        self.cursor = 0;
        self.generation += 1;
    }

    /// Fetch the slot at the cursor, validating its kind.
    ///
    /// Returns `None` when the slot does not exist yet - only legal on the
    /// first render; afterwards a missing slot means the hook count grew.
    pub fn expect_slot(&mut self, kind: HookKind) -> Result<Option<HookSlot>, RenderError> {
        let at = self.cursor;
        if let Some(&existing) = self.kinds.get(at) {
            if existing != kind {
                return Err(RenderError::HookOrder {
                    slot: at,
                    previous: existing.name(),
                    current: kind.name(),
                });
            }
            Ok(Some(self.slots[at].clone()))
        } else if self.first_render_done {
            Err(RenderError::HookCount { previous: self.kinds.len(), current: at + 1 })
        } else {
            Ok(None)
        }
    }

    /// Install a freshly created slot at the cursor (first render only).
    pub fn push_slot(&mut self, kind: HookKind, slot: HookSlot) {
        debug_assert_eq!(self.cursor, self.slots.len());
        self.kinds.push(kind);
        self.slots.push(slot);
    }

    /// Advance past the slot at the cursor.
    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    /// Validate the slot count after a render completed.
    pub fn finish_render(&mut self) -> Result<(), RenderError> {
        if self.first_render_done && self.cursor != self.kinds.len() {
            return Err(RenderError::HookCount {
                previous: self.kinds.len(),
                current: self.cursor,
            });
        }
        self.first_render_done = true;
        Ok(())
    }

    /// Resource cells owned by this instance's hook slots.
    pub fn cell_ids(&self) -> SmallVec<[CellId; 4]> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                HookSlot::Resource(id) => Some(*id),
                HookSlot::State(_) => None,
            })
            .collect()
    }
}

// =============================================================================
// Arena
// =============================================================================

struct Slot {
    generation: u32,
    value: Option<Rc<Instance>>,
}

/// Generational instance arena with a free pool.
#[derive(Default)]
pub(crate) struct InstanceArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl InstanceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        render: RenderFn,
        props: Props,
        key: Option<String>,
        owner_frame: Rc<ContextFrame>,
        layer: usize,
        is_root: bool,
    ) -> Rc<Instance> {
        let (index, generation) = if let Some(index) = self.free.pop() {
            (index, self.slots[index as usize].generation)
        } else {
            self.slots.push(Slot { generation: 0, value: None });
            (self.slots.len() as u32 - 1, 0)
        };
        let id = InstanceId { index, generation };
        let instance = Rc::new(Instance {
            id,
            render,
            state: RefCell::new(InstanceState {
                props,
                key,
                slots: SmallVec::new(),
                kinds: SmallVec::new(),
                cursor: 0,
                first_render_done: false,
                cleanups: Vec::new(),
                mount_ops: Vec::new(),
                owner_frame,
                mounted: false,
                generation: 0,
                host: None,
                layer,
                is_root,
            }),
        });
        self.slots[index as usize].value = Some(instance.clone());
        instance
    }

    pub fn get(&self, id: InstanceId) -> Option<Rc<Instance>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.clone()
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<Rc<Instance>> {
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
// Tests
// =============================================================================
