//! # weft
//!
//! Declarative UI rendering core for Rust.
//!
//! Components are functions producing immutable virtual trees; the engine
//! reconciles them against a live mutable document with transactional
//! commits, a single-threaded cooperative scheduler, snapshot-based context
//! propagation, and generation-guarded async resources.
//!
//! ## Architecture
//!
//! ```text
//! Component fns -> VNode tree -> plan (diff + staged builds) -> atomic commit
//!                     ^                                              |
//!                     +----- scheduler (state writes, events, -------+
//!                            resource completions)
//! ```
//!
//! - The **live tree** ([`Document`]) is owned by the embedding shell; the
//!   engine keeps a weak reference plus side tables keyed by [`NodeId`] and
//!   only ever mutates it inside a commit.
//! - The **scheduler** serializes every render-triggering operation. A
//!   handler runs to completion with implicit flushes suppressed, then the
//!   queue drains before dispatch returns - if event A was fully handled
//!   before event B was dispatched, everything A did is visible to B.
//! - **Context frames** snapshot provider values lexically; a resource
//!   captures its frame at creation and replays it for the fetcher's
//!   synchronous prefix, no matter what providers re-render afterward.
//! - **Resource cells** tag async work with a generation; a continuation
//!   from a superseded generation is silently discarded.
//! - Rendering a subtree is all-or-nothing: replacements are built detached
//!   and swapped in only on full success.
//!
//! ## Modules
//!
//! - [`types`] - prop values, props, listeners, events, deps, modes
//! - [`vnode`] - virtual tree and builders ([`el`], [`text`], [`component`])
//! - [`host`] - the live document (generational node arena)
//! - [`context`] - context frames and the [`define_context`] API
//! - [`scheduler`] - the cooperative task queue
//! - [`scope`] - the in-render hook API ([`Scope::use_state`],
//!   [`Scope::resource`], [`Scope::read_context`])
//! - [`resource`] - resource cells, jobs, abort signals
//! - [`runtime`] - the engine shell ([`Runtime::mount`],
//!   [`Runtime::dispatch`], [`Runtime::flush`])

pub mod context;
pub mod error;
pub mod host;
pub mod instance;
pub mod resource;
pub mod runtime;
pub mod scheduler;
pub mod scope;
pub mod types;
pub mod vnode;

mod reconcile;

// Re-export commonly used items
pub use context::{define_context, Context, ContextFrame, ContextId};

pub use error::{
    CleanupError, CleanupFailure, EngineError, RenderError, ResourceError,
};

pub use host::{Document, LiveNode, NodeId};

pub use instance::{Instance, InstanceId};

pub use resource::{AbortSignal, CellId, Resource, ResourceJob, ResourceOutcome};

pub use runtime::{MountHandle, Runtime};

pub use scheduler::SchedulerState;

pub use scope::{Scope, StateHandle};

pub use types::{
    deps_equal, CleanupMode, Dep, Event, Listener, PropValue, Props, RenderMode,
};

pub use vnode::{
    component, component_from, el, fragment, text, ComponentNode, IntrinsicNode,
    ProviderNode, RenderFn, RenderResult, VNode,
};
