//! Error taxonomy.
//!
//! Two layers:
//! - [`RenderError`] - produced inside a render function or hook call, and
//!   propagated out of component code with `?`. "Async attempted where
//!   synchronous output is mandatory" is the [`RenderError::DataMissing`]
//!   variant, not an unwound panic.
//! - [`EngineError`] - surfaced by runtime entry points (mount, dispatch,
//!   flush). A structural render failure aborts the whole pending commit
//!   and leaves the live tree untouched before it reaches the caller.
//!
//! Resource staleness is deliberately absent: a discarded result from a
//! superseded generation is not an error, it is logged at trace level.

use thiserror::Error;

// =============================================================================
// Render Errors
// =============================================================================

/// Failure inside a render function or hook call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Component code failed.
    #[error("render failed: {0}")]
    Message(String),

    /// A hook slot changed kind between renders (conditional hook usage).
    #[error("hook order changed between renders: slot {slot} was {previous}, is now {current}")]
    HookOrder {
        slot: usize,
        previous: &'static str,
        current: &'static str,
    },

    /// A render used fewer or more hook slots than the previous one.
    #[error("render used {current} hook slots, previous render used {previous}")]
    HookCount { previous: usize, current: usize },

    /// `read_context` with no live render frame and no replay snapshot.
    #[error("context read with no active frame and no replay snapshot")]
    NoActiveFrame,

    /// A component's output must normalize to exactly one concrete root.
    #[error("component produced {count} root nodes, exactly one is required")]
    MultipleRoots { count: usize },

    /// An async boundary was reached in synchronous-only rendering.
    #[error("resource has no data in synchronous-only rendering: {label}")]
    DataMissing { label: String },
}

impl RenderError {
    /// Shorthand for a plain message failure.
    pub fn msg(message: impl Into<String>) -> Self {
        RenderError::Message(message.into())
    }
}

// =============================================================================
// Cleanup Errors
// =============================================================================

/// Failure reported by a fallible cleanup function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CleanupError(pub String);

impl From<&str> for CleanupError {
    fn from(value: &str) -> Self {
        CleanupError(value.to_string())
    }
}

impl From<String> for CleanupError {
    fn from(value: String) -> Self {
        CleanupError(value)
    }
}

/// One instance's cleanup failure, collected during teardown.
///
/// `instance` is the packed instance id; failures never block sibling or
/// descendant cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub instance: u64,
    pub message: String,
}

// =============================================================================
// Resource Errors
// =============================================================================

/// Rejection value of a resource cell.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ResourceError(pub String);

impl From<&str> for ResourceError {
    fn from(value: &str) -> Self {
        ResourceError(value.to_string())
    }
}

impl From<String> for ResourceError {
    fn from(value: String) -> Self {
        ResourceError(value)
    }
}

// =============================================================================
// Engine Errors
// =============================================================================

/// Failure surfaced by a runtime entry point.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A render threw. The pending commit was rolled back; the live tree is
    /// exactly as the last successful commit left it.
    #[error("structural render failure: {0}")]
    StructuralRender(#[source] RenderError),

    /// An internal consistency check failed. Fatal in development builds,
    /// skipped in production.
    #[error("commit invariant violated: {0}")]
    CommitInvariant(String),

    /// One or more cleanup functions failed during teardown (strict mode).
    /// Raised only after every cleanup ran; the commit itself stands.
    #[error("cleanup failed for {} instance(s)", .failures.len())]
    CleanupFailure { failures: Vec<CleanupFailure> },

    /// A synchronous-only render reached a pending resource.
    #[error("synchronous-only render reached a pending resource: {label}")]
    DataMissing { label: String },

    /// The host document was dropped; the engine never extends its lifetime.
    #[error("host document was dropped")]
    DocumentDetached,
}

impl From<RenderError> for EngineError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::DataMissing { label } => EngineError::DataMissing { label },
            other => EngineError::StructuralRender(other),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
