//! Host document - the live mutable tree the commit engine mutates.
//!
//! The document is a generational arena of [`LiveNode`]s addressed by
//! [`NodeId`] handles. The shell owns the document (typically behind
//! `Rc<RefCell<Document>>`); the engine holds a `Weak` reference plus
//! auxiliary side tables keyed by `NodeId`, so it never extends a node's
//! lifetime and a reused arena slot can never alias a stale handle
//! (the generation moves on).
//!
//! Only the commit engine is supposed to mutate an attached subtree;
//! detached construction (staging) is free-for-all until the swap.

mod document;
mod node;

pub use document::{Document, NodeId};
pub use node::LiveNode;
