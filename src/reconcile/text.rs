//! Bulk text strategy for very large, mostly-text child lists.
//!
//! Lists above [`BULK_TEXT_MIN_LEN`] where at least
//! [`BULK_TEXT_SIMPLE_PERCENT`]% of children are simple (a text leaf, or an
//! element with a single text child) skip per-child diffing: existing text
//! nodes are reused positionally, everything else is built detached, and
//! the whole list commits as one atomic tree replacement. Near-linear cost
//! on large homogeneous lists, at the price of rebuilding the non-text
//! minority.

use tracing::debug;

use crate::error::EngineError;
use crate::host::NodeId;
use crate::vnode::VNode;

use super::diff::build_staged;
use super::normalize::{ConcreteNode, NormItem};
use super::ops::{MutationOp, PlanCx};

/// Minimum list length for the bulk strategy.
pub(crate) const BULK_TEXT_MIN_LEN: usize = 1024;
/// Minimum share of simple children, percent.
pub(crate) const BULK_TEXT_SIMPLE_PERCENT: usize = 80;

fn is_simple(item: &NormItem) -> bool {
    match &item.vnode {
        ConcreteNode::Text(_) => true,
        ConcreteNode::Intrinsic(n) => {
            n.children.len() == 1 && matches!(n.children[0], VNode::Text(_))
        }
        ConcreteNode::Component(_) => false,
    }
}

/// Whether a child list qualifies for the bulk strategy.
pub(crate) fn bulk_eligible(items: &[NormItem]) -> bool {
    if items.len() < BULK_TEXT_MIN_LEN {
        return false;
    }
    let simple = items.iter().filter(|item| is_simple(item)).count();
    simple * 100 >= items.len() * BULK_TEXT_SIMPLE_PERCENT
}

/// Plan the bulk rebuild: positional text-node reuse, staged everything
/// else, one `ReplaceChildren`.
pub(crate) fn plan_bulk_text(
    cx: &mut PlanCx,
    parent: NodeId,
    old_children: &[NodeId],
    items: &[NormItem],
) -> Result<(), EngineError> {
    debug!(parent = %parent, len = items.len(), "bulk text strategy");
    let mark = cx.ops.len();

    let mut final_children = Vec::with_capacity(items.len());
    let mut entries = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let reusable = match &item.vnode {
            ConcreteNode::Text(_) => old_children.get(i).copied().filter(|&node| {
                cx.doc.borrow().text(node).is_some()
                    && !cx.rt.inner.backrefs.borrow().contains_key(&node)
            }),
            _ => None,
        };
        let node = match (reusable, &item.vnode) {
            (Some(node), ConcreteNode::Text(data)) => {
                let changed = cx.doc.borrow().text(node) != Some(data.as_str());
                if changed {
                    cx.push(MutationOp::SetText { node, data: data.clone() });
                }
                node
            }
            _ => build_staged(cx, item, 0)?,
        };
        if let Some(key) = item.key() {
            entries.push((key.to_string(), node));
        }
        final_children.push(node);
    }

    cx.push(MutationOp::ReplaceChildren { parent, children: final_children });
    let had_keyed = cx.rt.inner.keyed.borrow().contains_key(&parent);
    if !entries.is_empty() || had_keyed {
        cx.push(MutationOp::SetKeyedEntries { parent, entries });
    }

    #[cfg(debug_assertions)]
    {
        let structural = cx.ops[mark..]
            .iter()
            .filter(|op| op.is_structural_on(parent))
            .count();
        if structural != 1 {
            return Err(EngineError::CommitInvariant(format!(
                "bulk text strategy emitted {structural} structural mutations on one parent"
            )));
        }
    }
    #[cfg(not(debug_assertions))]
    let _ = mark;

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
